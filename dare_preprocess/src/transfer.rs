use ash::vk;
use derivative::Derivative;
use tracing::{debug, error};

use crate::buffer::StagingBuffer;
use crate::command::{CommandBuffer, CommandBufferRecording};
use crate::context::GpuContext;
use crate::fence::Fence;
use crate::image::DeviceImage;
use crate::{PreprocessError, Result};

#[derive(Debug)]
enum JobState {
    Recording(CommandBufferRecording),
    Pending(CommandBuffer),
    Complete(CommandBuffer),
    /// Ending or submitting the command buffer failed
    Invalid,
}

/// One upload, transform and read back round trip through the device
///
/// Owns its command buffer, fence, staging buffer and any device images its commands touch.
/// Dropping a job that is still in flight waits for it first.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TransferJob {
    state: JobState,
    command_buffer: vk::CommandBuffer,
    fence: Fence,
    staging: StagingBuffer,
    images: Vec<DeviceImage>,
    output_size: usize,
    #[derivative(Debug = "ignore")]
    context: GpuContext,
}

impl TransferJob {
    /// Allocates a command buffer that is already recording and a staging buffer large enough for
    /// both the input and the output
    pub fn new(
        context: &GpuContext,
        name: &str,
        input_size: usize,
        output_size: usize,
    ) -> Result<Self> {
        let staging = StagingBuffer::new(context, name, input_size.max(output_size) as u64)?;
        let fence = Fence::new(context.device().clone(), vk::FenceCreateFlags::empty())?;
        let command_buffer = context.allocate_command_buffer()?;
        let recording = match CommandBuffer::new(command_buffer, context.device().clone())
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            Ok(recording) => recording,
            Err(e) => {
                context.free_command_buffer(command_buffer)?;
                return Err(e);
            }
        };
        Ok(Self {
            state: JobState::Recording(recording),
            command_buffer,
            fence,
            staging,
            images: Vec::new(),
            output_size,
            context: context.clone(),
        })
    }

    /// Host view of the staging buffer, only available before submission
    pub fn staging_mut(&mut self) -> Result<&mut [u8]> {
        match self.state {
            JobState::Recording(_) => Ok(self.staging.bytes_mut()),
            _ => Err(PreprocessError::AlreadySubmitted),
        }
    }

    pub fn staging_buffer(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn recording(&self) -> Result<&CommandBufferRecording> {
        match &self.state {
            JobState::Recording(recording) => Ok(recording),
            _ => Err(PreprocessError::AlreadySubmitted),
        }
    }

    /// Keeps `image` alive until the job is dropped
    pub fn attach_image(&mut self, image: DeviceImage) {
        self.images.push(image);
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, JobState::Pending(_))
    }

    /// Ends recording and submits. Does not block.
    pub fn submit(&mut self) -> Result<()> {
        let recording = match std::mem::replace(&mut self.state, JobState::Invalid) {
            JobState::Recording(recording) => recording,
            other => {
                self.state = other;
                return Err(PreprocessError::AlreadySubmitted);
            }
        };
        let pending = recording
            .end()?
            .submit(self.context.queue(), self.fence.handle())?;
        self.state = JobState::Pending(pending);
        Ok(())
    }

    /// Whether the device has finished, without blocking
    pub fn is_complete(&self) -> Result<bool> {
        match self.state {
            JobState::Pending(_) => self.fence.is_signaled(),
            JobState::Complete(_) => Ok(true),
            _ => Err(PreprocessError::NotSubmitted),
        }
    }

    /// Blocks until the device is done, then copies the output bytes into `destination`
    pub fn wait_for_completion(&mut self, destination: &mut [u8]) -> Result<()> {
        match std::mem::replace(&mut self.state, JobState::Invalid) {
            JobState::Pending(command_buffer) => {
                if let Err(e) = self.fence.wait(u64::MAX) {
                    self.state = JobState::Pending(command_buffer);
                    return Err(e);
                }
                self.state = JobState::Complete(command_buffer);
            }
            JobState::Complete(command_buffer) => self.state = JobState::Complete(command_buffer),
            other => {
                self.state = other;
                return Err(PreprocessError::NotSubmitted);
            }
        }

        if destination.len() < self.output_size {
            return Err(PreprocessError::DestinationTooSmall {
                expected: self.output_size,
                actual: destination.len(),
            });
        }
        destination[..self.output_size].copy_from_slice(&self.staging.bytes()[..self.output_size]);
        debug!("Read back {} bytes", self.output_size);
        Ok(())
    }
}

impl Drop for TransferJob {
    fn drop(&mut self) {
        if self.is_pending() {
            if let Err(e) = self.fence.wait(u64::MAX) {
                error!("Failed waiting on an in flight job: {}", e);
            }
        }
        if let Err(e) = self.context.free_command_buffer(self.command_buffer) {
            error!("Failed to free command buffer: {}", e);
        }
    }
}
