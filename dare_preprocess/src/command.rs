//! Command buffers are split into [`CommandBuffer`], [`CommandBufferRecording`] and
//! [`CommandBufferExecutable`].
//!
//! The type state makes it impossible to record into a submitted buffer or to submit one that is
//! still recording. Buffers are freed by whoever allocated them from the pool.
use std::ptr;

use ash::vk;
use derivative::Derivative;

use crate::{PreprocessError, Result};

#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
}

impl CommandBuffer {
    pub fn new(handle: vk::CommandBuffer, device: ash::Device) -> Self {
        Self { handle, device }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn begin(self, flags: vk::CommandBufferUsageFlags) -> Result<CommandBufferRecording> {
        unsafe {
            self.device.begin_command_buffer(
                self.handle,
                &vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    p_next: ptr::null(),
                    flags,
                    p_inheritance_info: ptr::null(),
                    _marker: Default::default(),
                },
            )?
        };
        Ok(CommandBufferRecording {
            handle: self.handle,
            device: self.device,
        })
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBufferRecording {
    handle: vk::CommandBuffer,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
}

impl CommandBufferRecording {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Ends recording into the command buffer
    pub fn end(self) -> Result<CommandBufferExecutable> {
        unsafe { self.device.end_command_buffer(self.handle)? }
        Ok(CommandBufferExecutable {
            handle: self.handle,
            device: self.device,
        })
    }

    pub fn pipeline_barrier(
        &self,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier2(
                self.handle,
                &vk::DependencyInfo {
                    s_type: vk::StructureType::DEPENDENCY_INFO,
                    p_next: ptr::null(),
                    dependency_flags: vk::DependencyFlags::empty(),
                    memory_barrier_count: 0,
                    p_memory_barriers: ptr::null(),
                    buffer_memory_barrier_count: buffer_barriers.len() as u32,
                    p_buffer_memory_barriers: buffer_barriers.as_ptr(),
                    image_memory_barrier_count: image_barriers.len() as u32,
                    p_image_memory_barriers: image_barriers.as_ptr(),
                    _marker: Default::default(),
                },
            )
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        regions: &[vk::BufferImageCopy2<'_>],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image2(
                self.handle,
                &vk::CopyBufferToImageInfo2 {
                    s_type: vk::StructureType::COPY_BUFFER_TO_IMAGE_INFO_2,
                    p_next: ptr::null(),
                    src_buffer: buffer,
                    dst_image: image,
                    dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    region_count: regions.len() as u32,
                    p_regions: regions.as_ptr(),
                    _marker: Default::default(),
                },
            )
        }
    }

    pub fn copy_image_to_buffer(
        &self,
        image: vk::Image,
        buffer: vk::Buffer,
        regions: &[vk::BufferImageCopy2<'_>],
    ) {
        unsafe {
            self.device.cmd_copy_image_to_buffer2(
                self.handle,
                &vk::CopyImageToBufferInfo2 {
                    s_type: vk::StructureType::COPY_IMAGE_TO_BUFFER_INFO_2,
                    p_next: ptr::null(),
                    src_image: image,
                    src_image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_buffer: buffer,
                    region_count: regions.len() as u32,
                    p_regions: regions.as_ptr(),
                    _marker: Default::default(),
                },
            )
        }
    }

    /// Blits between two levels of the same image
    pub fn blit_image(&self, image: vk::Image, region: &vk::ImageBlit2<'_>, filter: vk::Filter) {
        unsafe {
            self.device.cmd_blit_image2(
                self.handle,
                &vk::BlitImageInfo2 {
                    s_type: vk::StructureType::BLIT_IMAGE_INFO_2,
                    p_next: ptr::null(),
                    src_image: image,
                    src_image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image: image,
                    dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    region_count: 1,
                    p_regions: region,
                    filter,
                    _marker: Default::default(),
                },
            )
        }
    }
}

/// Command buffer is in its executable state and can now be executed via queue submission
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBufferExecutable {
    handle: vk::CommandBuffer,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
}

impl CommandBufferExecutable {
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            p_next: ptr::null(),
            command_buffer: self.handle,
            device_mask: 0,
            _marker: Default::default(),
        }
    }

    /// Submits to `queue`, signalling `fence` once the device is done with it
    pub fn submit(self, queue: vk::Queue, fence: vk::Fence) -> Result<CommandBuffer> {
        let submit_info = self.submit_info();
        unsafe {
            self.device
                .queue_submit2(
                    queue,
                    &[vk::SubmitInfo2 {
                        s_type: vk::StructureType::SUBMIT_INFO_2,
                        p_next: ptr::null(),
                        flags: vk::SubmitFlags::empty(),
                        wait_semaphore_info_count: 0,
                        p_wait_semaphore_infos: ptr::null(),
                        command_buffer_info_count: 1,
                        p_command_buffer_infos: &submit_info,
                        signal_semaphore_info_count: 0,
                        p_signal_semaphore_infos: ptr::null(),
                        _marker: Default::default(),
                    }],
                    fence,
                )
                .map_err(PreprocessError::Vulkan)?
        };
        Ok(CommandBuffer {
            handle: self.handle,
            device: self.device,
        })
    }
}
