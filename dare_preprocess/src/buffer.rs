use std::ptr;

use ash::vk;
use derivative::Derivative;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::context::GpuContext;
use crate::{PreprocessError, Result};

/// Host visible buffer both uploads and read backs go through
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StagingBuffer {
    handle: vk::Buffer,
    #[derivative(Debug = "ignore")]
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    #[derivative(Debug = "ignore")]
    context: GpuContext,
}

impl StagingBuffer {
    pub fn new(context: &GpuContext, name: &str, size: vk::DeviceSize) -> Result<Self> {
        let device = context.device();
        let handle = unsafe {
            device
                .create_buffer(
                    &vk::BufferCreateInfo {
                        s_type: vk::StructureType::BUFFER_CREATE_INFO,
                        p_next: ptr::null(),
                        flags: vk::BufferCreateFlags::empty(),
                        size: size.max(1),
                        usage: vk::BufferUsageFlags::TRANSFER_SRC
                            | vk::BufferUsageFlags::TRANSFER_DST,
                        sharing_mode: vk::SharingMode::EXCLUSIVE,
                        queue_family_index_count: 0,
                        p_queue_family_indices: ptr::null(),
                        _marker: Default::default(),
                    },
                    None,
                )
                .map_err(PreprocessError::DeviceAllocation)?
        };
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation =
            match context.allocate(name, requirements, MemoryLocation::GpuToCpu, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.destroy_buffer(handle, None) };
                    return Err(e);
                }
            };
        let bound = unsafe {
            device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        }
        .map_err(PreprocessError::DeviceAllocation)
        .and_then(|_| match allocation.mapped_ptr() {
            Some(_) => Ok(()),
            None => Err(PreprocessError::DeviceAllocation(
                vk::Result::ERROR_MEMORY_MAP_FAILED,
            )),
        });
        if let Err(e) = bound {
            unsafe { device.destroy_buffer(handle, None) };
            context.free(allocation)?;
            return Err(e);
        }

        #[cfg(feature = "log-lifetimes")]
        trace!("Created staging VkBuffer {:p} of {} bytes", handle, size);

        Ok(Self {
            handle,
            allocation: Some(allocation),
            size,
            context: context.clone(),
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .map(|bytes| &bytes[..self.size as usize])
            .unwrap_or_default()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size as usize;
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|bytes| &mut bytes[..size])
            .unwrap_or_default()
    }

    /// Barrier making transfer writes to the whole buffer visible to the host
    pub fn host_read_barrier(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2 {
            s_type: vk::StructureType::BUFFER_MEMORY_BARRIER_2,
            p_next: ptr::null(),
            src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
            src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::HOST,
            dst_access_mask: vk::AccessFlags2::HOST_READ,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: self.handle,
            offset: 0,
            size: vk::WHOLE_SIZE,
            _marker: Default::default(),
        }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying staging VkBuffer {:p}", self.handle);

        unsafe {
            self.context.device().destroy_buffer(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.context.free(allocation) {
                tracing::error!("Failed to free staging memory: {}", e);
            }
        }
    }
}
