use std::ptr;

use ash::vk;
use derivative::Derivative;
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::{PreprocessError, Result};

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Fence {
    handle: vk::Fence,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
}

impl Fence {
    pub fn new(device: ash::Device, flags: vk::FenceCreateFlags) -> Result<Self> {
        let handle = unsafe {
            device
                .create_fence(
                    &vk::FenceCreateInfo {
                        s_type: vk::StructureType::FENCE_CREATE_INFO,
                        p_next: ptr::null(),
                        flags,
                        _marker: Default::default(),
                    },
                    None,
                )
                .map_err(PreprocessError::DeviceAllocation)?
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkFence {:p}", handle);

        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Blocks until the fence is signalled or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.handle], true, timeout)
                .map_err(PreprocessError::DeviceWait)
        }
    }

    /// Whether the fence is signalled, without blocking
    pub fn is_signaled(&self) -> Result<bool> {
        unsafe {
            self.device
                .get_fence_status(self.handle)
                .map_err(PreprocessError::DeviceWait)
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkFence {:p}", self.handle);

        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}
