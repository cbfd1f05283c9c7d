use std::collections::HashMap;
use std::ptr;
use std::sync::{Arc, Mutex};

use ash::vk;
use derivative::Derivative;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::bootstrap::HeadlessDevice;
use crate::{PreprocessError, Result};

#[derive(Derivative)]
#[derivative(Debug)]
struct ContextInner {
    #[derivative(Debug = "ignore")]
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    command_pool: Mutex<vk::CommandPool>,
    #[derivative(Debug = "ignore")]
    allocator: Mutex<Option<Allocator>>,
    format_features: Mutex<HashMap<vk::Format, vk::FormatFeatureFlags>>,
    /// Present when the context owns its device, dropped after everything above
    _owner: Option<HeadlessDevice>,
}

/// Device capability handed to the preprocessing jobs
///
/// Bundles the logical device, one queue, a command pool and a memory allocator. Cheap to clone;
/// every job keeps a clone so the pool and allocator outlive the resources allocated from them.
#[derive(Debug, Clone)]
pub struct GpuContext {
    inner: Arc<ContextInner>,
}

impl GpuContext {
    /// Builds a context over handles owned by the caller, who must keep them alive for as long as
    /// any clone of the context exists
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        queue_family: u32,
        queue: vk::Queue,
    ) -> Result<Self> {
        Self::create(
            instance.clone(),
            physical_device,
            device.clone(),
            queue_family,
            queue,
            None,
        )
    }

    /// Builds a context which owns, and eventually destroys, a headless device
    pub fn from_headless(headless: HeadlessDevice) -> Result<Self> {
        Self::create(
            headless.instance().clone(),
            headless.physical_device(),
            headless.device().clone(),
            headless.queue_family(),
            headless.queue(),
            Some(headless),
        )
    }

    fn create(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family: u32,
        queue: vk::Queue,
        owner: Option<HeadlessDevice>,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo {
                    s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::CommandPoolCreateFlags::TRANSIENT,
                    queue_family_index: queue_family,
                    _marker: Default::default(),
                },
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkCommandPool {:p}", command_pool);

        Ok(Self {
            inner: Arc::new(ContextInner {
                instance,
                physical_device,
                device,
                queue,
                queue_family,
                command_pool: Mutex::new(command_pool),
                allocator: Mutex::new(Some(allocator)),
                format_features: Mutex::new(HashMap::new()),
                _owner: owner,
            }),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.inner.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.inner.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.inner.queue_family
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.inner.physical_device
    }

    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let pool = self.inner.command_pool.lock()?;
        let handle = unsafe {
            self.inner
                .device
                .allocate_command_buffers(&vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    p_next: ptr::null(),
                    command_pool: *pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    _marker: Default::default(),
                })
                .map_err(PreprocessError::DeviceAllocation)?
        };
        handle
            .into_iter()
            .next()
            .ok_or(PreprocessError::DeviceAllocation(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ))
    }

    pub fn free_command_buffer(&self, handle: vk::CommandBuffer) -> Result<()> {
        let pool = self.inner.command_pool.lock()?;
        unsafe {
            self.inner.device.free_command_buffers(*pool, &[handle]);
        }
        Ok(())
    }

    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut allocator = self.inner.allocator.lock()?;
        let allocator = allocator.as_mut().ok_or(PreprocessError::PoisonError)?;
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    pub fn free(&self, allocation: Allocation) -> Result<()> {
        let mut allocator = self.inner.allocator.lock()?;
        if let Some(allocator) = allocator.as_mut() {
            allocator.free(allocation)?;
        }
        Ok(())
    }

    /// Optimal tiling features of `format`, queried once per format
    pub fn format_features(&self, format: vk::Format) -> Result<vk::FormatFeatureFlags> {
        let mut cache = self.inner.format_features.lock()?;
        let features = *cache.entry(format).or_insert_with(|| unsafe {
            self.inner
                .instance
                .get_physical_device_format_properties(self.inner.physical_device, format)
                .optimal_tiling_features
        });
        Ok(features)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let pool = match self.command_pool.get_mut() {
            Ok(pool) => *pool,
            Err(poisoned) => *poisoned.into_inner(),
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkCommandPool {:p}", pool);

        unsafe {
            self.device.destroy_command_pool(pool, None);
        }
        match self.allocator.get_mut() {
            Ok(allocator) => drop(allocator.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }
}
