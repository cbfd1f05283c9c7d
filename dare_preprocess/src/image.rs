use std::ptr;

use ash::vk;
use dare_bundle::PixelFormat;
use derivative::Derivative;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::context::GpuContext;
use crate::{PreprocessError, Result};

pub fn vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::R8 => vk::Format::R8_UNORM,
        PixelFormat::R8G8 => vk::Format::R8G8_UNORM,
        PixelFormat::R8G8B8 => vk::Format::R8G8B8_UNORM,
        PixelFormat::R8G8B8A8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// Layout change together with the accesses it orders
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

impl LayoutTransition {
    /// Discards whatever a level held so it can be written by a copy or a blit
    pub const UNDEFINED_TO_TRANSFER_DST: Self = Self {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_stage_mask: vk::PipelineStageFlags2::NONE,
        src_access_mask: vk::AccessFlags2::NONE,
        dst_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
    };

    /// Makes a written level readable by the next blit or copy
    pub const TRANSFER_DST_TO_SRC: Self = Self {
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        dst_access_mask: vk::AccessFlags2::TRANSFER_READ,
    };
}

/// Device local image the jobs copy and blit through
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DeviceImage {
    handle: vk::Image,
    #[derivative(Debug = "ignore")]
    allocation: Option<Allocation>,
    desc: ImageDesc,
    #[derivative(Debug = "ignore")]
    context: GpuContext,
}

impl DeviceImage {
    pub fn new(context: &GpuContext, name: &str, desc: ImageDesc) -> Result<Self> {
        let device = context.device();
        let flags = if desc.array_layers == 6 && desc.width == desc.height {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let handle = unsafe {
            device
                .create_image(
                    &vk::ImageCreateInfo {
                        s_type: vk::StructureType::IMAGE_CREATE_INFO,
                        p_next: ptr::null(),
                        flags,
                        image_type: vk::ImageType::TYPE_2D,
                        format: vk_format(desc.format),
                        extent: vk::Extent3D {
                            width: desc.width,
                            height: desc.height,
                            depth: 1,
                        },
                        mip_levels: desc.mip_levels,
                        array_layers: desc.array_layers,
                        samples: vk::SampleCountFlags::TYPE_1,
                        tiling: vk::ImageTiling::OPTIMAL,
                        usage: vk::ImageUsageFlags::TRANSFER_SRC
                            | vk::ImageUsageFlags::TRANSFER_DST,
                        sharing_mode: vk::SharingMode::EXCLUSIVE,
                        queue_family_index_count: 0,
                        p_queue_family_indices: ptr::null(),
                        initial_layout: vk::ImageLayout::UNDEFINED,
                        _marker: Default::default(),
                    },
                    None,
                )
                .map_err(PreprocessError::DeviceAllocation)?
        };
        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let allocation =
            match context.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.destroy_image(handle, None) };
                    return Err(e);
                }
            };
        if let Err(e) =
            unsafe { device.bind_image_memory(handle, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_image(handle, None) };
            context.free(allocation)?;
            return Err(PreprocessError::DeviceAllocation(e));
        }

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkImage {:p}", handle);

        Ok(Self {
            handle,
            allocation: Some(allocation),
            desc,
            context: context.clone(),
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Barrier applying `transition` to every layer of `level_count` levels from `base_mip_level`
    pub fn barrier(
        &self,
        transition: LayoutTransition,
        base_mip_level: u32,
        level_count: u32,
    ) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            p_next: ptr::null(),
            src_stage_mask: transition.src_stage_mask,
            src_access_mask: transition.src_access_mask,
            dst_stage_mask: transition.dst_stage_mask,
            dst_access_mask: transition.dst_access_mask,
            old_layout: transition.old_layout,
            new_layout: transition.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: self.handle,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level,
                level_count,
                base_array_layer: 0,
                layer_count: self.desc.array_layers,
            },
            _marker: Default::default(),
        }
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkImage {:p}", self.handle);

        unsafe {
            self.context.device().destroy_image(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.context.free(allocation) {
                tracing::error!("Failed to free image memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_format() {
        assert_eq!(vk_format(PixelFormat::R8), vk::Format::R8_UNORM);
        assert_eq!(vk_format(PixelFormat::R8G8B8A8), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(
            vk_format(PixelFormat::R32G32B32A32Float),
            vk::Format::R32G32B32A32_SFLOAT
        );
    }

    #[test]
    fn test_transitions_chain() {
        // what one barrier leaves behind is what the next one expects
        assert_eq!(
            LayoutTransition::UNDEFINED_TO_TRANSFER_DST.new_layout,
            LayoutTransition::TRANSFER_DST_TO_SRC.old_layout
        );
        assert_eq!(
            LayoutTransition::UNDEFINED_TO_TRANSFER_DST.dst_access_mask,
            LayoutTransition::TRANSFER_DST_TO_SRC.src_access_mask
        );
    }
}
