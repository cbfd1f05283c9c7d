use ash::vk;
use dare_bundle::texture::{mip_chain, mip_chain_size, mip_extent, mip_level_count};
use dare_bundle::PixelFormat;
use tracing::debug;

use crate::context::GpuContext;
use crate::image::{vk_format, DeviceImage, ImageDesc, LayoutTransition};
use crate::transfer::TransferJob;
use crate::{PreprocessError, Result};

fn subresource(level: u32, array_layers: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: level,
        base_array_layer: 0,
        layer_count: array_layers,
    }
}

fn corner(width: u32, height: u32) -> vk::Offset3D {
    vk::Offset3D {
        x: width as i32,
        y: height as i32,
        z: 1,
    }
}

/// One copy per level per layer, tightly packed back to back in mip-major order
pub fn copy_regions(
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    mip_levels: u32,
    array_layers: u32,
) -> Vec<vk::BufferImageCopy2<'static>> {
    mip_chain(width, height, bytes_per_pixel, mip_levels, array_layers)
        .into_iter()
        .flat_map(|mip| {
            (0..array_layers).map(move |layer| vk::BufferImageCopy2 {
                s_type: vk::StructureType::BUFFER_IMAGE_COPY_2,
                p_next: std::ptr::null(),
                buffer_offset: mip.layer_offset(layer),
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: mip.level,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: mip.width,
                    height: mip.height,
                    depth: 1,
                },
                _marker: Default::default(),
            })
        })
        .collect()
}

/// Blit from `level - 1` down into `level`
pub fn blit_region(
    width: u32,
    height: u32,
    level: u32,
    array_layers: u32,
) -> vk::ImageBlit2<'static> {
    let (src_width, src_height) = mip_extent(width, height, level - 1);
    let (dst_width, dst_height) = mip_extent(width, height, level);
    vk::ImageBlit2 {
        s_type: vk::StructureType::IMAGE_BLIT_2,
        p_next: std::ptr::null(),
        src_subresource: subresource(level - 1, array_layers),
        src_offsets: [vk::Offset3D::default(), corner(src_width, src_height)],
        dst_subresource: subresource(level, array_layers),
        dst_offsets: [vk::Offset3D::default(), corner(dst_width, dst_height)],
        _marker: Default::default(),
    }
}

/// Linear filtering when the format supports it, nearest otherwise
pub fn blit_filter(features: vk::FormatFeatureFlags) -> vk::Filter {
    if features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
        vk::Filter::LINEAR
    } else {
        vk::Filter::NEAREST
    }
}

/// Features a format needs for a job producing `mip_levels` levels
pub fn required_features(mip_levels: u32) -> vk::FormatFeatureFlags {
    let transfer = vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::TRANSFER_DST;
    if mip_levels > 1 {
        transfer | vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST
    } else {
        transfer
    }
}

/// Generates the full mip chain of one 2D texture on the device
#[derive(Debug)]
pub struct TextureJob {
    job: TransferJob,
    width: u32,
    height: u32,
    format: PixelFormat,
    mip_levels: u32,
}

impl TextureJob {
    /// Uploads tightly packed row-major pixels and records the mip generation and read back.
    /// With `generate_mip_maps` unset the job only round trips level 0.
    pub fn new(
        context: &GpuContext,
        width: u32,
        height: u32,
        channels: u32,
        data: &[u8],
        generate_mip_maps: bool,
    ) -> Result<Self> {
        let format = PixelFormat::from_channels(channels)
            .map_err(|_| PreprocessError::UnsupportedChannelLayout(channels))?;
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected || expected == 0 {
            return Err(PreprocessError::InputSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let mip_levels = if generate_mip_maps {
            mip_level_count(width, height)
        } else {
            1
        };

        let vk_format = vk_format(format);
        let features = context.format_features(vk_format)?;
        if !features.contains(required_features(mip_levels)) {
            return Err(PreprocessError::UnsupportedFormat(vk_format));
        }

        let bytes_per_pixel = format.bytes_per_pixel();
        let output_size = mip_chain_size(width, height, bytes_per_pixel, mip_levels, 1) as usize;
        let mut job = TransferJob::new(context, "texture staging", data.len(), output_size)?;
        job.staging_mut()?[..data.len()].copy_from_slice(data);

        let image = DeviceImage::new(
            context,
            "texture",
            ImageDesc {
                width,
                height,
                format,
                mip_levels,
                array_layers: 1,
            },
        )?;
        {
            let cmd = job.recording()?;
            let staging = job.staging_buffer().handle();

            cmd.pipeline_barrier(
                &[image.barrier(LayoutTransition::UNDEFINED_TO_TRANSFER_DST, 0, 1)],
                &[],
            );
            cmd.copy_buffer_to_image(
                staging,
                image.handle(),
                &copy_regions(width, height, bytes_per_pixel, 1, 1),
            );

            let filter = blit_filter(features);
            for level in 1..mip_levels {
                cmd.pipeline_barrier(
                    &[
                        image.barrier(LayoutTransition::TRANSFER_DST_TO_SRC, level - 1, 1),
                        image.barrier(LayoutTransition::UNDEFINED_TO_TRANSFER_DST, level, 1),
                    ],
                    &[],
                );
                cmd.blit_image(image.handle(), &blit_region(width, height, level, 1), filter);
            }

            cmd.pipeline_barrier(
                &[image.barrier(LayoutTransition::TRANSFER_DST_TO_SRC, mip_levels - 1, 1)],
                &[],
            );
            cmd.copy_image_to_buffer(
                image.handle(),
                staging,
                &copy_regions(width, height, bytes_per_pixel, mip_levels, 1),
            );
            cmd.pipeline_barrier(&[], &[job.staging_buffer().host_read_barrier()]);
        }
        job.attach_image(image);

        debug!(
            "Recorded {}x{} {:?} texture job with {} levels ({} bytes out)",
            width, height, format, mip_levels, output_size
        );
        Ok(Self {
            job,
            width,
            height,
            format,
            mip_levels,
        })
    }

    pub fn submit(&mut self) -> Result<()> {
        self.job.submit()
    }

    pub fn wait_for_completion(&mut self, destination: &mut [u8]) -> Result<()> {
        self.job.wait_for_completion(destination)
    }

    pub fn is_pending(&self) -> bool {
        self.job.is_pending()
    }

    pub fn output_size(&self) -> usize {
        self.job.output_size()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_regions_have_no_padding() {
        let regions = copy_regions(256, 256, 4, 9, 1);
        assert_eq!(regions.len(), 9);
        let mut offset = 0;
        for (level, region) in regions.iter().enumerate() {
            assert_eq!(region.buffer_offset, offset);
            assert_eq!(region.buffer_row_length, 0);
            assert_eq!(region.image_subresource.mip_level, level as u32);
            offset += region.image_extent.width as u64 * region.image_extent.height as u64 * 4;
        }
        assert_eq!(offset, 349_524);
    }

    #[test]
    fn test_copy_regions_per_layer() {
        let regions = copy_regions(4, 4, 16, 3, 6);
        assert_eq!(regions.len(), 18);
        // level 1 starts after all six layers of level 0
        assert_eq!(regions[6].buffer_offset, 4 * 4 * 16 * 6);
        assert_eq!(regions[7].buffer_offset, 4 * 4 * 16 * 6 + 2 * 2 * 16);
        assert_eq!(regions[7].image_subresource.base_array_layer, 1);
    }

    #[test]
    fn test_blit_region_halves() {
        let region = blit_region(300, 17, 1, 1);
        assert_eq!(region.src_offsets[1], corner(300, 17));
        assert_eq!(region.dst_offsets[1], corner(150, 8));
        let region = blit_region(300, 17, 8, 1);
        assert_eq!(region.src_offsets[1], corner(2, 1));
        assert_eq!(region.dst_offsets[1], corner(1, 1));
        assert_eq!(region.dst_subresource.mip_level, 8);
    }

    #[test]
    fn test_blit_filter() {
        assert_eq!(
            blit_filter(
                vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
            ),
            vk::Filter::LINEAR
        );
        assert_eq!(blit_filter(vk::FormatFeatureFlags::BLIT_SRC), vk::Filter::NEAREST);
    }

    #[test]
    fn test_required_features() {
        assert!(!required_features(1).contains(vk::FormatFeatureFlags::BLIT_SRC));
        assert!(required_features(2).contains(vk::FormatFeatureFlags::BLIT_DST));
    }
}
