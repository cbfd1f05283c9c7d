use dare_bundle::texture::mip_chain_size;
use dare_bundle::PixelFormat;
use tracing::debug;

use crate::context::GpuContext;
use crate::image::{vk_format, DeviceImage, ImageDesc, LayoutTransition};
use crate::texture::{copy_regions, required_features};
use crate::transfer::TransferJob;
use crate::{PreprocessError, Result};

/// Shape of the cubemap an environment is projected into
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CubemapDesc {
    pub face_size: u32,
    pub mip_levels: u32,
}

impl CubemapDesc {
    pub const FACES: u32 = 6;

    /// Bytes of the tightly packed RGBA32F chain of all six faces
    pub fn linear_size(&self) -> u64 {
        mip_chain_size(
            self.face_size,
            self.face_size,
            PixelFormat::R32G32B32A32Float.bytes_per_pixel(),
            self.mip_levels,
            Self::FACES,
        )
    }
}

/// Stages an equirectangular RGBA32F image on the device and reads it back
///
/// The staging buffer is sized for the skybox chain as well so the same job can carry the
/// projected cubemap.
#[derive(Debug)]
pub struct EnvironmentJob {
    job: TransferJob,
    width: u32,
    height: u32,
    skybox: CubemapDesc,
}

impl EnvironmentJob {
    pub fn new(
        context: &GpuContext,
        width: u32,
        height: u32,
        source: &[u8],
        skybox: CubemapDesc,
    ) -> Result<Self> {
        let format = PixelFormat::R32G32B32A32Float;
        let expected = width as usize * height as usize * format.bytes_per_pixel() as usize;
        if source.len() != expected || expected == 0 {
            return Err(PreprocessError::InputSizeMismatch {
                expected,
                actual: source.len(),
            });
        }
        let vk_format = vk_format(format);
        if !context
            .format_features(vk_format)?
            .contains(required_features(1))
        {
            return Err(PreprocessError::UnsupportedFormat(vk_format));
        }

        let staging_size = source.len().max(skybox.linear_size() as usize);
        let mut job = TransferJob::new(context, "environment staging", staging_size, source.len())?;
        job.staging_mut()?[..source.len()].copy_from_slice(source);

        let image = DeviceImage::new(
            context,
            "environment source",
            ImageDesc {
                width,
                height,
                format,
                mip_levels: 1,
                array_layers: 1,
            },
        )?;
        {
            let cmd = job.recording()?;
            let staging = job.staging_buffer().handle();
            let regions = copy_regions(width, height, format.bytes_per_pixel(), 1, 1);
            cmd.pipeline_barrier(
                &[image.barrier(LayoutTransition::UNDEFINED_TO_TRANSFER_DST, 0, 1)],
                &[],
            );
            cmd.copy_buffer_to_image(staging, image.handle(), &regions);
            cmd.pipeline_barrier(
                &[image.barrier(LayoutTransition::TRANSFER_DST_TO_SRC, 0, 1)],
                &[],
            );
            cmd.copy_image_to_buffer(image.handle(), staging, &regions);
            cmd.pipeline_barrier(&[], &[job.staging_buffer().host_read_barrier()]);
        }
        job.attach_image(image);

        debug!(
            "Recorded {}x{} environment job, skybox faces of {} with {} levels",
            width, height, skybox.face_size, skybox.mip_levels
        );
        Ok(Self {
            job,
            width,
            height,
            skybox,
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

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn skybox(&self) -> CubemapDesc {
        self.skybox
    }
}
