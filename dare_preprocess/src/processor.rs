use std::collections::HashMap;

use dare_bundle::{EnvironmentId, TextureId};
use tracing::{debug, trace};

use crate::context::GpuContext;
use crate::environment::{CubemapDesc, EnvironmentJob};
use crate::texture::TextureJob;
use crate::{PreprocessError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Record blits for the full mip chain. Without it textures come back with a single level.
    pub generate_mip_maps: bool,
    /// How many jobs a caller should keep in flight before receiving some
    pub max_pending: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            generate_mip_maps: true,
            max_pending: 16,
        }
    }
}

impl ProcessorSettings {
    pub fn set_generate_mip_maps(mut self, generate_mip_maps: bool) -> Self {
        self.generate_mip_maps = generate_mip_maps;
        self
    }

    pub fn set_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }
}

/// Keeps preprocessing jobs in flight on one device, keyed by the bundle id they will fill
#[derive(Debug)]
pub struct Processor {
    context: GpuContext,
    settings: ProcessorSettings,
    textures: HashMap<TextureId, TextureJob>,
    environments: HashMap<EnvironmentId, EnvironmentJob>,
}

impl Processor {
    pub fn new(context: GpuContext, settings: ProcessorSettings) -> Self {
        Self {
            context,
            settings,
            textures: HashMap::new(),
            environments: HashMap::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Jobs submitted but not yet received
    pub fn pending(&self) -> usize {
        self.textures.len() + self.environments.len()
    }

    pub fn is_saturated(&self) -> bool {
        self.pending() >= self.settings.max_pending
    }

    /// Ids of texture jobs not yet received, in no particular order
    pub fn pending_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.textures.keys().copied()
    }

    /// Records and submits a texture job, returning the bytes its result will take
    pub fn submit_texture(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        channels: u32,
        data: &[u8],
    ) -> Result<usize> {
        if self.textures.contains_key(&id) {
            return Err(PreprocessError::JobInFlight(id.raw()));
        }
        let mut job = TextureJob::new(
            &self.context,
            width,
            height,
            channels,
            data,
            self.settings.generate_mip_maps,
        )?;
        job.submit()?;
        let output_size = job.output_size();
        trace!("Submitted {} ({} bytes)", id, output_size);
        self.textures.insert(id, job);
        Ok(output_size)
    }

    /// Mip levels the job for `id` produces
    pub fn texture_mip_levels(&self, id: TextureId) -> Result<u32> {
        self.textures
            .get(&id)
            .map(TextureJob::mip_levels)
            .ok_or(PreprocessError::UnknownJobId(id.raw()))
    }

    /// Takes the job for `id` out of the processor, waits on it and copies its result into
    /// `destination`. The job's device resources are released before returning.
    pub fn receive_processed_texture(&mut self, id: TextureId, destination: &mut [u8]) -> Result<()> {
        let mut job = self
            .textures
            .remove(&id)
            .ok_or(PreprocessError::UnknownJobId(id.raw()))?;
        job.wait_for_completion(destination)?;
        trace!("Received {}", id);
        Ok(())
    }

    /// Stages an RGBA32F equirectangular image, returning the bytes read back on completion
    pub fn submit_environment(
        &mut self,
        id: EnvironmentId,
        width: u32,
        height: u32,
        source: &[u8],
        skybox: CubemapDesc,
    ) -> Result<usize> {
        if self.environments.contains_key(&id) {
            return Err(PreprocessError::JobInFlight(id.raw()));
        }
        let mut job = EnvironmentJob::new(&self.context, width, height, source, skybox)?;
        job.submit()?;
        let output_size = job.output_size();
        trace!("Submitted {} ({} bytes)", id, output_size);
        self.environments.insert(id, job);
        Ok(output_size)
    }

    pub fn receive_processed_environment(
        &mut self,
        id: EnvironmentId,
        destination: &mut [u8],
    ) -> Result<()> {
        let mut job = self
            .environments
            .remove(&id)
            .ok_or(PreprocessError::UnknownJobId(id.raw()))?;
        job.wait_for_completion(destination)?;
        trace!("Received {}", id);
        Ok(())
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if self.pending() > 0 {
            debug!("Draining {} unreceived jobs", self.pending());
        }
        self.textures.clear();
        self.environments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{HeadlessDevice, HeadlessSettings};

    fn processor(settings: ProcessorSettings) -> Processor {
        let context = HeadlessDevice::new(&HeadlessSettings::default())
            .unwrap()
            .into_context()
            .unwrap();
        Processor::new(context, settings)
    }

    #[test]
    fn test_settings_builder() {
        let settings = ProcessorSettings::default()
            .set_generate_mip_maps(false)
            .set_max_pending(0);
        assert!(!settings.generate_mip_maps);
        assert_eq!(settings.max_pending, 1);
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_unknown_id() {
        let mut processor = processor(ProcessorSettings::default());
        let mut out = [0u8; 4];
        assert!(matches!(
            processor.receive_processed_texture(TextureId(7), &mut out),
            Err(PreprocessError::UnknownJobId(7))
        ));
        assert!(matches!(
            processor.receive_processed_environment(EnvironmentId(1), &mut out),
            Err(PreprocessError::UnknownJobId(1))
        ));
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_texture_mip_chain() {
        let mut processor = processor(ProcessorSettings::default());
        let pixels = [10u8, 20, 30, 255].repeat(64);
        let size = processor
            .submit_texture(TextureId(1), 8, 8, 4, &pixels)
            .unwrap();
        assert_eq!(size, (64 + 16 + 4 + 1) * 4);
        assert_eq!(processor.texture_mip_levels(TextureId(1)).unwrap(), 4);
        assert!(matches!(
            processor.submit_texture(TextureId(1), 8, 8, 4, &pixels),
            Err(PreprocessError::JobInFlight(1))
        ));
        assert_eq!(processor.pending(), 1);

        let mut out = vec![0u8; size];
        processor
            .receive_processed_texture(TextureId(1), &mut out)
            .unwrap();
        assert_eq!(processor.pending(), 0);
        // a uniform image stays uniform at every level
        assert!(out.chunks_exact(4).all(|texel| texel == [10, 20, 30, 255]));
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_single_level_round_trip() {
        let mut processor = processor(ProcessorSettings::default().set_generate_mip_maps(false));
        let pixels: Vec<u8> = (0..=255u8).collect();
        let size = processor
            .submit_texture(TextureId(3), 8, 8, 4, &pixels)
            .unwrap();
        assert_eq!(size, pixels.len());
        let mut out = vec![0u8; size];
        processor
            .receive_processed_texture(TextureId(3), &mut out)
            .unwrap();
        assert_eq!(out, pixels);
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_environment_round_trip() {
        let mut processor = processor(ProcessorSettings::default());
        let source: Vec<u8> = (0..4 * 2 * 16).map(|i| i as u8).collect();
        let skybox = CubemapDesc {
            face_size: 2,
            mip_levels: 1,
        };
        let size = processor
            .submit_environment(EnvironmentId(1), 4, 2, &source, skybox)
            .unwrap();
        assert_eq!(size, source.len());
        let mut out = vec![0u8; size];
        processor
            .receive_processed_environment(EnvironmentId(1), &mut out)
            .unwrap();
        assert_eq!(out, source);
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_drop_drains() {
        let mut processor = processor(ProcessorSettings::default());
        let pixels = [1u8; 16 * 16];
        processor
            .submit_texture(TextureId(1), 16, 16, 1, &pixels)
            .unwrap();
        processor
            .submit_texture(TextureId(2), 16, 16, 1, &pixels)
            .unwrap();
        assert_eq!(processor.pending(), 2);
        let mut pending: Vec<TextureId> = processor.pending_textures().collect();
        pending.sort_by_key(|id| id.raw());
        assert_eq!(pending, [TextureId(1), TextureId(2)]);
        drop(processor);
    }
}
