use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use dare_bundle::texture::mip_level_count;
use dare_bundle::{BundleBuilder, Environment, EnvironmentId, Opacity, PixelFormat, Texture, TextureId};
use dare_preprocess::bootstrap::{HeadlessDevice, HeadlessSettings};
use dare_preprocess::{CubemapDesc, PreprocessError, Processor, ProcessorSettings};
use tracing::{debug, info, warn};

use crate::environment::{Cubemap, EquirectImage};
use crate::importer::{self, PendingTexture};
use crate::settings::BakeSettings;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BakeReport {
    pub textures: usize,
    /// Textures whose mip chain came back from the device
    pub mipmapped: usize,
    pub environments: usize,
}

/// A texture on the device; `texture` keeps everything but its pixels
#[derive(Debug)]
struct InFlight {
    id: TextureId,
    texture: Texture,
    output_size: usize,
    mip_levels: u32,
}

/// Creates a headless device, or `None` when there is no usable one
pub fn open_processor(settings: &BakeSettings) -> Option<Processor> {
    let headless = HeadlessSettings::default().set_validation(settings.validation);
    match HeadlessDevice::new(&headless).and_then(HeadlessDevice::into_context) {
        Ok(context) => Some(Processor::new(
            context,
            ProcessorSettings::default().set_max_pending(settings.max_pending),
        )),
        Err(e) => {
            warn!("No device to preprocess on, textures keep a single level: {}", e);
            None
        }
    }
}

/// Fills in every pending texture, with its mip chain when a processor is given
pub fn process_textures(
    mut processor: Option<&mut Processor>,
    builder: &mut BundleBuilder,
    textures: Vec<PendingTexture>,
) -> Result<usize> {
    let mut in_flight: VecDeque<InFlight> = VecDeque::new();
    let mut mipmapped = 0;
    for PendingTexture { id, texture } in textures {
        let Some(processor) = processor.as_deref_mut() else {
            builder.set_texture(id, texture)?;
            continue;
        };
        // collapses to a single texel anyway
        if texture.is_uniform() {
            builder.set_texture(id, texture)?;
            continue;
        }
        while processor.is_saturated() {
            let Some(job) = in_flight.pop_front() else { break };
            receive(processor, builder, job)?;
            mipmapped += 1;
        }
        match submit(processor, id, texture)? {
            Ok(job) => in_flight.push_back(job),
            Err(texture) => builder.set_texture(id, texture)?,
        }
    }
    if let Some(processor) = processor {
        while let Some(job) = in_flight.pop_front() {
            receive(processor, builder, job)?;
            mipmapped += 1;
        }
    }
    Ok(mipmapped)
}

/// Submits `texture`, handing it back when the device cannot blit its format
fn submit(
    processor: &mut Processor,
    id: TextureId,
    mut texture: Texture,
) -> Result<std::result::Result<InFlight, Texture>> {
    let result = match processor.submit_texture(
        id,
        texture.width,
        texture.height,
        texture.format.channels(),
        &texture.data,
    ) {
        // three channel formats are rarely blittable, widen to four and retry once
        Err(PreprocessError::UnsupportedFormat(format)) if texture.format == PixelFormat::R8G8B8 => {
            debug!("{:?} unsupported for {}, widening to RGBA", format, id);
            let opaque = vec![u8::MAX; texture.width as usize * texture.height as usize];
            texture = Texture::from_pixels(
                texture.name,
                texture.width,
                texture.height,
                3,
                &texture.data,
                Some(Opacity {
                    channels: 1,
                    data: &opaque,
                }),
            )?;
            processor.submit_texture(id, texture.width, texture.height, 4, &texture.data)
        }
        result => result,
    };
    match result {
        Ok(output_size) => {
            let mip_levels = processor.texture_mip_levels(id)?;
            texture.data = Vec::new();
            Ok(Ok(InFlight {
                id,
                texture,
                output_size,
                mip_levels,
            }))
        }
        Err(PreprocessError::UnsupportedFormat(format)) => {
            warn!("Device cannot blit {:?}, {} keeps a single level", format, id);
            Ok(Err(texture))
        }
        Err(e) => Err(e).with_context(|| format!("failed to submit {}", id)),
    }
}

fn receive(processor: &mut Processor, builder: &mut BundleBuilder, job: InFlight) -> Result<()> {
    let mut data = vec![0u8; job.output_size];
    processor
        .receive_processed_texture(job.id, &mut data)
        .with_context(|| format!("failed to receive {}", job.id))?;
    builder.set_texture(
        job.id,
        Texture {
            data,
            mip_levels: job.mip_levels,
            ..job.texture
        },
    )?;
    Ok(())
}

/// Projects an equirectangular HDR image into a skybox and irradiance cubemap pair
pub fn bake_environment(
    processor: Option<&mut Processor>,
    builder: &mut BundleBuilder,
    path: &Path,
    settings: &BakeSettings,
) -> Result<EnvironmentId> {
    let mut source = EquirectImage::load(path)?;
    let skybox = CubemapDesc {
        face_size: settings.face_size,
        mip_levels: mip_level_count(settings.face_size, settings.face_size),
    };
    if let Some(processor) = processor {
        let id = EnvironmentId::from_index(builder.num_environments());
        let (width, height) = (source.width(), source.height());
        match processor.submit_environment(id, width, height, source.as_bytes(), skybox) {
            Ok(output_size) => {
                let mut staged = vec![0f32; output_size / size_of::<f32>()];
                processor
                    .receive_processed_environment(id, bytemuck::cast_slice_mut(&mut staged))
                    .with_context(|| format!("failed to receive {}", id))?;
                source = EquirectImage::new(width, height, staged)?;
            }
            Err(PreprocessError::UnsupportedFormat(format)) => {
                warn!("Device cannot copy {:?}, staying on the host", format);
            }
            Err(e) => return Err(e).with_context(|| format!("failed to submit {}", id)),
        }
    }

    let skybox = Cubemap::project(&source, skybox.face_size).with_mip_chain();
    let irradiance = skybox.irradiance(settings.irradiance_size);
    let name = match path.file_stem() {
        Some(stem) => builder.add_string(stem.to_string_lossy()),
        None => dare_bundle::StringId::INVALID,
    };
    let id = builder.add_environment(Environment {
        name,
        skybox: skybox.into_image(),
        irradiance: irradiance.into_image(),
    })?;
    info!(
        "Baked {} into {} ({}x{} faces)",
        path.display(),
        id,
        settings.face_size,
        settings.face_size
    );
    Ok(id)
}

/// Imports the scene, preprocesses its textures and environment and writes the bundle
pub fn bake(settings: &BakeSettings) -> Result<BakeReport> {
    let mut builder = BundleBuilder::new();
    let scene = importer::import(&settings.scene, &mut builder)?;
    let mut processor = if settings.use_gpu {
        open_processor(settings)
    } else {
        None
    };

    let textures = scene.textures.len();
    let mipmapped = process_textures(processor.as_mut(), &mut builder, scene.textures)?;
    let environments = match &settings.environment {
        Some(path) => {
            bake_environment(processor.as_mut(), &mut builder, path, settings)?;
            1
        }
        None => 0,
    };
    drop(processor);

    builder
        .write(&settings.output)
        .with_context(|| format!("failed to write {}", settings.output.display()))?;
    Ok(BakeReport {
        textures,
        mipmapped,
        environments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dare_bundle::{Bundle, StringId};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dare_bake_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// One textured triangle moved by its node
    fn write_scene(dir: &Path) -> PathBuf {
        let mut bin: Vec<u8> = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        bin.extend([0u16, 1, 2].iter().flat_map(|index| index.to_le_bytes()));
        bin.extend([0u8; 2]);
        std::fs::write(dir.join("triangle.bin"), &bin).unwrap();

        image::RgbaImage::from_fn(4, 4, |x, y| image::Rgba([x as u8 * 60, y as u8 * 60, 0, 128]))
            .save(dir.join("albedo.png"))
            .unwrap();

        let gltf = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "name": "main", "nodes": [0] }],
            "nodes": [{ "name": "triangle", "mesh": 0, "translation": [0.0, 0.0, 5.0] }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }] }],
            "materials": [{
                "name": "painted",
                "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 }, "metallicFactor": 0.0 }
            }],
            "textures": [{ "source": 0 }],
            "images": [{ "uri": "albedo.png" }],
            "buffers": [{ "uri": "triangle.bin", "byteLength": 44 }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ]
        }"#;
        let path = dir.join("triangle.gltf");
        std::fs::write(&path, gltf).unwrap();
        path
    }

    #[test]
    fn test_bake_without_device() {
        let dir = scratch("scene");
        let scene = write_scene(&dir);
        let output = dir.join("triangle.bundle");
        let report = bake(&BakeSettings::new(&scene, &output).set_use_gpu(false)).unwrap();
        assert_eq!(
            report,
            BakeReport {
                textures: 1,
                mipmapped: 0,
                environments: 0,
            }
        );

        let bundle = Bundle::load(&output).unwrap();
        let (_, texture) = bundle.textures().next().unwrap();
        assert_eq!((texture.width, texture.height, texture.mip_levels), (4, 4, 1));
        assert_eq!(texture.format, PixelFormat::R8G8B8A8);
        // opaque material, alpha forced to one
        assert!(texture.data.chunks_exact(4).all(|texel| texel[3] == 255));
        assert_eq!(texture.name, Some("image0/base_color"));

        let material = bundle.materials()[0];
        assert_eq!(bundle.string(material.name), Some("painted"));
        assert!(material.base_color.is_valid());
        assert_eq!(material.metallic_factor, 0.0);

        let mesh = bundle.meshes()[0];
        assert_eq!(bundle.mesh_indices(&mesh), &[0, 1, 2]);
        let vertices = bundle.mesh_vertices(&mesh);
        assert_eq!(vertices[0].normal, [0.0, 0.0, 1.0]);

        let object = bundle.objects().next().unwrap();
        assert_eq!(object.name, Some("triangle"));
        // bounds stay in mesh space, the node translation lives in the transform
        assert_eq!(object.bounds, mesh.bounds);
        assert_eq!(object.bounds.max(), glam::Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(object.transform.w_axis.z, 5.0);
        let group = bundle.groups().next().unwrap();
        assert_eq!(group.name, Some("main"));
        assert_eq!(group.bounds, object.bounds);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_bake_environment_without_device() {
        let dir = scratch("environment");
        let hdr = dir.join("sky.hdr");
        image::DynamicImage::ImageRgb32F(image::Rgb32FImage::from_pixel(
            8,
            4,
            image::Rgb([0.5, 1.0, 2.0]),
        ))
        .save(&hdr)
        .unwrap();

        let mut builder = BundleBuilder::new();
        let settings = BakeSettings::new("", "")
            .set_face_size(4)
            .set_irradiance_size(2);
        let id = bake_environment(None, &mut builder, &hdr, &settings).unwrap();
        assert_eq!(id, EnvironmentId(1));

        let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();
        let environment = bundle.environment(id).unwrap();
        assert_eq!(environment.name, Some("sky"));
        assert_eq!(environment.skybox.mip_levels, 3);
        assert_eq!(environment.skybox.array_layers, 6);
        assert_eq!(environment.irradiance.width, 2);
        let irradiance: &[f32] = bytemuck::cast_slice(environment.irradiance.data);
        assert!((irradiance[2] - 2.0).abs() < 1e-2);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_textures_without_processor() {
        let mut builder = BundleBuilder::new();
        let id = builder.reserve_texture_id();
        let texture =
            Texture::from_pixels(StringId::INVALID, 2, 2, 1, &[1, 2, 3, 4], None).unwrap();
        let mipmapped =
            process_textures(None, &mut builder, vec![PendingTexture { id, texture }]).unwrap();
        assert_eq!(mipmapped, 0);
        assert!(builder.serialize().is_ok());
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_textures_with_processor() {
        let mut processor = open_processor(&BakeSettings::default()).unwrap();
        let mut builder = BundleBuilder::new();
        let pending: Vec<PendingTexture> = [1u32, 3, 4]
            .into_iter()
            .map(|channels| {
                let pixels: Vec<u8> = (0..16 * 8 * channels).map(|i| i as u8).collect();
                let texture =
                    Texture::from_pixels(StringId::INVALID, 16, 8, channels, &pixels, None)
                        .unwrap();
                PendingTexture {
                    id: builder.reserve_texture_id(),
                    texture,
                }
            })
            .collect();
        let mipmapped = process_textures(Some(&mut processor), &mut builder, pending).unwrap();
        assert_eq!(mipmapped, 3);

        let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();
        for (_, texture) in bundle.textures() {
            assert_eq!(texture.mip_levels, 5);
            assert_eq!(texture.level(4).map(<[u8]>::len), Some(texture.format.bytes_per_pixel() as usize));
        }
    }
}
