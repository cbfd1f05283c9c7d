//! Host side environment baking: equirectangular HDR images are projected onto a cubemap with
//! a box filtered mip chain, and convolved into a diffuse irradiance cubemap.
//!
//! Faces follow the Vulkan cube layout (+X, -X, +Y, -Y, +Z, -Z) and texel `(x, y)` of a face
//! looks along [`texel_direction`].
use std::f32::consts::PI;
use std::path::Path;

use anyhow::{bail, Context, Result};
use dare_bundle::texture::{mip_chain_size, mip_level_count};
use dare_bundle::{EnvironmentImage, PixelFormat};
use glam::{Vec3, Vec4};
use rayon::prelude::*;
use tracing::debug;

pub const FACES: u32 = 6;
const CHANNELS: usize = 4;
/// Largest face the irradiance convolution reads from
const IRRADIANCE_SOURCE_SIZE: u32 = 32;

/// RGBA32F pixels in row-major order, latitude along y. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct EquirectImage {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl EquirectImage {
    pub fn new(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("environment image is {}x{}", width, height);
        }
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            bail!(
                "{}x{} environment image holds {} floats, expected {}",
                width,
                height,
                pixels.len(),
                expected
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .into_rgba32f();
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let index = (y * self.width as usize + x) * CHANNELS;
        Vec4::from_slice(&self.pixels[index..index + CHANNELS])
    }

    /// Bilinear sample looking along `direction`. Wraps around in longitude.
    pub fn sample(&self, direction: Vec3) -> Vec4 {
        let direction = direction.normalize();
        let u = 0.5 + direction.z.atan2(direction.x) / (2.0 * PI);
        let v = direction.y.clamp(-1.0, 1.0).acos() / PI;

        let x = u * self.width as f32 - 0.5;
        let y = v * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// Direction through `(u, v)` of `face`, both in `[0, 1]` with `v` growing downwards
pub fn face_direction(face: u32, u: f32, v: f32) -> Vec3 {
    let s = 2.0 * u - 1.0;
    let t = 2.0 * v - 1.0;
    match face {
        0 => Vec3::new(1.0, -t, -s),
        1 => Vec3::new(-1.0, -t, s),
        2 => Vec3::new(s, 1.0, t),
        3 => Vec3::new(s, -1.0, -t),
        4 => Vec3::new(s, -t, 1.0),
        _ => Vec3::new(-s, -t, -1.0),
    }
    .normalize()
}

/// Direction through the centre of texel `(x, y)`
pub fn texel_direction(face: u32, x: u32, y: u32, size: u32) -> Vec3 {
    face_direction(
        face,
        (x as f32 + 0.5) / size as f32,
        (y as f32 + 0.5) / size as f32,
    )
}

fn area_element(x: f32, y: f32) -> f32 {
    (x * y).atan2((x * x + y * y + 1.0).sqrt())
}

/// Solid angle one texel of a `size` wide face covers
pub fn texel_solid_angle(x: u32, y: u32, size: u32) -> f32 {
    let inv = 1.0 / size as f32;
    let u = 2.0 * (x as f32 + 0.5) * inv - 1.0;
    let v = 2.0 * (y as f32 + 0.5) * inv - 1.0;
    let (x0, x1) = (u - inv, u + inv);
    let (y0, y1) = (v - inv, v + inv);
    area_element(x0, y0) - area_element(x0, y1) - area_element(x1, y0) + area_element(x1, y1)
}

/// Six faces of RGBA32F texels with their whole mip chain, level-major
#[derive(Debug, Clone, PartialEq)]
pub struct Cubemap {
    pub face_size: u32,
    pub mip_levels: u32,
    pub data: Vec<f32>,
}

impl Cubemap {
    /// Samples `source` once per texel centre
    pub fn project(source: &EquirectImage, face_size: u32) -> Self {
        let data: Vec<[f32; 4]> = face_texels(face_size)
            .map(|(face, x, y)| source.sample(texel_direction(face, x, y, face_size)).to_array())
            .collect();
        Self {
            face_size,
            mip_levels: 1,
            data: data.into_iter().flatten().collect(),
        }
    }

    /// Appends box filtered levels down to 1x1
    pub fn with_mip_chain(mut self) -> Self {
        let mip_levels = mip_level_count(self.face_size, self.face_size);
        let mut size = self.face_size;
        let mut previous = self.data[..level_len(size)].to_vec();
        for _ in 1..mip_levels {
            previous = downsample(&previous, size);
            size = (size / 2).max(1);
            self.data.extend_from_slice(&previous);
        }
        self.mip_levels = mip_levels;
        self
    }

    /// Face size and texels of `level`
    pub fn level(&self, level: u32) -> Option<(u32, &[f32])> {
        if level >= self.mip_levels {
            return None;
        }
        let size = (self.face_size >> level).max(1);
        let offset = mip_chain_size(self.face_size, self.face_size, 1, level, FACES) as usize;
        Some((size, &self.data[offset * CHANNELS..(offset * CHANNELS + level_len(size))]))
    }

    /// Cosine weighted convolution, one output texel per direction of an `output_size` cubemap
    ///
    /// Reads from the first level no larger than 32 texels wide.
    pub fn irradiance(&self, output_size: u32) -> Self {
        let source_level = (0..self.mip_levels)
            .find(|level| (self.face_size >> level).max(1) <= IRRADIANCE_SOURCE_SIZE)
            .unwrap_or(self.mip_levels.saturating_sub(1));
        let (size, source) = self
            .level(source_level)
            .unwrap_or((self.face_size, &self.data[..]));

        // direction, radiance and solid angle of every source texel
        let samples: Vec<(Vec3, Vec3, f32)> = (0..FACES * size * size)
            .map(|index| {
                let face = index / (size * size);
                let (x, y) = (index % size, (index / size) % size);
                let offset = index as usize * CHANNELS;
                (
                    texel_direction(face, x, y, size),
                    Vec3::from_slice(&source[offset..offset + 3]),
                    texel_solid_angle(x, y, size),
                )
            })
            .collect();

        let data: Vec<[f32; 4]> = face_texels(output_size)
            .map(|(face, x, y)| {
                let normal = texel_direction(face, x, y, output_size);
                let mut irradiance = Vec3::ZERO;
                let mut weight = 0.0;
                for (direction, radiance, solid_angle) in &samples {
                    let cosine = normal.dot(*direction);
                    if cosine > 0.0 {
                        irradiance += *radiance * (cosine * solid_angle);
                        weight += cosine * solid_angle;
                    }
                }
                if weight > 0.0 {
                    irradiance /= weight;
                }
                irradiance.extend(1.0).to_array()
            })
            .collect();
        debug!(
            "Convolved {}x{} faces into {}x{} irradiance",
            size, size, output_size, output_size
        );
        Self {
            face_size: output_size,
            mip_levels: 1,
            data: data.into_iter().flatten().collect(),
        }
    }

    pub fn into_image(self) -> EnvironmentImage {
        EnvironmentImage {
            width: self.face_size,
            height: self.face_size,
            format: PixelFormat::R32G32B32A32Float,
            mip_levels: self.mip_levels,
            array_layers: FACES,
            data: bytemuck::cast_slice(&self.data).to_vec(),
        }
    }
}

/// Every `(face, x, y)` of a `size` wide cubemap in storage order
fn face_texels(size: u32) -> impl IndexedParallelIterator<Item = (u32, u32, u32)> {
    let size = size as usize;
    let texels = size * size;
    (0..FACES as usize * texels).into_par_iter().map(move |index| {
        let texel = index % texels;
        ((index / texels) as u32, (texel % size) as u32, (texel / size) as u32)
    })
}

fn level_len(size: u32) -> usize {
    FACES as usize * size as usize * size as usize * CHANNELS
}

/// Halves every face with a 2x2 box filter, clamping at odd edges
fn downsample(faces: &[f32], size: u32) -> Vec<f32> {
    let half = (size / 2).max(1);
    let mut out = Vec::with_capacity(level_len(half));
    let texel = |face: u32, x: u32, y: u32| {
        let (x, y) = (x.min(size - 1), y.min(size - 1));
        let size = size as usize;
        let index = ((face as usize * size + y as usize) * size + x as usize) * CHANNELS;
        Vec4::from_slice(&faces[index..index + CHANNELS])
    };
    for face in 0..FACES {
        for y in 0..half {
            for x in 0..half {
                let sum = texel(face, 2 * x, 2 * y)
                    + texel(face, 2 * x + 1, 2 * y)
                    + texel(face, 2 * x, 2 * y + 1)
                    + texel(face, 2 * x + 1, 2 * y + 1);
                out.extend_from_slice(&(sum * 0.25).to_array());
            }
        }
    }
    out
}
