use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{bail, Context, Result};
use dare_bundle::{
    BundleBuilder, Material, MaterialId, MeshId, ObjectId, Opacity, StringId, Texture, TextureId,
    Vertex,
};
use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// What a texture slot does with the pixels of its image
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Opaque materials ignore alpha, so it is forced to one
    BaseColor { opaque: bool },
    Normal,
    /// Green channel of a metallic-roughness image
    Roughness,
    /// Blue channel of a metallic-roughness image
    Metallic,
}

impl TextureUsage {
    fn suffix(&self) -> &'static str {
        match self {
            TextureUsage::BaseColor { .. } => "base_color",
            TextureUsage::Normal => "normal",
            TextureUsage::Roughness => "roughness",
            TextureUsage::Metallic => "metallic",
        }
    }
}

/// Row-major 8-bit pixels with 1 to 4 channels
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl RawImage {
    /// Narrows 16-bit and float images down to 8 bits per channel
    pub fn decode(data: &gltf::image::Data) -> Result<Self> {
        use gltf::image::Format;

        let (channels, pixels) = match data.format {
            Format::R8 => (1, data.pixels.clone()),
            Format::R8G8 => (2, data.pixels.clone()),
            Format::R8G8B8 => (3, data.pixels.clone()),
            Format::R8G8B8A8 => (4, data.pixels.clone()),
            Format::R16 => (1, narrow_u16(&data.pixels)),
            Format::R16G16 => (2, narrow_u16(&data.pixels)),
            Format::R16G16B16 => (3, narrow_u16(&data.pixels)),
            Format::R16G16B16A16 => (4, narrow_u16(&data.pixels)),
            Format::R32G32B32FLOAT => (3, narrow_f32(&data.pixels)),
            Format::R32G32B32A32FLOAT => (4, narrow_f32(&data.pixels)),
        };
        let expected = data.width as usize * data.height as usize * channels as usize;
        if pixels.len() != expected {
            bail!(
                "image holds {} bytes, {}x{} with {} channels needs {}",
                pixels.len(),
                data.width,
                data.height,
                channels,
                expected
            );
        }
        Ok(Self {
            width: data.width,
            height: data.height,
            channels,
            pixels,
        })
    }

    /// One channel of every texel, clamped to the last channel the image has
    pub fn channel(&self, channel: u32) -> Vec<u8> {
        let channel = channel.min(self.channels - 1) as usize;
        self.pixels
            .chunks_exact(self.channels as usize)
            .map(|texel| texel[channel])
            .collect()
    }

    pub fn prepare(&self, name: StringId, usage: TextureUsage) -> dare_bundle::Result<Texture> {
        match usage {
            TextureUsage::BaseColor { opaque: true } if self.channels % 2 == 0 => {
                let opaque = vec![u8::MAX; self.width as usize * self.height as usize];
                Texture::from_pixels(
                    name,
                    self.width,
                    self.height,
                    self.channels,
                    &self.pixels,
                    Some(Opacity {
                        channels: 1,
                        data: &opaque,
                    }),
                )
            }
            TextureUsage::BaseColor { .. } | TextureUsage::Normal => Texture::from_pixels(
                name,
                self.width,
                self.height,
                self.channels,
                &self.pixels,
                None,
            ),
            TextureUsage::Roughness => {
                Texture::from_pixels(name, self.width, self.height, 1, &self.channel(1), None)
            }
            TextureUsage::Metallic => {
                Texture::from_pixels(name, self.width, self.height, 1, &self.channel(2), None)
            }
        }
    }
}

fn narrow_u16(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(2)
        .map(|value| (u16::from_ne_bytes([value[0], value[1]]) >> 8) as u8)
        .collect()
}

fn narrow_f32(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .map(|value| {
            let value = f32::from_ne_bytes([value[0], value[1], value[2], value[3]]);
            (value.clamp(0.0, 1.0) * 255.0).round() as u8
        })
        .collect()
}

/// Level 0 of a texture whose id has been reserved in the builder
#[derive(Debug, Clone)]
pub struct PendingTexture {
    pub id: TextureId,
    pub texture: Texture,
}

#[derive(Debug, Default)]
pub struct ImportedScene {
    pub textures: Vec<PendingTexture>,
    pub materials: usize,
    pub meshes: usize,
    pub objects: usize,
    pub groups: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct TextureKey {
    image: usize,
    usage: TextureUsage,
}

/// Area weighted vertex normals
pub fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [
            triangle[0] as usize,
            triangle[1] as usize,
            triangle[2] as usize,
        ];
        let normal = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += normal;
        normals[b] += normal;
        normals[c] += normal;
    }
    normals
        .into_iter()
        .map(|normal| normal.try_normalize().unwrap_or(Vec3::Z))
        .collect()
}

/// Per vertex tangents from texture coordinate gradients, with handedness in `w`
///
/// Vertices without usable gradients get any tangent perpendicular to their normal.
pub fn compute_tangents(
    positions: &[Vec3],
    normals: &[Vec3],
    tex_coords: &[Vec2],
    indices: &[u32],
) -> Vec<Vec4> {
    let mut tangents = vec![Vec3::ZERO; positions.len()];
    let mut bitangents = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [
            triangle[0] as usize,
            triangle[1] as usize,
            triangle[2] as usize,
        ];
        let (e1, e2) = (positions[b] - positions[a], positions[c] - positions[a]);
        let (d1, d2) = (tex_coords[b] - tex_coords[a], tex_coords[c] - tex_coords[a]);
        let determinant = d1.x * d2.y - d2.x * d1.y;
        if determinant.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / determinant;
        let tangent = (e1 * d2.y - e2 * d1.y) * r;
        let bitangent = (e2 * d1.x - e1 * d2.x) * r;
        for vertex in [a, b, c] {
            tangents[vertex] += tangent;
            bitangents[vertex] += bitangent;
        }
    }

    normals
        .iter()
        .zip(tangents.into_iter().zip(bitangents))
        .map(|(normal, (tangent, bitangent))| {
            // Gram-Schmidt
            match (tangent - *normal * normal.dot(tangent)).try_normalize() {
                Some(orthogonal) => {
                    let handedness = if normal.cross(orthogonal).dot(bitangent) < 0.0 {
                        -1.0
                    } else {
                        1.0
                    };
                    orthogonal.extend(handedness)
                }
                None => normal.any_orthonormal_vector().extend(1.0),
            }
        })
        .collect()
}

/// Converts one triangle list primitive into bundle vertices and indices
fn read_primitive(
    primitive: &gltf::Primitive<'_>,
    buffers: &[gltf::buffer::Data],
) -> Option<(Vec<Vertex>, Vec<u32>)> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
    let positions: Vec<Vec3> = reader.read_positions()?.map(Vec3::from).collect();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };
    if indices.iter().any(|index| *index as usize >= positions.len()) {
        return None;
    }
    let normals: Vec<Vec3> = match reader.read_normals() {
        Some(normals) => normals.map(Vec3::from).collect(),
        None => compute_normals(&positions, &indices),
    };
    let tex_coords: Vec<Vec2> = match reader.read_tex_coords(0) {
        Some(tex_coords) => tex_coords.into_f32().map(Vec2::from).collect(),
        None => vec![Vec2::ZERO; positions.len()],
    };
    if normals.len() != positions.len() || tex_coords.len() != positions.len() {
        return None;
    }
    let tangents: Vec<Vec4> = match reader.read_tangents() {
        Some(tangents) => tangents.map(Vec4::from).collect(),
        None => compute_tangents(&positions, &normals, &tex_coords, &indices),
    };
    if tangents.len() != positions.len() {
        return None;
    }

    let vertices = positions
        .iter()
        .zip(&normals)
        .zip(tangents.iter().zip(&tex_coords))
        .map(|((position, normal), (tangent, tex_coord))| Vertex {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
            tex_coord: tex_coord.to_array(),
        })
        .collect();
    Some((vertices, indices))
}

/// Feeds every material, mesh, node and scene of a glTF file into `builder`
///
/// Texture ids are reserved up front and their level 0 pixels are returned so the caller can
/// run them through the preprocessor before filling them in.
pub fn import(path: &Path, builder: &mut BundleBuilder) -> Result<ImportedScene> {
    let (document, buffers, images) = gltf::import(path)
        .with_context(|| format!("failed to import {}", path.display()))?;
    let mut scene = ImportedScene::default();

    // materials, reserving one texture per image and usage
    let mut keys: HashMap<TextureKey, TextureId> = HashMap::new();
    let mut requests: Vec<(TextureId, TextureKey, StringId)> = Vec::new();
    let mut texture = |builder: &mut BundleBuilder, image: gltf::Image<'_>, usage: TextureUsage| {
        let key = TextureKey {
            image: image.index(),
            usage,
        };
        *keys.entry(key).or_insert_with(|| {
            let id = builder.reserve_texture_id();
            let name = builder.add_string(format!(
                "{}/{}",
                image
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image{}", image.index())),
                usage.suffix()
            ));
            requests.push((id, key, name));
            id
        })
    };

    let mut materials: Vec<MaterialId> = Vec::new();
    for material in document.materials() {
        let pbr = material.pbr_metallic_roughness();
        let opaque = material.alpha_mode() == gltf::material::AlphaMode::Opaque;
        let metallic_roughness = pbr
            .metallic_roughness_texture()
            .map(|info| info.texture().source());
        let name = match material.name() {
            Some(name) => builder.add_string(name),
            None => StringId::INVALID,
        };
        let material = Material {
            name,
            base_color: pbr.base_color_texture().map(|info| {
                texture(
                    builder,
                    info.texture().source(),
                    TextureUsage::BaseColor { opaque },
                )
            }),
            normal: material
                .normal_texture()
                .map(|info| texture(builder, info.texture().source(), TextureUsage::Normal)),
            roughness: metallic_roughness
                .clone()
                .map(|image| texture(builder, image, TextureUsage::Roughness)),
            metallic: metallic_roughness.map(|image| texture(builder, image, TextureUsage::Metallic)),
            base_color_factor: pbr.base_color_factor(),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
        };
        materials.push(builder.add_material(material)?);
    }
    scene.materials = materials.len();

    // meshes, one bundle mesh per primitive
    let mut meshes: Vec<Vec<MeshId>> = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                warn!(
                    "Skipping {:?} primitive {} of mesh {:?}",
                    primitive.mode(),
                    primitive.index(),
                    mesh.name()
                );
                continue;
            }
            let Some((vertices, indices)) = read_primitive(&primitive, &buffers) else {
                warn!(
                    "Skipping primitive {} of mesh {:?}: missing or inconsistent attributes",
                    primitive.index(),
                    mesh.name()
                );
                continue;
            };
            let material = primitive
                .material()
                .index()
                .and_then(|index| materials.get(index).copied())
                .unwrap_or(MaterialId::INVALID);
            primitives.push(builder.add_mesh_data(&vertices, &indices, material)?);
        }
        scene.meshes += primitives.len();
        meshes.push(primitives);
    }

    // nodes, flattened breadth first with their parents' transforms
    for gltf_scene in document.scenes() {
        let mut objects: Vec<ObjectId> = Vec::new();
        let mut queue: VecDeque<(gltf::Node<'_>, glam::Mat4)> = gltf_scene
            .nodes()
            .map(|node| {
                let transform = glam::Mat4::from_cols_array_2d(&node.transform().matrix());
                (node, transform)
            })
            .collect();
        while let Some((node, transform)) = queue.pop_front() {
            for child in node.children() {
                let t = glam::Mat4::from_cols_array_2d(&child.transform().matrix());
                queue.push_back((child, transform * t));
            }
            let Some(mesh) = node.mesh() else { continue };
            let Some(primitives) = meshes.get(mesh.index()).filter(|p| !p.is_empty()) else {
                continue;
            };
            let name = match node.name().or(mesh.name()) {
                Some(name) => builder.add_string(name),
                None => StringId::INVALID,
            };
            objects.push(builder.add_object(name, primitives, transform)?);
        }
        let name = match gltf_scene.name() {
            Some(name) => builder.add_string(name),
            None => StringId::INVALID,
        };
        builder.add_group(name, &objects)?;
        scene.objects += objects.len();
        scene.groups += 1;
    }
    if document.scenes().len() == 0 {
        warn!("{} has no scenes, only meshes are kept", path.display());
    }
    if let Some(lights) = document.lights() {
        debug!("Ignoring {} punctual lights", lights.count());
    }

    // pixels, converted in parallel
    scene.textures = requests
        .par_iter()
        .map(|(id, key, name)| {
            let data = images
                .get(key.image)
                .with_context(|| format!("missing image {}", key.image))?;
            let texture = RawImage::decode(data)
                .with_context(|| format!("failed to decode image {}", key.image))?
                .prepare(*name, key.usage)?;
            Ok(PendingTexture { id: *id, texture })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Imported {}: {} textures, {} materials, {} meshes, {} objects, {} groups",
        path.display(),
        scene.textures.len(),
        scene.materials,
        scene.meshes,
        scene.objects,
        scene.groups
    );
    Ok(scene)
}
