use std::mem;
use std::path::Path;

use bytemuck::Pod;
use tracing::{debug, info, warn};

use crate::bounding_box::BoundingBox;
use crate::format::{
    align, EnvironmentRecord, GroupRecord, Header, ImageDescriptor, MaterialRecord, MeshRecord,
    ObjectRecord, PixelFormat, StringRecord, TextureRecord, Vertex, MAGIC, VERSION,
};
use crate::id::{EnvironmentId, GroupId, MaterialId, MeshId, ObjectId, StringId, TextureId};
use crate::texture::{mip_chain_size, Texture};
use crate::{compression, BundleError, Result};

/// Surface description handed to [`BundleBuilder::add_material`]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Material {
    pub name: StringId,
    pub base_color: Option<TextureId>,
    pub normal: Option<TextureId>,
    pub roughness: Option<TextureId>,
    pub metallic: Option<TextureId>,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: StringId::INVALID,
            base_color: None,
            normal: None,
            roughness: None,
            metallic: None,
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
        }
    }
}

/// A mesh over vertices and indices that were already added to the builder
///
/// Indices are relative to `vertex_offset`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MeshDesc {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub material: MaterialId,
}

/// Pixels of a cubemap (or any layered image) belonging to an environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub data: Vec<u8>,
}

impl EnvironmentImage {
    fn validate(&self) -> Result<()> {
        let expected = mip_chain_size(
            self.width,
            self.height,
            self.format.bytes_per_pixel(),
            self.mip_levels,
            self.array_layers,
        ) as usize;
        if self.data.len() != expected || self.mip_levels == 0 || self.array_layers == 0 {
            return Err(BundleError::InvalidTextureSize {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn descriptor(&self, offset: u64) -> ImageDescriptor {
        ImageDescriptor {
            width: self.width,
            height: self.height,
            format: self.format as u32,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            _padding: 0,
            offset,
            size: self.data.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub name: StringId,
    pub skybox: EnvironmentImage,
    pub irradiance: EnvironmentImage,
}

#[derive(Debug, Clone)]
struct ObjectEntry {
    name: StringId,
    meshes: Vec<MeshId>,
    transform: glam::Mat4,
    bounds: BoundingBox,
}

#[derive(Debug, Clone)]
struct GroupEntry {
    name: StringId,
    objects: Vec<ObjectId>,
    bounds: BoundingBox,
}

/// Accumulates the contents of a bundle and serializes them in one go
///
/// Every `add_*` hands out dense ids starting at 1 within its own namespace; ids are never
/// reused or renumbered.
#[derive(Debug, Default)]
pub struct BundleBuilder {
    strings: Vec<String>,
    textures: Vec<Option<Texture>>,
    materials: Vec<MaterialRecord>,
    meshes: Vec<MeshRecord>,
    objects: Vec<ObjectEntry>,
    groups: Vec<GroupEntry>,
    environments: Vec<Environment>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

fn check_id(kind: &'static str, id: u32, len: usize) -> Result<()> {
    if id == 0 || id as usize > len {
        return Err(BundleError::InvalidId { kind, id });
    }
    Ok(())
}

fn check_range(kind: &'static str, offset: u32, count: u32, len: usize) -> Result<()> {
    if offset as u64 + count as u64 > len as u64 {
        return Err(BundleError::InvalidRange {
            kind,
            offset: offset as u64,
            count: count as u64,
            len: len as u64,
        });
    }
    Ok(())
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(&mut self, value: impl Into<String>) -> StringId {
        self.strings.push(value.into());
        StringId::from_index(self.strings.len() - 1)
    }

    /// Hands out a texture id whose pixels are supplied later through [`Self::set_texture`]
    pub fn reserve_texture_id(&mut self) -> TextureId {
        self.textures.push(None);
        TextureId::from_index(self.textures.len() - 1)
    }

    pub fn add_texture(&mut self, texture: Texture) -> Result<TextureId> {
        self.check_name(texture.name)?;
        texture.validate()?;
        let id = self.reserve_texture_id();
        self.set_texture(id, texture)?;
        Ok(id)
    }

    /// Fills a reserved texture slot
    ///
    /// Textures whose first level holds one repeated texel are stored as that single texel.
    pub fn set_texture(&mut self, id: TextureId, mut texture: Texture) -> Result<()> {
        check_id(TextureId::KIND, id.0, self.textures.len())?;
        self.check_name(texture.name)?;
        texture.validate()?;
        if texture.collapse() {
            debug!("Collapsed uniform {} down to a single texel", id);
        }
        let slot = &mut self.textures[id.0 as usize - 1];
        if slot.is_some() {
            warn!("Overwriting the pixels of {}", id);
        }
        *slot = Some(texture);
        Ok(())
    }

    pub fn add_material(&mut self, material: Material) -> Result<MaterialId> {
        self.check_name(material.name)?;
        let slot = |texture: Option<TextureId>| -> Result<TextureId> {
            match texture {
                None => Ok(TextureId::INVALID),
                Some(id) => {
                    check_id(TextureId::KIND, id.0, self.textures.len())?;
                    Ok(id)
                }
            }
        };
        let record = MaterialRecord {
            name: material.name,
            base_color: slot(material.base_color)?,
            normal: slot(material.normal)?,
            roughness: slot(material.roughness)?,
            metallic: slot(material.metallic)?,
            metallic_factor: material.metallic_factor,
            roughness_factor: material.roughness_factor,
            _padding: 0,
            base_color_factor: material.base_color_factor,
        };
        self.materials.push(record);
        Ok(MaterialId::from_index(self.materials.len() - 1))
    }

    /// Appends to the global vertex array, returning the offset of the first vertex
    pub fn add_vertices(&mut self, vertices: &[Vertex]) -> u32 {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(vertices);
        offset
    }

    /// Appends to the global index array, returning the offset of the first index
    pub fn add_indices(&mut self, indices: &[u32]) -> u32 {
        let offset = self.indices.len() as u32;
        self.indices.extend_from_slice(indices);
        offset
    }

    /// Adds a mesh over already added vertices and indices. Ranges may be shared between meshes.
    pub fn add_mesh(&mut self, mesh: MeshDesc) -> Result<MeshId> {
        check_range("vertex", mesh.vertex_offset, mesh.vertex_count, self.vertices.len())?;
        check_range("index", mesh.index_offset, mesh.index_count, self.indices.len())?;
        if mesh.material.is_valid() {
            check_id(MaterialId::KIND, mesh.material.0, self.materials.len())?;
        }
        let vertices = &self.vertices[mesh.vertex_offset as usize..][..mesh.vertex_count as usize];
        let indices = &self.indices[mesh.index_offset as usize..][..mesh.index_count as usize];
        if let Some(&index) = indices.iter().find(|&&index| index >= mesh.vertex_count) {
            return Err(BundleError::InvalidRange {
                kind: "mesh vertex",
                offset: index as u64,
                count: 1,
                len: mesh.vertex_count as u64,
            });
        }

        let bounds = BoundingBox::from_points(
            vertices
                .iter()
                .map(|vertex| glam::Vec3::from_array(vertex.position)),
        );
        self.meshes.push(MeshRecord {
            vertex_offset: mesh.vertex_offset,
            vertex_count: mesh.vertex_count,
            index_offset: mesh.index_offset,
            index_count: mesh.index_count,
            material: mesh.material,
            _padding: 0,
            bounds,
        });
        Ok(MeshId::from_index(self.meshes.len() - 1))
    }

    /// Appends `vertices` and `indices` and adds a mesh covering exactly them
    pub fn add_mesh_data(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
        material: MaterialId,
    ) -> Result<MeshId> {
        if let Some(&index) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
            return Err(BundleError::InvalidRange {
                kind: "mesh vertex",
                offset: index as u64,
                count: 1,
                len: vertices.len() as u64,
            });
        }
        if material.is_valid() {
            check_id(MaterialId::KIND, material.0, self.materials.len())?;
        }
        let vertex_offset = self.add_vertices(vertices);
        let index_offset = self.add_indices(indices);
        self.add_mesh(MeshDesc {
            vertex_offset,
            vertex_count: vertices.len() as u32,
            index_offset,
            index_count: indices.len() as u32,
            material,
        })
    }

    /// Object bounds are the union of its mesh bounds, in mesh space. `transform` is stored as is.
    pub fn add_object(
        &mut self,
        name: StringId,
        meshes: &[MeshId],
        transform: glam::Mat4,
    ) -> Result<ObjectId> {
        self.check_name(name)?;
        let mut bounds = BoundingBox::EMPTY;
        for mesh in meshes {
            check_id(MeshId::KIND, mesh.0, self.meshes.len())?;
            bounds = bounds.union(&self.meshes[mesh.0 as usize - 1].bounds);
        }
        self.objects.push(ObjectEntry {
            name,
            meshes: meshes.to_vec(),
            transform,
            bounds,
        });
        Ok(ObjectId::from_index(self.objects.len() - 1))
    }

    pub fn add_group(&mut self, name: StringId, objects: &[ObjectId]) -> Result<GroupId> {
        self.check_name(name)?;
        let mut bounds = BoundingBox::EMPTY;
        for object in objects {
            check_id(ObjectId::KIND, object.0, self.objects.len())?;
            bounds = bounds.union(&self.objects[object.0 as usize - 1].bounds);
        }
        self.groups.push(GroupEntry {
            name,
            objects: objects.to_vec(),
            bounds,
        });
        Ok(GroupId::from_index(self.groups.len() - 1))
    }

    pub fn add_environment(&mut self, environment: Environment) -> Result<EnvironmentId> {
        self.check_name(environment.name)?;
        environment.skybox.validate()?;
        environment.irradiance.validate()?;
        self.environments.push(environment);
        Ok(EnvironmentId::from_index(self.environments.len() - 1))
    }

    pub fn num_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn num_environments(&self) -> usize {
        self.environments.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }

    /// Unnamed entities use [`StringId::INVALID`]
    fn check_name(&self, name: StringId) -> Result<()> {
        if name.is_valid() {
            check_id(StringId::KIND, name.0, self.strings.len())?;
        }
        Ok(())
    }

    /// Flattens everything into one uncompressed buffer
    ///
    /// Layout: header, record tables (strings, textures, materials, meshes, objects, groups,
    /// environments), variable length payloads, vertex array, index array. Payload offsets are
    /// absolute and 8-byte aligned.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let textures = self
            .textures
            .iter()
            .enumerate()
            .map(|(index, texture)| {
                texture
                    .as_ref()
                    .ok_or(BundleError::UnfilledTexture(index as u32 + 1))
            })
            .collect::<Result<Vec<&Texture>>>()?;

        let mut header = Header {
            magic: MAGIC,
            version: VERSION,
            num_strings: self.strings.len() as u32,
            num_textures: textures.len() as u32,
            num_materials: self.materials.len() as u32,
            num_meshes: self.meshes.len() as u32,
            num_objects: self.objects.len() as u32,
            num_groups: self.groups.len() as u32,
            num_environments: self.environments.len() as u32,
            num_vertices: self.vertices.len() as u64,
            num_indices: self.indices.len() as u64,
            ..Default::default()
        };

        let tables_size = header.tables_size();
        let payload_size: u64 = self
            .strings
            .iter()
            .map(|string| align(string.len() as u64))
            .chain(textures.iter().map(|texture| align(texture.data.len() as u64)))
            .chain(
                self.objects
                    .iter()
                    .map(|object| align(mem::size_of_val(object.meshes.as_slice()) as u64)),
            )
            .chain(
                self.groups
                    .iter()
                    .map(|group| align(mem::size_of_val(group.objects.as_slice()) as u64)),
            )
            .chain(self.environments.iter().map(|environment| {
                align(environment.skybox.data.len() as u64)
                    + align(environment.irradiance.data.len() as u64)
            }))
            .sum();
        let vertices_size = mem::size_of_val(self.vertices.as_slice()) as u64;
        let indices_size = mem::size_of_val(self.indices.as_slice()) as u64;

        header.data_offset = tables_size;
        header.vertices_offset = tables_size + payload_size;
        header.indices_offset = header.vertices_offset + align(vertices_size);
        header.total_size = header.indices_offset + indices_size;

        let total_size = header.total_size as usize;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(total_size)
            .map_err(|_| BundleError::OutOfMemory(total_size))?;
        buffer.resize(total_size, 0);

        let mut writer = SectionWriter {
            buffer: &mut buffer,
            record_cursor: 0,
            data_cursor: tables_size as usize,
        };
        writer.record(&header);

        for (index, string) in self.strings.iter().enumerate() {
            let offset = writer.payload(string.as_bytes());
            writer.record(&StringRecord {
                id: StringId::from_index(index),
                _padding: 0,
                offset,
                length: string.len() as u64,
            });
        }
        for (index, texture) in textures.iter().enumerate() {
            let offset = writer.payload(&texture.data);
            writer.record(&TextureRecord {
                id: TextureId::from_index(index),
                name: texture.name,
                image: ImageDescriptor {
                    width: texture.width,
                    height: texture.height,
                    format: texture.format as u32,
                    mip_levels: texture.mip_levels,
                    array_layers: texture.array_layers,
                    _padding: 0,
                    offset,
                    size: texture.data.len() as u64,
                },
            });
        }
        for material in self.materials.iter() {
            writer.record(material);
        }
        for mesh in self.meshes.iter() {
            writer.record(mesh);
        }
        for object in self.objects.iter() {
            let meshes_offset = writer.payload(bytemuck::cast_slice(&object.meshes));
            writer.record(&ObjectRecord {
                name: object.name,
                num_meshes: object.meshes.len() as u32,
                meshes_offset,
                transform: object.transform.to_cols_array(),
                bounds: object.bounds,
            });
        }
        for group in self.groups.iter() {
            let objects_offset = writer.payload(bytemuck::cast_slice(&group.objects));
            writer.record(&GroupRecord {
                name: group.name,
                num_objects: group.objects.len() as u32,
                objects_offset,
                bounds: group.bounds,
            });
        }
        for environment in self.environments.iter() {
            let skybox_offset = writer.payload(&environment.skybox.data);
            let irradiance_offset = writer.payload(&environment.irradiance.data);
            writer.record(&EnvironmentRecord {
                name: environment.name,
                _padding: 0,
                skybox: environment.skybox.descriptor(skybox_offset),
                irradiance: environment.irradiance.descriptor(irradiance_offset),
            });
        }

        if writer.record_cursor as u64 != header.data_offset
            || writer.data_cursor as u64 != header.vertices_offset
        {
            return Err(BundleError::format(format!(
                "layout drifted: records end at {} (expected {}), payloads at {} (expected {})",
                writer.record_cursor,
                header.data_offset,
                writer.data_cursor,
                header.vertices_offset
            )));
        }

        buffer[header.vertices_offset as usize..][..vertices_size as usize]
            .copy_from_slice(bytemuck::cast_slice(&self.vertices));
        buffer[header.indices_offset as usize..][..indices_size as usize]
            .copy_from_slice(bytemuck::cast_slice(&self.indices));

        debug!(
            "Serialized bundle: {} bytes of tables, {} bytes of payload, {} vertices, {} indices",
            tables_size,
            payload_size,
            self.vertices.len(),
            self.indices.len()
        );
        Ok(buffer)
    }

    /// Serializes, compresses and writes the bundle to `path`
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let buffer = self.serialize()?;
        let compressed = compression::compress(&buffer)?;
        compression::write_file(path, &compressed)?;
        info!(
            "Wrote {} ({} strings, {} textures, {} materials, {} meshes, {} objects, {} groups, {} environments): {} -> {} bytes",
            path.display(),
            self.strings.len(),
            self.textures.len(),
            self.materials.len(),
            self.meshes.len(),
            self.objects.len(),
            self.groups.len(),
            self.environments.len(),
            buffer.len(),
            compressed.len()
        );
        Ok(())
    }
}

/// Writes fixed size records from the front and variable length payloads from `data_cursor`
struct SectionWriter<'a> {
    buffer: &'a mut [u8],
    record_cursor: usize,
    data_cursor: usize,
}

impl SectionWriter<'_> {
    fn record<T: Pod>(&mut self, record: &T) {
        let bytes = bytemuck::bytes_of(record);
        self.buffer[self.record_cursor..][..bytes.len()].copy_from_slice(bytes);
        self.record_cursor += bytes.len();
    }

    /// Returns the absolute offset the payload was written at
    fn payload(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.data_cursor;
        self.buffer[offset..][..bytes.len()].copy_from_slice(bytes);
        self.data_cursor += align(bytes.len() as u64) as usize;
        offset as u64
    }
}
