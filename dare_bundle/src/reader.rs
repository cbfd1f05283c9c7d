use std::mem;
use std::ops::Range;
use std::path::Path;

use bytemuck::Pod;
use tracing::{debug, info};

use crate::bounding_box::BoundingBox;
use crate::compression::{self, BundleArena};
use crate::format::{
    EnvironmentRecord, GroupRecord, Header, ImageDescriptor, MaterialRecord, MeshRecord,
    ObjectRecord, PixelFormat, StringRecord, TextureRecord, Vertex, MAGIC, VERSION,
};
use crate::id::{EnvironmentId, GroupId, MaterialId, MeshId, ObjectId, StringId, TextureId};
use crate::texture::mip_chain;
use crate::{BundleError, Result};

/// Byte ranges of every record table
#[derive(Debug, Clone, Default)]
struct Tables {
    strings: Range<usize>,
    textures: Range<usize>,
    materials: Range<usize>,
    meshes: Range<usize>,
    objects: Range<usize>,
    groups: Range<usize>,
    environments: Range<usize>,
    vertices: Range<usize>,
    indices: Range<usize>,
}

/// A loaded bundle
///
/// Owns the decompressed arena. Everything handed out borrows from it; nothing is copied.
/// All offsets are validated once on construction, accessors only slice.
#[derive(Debug)]
pub struct Bundle {
    arena: BundleArena,
    header: Header,
    tables: Tables,
}

/// Pixels of a texture or one of an environment's cubemaps
#[derive(Debug, Copy, Clone)]
pub struct TextureView<'a> {
    pub name: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Whole mip chain, mip-major
    pub data: &'a [u8],
}

impl<'a> TextureView<'a> {
    /// Every layer of one mip level
    pub fn level(&self, level: u32) -> Option<&'a [u8]> {
        let mip = *mip_chain(
            self.width,
            self.height,
            self.format.bytes_per_pixel(),
            self.mip_levels,
            self.array_layers,
        )
        .get(level as usize)?;
        let size = mip.layer_size * self.array_layers as u64;
        self.data.get(mip.offset as usize..(mip.offset + size) as usize)
    }

    /// One layer of one mip level
    pub fn layer(&self, level: u32, layer: u32) -> Option<&'a [u8]> {
        if layer >= self.array_layers {
            return None;
        }
        let mip = *mip_chain(
            self.width,
            self.height,
            self.format.bytes_per_pixel(),
            self.mip_levels,
            self.array_layers,
        )
        .get(level as usize)?;
        let offset = mip.layer_offset(layer) as usize;
        self.data.get(offset..offset + mip.layer_size as usize)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ObjectView<'a> {
    pub name: Option<&'a str>,
    pub meshes: &'a [MeshId],
    pub transform: glam::Mat4,
    pub bounds: BoundingBox,
}

#[derive(Debug, Copy, Clone)]
pub struct GroupView<'a> {
    pub name: Option<&'a str>,
    pub objects: &'a [ObjectId],
    pub bounds: BoundingBox,
}

#[derive(Debug, Copy, Clone)]
pub struct EnvironmentView<'a> {
    pub name: Option<&'a str>,
    pub skybox: TextureView<'a>,
    pub irradiance: TextureView<'a>,
}

fn table<'a, T: Pod>(bytes: &'a [u8], range: &Range<usize>) -> Result<&'a [T]> {
    bytemuck::try_cast_slice(&bytes[range.clone()])
        .map_err(|e| BundleError::format(format!("misaligned table: {e}")))
}

fn check_ref(kind: &str, id: u32, len: u32, allow_invalid: bool) -> Result<()> {
    if (id == 0 && !allow_invalid) || id > len {
        return Err(BundleError::format(format!(
            "{kind} id {id} outside of table of {len}"
        )));
    }
    Ok(())
}

impl Bundle {
    /// Reads, decompresses and validates a bundle file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let compressed = std::fs::read(path)?;
        let bundle = Self::from_compressed(&compressed)?;
        info!(
            "Loaded {}: {} textures, {} meshes, {} objects, {} groups, {} environments",
            path.display(),
            bundle.header.num_textures,
            bundle.header.num_meshes,
            bundle.header.num_objects,
            bundle.header.num_groups,
            bundle.header.num_environments
        );
        Ok(bundle)
    }

    pub fn from_compressed(compressed: &[u8]) -> Result<Self> {
        Self::from_arena(compression::decompress(compressed)?)
    }

    /// Copies an uncompressed bundle into an aligned arena
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_arena(BundleArena::from_bytes(bytes)?)
    }

    pub fn from_arena(arena: BundleArena) -> Result<Self> {
        let bytes = arena.as_bytes();
        let header_bytes = bytes
            .get(..mem::size_of::<Header>())
            .ok_or_else(|| BundleError::format("buffer is smaller than the header"))?;
        let header: Header = bytemuck::pod_read_unaligned(header_bytes);
        if header.magic != MAGIC {
            return Err(BundleError::format(format!(
                "bad magic {:#010x}",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(BundleError::format(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.total_size != bytes.len() as u64 {
            return Err(BundleError::format(format!(
                "header claims {} bytes, buffer holds {}",
                header.total_size,
                bytes.len()
            )));
        }

        let mut cursor = mem::size_of::<Header>() as u64;
        let mut next = |count: u32, size: usize| -> Range<usize> {
            let start = cursor;
            cursor += count as u64 * size as u64;
            start as usize..cursor as usize
        };
        let mut tables = Tables {
            strings: next(header.num_strings, mem::size_of::<StringRecord>()),
            textures: next(header.num_textures, mem::size_of::<TextureRecord>()),
            materials: next(header.num_materials, mem::size_of::<MaterialRecord>()),
            meshes: next(header.num_meshes, mem::size_of::<MeshRecord>()),
            objects: next(header.num_objects, mem::size_of::<ObjectRecord>()),
            groups: next(header.num_groups, mem::size_of::<GroupRecord>()),
            environments: next(header.num_environments, mem::size_of::<EnvironmentRecord>()),
            ..Default::default()
        };
        if cursor != header.data_offset || cursor > header.total_size {
            return Err(BundleError::format(format!(
                "record tables end at {} but the payload region starts at {}",
                cursor, header.data_offset
            )));
        }

        let section = |offset: u64, count: u64, size: usize| -> Result<Range<usize>> {
            let end = count
                .checked_mul(size as u64)
                .and_then(|len| len.checked_add(offset))
                .filter(|&end| offset >= header.data_offset && end <= header.total_size)
                .ok_or_else(|| {
                    BundleError::format(format!(
                        "section of {count} elements at {offset} lies outside of the bundle"
                    ))
                })?;
            Ok(offset as usize..end as usize)
        };
        tables.vertices = section(
            header.vertices_offset,
            header.num_vertices,
            mem::size_of::<Vertex>(),
        )?;
        tables.indices = section(header.indices_offset, header.num_indices, mem::size_of::<u32>())?;

        let bundle = Self {
            header,
            tables,
            arena: BundleArena::default(),
        };
        bundle.validate(bytes)?;
        debug!(
            "Validated bundle of {} bytes ({} strings, {} materials, {} vertices, {} indices)",
            header.total_size,
            header.num_strings,
            header.num_materials,
            header.num_vertices,
            header.num_indices
        );
        Ok(Self { arena, ..bundle })
    }

    /// Payload byte range, which must live between the tables and the end of the bundle
    fn payload(&self, offset: u64, len: u64) -> Result<Range<usize>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| offset >= self.header.data_offset && end <= self.header.total_size)
            .ok_or_else(|| {
                BundleError::format(format!(
                    "payload {offset}..+{len} lies outside of the payload region"
                ))
            })?;
        Ok(offset as usize..end as usize)
    }

    fn check_image(&self, image: &ImageDescriptor) -> Result<()> {
        let expected = image.linear_size()?;
        if image.size != expected || image.mip_levels == 0 || image.array_layers == 0 {
            return Err(BundleError::format(format!(
                "image of {}x{} with {} levels holds {} bytes, expected {}",
                image.width, image.height, image.mip_levels, image.size, expected
            )));
        }
        self.payload(image.offset, image.size)?;
        Ok(())
    }

    fn validate(&self, bytes: &[u8]) -> Result<()> {
        let header = &self.header;
        table::<Vertex>(bytes, &self.tables.vertices)?;
        table::<u32>(bytes, &self.tables.indices)?;

        for (index, record) in table::<StringRecord>(bytes, &self.tables.strings)?
            .iter()
            .enumerate()
        {
            if record.id != StringId::from_index(index) {
                return Err(BundleError::format(format!(
                    "string record {} carries id {}",
                    index, record.id
                )));
            }
            let range = self.payload(record.offset, record.length)?;
            std::str::from_utf8(&bytes[range])
                .map_err(|e| BundleError::format(format!("{} is not utf-8: {e}", record.id)))?;
        }

        for (index, record) in table::<TextureRecord>(bytes, &self.tables.textures)?
            .iter()
            .enumerate()
        {
            if record.id != TextureId::from_index(index) {
                return Err(BundleError::format(format!(
                    "texture record {} carries id {}",
                    index, record.id
                )));
            }
            check_ref(StringId::KIND, record.name.0, header.num_strings, true)?;
            self.check_image(&record.image)?;
        }

        for material in table::<MaterialRecord>(bytes, &self.tables.materials)? {
            check_ref(StringId::KIND, material.name.0, header.num_strings, true)?;
            for slot in material.slots() {
                check_ref(TextureId::KIND, slot.0, header.num_textures, true)?;
            }
        }

        for mesh in table::<MeshRecord>(bytes, &self.tables.meshes)? {
            if mesh.vertex_offset as u64 + mesh.vertex_count as u64 > header.num_vertices
                || mesh.index_offset as u64 + mesh.index_count as u64 > header.num_indices
            {
                return Err(BundleError::format(format!(
                    "mesh range {}+{} / {}+{} lies outside of the global arrays",
                    mesh.vertex_offset, mesh.vertex_count, mesh.index_offset, mesh.index_count
                )));
            }
            check_ref(MaterialId::KIND, mesh.material.0, header.num_materials, true)?;
        }

        for object in table::<ObjectRecord>(bytes, &self.tables.objects)? {
            check_ref(StringId::KIND, object.name.0, header.num_strings, true)?;
            let range = self.payload(
                object.meshes_offset,
                object.num_meshes as u64 * mem::size_of::<MeshId>() as u64,
            )?;
            for mesh in table::<MeshId>(bytes, &range)? {
                check_ref(MeshId::KIND, mesh.0, header.num_meshes, false)?;
            }
        }

        for group in table::<GroupRecord>(bytes, &self.tables.groups)? {
            check_ref(StringId::KIND, group.name.0, header.num_strings, true)?;
            let range = self.payload(
                group.objects_offset,
                group.num_objects as u64 * mem::size_of::<ObjectId>() as u64,
            )?;
            for object in table::<ObjectId>(bytes, &range)? {
                check_ref(ObjectId::KIND, object.0, header.num_objects, false)?;
            }
        }

        for environment in table::<EnvironmentRecord>(bytes, &self.tables.environments)? {
            check_ref(StringId::KIND, environment.name.0, header.num_strings, true)?;
            self.check_image(&environment.skybox)?;
            self.check_image(&environment.irradiance)?;
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        self.arena.as_bytes()
    }

    /// Cast of a range validated on construction
    fn slice<T: Pod>(&self, range: Range<usize>) -> &[T] {
        bytemuck::cast_slice(&self.bytes()[range])
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn arena(&self) -> &BundleArena {
        &self.arena
    }

    pub fn string(&self, id: StringId) -> Option<&str> {
        let record = self.string_records().get(id.index()?)?;
        std::str::from_utf8(&self.bytes()[record.offset as usize..][..record.length as usize]).ok()
    }

    pub fn strings(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.string_records()
            .iter()
            .filter_map(|record| Some((record.id, self.string(record.id)?)))
    }

    fn string_records(&self) -> &[StringRecord] {
        self.slice(self.tables.strings.clone())
    }

    fn image(&self, name: StringId, image: &ImageDescriptor) -> Option<TextureView<'_>> {
        Some(TextureView {
            name: self.string(name),
            width: image.width,
            height: image.height,
            format: image.pixel_format().ok()?,
            mip_levels: image.mip_levels,
            array_layers: image.array_layers,
            data: &self.bytes()[image.offset as usize..][..image.size as usize],
        })
    }

    pub fn texture_records(&self) -> &[TextureRecord] {
        self.slice(self.tables.textures.clone())
    }

    pub fn texture(&self, id: TextureId) -> Option<TextureView<'_>> {
        self.texture_by_index(id.index()?)
    }

    pub fn texture_by_index(&self, index: usize) -> Option<TextureView<'_>> {
        let record = self.texture_records().get(index)?;
        self.image(record.name, &record.image)
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureId, TextureView<'_>)> {
        self.texture_records()
            .iter()
            .filter_map(|record| Some((record.id, self.image(record.name, &record.image)?)))
    }

    pub fn materials(&self) -> &[MaterialRecord] {
        self.slice(self.tables.materials.clone())
    }

    pub fn material(&self, id: MaterialId) -> Option<&MaterialRecord> {
        self.materials().get(id.index()?)
    }

    pub fn meshes(&self) -> &[MeshRecord] {
        self.slice(self.tables.meshes.clone())
    }

    pub fn mesh(&self, id: MeshId) -> Option<&MeshRecord> {
        self.meshes().get(id.index()?)
    }

    pub fn vertices(&self) -> &[Vertex] {
        self.slice(self.tables.vertices.clone())
    }

    pub fn indices(&self) -> &[u32] {
        self.slice(self.tables.indices.clone())
    }

    pub fn mesh_vertices(&self, mesh: &MeshRecord) -> &[Vertex] {
        &self.vertices()[mesh.vertex_offset as usize..][..mesh.vertex_count as usize]
    }

    /// Indices relative to [`Self::mesh_vertices`]
    pub fn mesh_indices(&self, mesh: &MeshRecord) -> &[u32] {
        &self.indices()[mesh.index_offset as usize..][..mesh.index_count as usize]
    }

    fn object_view(&self, record: &ObjectRecord) -> ObjectView<'_> {
        let offset = record.meshes_offset as usize;
        ObjectView {
            name: self.string(record.name),
            meshes: self.slice(offset..offset + record.num_meshes as usize * mem::size_of::<MeshId>()),
            transform: glam::Mat4::from_cols_array(&record.transform),
            bounds: record.bounds,
        }
    }

    fn object_records(&self) -> &[ObjectRecord] {
        self.slice(self.tables.objects.clone())
    }

    pub fn object(&self, id: ObjectId) -> Option<ObjectView<'_>> {
        self.object_records()
            .get(id.index()?)
            .map(|record| self.object_view(record))
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectView<'_>> {
        self.object_records()
            .iter()
            .map(|record| self.object_view(record))
    }

    fn group_view(&self, record: &GroupRecord) -> GroupView<'_> {
        let offset = record.objects_offset as usize;
        GroupView {
            name: self.string(record.name),
            objects: self
                .slice(offset..offset + record.num_objects as usize * mem::size_of::<ObjectId>()),
            bounds: record.bounds,
        }
    }

    fn group_records(&self) -> &[GroupRecord] {
        self.slice(self.tables.groups.clone())
    }

    pub fn group(&self, id: GroupId) -> Option<GroupView<'_>> {
        self.group_records()
            .get(id.index()?)
            .map(|record| self.group_view(record))
    }

    pub fn groups(&self) -> impl Iterator<Item = GroupView<'_>> {
        self.group_records()
            .iter()
            .map(|record| self.group_view(record))
    }

    fn environment_view(&self, record: &EnvironmentRecord) -> Option<EnvironmentView<'_>> {
        Some(EnvironmentView {
            name: self.string(record.name),
            skybox: self.image(StringId::INVALID, &record.skybox)?,
            irradiance: self.image(StringId::INVALID, &record.irradiance)?,
        })
    }

    fn environment_records(&self) -> &[EnvironmentRecord] {
        self.slice(self.tables.environments.clone())
    }

    pub fn environment(&self, id: EnvironmentId) -> Option<EnvironmentView<'_>> {
        self.environment_view(self.environment_records().get(id.index()?)?)
    }

    pub fn environments(&self) -> impl Iterator<Item = EnvironmentView<'_>> {
        self.environment_records()
            .iter()
            .filter_map(|record| self.environment_view(record))
    }
}
