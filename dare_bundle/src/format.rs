//! Fixed-size records making up the header tables of a bundle.
//!
//! Every record is `#[repr(C)]`, free of implicit padding and sized to a multiple of
//! [`ALIGNMENT`] so that consecutive tables stay aligned inside the arena. Offsets stored in
//! records are absolute byte offsets from the start of the uncompressed bundle.
use std::mem;

use bytemuck::{Pod, Zeroable};

use crate::bounding_box::BoundingBox;
use crate::id::{MaterialId, StringId, TextureId};

/// `"DARB"`
pub const MAGIC: u32 = u32::from_le_bytes(*b"DARB");
pub const VERSION: u32 = 1;
/// Alignment of every table and every variable-length payload
pub const ALIGNMENT: u64 = 8;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`]
pub const fn align(value: u64) -> u64 {
    (value + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8 = 1,
    R8G8 = 2,
    R8G8B8 = 3,
    R8G8B8A8 = 4,
    R32G32B32A32Float = 5,
}

impl PixelFormat {
    /// Picks the 8-bit unsigned normalized format for a channel count
    pub fn from_channels(channels: u32) -> crate::Result<Self> {
        match channels {
            1 => Ok(Self::R8),
            2 => Ok(Self::R8G8),
            3 => Ok(Self::R8G8B8),
            4 => Ok(Self::R8G8B8A8),
            _ => Err(crate::BundleError::UnsupportedChannelLayout(channels)),
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::R8G8 => 2,
            Self::R8G8B8 => 3,
            Self::R8G8B8A8 | Self::R32G32B32A32Float => 4,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::R32G32B32A32Float => 16,
            format => format.channels(),
        }
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = crate::BundleError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::R8),
            2 => Ok(Self::R8G8),
            3 => Ok(Self::R8G8B8),
            4 => Ok(Self::R8G8B8A8),
            5 => Ok(Self::R32G32B32A32Float),
            other => Err(crate::BundleError::format(format!(
                "unknown pixel format {other}"
            ))),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub num_strings: u32,
    pub num_textures: u32,
    pub num_materials: u32,
    pub num_meshes: u32,
    pub num_objects: u32,
    pub num_groups: u32,
    pub num_environments: u32,
    pub _padding: u32,
    pub num_vertices: u64,
    pub num_indices: u64,
    /// Start of the global vertex array
    pub vertices_offset: u64,
    /// Start of the global index array
    pub indices_offset: u64,
    /// Start of the variable-length payload region, directly after the record tables
    pub data_offset: u64,
    pub total_size: u64,
}

impl Header {
    /// Size of the header and every record table for the counts in this header
    pub fn tables_size(&self) -> u64 {
        mem::size_of::<Header>() as u64
            + self.num_strings as u64 * mem::size_of::<StringRecord>() as u64
            + self.num_textures as u64 * mem::size_of::<TextureRecord>() as u64
            + self.num_materials as u64 * mem::size_of::<MaterialRecord>() as u64
            + self.num_meshes as u64 * mem::size_of::<MeshRecord>() as u64
            + self.num_objects as u64 * mem::size_of::<ObjectRecord>() as u64
            + self.num_groups as u64 * mem::size_of::<GroupRecord>() as u64
            + self.num_environments as u64 * mem::size_of::<EnvironmentRecord>() as u64
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct StringRecord {
    pub id: StringId,
    pub _padding: u32,
    pub offset: u64,
    pub length: u64,
}

/// Describes a block of pixels stored in the payload region
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub _padding: u32,
    pub offset: u64,
    pub size: u64,
}

impl ImageDescriptor {
    pub fn pixel_format(&self) -> crate::Result<PixelFormat> {
        PixelFormat::try_from(self.format)
    }

    /// Bytes the descriptor's mip chain occupies once tightly packed
    pub fn linear_size(&self) -> crate::Result<u64> {
        Ok(crate::texture::mip_chain_size(
            self.width,
            self.height,
            self.pixel_format()?.bytes_per_pixel(),
            self.mip_levels,
            self.array_layers,
        ))
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TextureRecord {
    pub id: TextureId,
    pub name: StringId,
    pub image: ImageDescriptor,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct MaterialRecord {
    pub name: StringId,
    pub base_color: TextureId,
    pub normal: TextureId,
    pub roughness: TextureId,
    pub metallic: TextureId,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub _padding: u32,
    pub base_color_factor: [f32; 4],
}

impl MaterialRecord {
    /// Texture slots in the order base color, normal, roughness, metallic
    pub fn slots(&self) -> [TextureId; 4] {
        [self.base_color, self.normal, self.roughness, self.metallic]
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct MeshRecord {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub material: MaterialId,
    pub _padding: u32,
    pub bounds: BoundingBox,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct ObjectRecord {
    pub name: StringId,
    pub num_meshes: u32,
    /// Absolute offset of `num_meshes` [`crate::MeshId`]s
    pub meshes_offset: u64,
    /// Column major
    pub transform: [f32; 16],
    pub bounds: BoundingBox,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct GroupRecord {
    pub name: StringId,
    pub num_objects: u32,
    /// Absolute offset of `num_objects` [`crate::ObjectId`]s
    pub objects_offset: u64,
    pub bounds: BoundingBox,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct EnvironmentRecord {
    pub name: StringId,
    pub _padding: u32,
    pub skybox: ImageDescriptor,
    pub irradiance: ImageDescriptor,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub tex_coord: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(mem::size_of::<Header>(), 88);
        assert_eq!(mem::size_of::<StringRecord>(), 24);
        assert_eq!(mem::size_of::<ImageDescriptor>(), 40);
        assert_eq!(mem::size_of::<TextureRecord>(), 48);
        assert_eq!(mem::size_of::<MaterialRecord>(), 48);
        assert_eq!(mem::size_of::<MeshRecord>(), 48);
        assert_eq!(mem::size_of::<ObjectRecord>(), 104);
        assert_eq!(mem::size_of::<GroupRecord>(), 40);
        assert_eq!(mem::size_of::<EnvironmentRecord>(), 88);
        assert_eq!(mem::size_of::<Vertex>(), 48);
    }

    #[test]
    fn test_records_keep_alignment() {
        for size in [
            mem::size_of::<Header>(),
            mem::size_of::<StringRecord>(),
            mem::size_of::<TextureRecord>(),
            mem::size_of::<MaterialRecord>(),
            mem::size_of::<MeshRecord>(),
            mem::size_of::<ObjectRecord>(),
            mem::size_of::<GroupRecord>(),
            mem::size_of::<EnvironmentRecord>(),
        ] {
            assert_eq!(size as u64 % ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 8);
        assert_eq!(align(8), 8);
        assert_eq!(align(13), 16);
    }

    #[test]
    fn test_pixel_format_from_channels() {
        assert_eq!(PixelFormat::from_channels(3).unwrap(), PixelFormat::R8G8B8);
        assert!(matches!(
            PixelFormat::from_channels(5),
            Err(crate::BundleError::UnsupportedChannelLayout(5))
        ));
        assert!(matches!(
            PixelFormat::from_channels(0),
            Err(crate::BundleError::UnsupportedChannelLayout(0))
        ));
    }

    #[test]
    fn test_pixel_format_round_trip() {
        for format in [
            PixelFormat::R8,
            PixelFormat::R8G8,
            PixelFormat::R8G8B8,
            PixelFormat::R8G8B8A8,
            PixelFormat::R32G32B32A32Float,
        ] {
            assert_eq!(PixelFormat::try_from(format as u32).unwrap(), format);
        }
        assert!(PixelFormat::try_from(0).is_err());
    }

    #[test]
    fn test_tables_size() {
        let header = Header {
            num_strings: 2,
            num_meshes: 1,
            ..Default::default()
        };
        assert_eq!(header.tables_size(), 88 + 2 * 24 + 48);
    }
}
