//! Scene bundles: a single flat, offset-addressed and zstd compressed file holding every
//! string, texture, material, mesh, object, group and environment of a scene.
//!
//! [`BundleBuilder`] accumulates entities and writes the file, [`Bundle`] loads it back and hands
//! out zero-copy views into its arena.

pub mod bounding_box;
pub mod builder;
pub mod compression;
pub mod error;
pub mod format;
pub mod id;
pub mod reader;
pub mod texture;

#[cfg(test)]
mod tests;

pub use bounding_box::BoundingBox;
pub use builder::{BundleBuilder, Environment, EnvironmentImage, Material, MeshDesc};
pub use compression::BundleArena;
pub use error::BundleError;
pub use format::{
    EnvironmentRecord, GroupRecord, Header, ImageDescriptor, MaterialRecord, MeshRecord,
    ObjectRecord, PixelFormat, StringRecord, TextureRecord, Vertex,
};
pub use id::{EnvironmentId, GroupId, MaterialId, MeshId, ObjectId, StringId, TextureId};
pub use reader::{Bundle, EnvironmentView, GroupView, ObjectView, TextureView};
pub use texture::{Opacity, Texture};

pub type Result<T> = std::result::Result<T, BundleError>;
