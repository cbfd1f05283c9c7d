//! Device side preprocessing for bundles: uploads pixels, generates mip chains with blits and
//! reads the results back for the bundle builder.
pub mod bootstrap;
pub mod buffer;
pub mod command;
pub mod context;
pub mod environment;
pub mod error;
pub mod fence;
pub mod image;
pub mod processor;
pub mod texture;
pub mod transfer;

#[cfg(test)]
mod tests;

pub use context::GpuContext;
pub use environment::{CubemapDesc, EnvironmentJob};
pub use error::PreprocessError;
pub use processor::{Processor, ProcessorSettings};
pub use texture::TextureJob;
pub use transfer::TransferJob;

// Re-exports
pub use {ash, gpu_allocator};

pub type Result<T> = std::result::Result<T, PreprocessError>;
