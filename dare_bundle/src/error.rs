use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Malformed bundle: {0}")]
    Format(String),

    #[error("Unsupported channel layout: {0} channels, expected 1 to 4")]
    UnsupportedChannelLayout(u32),

    #[error("Unknown {kind} id {id}")]
    InvalidId { kind: &'static str, id: u32 },

    #[error("Range {offset}..{offset}+{count} lies outside of the {kind} array of length {len}")]
    InvalidRange {
        kind: &'static str,
        offset: u64,
        count: u64,
        len: u64,
    },

    #[error("Texture holds {actual} bytes, expected {expected}")]
    InvalidTextureSize { expected: usize, actual: usize },

    #[error("Texture {0} was reserved but never filled")]
    UnfilledTexture(u32),

    #[error("Unable to allocate {0} bytes for the bundle")]
    OutOfMemory(usize),

    #[error("Short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BundleError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }
}
