//! Texel layout shared by everything that sizes or slices a mip chain.
//!
//! Mip chains are tightly packed and mip-major: every layer of level 0, then every layer of
//! level 1 and so on, without any padding between levels or layers.
use crate::format::PixelFormat;
use crate::id::StringId;
use crate::{BundleError, Result};

/// `floor(log2(max(width, height))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Extent of `level`, never smaller than 1x1
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    (
        width.checked_shr(level).unwrap_or(0).max(1),
        height.checked_shr(level).unwrap_or(0).max(1),
    )
}

/// Total bytes of a tightly packed mip chain
pub fn mip_chain_size(
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    mip_levels: u32,
    array_layers: u32,
) -> u64 {
    (0..mip_levels)
        .map(|level| {
            let (width, height) = mip_extent(width, height, level);
            width as u64 * height as u64 * bytes_per_pixel as u64
        })
        .sum::<u64>()
        * array_layers as u64
}

/// One level of a tightly packed mip chain
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    /// Offset of the first layer of this level from the start of the chain
    pub offset: u64,
    /// Bytes of a single layer of this level
    pub layer_size: u64,
}

impl MipLevel {
    pub fn layer_offset(&self, layer: u32) -> u64 {
        self.offset + self.layer_size * layer as u64
    }
}

/// Lays out every level of a mip chain
pub fn mip_chain(
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    mip_levels: u32,
    array_layers: u32,
) -> Vec<MipLevel> {
    let mut offset = 0;
    (0..mip_levels)
        .map(|level| {
            let (level_width, level_height) = mip_extent(width, height, level);
            let layer_size = level_width as u64 * level_height as u64 * bytes_per_pixel as u64;
            let mip = MipLevel {
                level,
                width: level_width,
                height: level_height,
                offset,
                layer_size,
            };
            offset += layer_size * array_layers as u64;
            mip
        })
        .collect()
}

/// A single-channel or multi-channel map whose first channel becomes alpha
#[derive(Debug, Copy, Clone)]
pub struct Opacity<'a> {
    pub channels: u32,
    pub data: &'a [u8],
}

/// Pixels of one texture as they will be stored
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: StringId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub data: Vec<u8>,
}

impl Texture {
    /// Builds a single level texture out of raw row-major 8-bit pixels, folding `opacity` in as
    /// alpha
    ///
    /// One and three channel images gain an alpha channel, two and four channel images get
    /// their last channel replaced.
    pub fn from_pixels(
        name: StringId,
        width: u32,
        height: u32,
        channels: u32,
        data: &[u8],
        opacity: Option<Opacity<'_>>,
    ) -> Result<Self> {
        PixelFormat::from_channels(channels)?;
        let texel_count = width as usize * height as usize;
        let expected = texel_count * channels as usize;
        if data.len() != expected {
            return Err(BundleError::InvalidTextureSize {
                expected,
                actual: data.len(),
            });
        }

        let (channels, data) = match opacity {
            None => (channels, data.to_vec()),
            Some(opacity) => {
                PixelFormat::from_channels(opacity.channels)?;
                let expected = texel_count * opacity.channels as usize;
                if opacity.data.len() != expected {
                    return Err(BundleError::InvalidTextureSize {
                        expected,
                        actual: opacity.data.len(),
                    });
                }
                insert_alpha(channels, data, opacity)
            }
        };

        Ok(Self {
            name,
            width,
            height,
            format: PixelFormat::from_channels(channels)?,
            mip_levels: 1,
            array_layers: 1,
            data,
        })
    }

    /// Bytes [`Self::data`] must hold for the described chain
    pub fn expected_size(&self) -> u64 {
        mip_chain_size(
            self.width,
            self.height,
            self.format.bytes_per_pixel(),
            self.mip_levels,
            self.array_layers,
        )
    }

    pub fn validate(&self) -> Result<()> {
        let expected = self.expected_size() as usize;
        if self.data.len() != expected || self.mip_levels == 0 || self.array_layers == 0 {
            return Err(BundleError::InvalidTextureSize {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Whether every texel of the first level equals the first texel
    pub fn is_uniform(&self) -> bool {
        let texel = self.format.bytes_per_pixel() as usize;
        let level = self.width as usize * self.height as usize * self.array_layers as usize * texel;
        match self.data.get(..level) {
            Some(level) if level.len() >= texel => {
                let first = &level[..texel];
                level.chunks_exact(texel).all(|candidate| candidate == first)
            }
            _ => false,
        }
    }

    /// Shrinks a uniform single layer texture down to its first texel. Returns whether it did.
    pub fn collapse(&mut self) -> bool {
        if self.array_layers != 1 || (self.width == 1 && self.height == 1 && self.mip_levels == 1)
        {
            return false;
        }
        if !self.is_uniform() {
            return false;
        }
        self.data.truncate(self.format.bytes_per_pixel() as usize);
        self.width = 1;
        self.height = 1;
        self.mip_levels = 1;
        true
    }
}

fn insert_alpha(channels: u32, data: &[u8], opacity: Opacity<'_>) -> (u32, Vec<u8>) {
    let channels = channels as usize;
    let out_channels = match channels {
        1 | 3 => channels + 1,
        _ => channels,
    };
    let mut out = Vec::with_capacity(data.len() / channels * out_channels);
    for (texel, alpha) in data
        .chunks_exact(channels)
        .zip(opacity.data.chunks_exact(opacity.channels as usize))
    {
        out.extend_from_slice(&texel[..out_channels - 1]);
        out.push(alpha[0]);
    }
    (out_channels as u32, out)
}
