//! Texture atlas handed to the render host as a data URL.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbaImage;
use thiserror::Error;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Atlas tiles are square, one block face each.
pub const TILE_SIZE: u32 = 16;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("not a base64 PNG data URL")]
    NotDataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid atlas image: {0}")]
    Image(#[from] image::ImageError),
}

/// Embed PNG bytes as a data URL.
pub fn png_data_url(bytes: &[u8]) -> String {
    format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(bytes))
}

// FNV-1a 64-bit hash
pub fn fnv1a_hash(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Debug, Clone)]
pub struct TextureAtlas {
    image: RgbaImage,
}

impl TextureAtlas {
    pub fn from_png(bytes: &[u8]) -> Result<Self, AtlasError> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self { image })
    }

    pub fn from_data_url(url: &str) -> Result<Self, AtlasError> {
        let payload = url
            .strip_prefix(PNG_DATA_URL_PREFIX)
            .ok_or(AtlasError::NotDataUrl)?;
        Self::from_png(&STANDARD.decode(payload)?)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn tile_count(&self) -> u32 {
        (self.image.width() / TILE_SIZE) * (self.image.height() / TILE_SIZE)
    }

    /// Average colour of the tile a block name hashes to.
    ///
    /// Falls back to a colour derived from the hash alone when the atlas has
    /// no tiles or the chosen tile is fully transparent.
    pub fn block_color(&self, name: &str) -> [f32; 3] {
        let hash = fnv1a_hash(name);
        let tiles = self.tile_count();
        if tiles == 0 {
            return hash_color(hash);
        }

        let tile = (hash % tiles as u64) as u32;
        let columns = self.image.width() / TILE_SIZE;
        let (tx, ty) = ((tile % columns) * TILE_SIZE, (tile / columns) * TILE_SIZE);

        let mut sum = [0f32; 3];
        let mut weight = 0f32;
        for y in ty..ty + TILE_SIZE {
            for x in tx..tx + TILE_SIZE {
                let [r, g, b, a] = self.image.get_pixel(x, y).0;
                let a = a as f32 / 255.0;
                sum[0] += r as f32 / 255.0 * a;
                sum[1] += g as f32 / 255.0 * a;
                sum[2] += b as f32 / 255.0 * a;
                weight += a;
            }
        }

        if weight <= f32::EPSILON {
            return hash_color(hash);
        }
        sum.map(|c| c / weight)
    }
}

fn hash_color(hash: u64) -> [f32; 3] {
    let channel = |shift: u32| 0.35 + 0.6 * ((hash >> shift) & 0xff) as f32 / 255.0;
    [channel(16), channel(8), channel(0)]
}
