//! Litematic container writer.
//!
//! Serialized with fastnbt from plain serde structs, then gzip-compressed.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::litematic::{bits_for, pack};
use crate::model::{BlockState, EMPTY};

/// Minecraft data version written into new containers.
/// Can be overridden by BLOCKSHOT_DATA_VERSION env var.
pub fn data_version() -> i32 {
    std::env::var("BLOCKSHOT_DATA_VERSION")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3955)
}

const LITEMATIC_VERSION: i32 = 6;

#[derive(Debug, Serialize)]
struct LitematicFile {
    #[serde(rename = "MinecraftDataVersion")]
    data_version: i32,
    #[serde(rename = "Version")]
    version: i32,
    #[serde(rename = "Metadata")]
    metadata: Metadata,
    #[serde(rename = "Regions")]
    regions: HashMap<String, Region>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Metadata {
    name: String,
    author: String,
    description: String,
    region_count: i32,
    total_blocks: i32,
    total_volume: i32,
    enclosing_size: Vec3,
    time_created: i64,
    time_modified: i64,
}

#[derive(Debug, Serialize)]
struct Vec3 {
    x: i32,
    y: i32,
    z: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Region {
    position: Vec3,
    size: Vec3,
    block_state_palette: Vec<PaletteEntry>,
    block_states: fastnbt::LongArray,
}

#[derive(Debug, Serialize)]
struct PaletteEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

/// Builds a single-region litematic.
#[derive(Debug, Clone)]
pub struct StructureBuilder {
    name: String,
    author: String,
    size: [u32; 3],
    // Palette index per cell, (y * sz + z) * sx + x; index 0 is air
    cells: Vec<u32>,
    palette: Vec<BlockState>,
}

impl StructureBuilder {
    pub fn new(name: impl Into<String>, size: [u32; 3]) -> Self {
        let volume = size.iter().map(|&d| d as usize).product();
        Self {
            name: name.into(),
            author: String::from("blockshot"),
            size,
            cells: vec![EMPTY; volume],
            palette: vec![BlockState::air()],
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    fn palette_index(&mut self, block: BlockState) -> u32 {
        if block.is_air() {
            return EMPTY;
        }
        match self.palette.iter().position(|b| *b == block) {
            Some(i) => i as u32,
            None => {
                self.palette.push(block);
                (self.palette.len() - 1) as u32
            }
        }
    }

    /// Set a single block; positions outside the size are ignored.
    pub fn set_block(&mut self, x: u32, y: u32, z: u32, block: BlockState) {
        let [sx, sy, sz] = self.size;
        if x >= sx || y >= sy || z >= sz {
            return;
        }
        let index = self.palette_index(block);
        self.cells[((y * sz + z) * sx + x) as usize] = index;
    }

    /// Fill a whole Y layer.
    pub fn fill_layer(&mut self, y: u32, block: BlockState) {
        let [sx, sy, sz] = self.size;
        if y >= sy {
            return;
        }
        let index = self.palette_index(block);
        let layer = (sx * sz) as usize;
        let start = y as usize * layer;
        self.cells[start..start + layer].fill(index);
    }

    /// Fill every cell.
    pub fn fill(&mut self, block: BlockState) {
        let index = self.palette_index(block);
        self.cells.fill(index);
    }

    /// Serialize to an uncompressed tag tree.
    pub fn to_nbt(&self) -> Result<Vec<u8>, fastnbt::error::Error> {
        let [sx, sy, sz] = self.size.map(|d| d as i32);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let total_blocks = self.cells.iter().filter(|&&c| c != EMPTY).count() as i32;
        let bits = bits_for(self.palette.len());

        let region = Region {
            position: Vec3 { x: 0, y: 0, z: 0 },
            size: Vec3 { x: sx, y: sy, z: sz },
            block_state_palette: self
                .palette
                .iter()
                .map(|b| PaletteEntry {
                    name: b.name.clone(),
                    properties: b.properties.clone(),
                })
                .collect(),
            block_states: fastnbt::LongArray::new(pack(&self.cells, bits)),
        };

        let mut regions = HashMap::new();
        regions.insert(self.name.clone(), region);

        let file = LitematicFile {
            data_version: data_version(),
            version: LITEMATIC_VERSION,
            metadata: Metadata {
                name: self.name.clone(),
                author: self.author.clone(),
                description: String::new(),
                region_count: 1,
                total_blocks,
                total_volume: sx * sy * sz,
                enclosing_size: Vec3 { x: sx, y: sy, z: sz },
                time_created: now,
                time_modified: now,
            },
            regions,
        };

        fastnbt::to_bytes(&file)
    }

    /// Serialize and gzip, ready to be written as a `.litematic` file.
    pub fn to_container(&self) -> std::io::Result<Vec<u8>> {
        let nbt = self
            .to_nbt()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&nbt)?;
        encoder.finish()
    }
}
