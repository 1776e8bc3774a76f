//! Voxel model and its builder.
//!
//! The mapping from a tag tree to blocks lives behind [`StructureTransform`].
//! [`ModelBuilder`] only runs the transform and enforces what every model
//! must satisfy: non-negative dimensions, a cell buffer matching them, and
//! every populated cell pointing into the palette.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::container::TagTree;

/// Palette slot 0 is always air; cells holding 0 are empty.
pub const EMPTY: u32 = 0;

pub const AIR: &str = "minecraft:air";

/// Block names rendered and counted as nothing.
pub fn is_air(name: &str) -> bool {
    matches!(
        name,
        "minecraft:air" | "minecraft:cave_air" | "minecraft:void_air" | "minecraft:structure_void"
    )
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

#[derive(Debug, Error)]
pub enum ModelBuildError {
    #[error("structure transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("negative dimension in size {0:?}")]
    NegativeSize([i64; 3]),
    #[error("cell buffer holds {actual} entries, size {size:?} needs {expected}")]
    CellCount {
        size: [i64; 3],
        expected: u64,
        actual: usize,
    },
    #[error("palette must start with minecraft:air, found {0:?}")]
    MissingAir(Option<String>),
    #[error("cell {index} references palette entry {entry} but palette has {len} entries")]
    PaletteIndex { index: usize, entry: u32, len: usize },
}

/// A block type: namespaced name plus optional state properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockState {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn air() -> Self {
        Self::new(AIR)
    }

    pub fn is_air(&self) -> bool {
        is_air(&self.name)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "[{}]", props.join(","))?;
        }
        Ok(())
    }
}

/// Descriptive fields carried by the container, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureMetadata {
    pub name: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
}

/// Unvalidated transform output.
///
/// Cells are laid out `(y * size_z + z) * size_x + x` and index `palette`.
#[derive(Debug, Clone, Default)]
pub struct RawStructure {
    pub size: [i64; 3],
    pub palette: Vec<BlockState>,
    pub cells: Vec<u32>,
    pub metadata: StructureMetadata,
}

/// Maps a tag tree to raw structure data.
pub trait StructureTransform: Send + Sync {
    fn transform(&self, tree: &TagTree) -> Result<RawStructure, TransformError>;
}

/// Immutable 3D grid of block references.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelModel {
    size: [u32; 3],
    palette: Vec<BlockState>,
    cells: Vec<u32>,
    metadata: StructureMetadata,
}

impl TryFrom<RawStructure> for VoxelModel {
    type Error = ModelBuildError;

    fn try_from(raw: RawStructure) -> Result<Self, Self::Error> {
        let RawStructure {
            size,
            palette,
            cells,
            metadata,
        } = raw;

        if size.iter().any(|&d| d < 0) {
            return Err(ModelBuildError::NegativeSize(size));
        }
        let dims = size.map(|d| u32::try_from(d).unwrap_or(u32::MAX));
        let expected = dims.iter().fold(1u64, |acc, &d| acc.saturating_mul(u64::from(d)));
        if cells.len() as u64 != expected {
            return Err(ModelBuildError::CellCount {
                size,
                expected,
                actual: cells.len(),
            });
        }

        match palette.first() {
            Some(first) if first.name == AIR => {}
            other => return Err(ModelBuildError::MissingAir(other.map(|b| b.name.clone()))),
        }
        if let Some((index, &entry)) = cells
            .iter()
            .enumerate()
            .find(|&(_, &entry)| entry as usize >= palette.len())
        {
            return Err(ModelBuildError::PaletteIndex {
                index,
                entry,
                len: palette.len(),
            });
        }

        Ok(Self {
            size: dims,
            palette,
            cells,
            metadata,
        })
    }
}

impl VoxelModel {
    /// A model with every cell set to `block`.
    pub fn filled(size: [u32; 3], block: BlockState) -> Self {
        let volume = size.iter().map(|&d| d as usize).product();
        let (palette, fill) = if block.is_air() {
            (vec![BlockState::air()], EMPTY)
        } else {
            (vec![BlockState::air(), block], 1)
        };
        Self {
            size,
            palette,
            cells: vec![fill; volume],
            metadata: StructureMetadata::default(),
        }
    }

    pub fn size(&self) -> [u32; 3] {
        self.size
    }

    pub fn palette(&self) -> &[BlockState] {
        &self.palette
    }

    pub fn metadata(&self) -> &StructureMetadata {
        &self.metadata
    }

    fn index(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        let [sx, sy, sz] = self.size.map(i64::from);
        if x < 0 || y < 0 || z < 0 || x >= sx || y >= sy || z >= sz {
            return None;
        }
        Some(((y * sz + z) * sx + x) as usize)
    }

    /// Block at a position; `None` when empty or out of bounds.
    pub fn block_at(&self, x: i64, y: i64, z: i64) -> Option<&BlockState> {
        let entry = self.cells[self.index(x, y, z)?];
        (entry != EMPTY).then(|| &self.palette[entry as usize])
    }

    pub fn is_occupied(&self, x: i64, y: i64, z: i64) -> bool {
        self.block_at(x, y, z).is_some()
    }

    /// Every populated cell with its position.
    pub fn blocks(&self) -> impl Iterator<Item = ([u32; 3], &BlockState)> + '_ {
        let [sx, _, sz] = self.size;
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &entry)| entry != EMPTY)
            .map(move |(i, &entry)| {
                let i = i as u32;
                let x = i % sx;
                let z = (i / sx) % sz;
                let y = i / (sx * sz);
                ([x, y, z], &self.palette[entry as usize])
            })
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|&&entry| entry != EMPTY).count()
    }

    /// Copy of the model keeping only layers `y_min..=y_max`; size is unchanged.
    pub fn clip_y(&self, y_min: i64, y_max: i64) -> VoxelModel {
        let [sx, _, sz] = self.size;
        let layer = sx as usize * sz as usize;
        let cells = self
            .cells
            .iter()
            .enumerate()
            .map(|(i, &entry)| {
                let y = if layer == 0 { 0 } else { (i / layer) as i64 };
                if (y_min..=y_max).contains(&y) { entry } else { EMPTY }
            })
            .collect();
        VoxelModel {
            size: self.size,
            palette: self.palette.clone(),
            cells,
            metadata: self.metadata.clone(),
        }
    }
}

/// Runs a transform and validates its output.
pub struct ModelBuilder<T: StructureTransform> {
    transform: T,
}

impl<T: StructureTransform> ModelBuilder<T> {
    pub fn new(transform: T) -> Self {
        Self { transform }
    }

    pub fn build(&self, tree: &TagTree) -> Result<VoxelModel, ModelBuildError> {
        let raw = self.transform.transform(tree)?;
        let model = VoxelModel::try_from(raw)?;
        log::debug!(
            "Built model {:?} with {} palette entries, {} occupied cells",
            model.size(),
            model.palette().len(),
            model.occupied()
        );
        Ok(model)
    }
}
