//! Structure containers: decoding, voxel models and material counts.
//!
//! The flow is `bytes -> TagTree -> VoxelModel`:
//! - [`container::decode`] validates and decompresses an uploaded container
//! - a [`model::StructureTransform`] maps the tag tree to raw structure data
//! - [`model::ModelBuilder`] checks the invariants and produces an immutable model

pub mod container;
pub mod litematic;
pub mod materials;
pub mod model;
pub mod writer;

pub use container::{decode, parse, Compression, ContainerError, StructureContainer, TagTree};
pub use litematic::LitematicTransform;
pub use materials::MaterialTally;
pub use model::{
    BlockState, ModelBuildError, ModelBuilder, RawStructure, StructureMetadata,
    StructureTransform, TransformError, VoxelModel,
};
pub use writer::StructureBuilder;
