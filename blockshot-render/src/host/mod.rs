//! Isolated render context.
//!
//! A [`Host`] owns every piece of ambient render state (loaded modules,
//! atlas, active model and drawing surfaces) so that nothing leaks between
//! jobs. Callers drive it through this trait only.

pub mod worker;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use glam::Mat4;
use image::RgbaImage;
use thiserror::Error;

use blockshot_nbt::VoxelModel;

use crate::engine::RendererOptions;
use crate::engine::atlas::AtlasError;
use crate::engine::surface::SurfaceSpec;

pub use worker::{WorkerHost, WorkerHostFactory};

/// Globals available as soon as the context has booted.
pub const CORE_GLOBALS: [&str; 2] = ["linalg", "engine"];
/// Registered by loading the viewer module.
pub const VIEWER_GLOBAL: &str = "viewer";
/// Registered once a texture atlas is installed.
pub const RESOURCES_GLOBAL: &str = "resources";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to launch render context: {0}")]
    Launch(String),
    #[error("render context is not running")]
    NotRunning,
    #[error("render context disconnected")]
    Disconnected,
    #[error("unknown module {0:?}")]
    UnknownModule(String),
    #[error("required global {0:?} is not loaded")]
    MissingGlobal(&'static str),
    #[error("atlas rejected: {0}")]
    Atlas(#[from] AtlasError),
    #[error("no model installed")]
    NoModel,
    #[error("invalid surface size {width}x{height}")]
    InvalidSurface { width: u32, height: u32 },
    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPass {
    Structure,
    Grid,
}

#[async_trait]
pub trait Host: Send {
    /// Boot the context. Core globals appear some time after this returns.
    async fn launch(&mut self) -> Result<(), HostError>;

    async fn has_global(&mut self, name: &str) -> Result<bool, HostError>;

    async fn load_module(&mut self, name: &str) -> Result<(), HostError>;

    /// Install the texture atlas from a `data:image/png;base64,` URL.
    async fn load_atlas(&mut self, data_url: String) -> Result<(), HostError>;

    async fn set_model(&mut self, model: Arc<VoxelModel>, options: RendererOptions) -> Result<(), HostError>;

    async fn create_surface(&mut self, spec: SurfaceSpec) -> Result<SurfaceId, HostError>;

    async fn draw(&mut self, surface: SurfaceId, pass: DrawPass, view: Mat4) -> Result<(), HostError>;

    async fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage, HostError>;

    async fn release_surface(&mut self, surface: SurfaceId) -> Result<(), HostError>;

    async fn surface_count(&mut self) -> Result<usize, HostError>;

    /// Drop the model and every surface; keep loaded modules and the atlas.
    async fn reset(&mut self) -> Result<(), HostError>;

    async fn close(&mut self) -> Result<(), HostError>;
}

/// Produces a fresh, unlaunched host per environment.
pub trait HostFactory: Send + Sync {
    fn create(&self) -> Box<dyn Host>;
}
