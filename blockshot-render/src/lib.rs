//! Rendering side of blockshot.
//!
//! - [`camera`]: canonical view framing and the free camera rig
//! - [`host`]: the isolated context the engine runs in
//! - [`env`]: environment lifecycle, readiness polling and teardown
//! - [`session`]: surface acquire, draw, capture and downscale
//! - [`viewer`]: per-job facade tying a model to the above

pub mod camera;
pub mod engine;
pub mod env;
pub mod host;
pub mod session;
pub mod viewer;

pub use camera::{CameraMode, CameraPose, CameraRig, CameraUpdate, ViewSpec, frame};
pub use engine::RendererOptions;
pub use engine::atlas::{AtlasError, TextureAtlas, png_data_url};
pub use env::{
    EnvConfig, EnvError, EnvState, Environment, EnvironmentManager, Readiness, ReadinessPolicy,
    poll_ready,
};
pub use host::{Host, HostError, HostFactory, WorkerHost, WorkerHostFactory};
pub use session::{PngImage, QualityTier, RenderError, RenderRequest, RenderSession, encode_png};
pub use viewer::{ImageOptions, Viewer};
