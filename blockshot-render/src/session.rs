//! One draw and capture cycle against a host surface.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use blockshot_benchmark::RenderMetrics;
use blockshot_nbt::VoxelModel;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use thiserror::Error;

use crate::camera::CameraPose;
use crate::engine::RendererOptions;
use crate::engine::surface::SurfaceSpec;
use crate::env::EnvError;
use crate::host::{DrawPass, Host, HostError, SurfaceId};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("drawing surface unavailable: {0}")]
    Surface(#[source] HostError),
    #[error("draw failed: {0}")]
    Draw(#[source] HostError),
    #[error("capture failed: {0}")]
    Capture(#[source] HostError),
    #[error("downscale failed: {0}")]
    Downscale(String),
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Internal resolution multiplier applied before downsampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QualityTier {
    Normal,
    #[default]
    High,
    Ultra,
}

impl QualityTier {
    pub fn factor(&self) -> u32 {
        match self {
            QualityTier::Normal => 1,
            QualityTier::High => 2,
            QualityTier::Ultra => 4,
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown quality tier {0:?}, expected normal, high or ultra")]
pub struct ParseQualityError(String);

impl FromStr for QualityTier {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(QualityTier::Normal),
            "high" => Ok(QualityTier::High),
            "ultra" => Ok(QualityTier::Ultra),
            _ => Err(ParseQualityError(s.to_string())),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::Normal => "normal",
            QualityTier::High => "high",
            QualityTier::Ultra => "ultra",
        })
    }
}

/// Output size and quality for a single render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,
    pub quality: QualityTier,
    pub antialias: bool,
    pub grid: bool,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            quality: QualityTier::High,
            antialias: true,
            grid: true,
        }
    }
}

impl RenderRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    fn surface_spec(&self) -> SurfaceSpec {
        let factor = self.quality.factor();
        let mut spec = SurfaceSpec::new(
            self.width.saturating_mul(factor),
            self.height.saturating_mul(factor),
        );
        spec.sample_coverage = self.antialias;
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// Borrows a ready host for a sequence of renders.
pub struct RenderSession<'a> {
    host: &'a mut dyn Host,
    metrics: Arc<RenderMetrics>,
    options: RendererOptions,
}

impl<'a> RenderSession<'a> {
    pub fn new(host: &'a mut dyn Host, metrics: Arc<RenderMetrics>, options: RendererOptions) -> Self {
        Self {
            host,
            metrics,
            options,
        }
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    pub async fn surface_count(&mut self) -> Result<usize, HostError> {
        self.host.surface_count().await
    }

    async fn draw_and_capture(
        &mut self,
        surface: SurfaceId,
        pose: &CameraPose,
        grid: bool,
    ) -> Result<RgbaImage, RenderError> {
        let view = pose.view_matrix();
        self.host
            .draw(surface, DrawPass::Structure, view)
            .await
            .map_err(RenderError::Draw)?;
        if grid {
            self.host
                .draw(surface, DrawPass::Grid, view)
                .await
                .map_err(RenderError::Draw)?;
        }
        self.host.read_pixels(surface).await.map_err(RenderError::Capture)
    }

    /// Render at the supersampled size and scale down to the requested one.
    /// The surface is released on every path out of here.
    pub async fn render_pixels(
        &mut self,
        model: &Arc<VoxelModel>,
        pose: &CameraPose,
        request: &RenderRequest,
    ) -> Result<RgbaImage, RenderError> {
        let spec = request.surface_spec();
        if request.width == 0 || request.height == 0 || !spec.is_valid() {
            return Err(RenderError::Surface(HostError::InvalidSurface {
                width: spec.width,
                height: spec.height,
            }));
        }

        self.host
            .set_model(model.clone(), self.options)
            .await
            .map_err(RenderError::Draw)?;

        let started = Instant::now();
        let surface = self
            .host
            .create_surface(spec)
            .await
            .map_err(RenderError::Surface)?;
        self.metrics.record_surface_acquired();

        let captured = self.draw_and_capture(surface, pose, request.grid).await;
        let released = self.host.release_surface(surface).await;
        if released.is_ok() {
            self.metrics.record_surface_released();
        }
        let image = captured?;
        released.map_err(RenderError::Surface)?;
        self.metrics
            .record_render(started.elapsed(), u64::from(spec.width) * u64::from(spec.height));

        if image.dimensions() == (request.width, request.height) {
            return Ok(image);
        }
        let (width, height) = (request.width, request.height);
        tokio::task::spawn_blocking(move || imageops::resize(&image, width, height, FilterType::Lanczos3))
            .await
            .map_err(|e| RenderError::Downscale(e.to_string()))
    }

    pub async fn render(
        &mut self,
        model: &Arc<VoxelModel>,
        pose: &CameraPose,
        request: &RenderRequest,
    ) -> Result<PngImage, RenderError> {
        let image = self.render_pixels(model, pose, request).await?;
        let started = Instant::now();
        let bytes = encode_png(&image)?;
        self.metrics.record_encode(started.elapsed(), bytes.len());
        Ok(PngImage {
            width: image.width(),
            height: image.height(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{ViewSpec, frame};
    use crate::engine::atlas::png_data_url;
    use crate::host::{VIEWER_GLOBAL, WorkerHost};
    use blockshot_nbt::BlockState;
    use image::Rgba;
    use std::io::Cursor;

    async fn ready_host() -> WorkerHost {
        let mut atlas = Vec::new();
        RgbaImage::from_pixel(16, 16, Rgba([120, 120, 120, 255]))
            .write_to(&mut Cursor::new(&mut atlas), image::ImageFormat::Png)
            .unwrap();
        let mut host = WorkerHost::new("session-test");
        host.launch().await.unwrap();
        host.load_module(VIEWER_GLOBAL).await.unwrap();
        host.load_atlas(png_data_url(&atlas)).await.unwrap();
        host
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!("normal".parse::<QualityTier>().unwrap().factor(), 1);
        assert_eq!("HIGH".parse::<QualityTier>().unwrap().factor(), 2);
        assert_eq!("ultra".parse::<QualityTier>().unwrap().factor(), 4);
        assert!("extreme".parse::<QualityTier>().is_err());
        assert_eq!(QualityTier::default().to_string(), "high");
    }

    #[test]
    fn test_surface_spec_follows_request() {
        let mut request = RenderRequest::new(100, 50);
        request.quality = QualityTier::Ultra;
        request.antialias = false;
        let spec = request.surface_spec();
        assert_eq!((spec.width, spec.height), (400, 200));
        assert!(spec.depth_test && spec.cull_face && spec.blend && spec.premultiplied_alpha);
        assert!(!spec.sample_coverage);
    }

    #[tokio::test]
    async fn test_render_downscales_to_requested_size() {
        let mut host = ready_host().await;
        let metrics = Arc::new(RenderMetrics::new(String::from("test")));
        let model = Arc::new(VoxelModel::filled([4, 4, 4], BlockState::new("minecraft:stone")));
        let pose = frame(ViewSpec::Front, model.size());

        let mut session = RenderSession::new(&mut host, metrics.clone(), RendererOptions::default());
        let png = session.render(&model, &pose, &RenderRequest::new(64, 48)).await.unwrap();
        assert_eq!((png.width, png.height), (64, 48));

        let decoded = image::load_from_memory(&png.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert_eq!(session.surface_count().await.unwrap(), 0);
        assert_eq!(metrics.surfaces_outstanding(), 0);
        drop(session);
        host.close().await.unwrap();
    }

    /// Delegates to a worker host but refuses grid draws.
    struct BrokenGrid(WorkerHost);

    #[async_trait::async_trait]
    impl Host for BrokenGrid {
        async fn launch(&mut self) -> Result<(), HostError> {
            self.0.launch().await
        }
        async fn has_global(&mut self, name: &str) -> Result<bool, HostError> {
            self.0.has_global(name).await
        }
        async fn load_module(&mut self, name: &str) -> Result<(), HostError> {
            self.0.load_module(name).await
        }
        async fn load_atlas(&mut self, data_url: String) -> Result<(), HostError> {
            self.0.load_atlas(data_url).await
        }
        async fn set_model(&mut self, model: Arc<VoxelModel>, options: RendererOptions) -> Result<(), HostError> {
            self.0.set_model(model, options).await
        }
        async fn create_surface(&mut self, spec: SurfaceSpec) -> Result<SurfaceId, HostError> {
            self.0.create_surface(spec).await
        }
        async fn draw(&mut self, surface: SurfaceId, pass: DrawPass, view: glam::Mat4) -> Result<(), HostError> {
            match pass {
                DrawPass::Grid => Err(HostError::Disconnected),
                DrawPass::Structure => self.0.draw(surface, pass, view).await,
            }
        }
        async fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage, HostError> {
            self.0.read_pixels(surface).await
        }
        async fn release_surface(&mut self, surface: SurfaceId) -> Result<(), HostError> {
            self.0.release_surface(surface).await
        }
        async fn surface_count(&mut self) -> Result<usize, HostError> {
            self.0.surface_count().await
        }
        async fn reset(&mut self) -> Result<(), HostError> {
            self.0.reset().await
        }
        async fn close(&mut self) -> Result<(), HostError> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_surface_released_after_failed_draw() {
        let mut host = BrokenGrid(ready_host().await);
        let metrics = Arc::new(RenderMetrics::new(String::from("test")));
        let model = Arc::new(VoxelModel::filled([1, 1, 1], BlockState::new("minecraft:stone")));
        let pose = frame(ViewSpec::Top, model.size());

        let mut session = RenderSession::new(&mut host, metrics.clone(), RendererOptions::default());
        for _ in 0..3 {
            let err = session.render(&model, &pose, &RenderRequest::new(16, 16)).await.unwrap_err();
            assert!(matches!(err, RenderError::Draw(HostError::Disconnected)));
            assert_eq!(session.surface_count().await.unwrap(), 0);
        }
        assert_eq!(metrics.surfaces_outstanding(), 0);
        drop(session);
        host.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_viewer_fails_before_surface() {
        let mut host = WorkerHost::new("no-viewer");
        host.launch().await.unwrap();
        let metrics = Arc::new(RenderMetrics::new(String::from("test")));
        let model = Arc::new(VoxelModel::filled([1, 1, 1], BlockState::new("minecraft:stone")));
        let pose = frame(ViewSpec::Front, model.size());

        let mut session = RenderSession::new(&mut host, metrics, RendererOptions::default());
        let err = session.render(&model, &pose, &RenderRequest::new(16, 16)).await.unwrap_err();
        assert!(matches!(err, RenderError::Draw(HostError::MissingGlobal(_))));
        assert_eq!(session.surface_count().await.unwrap(), 0);
        drop(session);
        host.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_requests() {
        let mut host = ready_host().await;
        let metrics = Arc::new(RenderMetrics::new(String::from("test")));
        let model = Arc::new(VoxelModel::filled([1, 1, 1], BlockState::new("minecraft:stone")));
        let pose = frame(ViewSpec::Front, model.size());
        let mut session = RenderSession::new(&mut host, metrics, RendererOptions::default());

        for request in [RenderRequest::new(0, 10), RenderRequest::new(10_000, 10)] {
            assert!(matches!(
                session.render(&model, &pose, &request).await,
                Err(RenderError::Surface(HostError::InvalidSurface { .. }))
            ));
        }
        assert_eq!(session.surface_count().await.unwrap(), 0);
        drop(session);
        host.close().await.unwrap();
    }
}
