use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use blockshot_job::{ErrorKind, JobResult, Pipeline, PipelineConfig};
use blockshot_nbt::{BlockState, StructureBuilder, VoxelModel};
use blockshot_render::engine::RendererOptions;
use blockshot_render::engine::surface::SurfaceSpec;
use blockshot_render::host::{DrawPass, SurfaceId};
use blockshot_render::{
    CameraUpdate, EnvConfig, Host, HostError, HostFactory, ImageOptions, QualityTier,
    ReadinessPolicy, RenderRequest, WorkerHostFactory,
};
use fastnbt::{LongArray, Value};
use flate2::Compression;
use flate2::write::GzEncoder;
use glam::{Mat4, Vec3};
use image::{Rgba, RgbaImage};
use tempfile::TempDir;

/// Records how often hosts are closed and how many surfaces each still had.
#[derive(Default)]
struct Tracker {
    closes: AtomicUsize,
    surfaces_at_close: Mutex<Vec<usize>>,
}

struct TrackedHost {
    inner: Box<dyn Host>,
    tracker: Arc<Tracker>,
}

#[async_trait]
impl Host for TrackedHost {
    async fn launch(&mut self) -> Result<(), HostError> {
        self.inner.launch().await
    }
    async fn has_global(&mut self, name: &str) -> Result<bool, HostError> {
        self.inner.has_global(name).await
    }
    async fn load_module(&mut self, name: &str) -> Result<(), HostError> {
        self.inner.load_module(name).await
    }
    async fn load_atlas(&mut self, data_url: String) -> Result<(), HostError> {
        self.inner.load_atlas(data_url).await
    }
    async fn set_model(&mut self, model: Arc<VoxelModel>, options: RendererOptions) -> Result<(), HostError> {
        self.inner.set_model(model, options).await
    }
    async fn create_surface(&mut self, spec: SurfaceSpec) -> Result<SurfaceId, HostError> {
        self.inner.create_surface(spec).await
    }
    async fn draw(&mut self, surface: SurfaceId, pass: DrawPass, view: Mat4) -> Result<(), HostError> {
        self.inner.draw(surface, pass, view).await
    }
    async fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage, HostError> {
        self.inner.read_pixels(surface).await
    }
    async fn release_surface(&mut self, surface: SurfaceId) -> Result<(), HostError> {
        self.inner.release_surface(surface).await
    }
    async fn surface_count(&mut self) -> Result<usize, HostError> {
        self.inner.surface_count().await
    }
    async fn reset(&mut self) -> Result<(), HostError> {
        self.inner.reset().await
    }
    async fn close(&mut self) -> Result<(), HostError> {
        if let Ok(count) = self.inner.surface_count().await {
            self.tracker.surfaces_at_close.lock().unwrap().push(count);
        }
        self.tracker.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

struct TrackedFactory {
    inner: WorkerHostFactory,
    tracker: Arc<Tracker>,
}

impl HostFactory for TrackedFactory {
    fn create(&self) -> Box<dyn Host> {
        Box::new(TrackedHost {
            inner: self.inner.create(),
            tracker: self.tracker.clone(),
        })
    }
}

/// Boots but never reports any global as loaded.
struct NeverReady;

#[async_trait]
impl Host for NeverReady {
    async fn launch(&mut self) -> Result<(), HostError> {
        Ok(())
    }
    async fn has_global(&mut self, _name: &str) -> Result<bool, HostError> {
        Ok(false)
    }
    async fn load_module(&mut self, name: &str) -> Result<(), HostError> {
        Err(HostError::UnknownModule(name.to_string()))
    }
    async fn load_atlas(&mut self, _data_url: String) -> Result<(), HostError> {
        Err(HostError::NotRunning)
    }
    async fn set_model(&mut self, _model: Arc<VoxelModel>, _options: RendererOptions) -> Result<(), HostError> {
        Err(HostError::NotRunning)
    }
    async fn create_surface(&mut self, _spec: SurfaceSpec) -> Result<SurfaceId, HostError> {
        Err(HostError::NotRunning)
    }
    async fn draw(&mut self, _surface: SurfaceId, _pass: DrawPass, _view: Mat4) -> Result<(), HostError> {
        Err(HostError::NotRunning)
    }
    async fn read_pixels(&mut self, _surface: SurfaceId) -> Result<RgbaImage, HostError> {
        Err(HostError::NotRunning)
    }
    async fn release_surface(&mut self, surface: SurfaceId) -> Result<(), HostError> {
        Err(HostError::UnknownSurface(surface))
    }
    async fn surface_count(&mut self) -> Result<usize, HostError> {
        Ok(0)
    }
    async fn reset(&mut self) -> Result<(), HostError> {
        Ok(())
    }
    async fn close(&mut self) -> Result<(), HostError> {
        Ok(())
    }
}

struct NeverReadyFactory;

impl HostFactory for NeverReadyFactory {
    fn create(&self) -> Box<dyn Host> {
        Box::new(NeverReady)
    }
}

fn config(dir: &Path) -> PipelineConfig {
    let atlas_path = dir.join("atlas.png");
    let mut atlas = RgbaImage::new(64, 64);
    for (x, y, pixel) in atlas.enumerate_pixels_mut() {
        *pixel = Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255]);
    }
    atlas.save(&atlas_path).unwrap();

    PipelineConfig {
        upload_dir: dir.join("uploads"),
        output_dir: dir.join("outputs"),
        atlas_path,
        view: RenderRequest {
            width: 96,
            height: 64,
            quality: QualityTier::High,
            antialias: true,
            grid: true,
        },
        ..Default::default()
    }
}

fn stone_cube() -> Vec<u8> {
    let mut builder = StructureBuilder::new("cube", [4, 4, 4]);
    builder.fill(BlockState::new("minecraft:stone"));
    builder.to_container().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// The stone cube with every region's block state array cut to one long.
fn truncated_cube() -> Vec<u8> {
    let mut builder = StructureBuilder::new("cube", [4, 4, 4]);
    builder.fill(BlockState::new("minecraft:stone"));
    let mut root: Value = fastnbt::from_bytes(&builder.to_nbt().unwrap()).unwrap();

    let Value::Compound(map) = &mut root else {
        panic!("root should be a compound");
    };
    let Some(Value::Compound(regions)) = map.get_mut("Regions") else {
        panic!("container should have regions");
    };
    for region in regions.values_mut() {
        if let Value::Compound(region) = region {
            region.insert("BlockStates".to_string(), Value::LongArray(LongArray::new(vec![0])));
        }
    }
    gzip(&fastnbt::to_bytes(&root).unwrap())
}

fn tracked(config: PipelineConfig) -> (Pipeline, Arc<Tracker>) {
    let tracker = Arc::new(Tracker::default());
    let factory = TrackedFactory {
        inner: WorkerHostFactory::new(),
        tracker: tracker.clone(),
    };
    (Pipeline::with_factory(config, Arc::new(factory)), tracker)
}

fn output_dir(result: &JobResult) -> &Path {
    Path::new(result.output_dir.as_deref().unwrap())
}

#[tokio::test]
async fn test_cube_produces_views_and_manifest() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));
    let bytes = stone_cube();

    let result = pipeline.process(&bytes, "cube.litematic").await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.views,
        ["cube_frontView.png", "cube_sideView.png", "cube_topView.png"]
    );
    assert_eq!(result.materials.as_deref(), Some("cube_materials.json"));
    assert_eq!(result.original.as_deref(), Some("cube.litematic"));
    assert!(result.error_kind.is_none());

    let out = output_dir(&result);
    let job_id = result.job_id.as_deref().unwrap();
    assert!(out.ends_with(format!("cube_{job_id}")));

    for view in &result.views {
        let image = image::open(out.join(view)).unwrap();
        assert_eq!((image.width(), image.height()), (96, 64));
    }

    let manifest = std::fs::read_to_string(out.join("cube_materials.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest, serde_json::json!({ "minecraft:stone": 64 }));

    assert_eq!(std::fs::read(out.join("cube.litematic")).unwrap(), bytes);
    let upload = dir.path().join("uploads").join(format!("cube_{job_id}.litematic"));
    assert_eq!(std::fs::read(upload).unwrap(), bytes);

    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*tracker.surfaces_at_close.lock().unwrap(), vec![0]);
    assert_eq!(pipeline.metrics().surfaces_outstanding(), 0);
    assert_eq!(
        pipeline.metrics().total_surfaces_acquired.load(Ordering::Relaxed),
        3
    );
}

#[tokio::test]
async fn test_malformed_input_fails_and_tears_down_once() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));

    let result = pipeline.process(b"definitely", "broken.litematic").await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Decompression));
    assert!(result.error.as_deref().unwrap().starts_with("decode failed"));
    assert!(result.views.is_empty());

    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*tracker.surfaces_at_close.lock().unwrap(), vec![0]);
    assert_eq!(pipeline.metrics().total_env_teardowns.load(Ordering::Relaxed), 1);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["errorKind"], "decompression");
}

#[tokio::test]
async fn test_empty_input_is_decode_failure() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = tracked(config(dir.path()));
    let result = pipeline.process(&[], "empty.litematic").await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Decompression));
}

#[tokio::test]
async fn test_readiness_timeout_is_bounded() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.env = EnvConfig {
        reuse: false,
        readiness: ReadinessPolicy {
            max_attempts: 5,
            interval: Duration::from_millis(10),
            deadline: None,
        },
    };
    let pipeline = Pipeline::with_factory(config, Arc::new(NeverReadyFactory));

    let started = Instant::now();
    let result = pipeline.process(&stone_cube(), "cube.litematic").await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ReadinessTimeout));
    assert_eq!(pipeline.metrics().total_env_teardowns.load(Ordering::Relaxed), 1);
    assert_eq!(pipeline.metrics().total_readiness_timeouts.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_missing_atlas_is_io_failure() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.atlas_path = dir.path().join("nope.png");
    let (pipeline, tracker) = tracked(config);

    let result = pipeline.process(&stone_cube(), "cube.litematic").await;
    assert_eq!(result.error_kind, Some(ErrorKind::Io));
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));
    let bytes = stone_cube();

    let (a, b) = tokio::join!(
        pipeline.process(&bytes, "same.litematic"),
        pipeline.process(&bytes, "same.litematic")
    );
    assert!(a.success && b.success);
    assert_ne!(a.job_id, b.job_id);
    assert_ne!(output_dir(&a), output_dir(&b));
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reuse_keeps_one_environment() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.env.reuse = true;
    config.write_csv = true;
    config.view_range = Some((0, 1));
    let (pipeline, tracker) = tracked(config);

    for _ in 0..2 {
        let result = pipeline.process(&stone_cube(), "cube.litematic").await;
        assert!(result.success, "{:?}", result.error);
        let csv = std::fs::read_to_string(output_dir(&result).join("cube_materials.csv")).unwrap();
        // The view range only affects rendering.
        assert_eq!(csv, "minecraft:stone,64");
    }
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.metrics().total_env_launches.load(Ordering::Relaxed), 1);

    pipeline.shutdown().await;
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*tracker.surfaces_at_close.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_non_tag_tree_payload_is_format_mismatch() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));

    let result = pipeline
        .process(&gzip(b"plain text, not a tag tree"), "text.litematic")
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::FormatMismatch));
    assert!(result.error.as_deref().unwrap().starts_with("decode failed"));
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics().total_env_teardowns.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_short_block_states_is_model_build_failure() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));

    let result = pipeline.process(&truncated_cube(), "cube.litematic").await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ModelBuild));
    assert!(result.error.as_deref().unwrap().starts_with("model build failed"));
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*tracker.surfaces_at_close.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_snapshot_renders_and_tears_down() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));
    let options = ImageOptions {
        request: RenderRequest::new(48, 32),
        ..Default::default()
    };

    let png = pipeline.snapshot(&stone_cube(), &options, None).await.unwrap();
    let image = image::load_from_memory(&png.bytes).unwrap();
    assert_eq!((image.width(), image.height()), (48, 32));
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*tracker.surfaces_at_close.lock().unwrap(), vec![0]);

    let err = pipeline.snapshot(b"definitely", &options, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decompression);
    assert_eq!(tracker.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_snapshot_camera_update_pins_pose() {
    let dir = TempDir::new().unwrap();
    let (pipeline, tracker) = tracked(config(dir.path()));
    let bytes = stone_cube();
    let camera = CameraUpdate {
        position: Some(Vec3::new(-2.0, -2.0, -12.0)),
        pitch: Some(0.0),
        yaw: Some(0.0),
    };
    let low = ImageOptions {
        request: RenderRequest::new(48, 32),
        pitch: 0.1,
        yaw: 0.2,
        auto_position: true,
    };
    let steep = ImageOptions {
        pitch: 1.2,
        yaw: 2.0,
        ..low
    };

    let pinned_low = pipeline.snapshot(&bytes, &low, Some(camera)).await.unwrap();
    let pinned_steep = pipeline.snapshot(&bytes, &steep, Some(camera)).await.unwrap();
    assert_eq!(pinned_low.bytes, pinned_steep.bytes);

    let auto_low = pipeline.snapshot(&bytes, &low, None).await.unwrap();
    let auto_steep = pipeline.snapshot(&bytes, &steep, None).await.unwrap();
    assert_ne!(auto_low.bytes, auto_steep.bytes);

    assert_eq!(tracker.closes.load(Ordering::SeqCst), 4);
}
