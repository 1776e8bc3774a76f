use std::path::PathBuf;

use blockshot_render::{EnvConfig, QualityTier, RenderRequest, RendererOptions};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// PNG texture atlas handed to every environment.
    pub atlas_path: PathBuf,
    /// Size and quality of each canonical view.
    pub view: RenderRequest,
    /// Render only layers `min..=max`; the material list is unaffected.
    pub view_range: Option<(i64, i64)>,
    pub write_csv: bool,
    pub env: EnvConfig,
    pub renderer: RendererOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            atlas_path: PathBuf::from("resource/atlas.png"),
            view: RenderRequest {
                width: 1920,
                height: 1080,
                quality: QualityTier::High,
                antialias: true,
                grid: true,
            },
            view_range: None,
            write_csv: false,
            env: EnvConfig::default(),
            renderer: RendererOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// One-line description for the metrics report.
    pub fn summary(&self) -> String {
        format!(
            "{}x{} {}, antialias={}, grid={}, reuse={}, readiness={}x{:?}",
            self.view.width,
            self.view.height,
            self.view.quality,
            self.view.antialias,
            self.view.grid,
            self.env.reuse,
            self.env.readiness.max_attempts,
            self.env.readiness.interval,
        )
    }
}
