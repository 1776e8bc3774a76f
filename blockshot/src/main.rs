use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use blockshot_job::{Pipeline, PipelineConfig};
use blockshot_nbt::{BlockState, StructureBuilder};
use blockshot_render::{
    CameraUpdate, EnvConfig, ImageOptions, QualityTier, ReadinessPolicy, RenderRequest,
};

#[derive(Parser)]
#[command(name = "blockshot", about = "Render structure containers to canonical views and material lists")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process container files, printing one JSON result per line
    Render {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Jobs to run at once, each with its own environment
        #[arg(short, long, default_value_t = 1)]
        concurrency: usize,

        /// Print the metrics report to stderr when done
        #[arg(long)]
        report: bool,
    },
    /// Render one free-camera image of a container
    Snapshot {
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[arg(long)]
        pitch: Option<f32>,

        #[arg(long)]
        yaw: Option<f32>,

        /// Camera position as x,y,z; switches the camera to manual
        #[arg(long, value_delimiter = ',', num_args = 3)]
        position: Option<Vec<f32>>,
    },
    /// Write a sample container filled with one block type
    Sample {
        #[arg(short, long, default_value = "sample.litematic")]
        output: PathBuf,

        #[arg(short, long, default_value_t = 4)]
        size: u32,

        #[arg(short, long, default_value = "minecraft:stone")]
        block: String,
    },
}

#[derive(Args)]
pub struct PipelineArgs {
    #[arg(long, env = "BLOCKSHOT_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    #[arg(long, env = "BLOCKSHOT_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// PNG texture atlas
    #[arg(long, env = "BLOCKSHOT_ATLAS", default_value = "resource/atlas.png")]
    pub atlas: PathBuf,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// normal, high or ultra
    #[arg(short, long, default_value = "high")]
    pub quality: QualityTier,

    #[arg(long)]
    pub no_antialias: bool,

    #[arg(long)]
    pub no_grid: bool,

    /// Only render layers from this Y up
    #[arg(long, allow_hyphen_values = true)]
    pub y_min: Option<i64>,

    /// Only render layers up to this Y
    #[arg(long, allow_hyphen_values = true)]
    pub y_max: Option<i64>,

    /// Also write the material list as CSV
    #[arg(long)]
    pub csv: bool,

    /// Keep one environment alive between jobs
    #[arg(long, env = "BLOCKSHOT_REUSE")]
    pub reuse: bool,

    #[arg(long, default_value_t = 50)]
    pub readiness_attempts: u32,

    #[arg(long, default_value_t = 100)]
    pub readiness_interval_ms: u64,

    /// Give up on readiness after this many milliseconds
    #[arg(long)]
    pub readiness_deadline_ms: Option<u64>,
}

impl PipelineArgs {
    fn into_config(self, default_size: (u32, u32)) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        let view_range = match (self.y_min, self.y_max) {
            (None, None) => None,
            (lo, hi) => Some((lo.unwrap_or(i64::MIN), hi.unwrap_or(i64::MAX))),
        };
        PipelineConfig {
            upload_dir: self.upload_dir,
            output_dir: self.output_dir,
            atlas_path: self.atlas,
            view: RenderRequest {
                width: self.width.unwrap_or(default_size.0),
                height: self.height.unwrap_or(default_size.1),
                quality: self.quality,
                antialias: !self.no_antialias,
                grid: !self.no_grid,
            },
            view_range,
            write_csv: self.csv,
            env: EnvConfig {
                reuse: self.reuse,
                readiness: ReadinessPolicy {
                    max_attempts: self.readiness_attempts,
                    interval: Duration::from_millis(self.readiness_interval_ms),
                    deadline: self.readiness_deadline_ms.map(Duration::from_millis),
                },
            },
            renderer: defaults.renderer,
        }
    }
}

async fn render(files: Vec<PathBuf>, config: PipelineConfig, concurrency: usize, report: bool) -> Result<()> {
    let pipeline = Arc::new(Pipeline::new(config));
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut jobs = JoinSet::new();

    for file in files {
        let bytes = tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pipeline = pipeline.clone();
        let permits = permits.clone();
        jobs.spawn(async move {
            let _permit = permits.acquire_owned().await;
            pipeline.process(&bytes, &name).await
        });
    }

    let mut failed = 0;
    let mut total = 0;
    while let Some(joined) = jobs.join_next().await {
        let result = joined.context("Job task panicked")?;
        total += 1;
        if !result.success {
            failed += 1;
        }
        println!("{}", serde_json::to_string(&result)?);
    }

    pipeline.shutdown().await;
    if report {
        eprintln!("{}", pipeline.metrics().generate_report());
    }
    if failed > 0 {
        bail!("{} of {} jobs failed", failed, total);
    }
    Ok(())
}

async fn snapshot(
    file: PathBuf,
    output: PathBuf,
    config: PipelineConfig,
    pitch: Option<f32>,
    yaw: Option<f32>,
    position: Option<Vec<f32>>,
) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let defaults = ImageOptions::default();
    let options = ImageOptions {
        request: config.view,
        pitch: pitch.unwrap_or(defaults.pitch),
        yaw: yaw.unwrap_or(defaults.yaw),
        auto_position: true,
    };
    let camera = position.map(|p| CameraUpdate {
        position: Some(glam::Vec3::new(p[0], p[1], p[2])),
        pitch,
        yaw,
    });

    let pipeline = Pipeline::new(config);
    let image = pipeline
        .snapshot(&bytes, &options, camera)
        .await
        .with_context(|| format!("Failed to render {}", file.display()))?;
    tokio::fs::write(&output, &image.bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}x{} snapshot to {}", image.width, image.height, output.display());
    Ok(())
}

fn sample(output: PathBuf, size: u32, block: String) -> Result<()> {
    let mut builder = StructureBuilder::new("sample", [size, size, size]);
    builder.fill(BlockState::new(block));
    let bytes = builder.to_container().context("Failed to encode sample")?;
    std::fs::write(&output, bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {size}x{size}x{size} sample to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Render {
            files,
            pipeline,
            concurrency,
            report,
        } => render(files, pipeline.into_config((1920, 1080)), concurrency, report).await,
        Command::Snapshot {
            file,
            output,
            pipeline,
            pitch,
            yaw,
            position,
        } => {
            let config = pipeline.into_config((800, 600));
            snapshot(file, output, config, pitch, yaw, position).await
        }
        Command::Sample {
            output,
            size,
            block,
        } => sample(output, size, block),
    }
}
