//! Job pipeline: upload bytes in, views and a material manifest out.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use blockshot_benchmark::RenderMetrics;
use blockshot_nbt::{LitematicTransform, ModelBuilder, StructureContainer, VoxelModel};
use blockshot_render::{
    CameraUpdate, Environment, EnvironmentManager, HostFactory, ImageOptions, PngImage, ViewSpec,
    Viewer, WorkerHostFactory, png_data_url,
};
use log::{error, info, warn};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::job::{JobResult, RenderJob};
use crate::layout::JobLayout;

/// Files written for a finished job, relative to its output directory.
struct JobOutputs {
    views: Vec<String>,
    materials: String,
    materials_csv: Option<String>,
    original: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    manager: EnvironmentManager,
    metrics: Arc<RenderMetrics>,
    atlas: OnceCell<String>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_factory(config, Arc::new(WorkerHostFactory::new()))
    }

    pub fn with_factory(config: PipelineConfig, factory: Arc<dyn HostFactory>) -> Self {
        let metrics = Arc::new(RenderMetrics::new(config.summary()));
        let manager = EnvironmentManager::new(factory, config.env.clone(), metrics.clone());
        Self {
            config,
            manager,
            metrics,
            atlas: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// Tear down any environment kept for reuse.
    pub async fn shutdown(&self) {
        if let Err(e) = self.manager.shutdown().await {
            warn!("Failed to tear down parked environment: {}", e);
        }
    }

    /// The atlas as a data URL, read from disk once.
    async fn atlas_data_url(&self) -> Result<String, JobError> {
        let path = &self.config.atlas_path;
        self.atlas
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| JobError::io(format!("reading atlas {}", path.display()), e))?;
                Ok::<_, JobError>(png_data_url(&bytes))
            })
            .await
            .cloned()
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), JobError> {
        let started = Instant::now();
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| JobError::io(format!("writing {}", path.display()), e))?;
        self.metrics.record_persist(started.elapsed());
        Ok(())
    }

    fn build_model(&self, bytes: &[u8]) -> Result<VoxelModel, JobError> {
        let started = Instant::now();
        let inflated = StructureContainer::new(bytes).decompress()?;
        self.metrics.record_inflated(inflated.len());
        let tree = blockshot_nbt::parse(&inflated)?;
        self.metrics.record_decode(started.elapsed());

        let started = Instant::now();
        let model = ModelBuilder::new(LitematicTransform).build(&tree)?;
        self.metrics.record_build(started.elapsed());
        Ok(model)
    }

    /// Start the environment if needed and make sure it has the atlas.
    async fn prepare(&self, env: &mut Environment) -> Result<(), JobError> {
        env.start().await?;
        if !env.has_atlas() {
            env.load_atlas(self.atlas_data_url().await?).await?;
        }
        Ok(())
    }

    async fn persist_upload(&self, layout: &JobLayout, bytes: &[u8]) -> Result<(), JobError> {
        for dir in [layout.upload_path().parent(), Some(layout.output_dir())]
            .into_iter()
            .flatten()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| JobError::io(format!("creating {}", dir.display()), e))?;
        }
        self.write_file(layout.upload_path(), bytes).await
    }

    async fn run(&self, job: &RenderJob, bytes: &[u8], env: &mut Environment) -> Result<JobOutputs, JobError> {
        let layout = job.layout();
        self.persist_upload(layout, bytes).await?;
        self.prepare(env).await?;

        let model = self.build_model(bytes)?;
        let mut viewer = Viewer::new(Arc::new(model));
        if let Some((y_min, y_max)) = self.config.view_range {
            viewer.set_view_range(y_min, y_max);
        }

        let mut views = Vec::with_capacity(ViewSpec::ALL.len());
        {
            let mut session = env.session(self.config.renderer)?;
            for view in ViewSpec::ALL {
                let image = viewer.render_view(&mut session, view, &self.config.view).await?;
                let file = layout.view_file(view);
                self.write_file(&layout.output_path(&file), &image.bytes).await?;
                views.push(file);
            }
        }

        let tally = viewer.material_list();
        let materials = layout.materials_file();
        self.write_file(&layout.output_path(&materials), tally.to_json_pretty()?.as_bytes())
            .await?;

        let materials_csv = if self.config.write_csv {
            let file = layout.materials_csv_file();
            self.write_file(&layout.output_path(&file), tally.to_csv().as_bytes())
                .await?;
            Some(file)
        } else {
            None
        };

        let original = layout.original_file();
        let target = layout.output_path(&original);
        tokio::fs::copy(layout.upload_path(), &target)
            .await
            .map_err(|e| JobError::io(format!("copying original to {}", target.display()), e))?;

        Ok(JobOutputs {
            views,
            materials,
            materials_csv,
            original,
        })
    }

    /// Convert one uploaded container. Never fails: errors come back as a
    /// failed [`JobResult`].
    pub async fn process(&self, bytes: &[u8], original_name: &str) -> JobResult {
        let started = Instant::now();
        self.metrics.record_job_started(bytes.len());

        let layout = JobLayout::new(
            Uuid::new_v4(),
            original_name,
            &self.config.upload_dir,
            &self.config.output_dir,
        );
        let mut job = RenderJob::new(layout);
        info!("Job {} started: {:?} ({} bytes)", job.job_id(), original_name, bytes.len());
        if let Err(e) = job.start() {
            warn!("Job {}: {}", job.job_id(), e);
        }

        let mut env = self.manager.acquire().await;
        let outcome = self.run(&job, bytes, &mut env).await;
        // Only place an environment is given back, whatever happened above.
        if let Err(e) = self.manager.release(env).await {
            warn!("Job {}: environment teardown failed: {}", job.job_id(), e);
        }

        let result = match outcome {
            Ok(outputs) => {
                if let Err(e) = job.succeed() {
                    warn!("Job {}: {}", job.job_id(), e);
                }
                info!(
                    "Job {} finished in {:.2?}: {}",
                    job.job_id(),
                    started.elapsed(),
                    job.output_dir().display()
                );
                JobResult {
                    success: true,
                    job_id: Some(job.job_id().to_string()),
                    views: outputs.views,
                    materials: Some(outputs.materials),
                    materials_csv: outputs.materials_csv,
                    original: Some(outputs.original),
                    output_dir: Some(job.output_dir().display().to_string()),
                    ..Default::default()
                }
            }
            Err(e) => {
                if let Err(t) = job.fail() {
                    warn!("Job {}: {}", job.job_id(), t);
                }
                error!("Job {} failed ({}): {}", job.job_id(), e.kind(), e);
                JobResult::failed(job.job_id(), &e)
            }
        };

        self.metrics.record_job_finished(started.elapsed(), result.success);
        result
    }

    /// Single free-camera render of a container, outside the three-view flow.
    pub async fn snapshot(
        &self,
        bytes: &[u8],
        options: &ImageOptions,
        camera: Option<CameraUpdate>,
    ) -> Result<PngImage, JobError> {
        let mut env = self.manager.acquire().await;
        let outcome = async {
            self.prepare(&mut env).await?;
            let mut viewer = Viewer::new(Arc::new(self.build_model(bytes)?));
            if let Some((y_min, y_max)) = self.config.view_range {
                viewer.set_view_range(y_min, y_max);
            }
            if let Some(update) = camera {
                viewer.set_camera(update);
            }
            let mut session = env.session(self.config.renderer)?;
            Ok::<_, JobError>(viewer.render_to_image(&mut session, options).await?)
        }
        .await;
        if let Err(e) = self.manager.release(env).await {
            warn!("Snapshot environment teardown failed: {}", e);
        }
        outcome
    }
}
