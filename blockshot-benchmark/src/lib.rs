use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct RenderMetrics {
    // Jobs
    pub total_jobs_started: AtomicUsize,
    pub total_jobs_succeeded: AtomicUsize,
    pub total_jobs_failed: AtomicUsize,
    pub total_job_time_us: AtomicU64,
    pub max_job_time_us: AtomicU64,

    // Stage Breakdown
    pub total_decode_us: AtomicU64,
    pub total_build_us: AtomicU64,
    pub total_render_us: AtomicU64,
    pub total_encode_us: AtomicU64,
    pub total_persist_us: AtomicU64,
    pub total_views_rendered: AtomicUsize,

    // Environment
    pub total_env_launches: AtomicUsize,
    pub total_env_teardowns: AtomicUsize,
    pub total_readiness_attempts: AtomicUsize,
    pub total_readiness_timeouts: AtomicUsize,

    // Surfaces
    pub total_surfaces_acquired: AtomicUsize,
    pub total_surfaces_released: AtomicUsize,
    pub total_pixels_rendered: AtomicU64,

    // Bytes
    pub total_bytes_in: AtomicUsize,
    pub total_bytes_inflated: AtomicUsize,
    pub total_png_bytes_out: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
    pub config_summary: String,
}

impl RenderMetrics {
    pub fn new(config_summary: String) -> Self {
        Self {
            start_time: Some(Instant::now()),
            config_summary,
            ..Default::default()
        }
    }

    pub fn record_job_started(&self, bytes_in: usize) {
        self.total_jobs_started.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
    }

    pub fn record_job_finished(&self, duration: Duration, success: bool) {
        if success {
            self.total_jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        let us = duration.as_micros() as u64;
        self.total_job_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_job_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_decode(&self, duration: Duration) {
        self.total_decode_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_build(&self, duration: Duration) {
        self.total_build_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_render(&self, duration: Duration, pixels: u64) {
        self.total_views_rendered.fetch_add(1, Ordering::Relaxed);
        self.total_render_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_pixels_rendered.fetch_add(pixels, Ordering::Relaxed);
    }

    pub fn record_encode(&self, duration: Duration, png_bytes: usize) {
        self.total_encode_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_png_bytes_out.fetch_add(png_bytes, Ordering::Relaxed);
    }

    pub fn record_persist(&self, duration: Duration) {
        self.total_persist_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_inflated(&self, bytes: usize) {
        self.total_bytes_inflated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_env_launch(&self) {
        self.total_env_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_env_teardown(&self) {
        self.total_env_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_readiness(&self, attempts: u32, timed_out: bool) {
        self.total_readiness_attempts.fetch_add(attempts as usize, Ordering::Relaxed);
        if timed_out {
            self.total_readiness_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_surface_acquired(&self) {
        self.total_surfaces_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_surface_released(&self) {
        self.total_surfaces_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Surfaces acquired but not yet released.
    pub fn surfaces_outstanding(&self) -> usize {
        self.total_surfaces_acquired
            .load(Ordering::Relaxed)
            .saturating_sub(self.total_surfaces_released.load(Ordering::Relaxed))
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();
        let started = self.total_jobs_started.load(Ordering::Relaxed);
        let succeeded = self.total_jobs_succeeded.load(Ordering::Relaxed);
        let failed = self.total_jobs_failed.load(Ordering::Relaxed);
        let finished = succeeded + failed;

        let job_time = self.total_job_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let job_max = self.max_job_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let job_avg = if finished > 0 { job_time / finished as f64 } else { 0.0 };

        let decode_time = self.total_decode_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let build_time = self.total_build_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let persist_time = self.total_persist_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let decode_avg = if finished > 0 { decode_time / finished as f64 } else { 0.0 };
        let build_avg = if finished > 0 { build_time / finished as f64 } else { 0.0 };
        let persist_avg = if finished > 0 { persist_time / finished as f64 } else { 0.0 };

        let views = self.total_views_rendered.load(Ordering::Relaxed);
        let render_time = self.total_render_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let encode_time = self.total_encode_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let render_avg = if views > 0 { render_time / views as f64 } else { 0.0 };
        let encode_avg = if views > 0 { encode_time / views as f64 } else { 0.0 };
        let megapixels = self.total_pixels_rendered.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        let launches = self.total_env_launches.load(Ordering::Relaxed);
        let teardowns = self.total_env_teardowns.load(Ordering::Relaxed);
        let attempts = self.total_readiness_attempts.load(Ordering::Relaxed);
        let timeouts = self.total_readiness_timeouts.load(Ordering::Relaxed);

        let acquired = self.total_surfaces_acquired.load(Ordering::Relaxed);
        let released = self.total_surfaces_released.load(Ordering::Relaxed);

        let bytes_in = self.total_bytes_in.load(Ordering::Relaxed);
        let inflated = self.total_bytes_inflated.load(Ordering::Relaxed);
        let png_out = self.total_png_bytes_out.load(Ordering::Relaxed);
        let inflation_ratio = if bytes_in > 0 { inflated as f64 / bytes_in as f64 } else { 0.0 };

        format!(
            "Blockshot Render Report\n\
             =======================\n\
             Configuration: {}\n\
             Session Duration: {:.2?}\n\n\
             [Jobs]\n\
             Started: {}\n\
             Succeeded: {}\n\
             Failed: {}\n\
             Avg Time: {:.2} ms/job\n\
             Max Time: {:.2} ms\n\
               - Stage Breakdown:\n\
                 * Decode: {:.2} ms/job\n\
                 * Model Build: {:.2} ms/job\n\
                 * Persist: {:.2} ms/job\n\n\
             [Views]\n\
             Rendered: {}\n\
             Avg Render: {:.2} ms/view\n\
             Avg Encode: {:.2} ms/view\n\
             Pixels Drawn: {:.1} MP\n\n\
             [Environment]\n\
             Launches: {}\n\
             Teardowns: {}\n\
             Readiness Attempts: {}\n\
             Readiness Timeouts: {}\n\n\
             [Surfaces]\n\
             Acquired: {}\n\
             Released: {}\n\n\
             [Bytes]\n\
             Uploaded: {:.1} KB (inflated x{:.2})\n\
             PNG Output: {:.1} KB\n",
            self.config_summary,
            uptime,
            started, succeeded, failed, job_avg, job_max,
            decode_avg, build_avg, persist_avg,
            views, render_avg, encode_avg, megapixels,
            launches, teardowns, attempts, timeouts,
            acquired, released,
            bytes_in as f64 / 1024.0, inflation_ratio,
            png_out as f64 / 1024.0
        )
    }
}
