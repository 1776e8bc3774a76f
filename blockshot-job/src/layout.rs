//! Per-job file naming. Every path carries the job id, so concurrent jobs
//! never collide.

use std::path::{Path, PathBuf};

use blockshot_render::ViewSpec;
use uuid::Uuid;

pub const DEFAULT_EXTENSION: &str = "litematic";
const FALLBACK_BASE_NAME: &str = "structure";

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Split an uploaded file name into a safe base name and extension.
/// Directory components are ignored.
pub fn split_name(original_name: &str) -> (String, String) {
    let file = Path::new(original_name)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    let path = Path::new(file);

    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_BASE_NAME.to_string());
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(sanitize)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    (base, extension)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    job_id: Uuid,
    base_name: String,
    extension: String,
    upload_path: PathBuf,
    output_dir: PathBuf,
}

impl JobLayout {
    pub fn new(job_id: Uuid, original_name: &str, upload_root: &Path, output_root: &Path) -> Self {
        let (base_name, extension) = split_name(original_name);
        let stem = format!("{}_{}", base_name, job_id);
        Self {
            upload_path: upload_root.join(format!("{}.{}", stem, extension)),
            output_dir: output_root.join(stem),
            job_id,
            base_name,
            extension,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn view_file(&self, view: ViewSpec) -> String {
        format!("{}_{}.png", self.base_name, view.name())
    }

    pub fn materials_file(&self) -> String {
        format!("{}_materials.json", self.base_name)
    }

    pub fn materials_csv_file(&self) -> String {
        format!("{}_materials.csv", self.base_name)
    }

    pub fn original_file(&self) -> String {
        format!("{}.{}", self.base_name, self.extension)
    }

    pub fn output_path(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }
}
