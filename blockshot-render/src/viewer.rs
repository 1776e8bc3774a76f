//! Per-job view of one model: view range, camera rig and render entry points.

use std::sync::Arc;

use blockshot_nbt::{MaterialTally, VoxelModel};

use crate::camera::{
    CameraMode, CameraPose, CameraRig, CameraUpdate, DEFAULT_PITCH, DEFAULT_YAW, ViewSpec, frame,
};
use crate::session::{PngImage, RenderError, RenderRequest, RenderSession};

/// Options for a single free-camera render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageOptions {
    pub request: RenderRequest,
    pub pitch: f32,
    pub yaw: f32,
    /// Frame the model automatically unless the camera was set by hand.
    pub auto_position: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            request: RenderRequest::default(),
            pitch: DEFAULT_PITCH,
            yaw: DEFAULT_YAW,
            auto_position: true,
        }
    }
}

pub struct Viewer {
    full: Arc<VoxelModel>,
    visible: Arc<VoxelModel>,
    range: Option<(i64, i64)>,
    rig: CameraRig,
}

impl Viewer {
    pub fn new(model: Arc<VoxelModel>) -> Self {
        Self {
            visible: model.clone(),
            full: model,
            range: None,
            rig: CameraRig::new(),
        }
    }

    pub fn model(&self) -> &Arc<VoxelModel> {
        &self.full
    }

    /// The model as drawn, after the view range is applied.
    pub fn visible_model(&self) -> &Arc<VoxelModel> {
        &self.visible
    }

    /// Only draw layers `y_min..=y_max`.
    pub fn set_view_range(&mut self, y_min: i64, y_max: i64) {
        self.range = Some((y_min, y_max));
        self.visible = Arc::new(self.full.clip_y(y_min, y_max));
    }

    pub fn clear_view_range(&mut self) {
        self.range = None;
        self.visible = self.full.clone();
    }

    pub fn view_range(&self) -> Option<(i64, i64)> {
        self.range
    }

    /// Block counts over the whole model, whatever the view range.
    pub fn material_list(&self) -> MaterialTally {
        MaterialTally::from_model(&self.full)
    }

    pub fn set_camera(&mut self, update: CameraUpdate) -> CameraPose {
        self.rig.set(update)
    }

    pub fn camera(&self) -> CameraPose {
        self.rig.pose()
    }

    pub fn camera_mode(&self) -> CameraMode {
        self.rig.mode()
    }

    pub async fn render_view(
        &self,
        session: &mut RenderSession<'_>,
        view: ViewSpec,
        request: &RenderRequest,
    ) -> Result<PngImage, RenderError> {
        let pose = frame(view, self.full.size());
        let image = session.render(&self.visible, &pose, request).await?;
        log::info!(
            "Rendered {} ({}x{}, {} bytes)",
            view.name(),
            image.width,
            image.height,
            image.bytes.len()
        );
        Ok(image)
    }

    /// Front, side and top in that order. The rig is left untouched.
    pub async fn render_three_views(
        &self,
        session: &mut RenderSession<'_>,
        request: &RenderRequest,
    ) -> Result<Vec<(ViewSpec, PngImage)>, RenderError> {
        let mut views = Vec::with_capacity(ViewSpec::ALL.len());
        for view in ViewSpec::ALL {
            views.push((view, self.render_view(session, view, request).await?));
        }
        Ok(views)
    }

    pub async fn render_to_image(
        &mut self,
        session: &mut RenderSession<'_>,
        options: &ImageOptions,
    ) -> Result<PngImage, RenderError> {
        let pose = self.rig.resolve(
            self.full.size(),
            options.auto_position,
            options.pitch,
            options.yaw,
        );
        log::debug!("Single render with {:?} camera at {:?}", self.rig.mode(), pose);
        session.render(&self.visible, &pose, &options.request).await
    }
}
