//! Software structure renderer.
//!
//! Everything here runs inside the worker host; callers only see it through
//! [`crate::host::Host`].

pub mod atlas;
pub mod mesh;
pub mod surface;

use std::cmp::Ordering;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use blockshot_nbt::VoxelModel;

use atlas::TextureAtlas;
use mesh::{Face, Mesh};
use surface::Surface;

/// Per-instance options handed to the renderer along with the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererOptions {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub grid_color: [f32; 4],
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            fov_y_degrees: 70.0,
            near: 0.1,
            far: 500.0,
            grid_color: [0.25, 0.25, 0.25, 1.0],
        }
    }
}

pub struct StructureRenderer {
    model: Arc<VoxelModel>,
    mesh: Mesh,
    options: RendererOptions,
}

impl StructureRenderer {
    pub fn new(model: Arc<VoxelModel>, atlas: &TextureAtlas, options: RendererOptions) -> Self {
        let mesh = Mesh::build(&model, atlas);
        log::debug!(
            "Renderer ready: {} opaque, {} translucent faces",
            mesh.opaque.len(),
            mesh.translucent.len()
        );
        Self {
            model,
            mesh,
            options,
        }
    }

    pub fn model(&self) -> &Arc<VoxelModel> {
        &self.model
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn projection(&self, surface: &Surface) -> Mat4 {
        let aspect = surface.width() as f32 / surface.height() as f32;
        Mat4::perspective_rh_gl(
            self.options.fov_y_degrees.to_radians(),
            aspect,
            self.options.near,
            self.options.far,
        )
    }

    fn draw_face(surface: &mut Surface, mvp: Mat4, face: &Face, depth_write: bool) {
        let [a, b, c, d] = face.corners.map(|p| mvp * p.extend(1.0));
        surface.fill_triangle([a, b, c], face.color, depth_write);
        surface.fill_triangle([a, c, d], face.color, depth_write);
    }

    /// Draw every visible face: opaque geometry first, then translucent
    /// faces back to front without touching the depth buffer.
    pub fn draw_structure(&self, surface: &mut Surface, view: Mat4) {
        let mvp = self.projection(surface) * view;
        for face in &self.mesh.opaque {
            Self::draw_face(surface, mvp, face, true);
        }

        let mut translucent: Vec<(f32, &Face)> = self
            .mesh
            .translucent
            .iter()
            .map(|face| (view.transform_point3(face.center()).z, face))
            .collect();
        translucent.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        for (_, face) in translucent {
            Self::draw_face(surface, mvp, face, false);
        }
    }

    /// Floor grid at y = 0 plus the edges of the bounding box.
    pub fn draw_grid(&self, surface: &mut Surface, view: Mat4) {
        let mvp = self.projection(surface) * view;
        let color = self.options.grid_color;
        let [sx, sy, sz] = self.model.size().map(|d| d as f32);
        let mut line = |a: Vec3, b: Vec3| {
            let project = |p: Vec3| -> Vec4 { mvp * p.extend(1.0) };
            surface.draw_line(project(a), project(b), color);
        };

        for x in 0..=self.model.size()[0] {
            let x = x as f32;
            line(Vec3::new(x, 0.0, 0.0), Vec3::new(x, 0.0, sz));
        }
        for z in 0..=self.model.size()[2] {
            let z = z as f32;
            line(Vec3::new(0.0, 0.0, z), Vec3::new(sx, 0.0, z));
        }

        for (x, z) in [(0.0, 0.0), (sx, 0.0), (0.0, sz), (sx, sz)] {
            line(Vec3::new(x, 0.0, z), Vec3::new(x, sy, z));
        }
        line(Vec3::new(0.0, sy, 0.0), Vec3::new(sx, sy, 0.0));
        line(Vec3::new(0.0, sy, sz), Vec3::new(sx, sy, sz));
        line(Vec3::new(0.0, sy, 0.0), Vec3::new(0.0, sy, sz));
        line(Vec3::new(sx, sy, 0.0), Vec3::new(sx, sy, sz));
    }
}
