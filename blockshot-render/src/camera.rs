//! Camera framing.
//!
//! Canonical views are pure functions of the model size. The free camera
//! used for single renders lives in [`CameraRig`], which starts in automatic
//! framing and switches to manual for good once a caller sets any field.

use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{Mat4, Vec3};

/// Pulls the camera in from `2 * max_dimension` so the model fills the frame.
pub const FRAMING_DIVISOR: f32 = 1.8;

/// Auto framing is tuned for a 9 x 9 x 16 model seen from this offset.
const REFERENCE_SIZE: [f32; 3] = [9.0, 9.0, 16.0];
const REFERENCE_CAMERA_Y: f32 = -15.0;
const REFERENCE_CAMERA_Z: f32 = -20.0;

pub const DEFAULT_PITCH: f32 = 0.8;
pub const DEFAULT_YAW: f32 = 0.5;

/// Position plus orientation. Pitch is kept in [-pi/2, pi/2] and yaw in
/// [0, 2pi).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    position: Vec3,
    pitch: f32,
    yaw: f32,
}

impl CameraPose {
    pub fn new(position: Vec3, pitch: f32, yaw: f32) -> Self {
        let mut yaw = yaw.rem_euclid(TAU);
        // rem_euclid can round up to exactly TAU for tiny negative inputs
        if yaw >= TAU {
            yaw = 0.0;
        }
        Self {
            position,
            pitch: pitch.clamp(-FRAC_PI_2, FRAC_PI_2),
            yaw,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Rotate about X by pitch, then about Y by yaw, then translate.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.pitch)
            * Mat4::from_rotation_y(self.yaw)
            * Mat4::from_translation(self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewSpec {
    Front,
    Side,
    Top,
}

impl ViewSpec {
    pub const ALL: [ViewSpec; 3] = [ViewSpec::Front, ViewSpec::Side, ViewSpec::Top];

    /// Name used in output file names.
    pub fn name(&self) -> &'static str {
        match self {
            ViewSpec::Front => "frontView",
            ViewSpec::Side => "sideView",
            ViewSpec::Top => "topView",
        }
    }

    /// Fixed (pitch, yaw) before normalisation.
    pub fn template(&self) -> (f32, f32) {
        match self {
            ViewSpec::Front => (0.0, 0.0),
            ViewSpec::Side => (0.0, -FRAC_PI_2),
            ViewSpec::Top => (FRAC_PI_2, 0.0),
        }
    }
}

/// Pose for a canonical view of a model of the given size.
pub fn frame(view: ViewSpec, size: [u32; 3]) -> CameraPose {
    let [sx, sy, sz] = size.map(|d| d as f32);
    let center = Vec3::new(sx / 2.0, sy / 2.0, sz / 2.0);
    let distance = sx.max(sy).max(sz) * 2.0;
    let offset = -distance / FRAMING_DIVISOR;

    let position = match view {
        ViewSpec::Front => Vec3::new(-center.x, -center.y, offset - center.z),
        ViewSpec::Side => Vec3::new(offset - center.x, -center.y, -center.z),
        ViewSpec::Top => Vec3::new(-center.x, offset - center.y, -center.z),
    };
    let (pitch, yaw) = view.template();
    CameraPose::new(position, pitch, yaw)
}

/// Heuristic position for the free camera: the reference offset scaled by
/// this model's height and depth relative to the reference model.
pub fn auto_position(size: [u32; 3]) -> Vec3 {
    let [_, sy, sz] = size.map(|d| d as f32);
    Vec3::new(
        0.0,
        REFERENCE_CAMERA_Y * (sy / REFERENCE_SIZE[1]),
        REFERENCE_CAMERA_Z * (sz / REFERENCE_SIZE[2]),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMode {
    Auto,
    Manual(CameraPose),
}

/// Partial camera update; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraUpdate {
    pub position: Option<Vec3>,
    pub pitch: Option<f32>,
    pub yaw: Option<f32>,
}

impl CameraUpdate {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.pitch.is_none() && self.yaw.is_none()
    }
}

/// Free camera for single-view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRig {
    mode: CameraMode,
    current: CameraPose,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            mode: CameraMode::Auto,
            current: CameraPose::new(Vec3::ZERO, DEFAULT_PITCH, DEFAULT_YAW),
        }
    }
}

impl CameraRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn pose(&self) -> CameraPose {
        self.current
    }

    /// Apply an explicit update. Any field switches the rig to manual.
    pub fn set(&mut self, update: CameraUpdate) -> CameraPose {
        if update.is_empty() {
            return self.current;
        }
        let pose = CameraPose::new(
            update.position.unwrap_or(self.current.position),
            update.pitch.unwrap_or(self.current.pitch),
            update.yaw.unwrap_or(self.current.yaw),
        );
        self.current = pose;
        self.mode = CameraMode::Manual(pose);
        pose
    }

    /// Pose to render with. In manual mode the stored pose wins whatever
    /// the request asks for. An automatic pose becomes the current one, so a
    /// later request without `auto` starts from where it left off.
    pub fn resolve(&mut self, size: [u32; 3], auto: bool, pitch: f32, yaw: f32) -> CameraPose {
        match self.mode {
            CameraMode::Manual(pose) => pose,
            CameraMode::Auto => {
                let position = if auto { auto_position(size) } else { self.current.position };
                self.current = CameraPose::new(position, pitch, yaw);
                self.current
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: [[u32; 3]; 5] = [[1, 1, 1], [4, 4, 4], [9, 9, 16], [31, 2, 7], [3, 120, 5]];

    #[test]
    fn test_views_match_templates() {
        for size in SIZES {
            assert_eq!(frame(ViewSpec::Front, size).pitch(), 0.0);
            assert_eq!(frame(ViewSpec::Front, size).yaw(), 0.0);
            assert_eq!(frame(ViewSpec::Side, size).pitch(), 0.0);
            assert!((frame(ViewSpec::Side, size).yaw() - 3.0 * FRAC_PI_2).abs() < 1e-6);
            assert_eq!(frame(ViewSpec::Top, size).pitch(), FRAC_PI_2);
            assert_eq!(frame(ViewSpec::Top, size).yaw(), 0.0);
        }
    }

    #[test]
    fn test_positions_center_two_axes_and_offset_third() {
        for size in SIZES {
            let [sx, sy, sz] = size.map(|d| d as f32);
            let offset = -(2.0 * sx.max(sy).max(sz)) / FRAMING_DIVISOR;

            let front = frame(ViewSpec::Front, size).position();
            assert_eq!(front, Vec3::new(-sx / 2.0, -sy / 2.0, offset - sz / 2.0));

            let side = frame(ViewSpec::Side, size).position();
            assert_eq!(side, Vec3::new(offset - sx / 2.0, -sy / 2.0, -sz / 2.0));

            let top = frame(ViewSpec::Top, size).position();
            assert_eq!(top, Vec3::new(-sx / 2.0, offset - sy / 2.0, -sz / 2.0));
        }
    }

    #[test]
    fn test_frame_is_pure() {
        for view in ViewSpec::ALL {
            let a = frame(view, [12, 5, 3]);
            let b = frame(view, [12, 5, 3]);
            assert_eq!(a.position().to_array().map(f32::to_bits), b.position().to_array().map(f32::to_bits));
            assert_eq!(a.pitch().to_bits(), b.pitch().to_bits());
            assert_eq!(a.yaw().to_bits(), b.yaw().to_bits());
        }
    }

    #[test]
    fn test_model_center_lands_in_front_of_camera() {
        for view in ViewSpec::ALL {
            let size = [6, 3, 10];
            let center = Vec3::new(3.0, 1.5, 5.0);
            let eye = frame(view, size).view_matrix().transform_point3(center);
            assert!(eye.x.abs() < 1e-4 && eye.y.abs() < 1e-4, "{view:?}: {eye}");
            assert!(eye.z < 0.0, "{view:?}: {eye}");
        }
    }

    #[test]
    fn test_pose_normalisation() {
        let pose = CameraPose::new(Vec3::ZERO, 3.0, -0.5);
        assert_eq!(pose.pitch(), FRAC_PI_2);
        assert!((pose.yaw() - (TAU - 0.5)).abs() < 1e-6);
        assert!(CameraPose::new(Vec3::ZERO, 0.0, TAU).yaw() < TAU);
        assert!(CameraPose::new(Vec3::ZERO, 0.0, -1e-9).yaw() < TAU);
    }

    #[test]
    fn test_auto_position_scales_reference() {
        assert_eq!(auto_position([9, 9, 16]), Vec3::new(0.0, -15.0, -20.0));
        assert_eq!(auto_position([1, 18, 32]), Vec3::new(0.0, -30.0, -40.0));
    }

    #[test]
    fn test_manual_overrides_auto_permanently() {
        let mut rig = CameraRig::new();
        assert_eq!(rig.mode(), CameraMode::Auto);
        let auto = rig.resolve([9, 9, 16], true, DEFAULT_PITCH, DEFAULT_YAW);
        assert_eq!(auto.position(), Vec3::new(0.0, -15.0, -20.0));

        let manual = rig.set(CameraUpdate {
            yaw: Some(1.0),
            ..Default::default()
        });
        assert!(matches!(rig.mode(), CameraMode::Manual(_)));
        assert_eq!(manual.position(), auto.position());
        assert_eq!(manual.pitch(), DEFAULT_PITCH);

        for size in [[9, 9, 16], [40, 40, 40]] {
            assert_eq!(rig.resolve(size, true, 0.1, 0.2), manual);
        }

        // An empty update changes nothing and does not leave manual mode.
        rig.set(CameraUpdate::default());
        assert_eq!(rig.mode(), CameraMode::Manual(manual));
    }

    #[test]
    fn test_empty_update_keeps_auto() {
        let mut rig = CameraRig::new();
        rig.set(CameraUpdate::default());
        assert_eq!(rig.mode(), CameraMode::Auto);
        let pose = rig.resolve([2, 2, 2], false, 0.3, 0.4);
        assert_eq!(pose.position(), Vec3::ZERO);
        assert_eq!(pose.pitch(), 0.3);
    }

    #[test]
    fn test_auto_position_is_kept_for_later_renders() {
        let mut rig = CameraRig::new();
        let auto = rig.resolve([9, 9, 16], true, DEFAULT_PITCH, DEFAULT_YAW);
        assert_eq!(rig.pose(), auto);

        let later = rig.resolve([40, 40, 40], false, 0.2, 0.1);
        assert_eq!(later.position(), Vec3::new(0.0, -15.0, -20.0));
        assert_eq!(later.pitch(), 0.2);
        assert_eq!(rig.mode(), CameraMode::Auto);
    }
}
