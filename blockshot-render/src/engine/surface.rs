//! Offscreen drawing surface: colour and depth buffers with a small
//! triangle/line rasterizer.

use glam::{Vec2, Vec4};
use image::{Rgba, RgbaImage};

/// Largest edge a surface may have.
pub const MAX_SURFACE_DIMENSION: u32 = 16384;

const SAMPLE_OFFSETS: [(f32, f32); 4] = [(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)];
const LINE_DEPTH_BIAS: f32 = 1e-4;

/// Pipeline state requested when a surface is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    pub depth_test: bool,
    pub cull_face: bool,
    pub blend: bool,
    pub premultiplied_alpha: bool,
    pub sample_coverage: bool,
    pub clear_color: [f32; 4],
}

impl SurfaceSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth_test: true,
            cull_face: true,
            blend: true,
            premultiplied_alpha: true,
            sample_coverage: false,
            clear_color: [0.9, 0.9, 0.9, 1.0],
        }
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_SURFACE_DIMENSION).contains(&self.width)
            && (1..=MAX_SURFACE_DIMENSION).contains(&self.height)
    }
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    pos: Vec2,
    depth: f32,
}

pub struct Surface {
    spec: SurfaceSpec,
    color: Vec<[f32; 4]>,
    depth: Vec<f32>,
}

impl Surface {
    pub fn new(spec: SurfaceSpec) -> Self {
        let len = spec.width as usize * spec.height as usize;
        Self {
            spec,
            color: vec![spec.clear_color; len],
            depth: vec![1.0; len],
        }
    }

    pub fn spec(&self) -> &SurfaceSpec {
        &self.spec
    }

    pub fn width(&self) -> u32 {
        self.spec.width
    }

    pub fn height(&self) -> u32 {
        self.spec.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.color[(y * self.spec.width + x) as usize]
    }

    fn to_screen(&self, clip: Vec4) -> ScreenVertex {
        let ndc = clip.truncate() / clip.w;
        ScreenVertex {
            pos: Vec2::new(
                (ndc.x * 0.5 + 0.5) * self.spec.width as f32,
                (0.5 - ndc.y * 0.5) * self.spec.height as f32,
            ),
            depth: ndc.z * 0.5 + 0.5,
        }
    }

    fn write(&mut self, index: usize, color: [f32; 4], alpha: f32) {
        if !self.spec.blend {
            self.color[index] = [color[0], color[1], color[2], alpha];
            return;
        }
        let dst = self.color[index];
        let inv = 1.0 - alpha;
        self.color[index] = [
            color[0] * alpha + dst[0] * inv,
            color[1] * alpha + dst[1] * inv,
            color[2] * alpha + dst[2] * inv,
            alpha + dst[3] * inv,
        ];
    }

    fn depth_passes(&self, index: usize, depth: f32, bias: f32) -> bool {
        if !(0.0..=1.0).contains(&depth) {
            return false;
        }
        !self.spec.depth_test || depth < self.depth[index] + bias
    }

    /// Rasterize one triangle given in clip space. Counter-clockwise
    /// triangles face the camera.
    pub fn fill_triangle(&mut self, clip: [Vec4; 3], color: [f32; 4], depth_write: bool) {
        let polygon = clip_near(&clip);
        if polygon.len() < 3 {
            return;
        }
        for i in 1..polygon.len() - 1 {
            self.fill_clipped([polygon[0], polygon[i], polygon[i + 1]], color, depth_write);
        }
    }

    fn fill_clipped(&mut self, clip: [Vec4; 3], color: [f32; 4], depth_write: bool) {
        if self.spec.cull_face {
            let [a, b, c] = clip.map(|v| v.truncate().truncate() / v.w);
            if (b - a).perp_dot(c - a) <= 0.0 {
                return;
            }
        }

        let [v0, v1, v2] = clip.map(|v| self.to_screen(v));
        let area = edge(v0.pos, v1.pos, v2.pos);
        if area.abs() <= f32::EPSILON {
            return;
        }

        let min = v0.pos.min(v1.pos).min(v2.pos).floor().max(Vec2::ZERO);
        let max = v0
            .pos
            .max(v1.pos)
            .max(v2.pos)
            .ceil()
            .min(Vec2::new(self.spec.width as f32, self.spec.height as f32));

        let weights = |p: Vec2| {
            let w0 = edge(v1.pos, v2.pos, p) / area;
            let w1 = edge(v2.pos, v0.pos, p) / area;
            let w2 = edge(v0.pos, v1.pos, p) / area;
            (w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0)
                .then(|| w0 * v0.depth + w1 * v1.depth + w2 * v2.depth)
        };

        for y in min.y as u32..max.y as u32 {
            for x in min.x as u32..max.x as u32 {
                let index = (y * self.spec.width + x) as usize;
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);

                if let Some(depth) = weights(center) {
                    if !self.depth_passes(index, depth, 0.0) {
                        continue;
                    }
                    self.write(index, color, color[3]);
                    if depth_write {
                        self.depth[index] = depth;
                    }
                    continue;
                }

                if !self.spec.sample_coverage {
                    continue;
                }
                // Edge pixel: blend by the share of covered samples, keep depth.
                let mut covered = 0u32;
                let mut depth = 0.0;
                for (dx, dy) in SAMPLE_OFFSETS {
                    if let Some(d) = weights(Vec2::new(x as f32 + dx, y as f32 + dy)) {
                        covered += 1;
                        depth += d;
                    }
                }
                if covered == 0 {
                    continue;
                }
                let depth = depth / covered as f32;
                if self.depth_passes(index, depth, 0.0) {
                    let coverage = covered as f32 / SAMPLE_OFFSETS.len() as f32;
                    self.write(index, color, color[3] * coverage);
                }
            }
        }
    }

    /// Draw a one pixel wide line between two clip-space points.
    pub fn draw_line(&mut self, a: Vec4, b: Vec4, color: [f32; 4]) {
        let (da, db) = (a.z + a.w, b.z + b.w);
        if da < 0.0 && db < 0.0 {
            return;
        }
        let (a, b) = if da < 0.0 {
            (a.lerp(b, da / (da - db)), b)
        } else if db < 0.0 {
            (a, a.lerp(b, da / (da - db)))
        } else {
            (a, b)
        };

        let (sa, sb) = (self.to_screen(a), self.to_screen(b));
        let delta = sb.pos - sa.pos;
        let steps = delta.x.abs().max(delta.y.abs()).ceil().max(1.0) as u32;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let p = sa.pos + delta * t;
            if p.x < 0.0 || p.y < 0.0 {
                continue;
            }
            let (x, y) = (p.x as u32, p.y as u32);
            if x >= self.spec.width || y >= self.spec.height {
                continue;
            }
            let index = (y * self.spec.width + x) as usize;
            let depth = sa.depth + (sb.depth - sa.depth) * t;
            if self.depth_passes(index, depth, LINE_DEPTH_BIAS) {
                self.write(index, color, color[3]);
            }
        }
    }

    /// Read the colour buffer back as straight-alpha RGBA8.
    pub fn capture(&self) -> RgbaImage {
        let mut image = RgbaImage::new(self.spec.width, self.spec.height);
        for (pixel, &[r, g, b, a]) in image.pixels_mut().zip(&self.color) {
            let unmultiply = if self.spec.premultiplied_alpha && a > 0.0 && a < 1.0 {
                1.0 / a
            } else {
                1.0
            };
            let channel = |c: f32| ((c * unmultiply).clamp(0.0, 1.0) * 255.0).round() as u8;
            *pixel = Rgba([channel(r), channel(g), channel(b), channel(a)]);
        }
        image
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

// Sutherland-Hodgman against the near plane (z + w >= 0).
fn clip_near(triangle: &[Vec4; 3]) -> Vec<Vec4> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let current = triangle[i];
        let next = triangle[(i + 1) % 3];
        let dc = current.z + current.w;
        let dn = next.z + next.w;
        if dc >= 0.0 {
            out.push(current);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            out.push(current.lerp(next, dc / (dc - dn)));
        }
    }
    out
}
