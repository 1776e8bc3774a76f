//! Face extraction: one quad per block face that borders something see-through.

use std::collections::HashMap;

use glam::Vec3;

use blockshot_nbt::VoxelModel;

use super::atlas::TextureAtlas;

const TRANSLUCENT_ALPHA: f32 = 0.6;

/// Axis-aligned face: normal, offset of its first corner inside the unit
/// cube, and the two edge vectors (u x v points along the normal), plus the
/// brightness applied to that side.
struct FaceTemplate {
    normal: [i64; 3],
    origin: Vec3,
    u: Vec3,
    v: Vec3,
    shade: f32,
}

const FACES: [FaceTemplate; 6] = [
    FaceTemplate { normal: [1, 0, 0], origin: Vec3::X, u: Vec3::Y, v: Vec3::Z, shade: 0.6 },
    FaceTemplate { normal: [-1, 0, 0], origin: Vec3::ZERO, u: Vec3::Z, v: Vec3::Y, shade: 0.6 },
    FaceTemplate { normal: [0, 1, 0], origin: Vec3::Y, u: Vec3::Z, v: Vec3::X, shade: 1.0 },
    FaceTemplate { normal: [0, -1, 0], origin: Vec3::ZERO, u: Vec3::X, v: Vec3::Z, shade: 0.5 },
    FaceTemplate { normal: [0, 0, 1], origin: Vec3::Z, u: Vec3::X, v: Vec3::Y, shade: 0.8 },
    FaceTemplate { normal: [0, 0, -1], origin: Vec3::ZERO, u: Vec3::Y, v: Vec3::X, shade: 0.8 },
];

pub fn is_translucent(name: &str) -> bool {
    ["glass", "ice", "water", "slime_block", "honey_block"]
        .iter()
        .any(|needle| name.contains(needle))
}

/// A quad in model space, corners wound counter-clockwise seen from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub corners: [Vec3; 4],
    pub color: [f32; 4],
}

impl Face {
    pub fn center(&self) -> Vec3 {
        (self.corners[0] + self.corners[2]) * 0.5
    }

    pub fn is_translucent(&self) -> bool {
        self.color[3] < 1.0
    }
}

/// Visible faces of a model, opaque first.
#[derive(Debug, Default)]
pub struct Mesh {
    pub opaque: Vec<Face>,
    pub translucent: Vec<Face>,
}

impl Mesh {
    pub fn build(model: &VoxelModel, atlas: &TextureAtlas) -> Self {
        let mut mesh = Mesh::default();
        let base_colors: HashMap<&str, [f32; 3]> = model
            .palette()
            .iter()
            .map(|block| (block.name.as_str(), atlas.block_color(&block.name)))
            .collect();

        for ([x, y, z], block) in model.blocks() {
            let translucent = is_translucent(&block.name);
            let base = base_colors.get(block.name.as_str()).copied().unwrap_or([1.0; 3]);
            let cell = Vec3::new(x as f32, y as f32, z as f32);

            for face in &FACES {
                let [nx, ny, nz] = face.normal;
                let neighbour = model.block_at(x as i64 + nx, y as i64 + ny, z as i64 + nz);
                let visible = match neighbour {
                    None => true,
                    Some(other) => {
                        let other_translucent = is_translucent(&other.name);
                        (other_translucent && !translucent)
                            || (other_translucent && translucent && other.name != block.name)
                    }
                };
                if !visible {
                    continue;
                }

                let o = cell + face.origin;
                let color = [
                    base[0] * face.shade,
                    base[1] * face.shade,
                    base[2] * face.shade,
                    if translucent { TRANSLUCENT_ALPHA } else { 1.0 },
                ];
                let quad = Face {
                    corners: [o, o + face.u, o + face.u + face.v, o + face.v],
                    color,
                };
                if translucent {
                    mesh.translucent.push(quad);
                } else {
                    mesh.opaque.push(quad);
                }
            }
        }

        mesh
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.translucent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockshot_nbt::{decode, BlockState, LitematicTransform, ModelBuilder, StructureBuilder};
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn atlas() -> TextureAtlas {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(16, 16, Rgba([200, 200, 200, 255]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        TextureAtlas::from_png(&bytes).unwrap()
    }

    fn model(builder: StructureBuilder) -> VoxelModel {
        let tree = decode(&builder.to_container().unwrap()).unwrap();
        ModelBuilder::new(LitematicTransform).build(&tree).unwrap()
    }

    #[test]
    fn test_face_winding_matches_normal() {
        for face in &FACES {
            let n = Vec3::new(face.normal[0] as f32, face.normal[1] as f32, face.normal[2] as f32);
            assert_eq!(face.u.cross(face.v), n);
        }
    }

    #[test]
    fn test_solid_cube_exposes_only_shell() {
        let cube = VoxelModel::filled([2, 2, 2], BlockState::new("minecraft:stone"));
        let mesh = Mesh::build(&cube, &atlas());
        // 6 sides, 4 block faces each
        assert_eq!(mesh.opaque.len(), 24);
        assert!(mesh.translucent.is_empty());
    }

    #[test]
    fn test_glass_next_to_stone() {
        let mut builder = StructureBuilder::new("pane", [2, 1, 1]);
        builder.set_block(0, 0, 0, BlockState::new("minecraft:stone"));
        builder.set_block(1, 0, 0, BlockState::new("minecraft:glass"));
        let mesh = Mesh::build(&model(builder), &atlas());

        // Stone shows all six faces because its neighbour is see-through.
        assert_eq!(mesh.opaque.len(), 6);
        // Glass hides the face against stone.
        assert_eq!(mesh.translucent.len(), 5);
        assert!(mesh.translucent.iter().all(Face::is_translucent));
    }

    #[test]
    fn test_top_face_is_brightest() {
        let single = VoxelModel::filled([1, 1, 1], BlockState::new("minecraft:stone"));
        let mesh = Mesh::build(&single, &atlas());
        let top = mesh
            .opaque
            .iter()
            .find(|f| f.corners.iter().all(|c| c.y == 1.0))
            .unwrap();
        assert!(mesh.opaque.iter().all(|f| f.color[0] <= top.color[0]));
        assert_eq!(top.center(), Vec3::new(0.5, 1.0, 0.5));
    }
}
