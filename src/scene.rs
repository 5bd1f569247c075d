// scene.rs — scene description and its flattening into device buffers.
//
// The scene is plain data. It is deserialised from the `[scene]` table of a
// render config (or built in code) and flattened exactly once, before the
// trace kernel is constructed, into the two arrays described in `layout.rs`.

use glam::Vec3;
use serde::Deserialize;

use crate::layout::SceneLayout;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Material {
    pub col: Vec3,
    /// Fraction of radiance taken from the mirror direction, in [0, 1].
    pub reflectivity: f32,
    /// Blinn specular exponent. Zero disables the highlight.
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Material { col: Vec3::splat(0.8), reflectivity: 0.0, shininess: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Sphere {
    pub pos: Vec3,
    pub rad: f32,
    #[serde(default)]
    pub mat: Material,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Plane {
    pub pos: Vec3,
    pub nor: Vec3,
    #[serde(default)]
    pub mat: Material,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Light {
    pub pos: Vec3,
    pub intensity: f32,
    #[serde(default = "white")]
    pub col: Vec3,
}

fn white() -> Vec3 {
    Vec3::ONE
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub pos: Vec3,
    pub dir: Vec3,
    /// Horizontal field of view in degrees.
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Camera { pos: Vec3::ZERO, dir: Vec3::NEG_Z, fov: 90.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub camera: Camera,
    pub sky_col: Vec3,
    pub ambient: f32,
    pub max_depth: u32,
    pub spheres: Vec<Sphere>,
    pub planes: Vec<Plane>,
    pub lights: Vec<Light>,
}

impl Default for Scene {
    fn default() -> Self {
        Scene {
            camera: Camera::default(),
            sky_col: Vec3::new(0.2, 0.2, 0.9),
            ambient: 0.05,
            max_depth: 3,
            spheres: Vec::new(),
            planes: Vec::new(),
            lights: Vec::new(),
        }
    }
}

/// The two flattened arrays uploaded to the trace kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBuffers {
    pub params: Vec<i32>,
    pub items: Vec<f32>,
}

impl Scene {
    /// An object-free scene: every primary ray misses and returns `sky_col`.
    pub fn empty(sky_col: Vec3) -> Self {
        Scene { sky_col, ..Scene::default() }
    }

    pub fn layout(&self) -> SceneLayout {
        SceneLayout::packed(self.spheres.len(), self.planes.len(), self.lights.len(), self.max_depth)
    }

    /// Flattened float payload: globals, then spheres, planes and lights.
    pub fn get_buffers(&self) -> Vec<f32> {
        let layout = self.layout();
        let mut items = Vec::with_capacity(layout.items_len());

        let cam = &self.camera;
        push3(&mut items, cam.pos);
        push3(&mut items, cam.dir);
        items.push(cam.fov);
        push3(&mut items, self.sky_col);
        items.push(self.ambient);

        for s in &self.spheres {
            push3(&mut items, s.pos);
            items.push(s.rad);
            push_material(&mut items, &s.mat);
        }
        for p in &self.planes {
            push3(&mut items, p.pos);
            push3(&mut items, p.nor.normalize_or_zero());
            push_material(&mut items, &p.mat);
        }
        for l in &self.lights {
            push3(&mut items, l.pos);
            items.push(l.intensity);
            push3(&mut items, l.col);
        }
        debug_assert_eq!(items.len(), layout.items_len());
        items
    }

    /// Params header describing the layout of `get_buffers()`.
    pub fn get_params_buffer(&self) -> Vec<i32> {
        self.layout().header()
    }

    pub fn snapshot(&self) -> SceneBuffers {
        SceneBuffers { params: self.get_params_buffer(), items: self.get_buffers() }
    }
}

fn push3(out: &mut Vec<f32>, v: Vec3) {
    out.extend_from_slice(&v.to_array());
}

fn push_material(out: &mut Vec<f32>, m: &Material) {
    push3(out, m.col);
    out.push(m.reflectivity);
    out.push(m.shininess);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GLOBALS_SIZE, PLANE_SIZE, SPHERE_SIZE};

    fn demo() -> Scene {
        Scene {
            spheres: vec![Sphere { pos: Vec3::new(0.0, 0.0, -3.0), rad: 1.0, mat: Material::default() }],
            planes: vec![Plane {
                pos: Vec3::new(0.0, -1.0, 0.0),
                nor: Vec3::new(0.0, 2.0, 0.0),
                mat: Material { reflectivity: 0.5, ..Material::default() },
            }],
            lights: vec![Light { pos: Vec3::new(0.0, 4.0, 0.0), intensity: 50.0, col: Vec3::ONE }],
            ..Scene::default()
        }
    }

    #[test]
    fn snapshot_parses_with_own_layout() {
        let scene = demo();
        let buffers = scene.snapshot();
        let layout = SceneLayout::parse(&buffers.params, &buffers.items).unwrap();
        assert_eq!(layout, scene.layout());

        let s = layout.sphere(&buffers.items, 0);
        assert_eq!(s.pos, Vec3::new(0.0, 0.0, -3.0));
        // Plane normals are normalised on the way out.
        assert_eq!(layout.plane(&buffers.items, 0).nor, Vec3::Y);
        assert_eq!(layout.plane(&buffers.items, 0).mat.reflectivity, 0.5);
        assert_eq!(layout.light(&buffers.items, 0).intensity, 50.0);
    }

    #[test]
    fn item_count_matches_records() {
        let items = demo().get_buffers();
        assert_eq!(items.len(), GLOBALS_SIZE + SPHERE_SIZE + PLANE_SIZE + 7);
    }

    #[test]
    fn empty_scene_carries_globals() {
        let scene = Scene::empty(Vec3::new(0.25, 0.5, 0.75));
        let items = scene.get_buffers();
        assert_eq!(items.len(), GLOBALS_SIZE);
        assert_eq!(&items[7..10], &[0.25, 0.5, 0.75]);
    }
}
