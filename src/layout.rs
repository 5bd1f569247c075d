// layout.rs — memory layout of the flattened scene buffers.
//
// The render entry point reads the scene from two flat arrays:
//
//   scene_params : [i32]  header with counts and offsets
//   scene_items  : [f32]  globals followed by sphere, plane and light records
//
// PARAMS HEADER (i32, HEADER_LEN words)
// ─────────────────────────────────────
//   0  schema version (SCENE_SCHEMA_VERSION)
//   1  params length in words
//   2  items length in words
//   3  max trace depth
//   4  sphere count      5  sphere offset (into items)
//   6  plane count       7  plane offset
//   8  light count       9  light offset
//  10  globals offset
//
// ITEM RECORDS (f32)
// ──────────────────
//   globals : cam pos (3) cam dir (3) fov (1) sky colour (3) ambient (1)
//   sphere  : pos (3) radius (1) material (5)
//   plane   : pos (3) normal (3) material (5)
//   light   : pos (3) intensity (1) colour (3)
//   material: colour (3) reflectivity (1) shininess (1)
//
// Both the host-side encoder (`scene.rs`) and every device program decode
// through the constants below. `SceneLayout::parse` is run on upload, so a
// host/device disagreement becomes a `SceneLayout` error rather than a
// corrupt frame.

use glam::Vec3;

use crate::error::{RaysError, RaysResult};

pub const SCENE_SCHEMA_VERSION: i32 = 1;

pub const HDR_VERSION: usize = 0;
pub const HDR_PARAMS_LEN: usize = 1;
pub const HDR_ITEMS_LEN: usize = 2;
pub const HDR_MAX_DEPTH: usize = 3;
pub const HDR_SPHERE_COUNT: usize = 4;
pub const HDR_SPHERE_OFFSET: usize = 5;
pub const HDR_PLANE_COUNT: usize = 6;
pub const HDR_PLANE_OFFSET: usize = 7;
pub const HDR_LIGHT_COUNT: usize = 8;
pub const HDR_LIGHT_OFFSET: usize = 9;
pub const HDR_GLOBALS_OFFSET: usize = 10;
pub const HEADER_LEN: usize = 11;

pub const MATERIAL_SIZE: usize = 5;
pub const GLOBALS_SIZE: usize = 11;
pub const SPHERE_SIZE: usize = 4 + MATERIAL_SIZE;
pub const PLANE_SIZE: usize = 6 + MATERIAL_SIZE;
pub const LIGHT_SIZE: usize = 7;

/// A run of equally sized records inside `scene_items`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Section {
    pub count: usize,
    pub offset: usize,
}

impl Section {
    fn end(&self, record: usize) -> Option<usize> {
        self.count.checked_mul(record)?.checked_add(self.offset)
    }

    fn record(&self, index: usize, record: usize) -> usize {
        self.offset + index * record
    }
}

/// Validated view of the scene-parameter header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneLayout {
    pub max_depth: u32,
    pub globals: usize,
    pub spheres: Section,
    pub planes: Section,
    pub lights: Section,
}

impl SceneLayout {
    /// Packed layout for the given object counts: globals first, then
    /// spheres, planes and lights back to back.
    pub fn packed(spheres: usize, planes: usize, lights: usize, max_depth: u32) -> Self {
        let globals = 0;
        let spheres = Section { count: spheres, offset: globals + GLOBALS_SIZE };
        let planes = Section { count: planes, offset: spheres.offset + spheres.count * SPHERE_SIZE };
        let lights = Section { count: lights, offset: planes.offset + planes.count * PLANE_SIZE };
        SceneLayout { max_depth, globals, spheres, planes, lights }
    }

    /// Number of f32 words the item buffer must hold.
    pub fn items_len(&self) -> usize {
        let ends = [
            self.globals + GLOBALS_SIZE,
            self.spheres.offset + self.spheres.count * SPHERE_SIZE,
            self.planes.offset + self.planes.count * PLANE_SIZE,
            self.lights.offset + self.lights.count * LIGHT_SIZE,
        ];
        ends.into_iter().max().unwrap_or(GLOBALS_SIZE)
    }

    /// Encode the params header.
    pub fn header(&self) -> Vec<i32> {
        let mut h = vec![0i32; HEADER_LEN];
        h[HDR_VERSION] = SCENE_SCHEMA_VERSION;
        h[HDR_PARAMS_LEN] = HEADER_LEN as i32;
        h[HDR_ITEMS_LEN] = self.items_len() as i32;
        h[HDR_MAX_DEPTH] = self.max_depth as i32;
        h[HDR_SPHERE_COUNT] = self.spheres.count as i32;
        h[HDR_SPHERE_OFFSET] = self.spheres.offset as i32;
        h[HDR_PLANE_COUNT] = self.planes.count as i32;
        h[HDR_PLANE_OFFSET] = self.planes.offset as i32;
        h[HDR_LIGHT_COUNT] = self.lights.count as i32;
        h[HDR_LIGHT_OFFSET] = self.lights.offset as i32;
        h[HDR_GLOBALS_OFFSET] = self.globals as i32;
        h
    }

    /// Validate both buffers against the header they carry.
    pub fn parse(params: &[i32], items: &[f32]) -> RaysResult<Self> {
        if params.len() < HEADER_LEN {
            return Err(RaysError::layout(format!(
                "params buffer has {} words, header needs {HEADER_LEN}",
                params.len()
            )));
        }
        if params[HDR_VERSION] != SCENE_SCHEMA_VERSION {
            return Err(RaysError::layout(format!(
                "schema version {} does not match expected {SCENE_SCHEMA_VERSION}",
                params[HDR_VERSION]
            )));
        }
        let declared_params = word(params, HDR_PARAMS_LEN, "params length")?;
        if declared_params != params.len() {
            return Err(RaysError::layout(format!(
                "params buffer declares {declared_params} words but holds {}",
                params.len()
            )));
        }
        let declared_items = word(params, HDR_ITEMS_LEN, "items length")?;
        if declared_items != items.len() {
            return Err(RaysError::layout(format!(
                "items buffer declares {declared_items} words but holds {}",
                items.len()
            )));
        }

        let layout = SceneLayout {
            max_depth: word(params, HDR_MAX_DEPTH, "max depth")? as u32,
            globals: word(params, HDR_GLOBALS_OFFSET, "globals offset")?,
            spheres: Section {
                count: word(params, HDR_SPHERE_COUNT, "sphere count")?,
                offset: word(params, HDR_SPHERE_OFFSET, "sphere offset")?,
            },
            planes: Section {
                count: word(params, HDR_PLANE_COUNT, "plane count")?,
                offset: word(params, HDR_PLANE_OFFSET, "plane offset")?,
            },
            lights: Section {
                count: word(params, HDR_LIGHT_COUNT, "light count")?,
                offset: word(params, HDR_LIGHT_OFFSET, "light offset")?,
            },
        };

        let sections = [
            ("globals", Section { count: 1, offset: layout.globals }, GLOBALS_SIZE),
            ("spheres", layout.spheres, SPHERE_SIZE),
            ("planes", layout.planes, PLANE_SIZE),
            ("lights", layout.lights, LIGHT_SIZE),
        ];
        for (name, section, record) in sections {
            match section.end(record) {
                Some(end) if end <= items.len() => {}
                _ => {
                    return Err(RaysError::layout(format!(
                        "{name} section ({} × {record} at {}) exceeds items buffer of {}",
                        section.count,
                        section.offset,
                        items.len()
                    )))
                }
            }
        }
        Ok(layout)
    }

    // -----------------------------------------------------------------------
    // Record decoding. Indices must come from a layout returned by `parse`.
    // -----------------------------------------------------------------------

    pub fn globals(&self, items: &[f32]) -> Globals {
        let g = &items[self.globals..self.globals + GLOBALS_SIZE];
        Globals {
            cam_pos: vec3(&g[0..3]),
            cam_dir: vec3(&g[3..6]),
            fov: g[6],
            sky: vec3(&g[7..10]),
            ambient: g[10],
        }
    }

    pub fn sphere(&self, items: &[f32], index: usize) -> SphereRecord {
        let s = &items[self.spheres.record(index, SPHERE_SIZE)..][..SPHERE_SIZE];
        SphereRecord { pos: vec3(&s[0..3]), radius: s[3], mat: material(&s[4..]) }
    }

    pub fn plane(&self, items: &[f32], index: usize) -> PlaneRecord {
        let p = &items[self.planes.record(index, PLANE_SIZE)..][..PLANE_SIZE];
        PlaneRecord { pos: vec3(&p[0..3]), nor: vec3(&p[3..6]), mat: material(&p[6..]) }
    }

    pub fn light(&self, items: &[f32], index: usize) -> LightRecord {
        let l = &items[self.lights.record(index, LIGHT_SIZE)..][..LIGHT_SIZE];
        LightRecord { pos: vec3(&l[0..3]), intensity: l[3], col: vec3(&l[4..7]) }
    }
}

fn word(params: &[i32], index: usize, what: &str) -> RaysResult<usize> {
    usize::try_from(params[index])
        .map_err(|_| RaysError::layout(format!("{what} is negative ({})", params[index])))
}

fn vec3(s: &[f32]) -> Vec3 {
    Vec3::new(s[0], s[1], s[2])
}

fn material(s: &[f32]) -> MaterialRecord {
    MaterialRecord { col: vec3(&s[0..3]), reflectivity: s[3], shininess: s[4] }
}

// ---------------------------------------------------------------------------
// Decoded records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Globals {
    pub cam_pos: Vec3,
    pub cam_dir: Vec3,
    /// Horizontal field of view in degrees.
    pub fov: f32,
    pub sky: Vec3,
    pub ambient: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialRecord {
    pub col: Vec3,
    pub reflectivity: f32,
    pub shininess: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereRecord {
    pub pos: Vec3,
    pub radius: f32,
    pub mat: MaterialRecord,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneRecord {
    pub pos: Vec3,
    pub nor: Vec3,
    pub mat: MaterialRecord,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRecord {
    pub pos: Vec3,
    pub intensity: f32,
    pub col: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_items() -> Vec<f32> {
        vec![0.0; GLOBALS_SIZE]
    }

    #[test]
    fn packed_header_parses_back() {
        let layout = SceneLayout::packed(2, 1, 3, 4);
        let items = vec![0.0; layout.items_len()];
        assert_eq!(layout.items_len(), GLOBALS_SIZE + 2 * SPHERE_SIZE + PLANE_SIZE + 3 * LIGHT_SIZE);
        assert_eq!(SceneLayout::parse(&layout.header(), &items).unwrap(), layout);
    }

    #[test]
    fn empty_scene_still_has_globals() {
        let layout = SceneLayout::packed(0, 0, 0, 3);
        assert_eq!(layout.items_len(), GLOBALS_SIZE);
        assert!(SceneLayout::parse(&layout.header(), &empty_items()).is_ok());
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut params = SceneLayout::packed(0, 0, 0, 1).header();
        params[HDR_VERSION] = SCENE_SCHEMA_VERSION + 1;
        let err = SceneLayout::parse(&params, &empty_items()).unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }

    #[test]
    fn rejects_short_and_mislabelled_buffers() {
        assert!(SceneLayout::parse(&[SCENE_SCHEMA_VERSION], &empty_items()).is_err());

        let params = SceneLayout::packed(1, 0, 0, 1).header();
        // Header declares one sphere but the items buffer only holds globals.
        let err = SceneLayout::parse(&params, &empty_items()).unwrap_err();
        assert!(matches!(err, RaysError::SceneLayout(_)));
    }

    #[test]
    fn rejects_section_past_end() {
        let layout = SceneLayout::packed(0, 0, 1, 1);
        let mut params = layout.header();
        params[HDR_LIGHT_OFFSET] = GLOBALS_SIZE as i32 + 1;
        let items = vec![0.0; layout.items_len()];
        assert!(SceneLayout::parse(&params, &items).is_err());

        params[HDR_LIGHT_OFFSET] = -1;
        assert!(SceneLayout::parse(&params, &items).is_err());
    }

    #[test]
    fn decodes_records() {
        let layout = SceneLayout::packed(1, 0, 1, 2);
        let mut items = vec![0.0; layout.items_len()];
        items[6] = 90.0;
        items[GLOBALS_SIZE..GLOBALS_SIZE + SPHERE_SIZE]
            .copy_from_slice(&[1.0, 2.0, 3.0, 0.5, 0.1, 0.2, 0.3, 0.4, 8.0]);
        let l = layout.lights.offset;
        items[l..l + LIGHT_SIZE].copy_from_slice(&[0.0, 5.0, 0.0, 100.0, 1.0, 1.0, 1.0]);

        let layout = SceneLayout::parse(&layout.header(), &items).unwrap();
        assert_eq!(layout.globals(&items).fov, 90.0);
        let s = layout.sphere(&items, 0);
        assert_eq!(s.pos, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s.radius, 0.5);
        assert_eq!(s.mat.reflectivity, 0.4);
        assert_eq!(s.mat.shininess, 8.0);
        assert_eq!(layout.light(&items, 0).intensity, 100.0);
    }
}
