// cpu/program.rs — host implementation of the three program entry points.
//
// These functions are the reference for `shaders/*.wgsl`. They take the same
// arguments as the device entry points (typed views of the bound buffers plus
// the scalar arguments and the dispatch work size) and honour the same
// bounds: an invocation outside `width × height` (or the supersampled grid
// for `render`) does nothing.
//
// SHADING MODEL (render)
// ──────────────────────
// Whitted-style, iterative:
//
//   radiance = Σ throughput_k · ( diffuse_k · (1 − r_k) + specular_k )
//            + throughput_n · sky                      (ray escapes or depth runs out)
//
//   diffuse  = material colour · (ambient + Σ_lights col · cosθ · P)
//   specular = Σ_lights col · max(0, n·h)^shininess · P
//   P        = intensity / (4π d²), zero when the light is occluded
//
// where `r_k` is the reflectivity at hit k and the throughput is multiplied
// by `r_k` before following the mirror ray. `max_depth` bounds the number of
// surface interactions; a scene with no objects therefore renders exactly
// the sky colour.

use std::f32::consts::PI;

use glam::Vec3;
use rayon::prelude::*;

use crate::error::{RaysError, RaysResult};
use crate::image::pack_rgb;
use crate::layout::{Globals, MaterialRecord, SceneLayout};
use crate::program::{WorkSize, RENDER_CHANNELS};

const EPSILON: f32 = 0.001;
const MAX_RENDER_DIST: f32 = 1.0e6;
/// Lights contributing less than this are skipped.
const MIN_LIGHT_POWER: f32 = 0.01;

// ---------------------------------------------------------------------------
// clear
// ---------------------------------------------------------------------------

/// Zero every channel of every pixel covered by `work`.
///
/// The channel count is derived from the buffer length, so a `w × h × 3`
/// accumulation buffer is cleared entirely by a `w × h` dispatch.
pub fn clear(buffer: &mut [f32], width: u32, height: u32, work: WorkSize) {
    let pixels = width as usize * height as usize;
    if pixels == 0 {
        return;
    }
    let channels = buffer.len() / pixels;
    let cols = width.min(work.x) as usize;
    let rows = height.min(work.y) as usize;
    for y in 0..rows {
        let start = y * width as usize * channels;
        buffer[start..start + cols * channels].fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// image_from_floatmap
// ---------------------------------------------------------------------------

/// Pack the RGB accumulation buffer into `0x00RRGGBB` pixels.
pub fn image_from_floatmap(
    input: &[f32],
    output: &mut [i32],
    width: u32,
    height: u32,
    work: WorkSize,
) -> RaysResult<()> {
    let pixels = width as usize * height as usize;
    if input.len() < pixels * RENDER_CHANNELS || output.len() < pixels {
        return Err(RaysError::device(format!(
            "image_from_floatmap: {width}×{height} needs {} input and {pixels} output words, \
             got {} and {}",
            pixels * RENDER_CHANNELS,
            input.len(),
            output.len()
        )));
    }
    let cols = width.min(work.x) as usize;
    let rows = height.min(work.y) as usize;
    for y in 0..rows {
        for x in 0..cols {
            let i = y * width as usize + x;
            let c = &input[i * RENDER_CHANNELS..][..RENDER_CHANNELS];
            output[i] = pack_rgb(Vec3::new(c[0], c[1], c[2]));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

/// Trace `aa × aa` samples per pixel and add their mean into `out`.
///
/// `work` is the supersampled grid `(width · aa, height · aa)`; sample
/// `(gx, gy)` belongs to pixel `(gx / aa, gy / aa)`.
pub fn render(
    out: &mut [f32],
    width: u32,
    height: u32,
    aa: u32,
    params: &[i32],
    items: &[f32],
    work: WorkSize,
) -> RaysResult<()> {
    let layout = SceneLayout::parse(params, items)?;
    let w = width as usize;
    let pixels = w * height as usize;
    if aa == 0 || out.len() != pixels * RENDER_CHANNELS {
        return Err(RaysError::device(format!(
            "render: {width}×{height} at aa {aa} needs a {} word output buffer, got {}",
            pixels * RENDER_CHANNELS,
            out.len()
        )));
    }
    if pixels == 0 {
        return Ok(());
    }

    let scene = SceneView { layout, items, globals: layout.globals(items) };
    let camera = CameraRays::new(&scene.globals, width, height, aa);
    let weight = 1.0 / (aa * aa) as f32;

    out.par_chunks_mut(w * RENDER_CHANNELS)
        .enumerate()
        .for_each(|(py, row)| {
            for px in 0..w {
                let mut sum = Vec3::ZERO;
                for sy in 0..aa {
                    let gy = py as u32 * aa + sy;
                    if gy >= work.y {
                        continue;
                    }
                    for sx in 0..aa {
                        let gx = px as u32 * aa + sx;
                        if gx >= work.x {
                            continue;
                        }
                        sum += scene.trace(camera.ray(gx, gy));
                    }
                }
                let px_out = &mut row[px * RENDER_CHANNELS..][..RENDER_CHANNELS];
                px_out[0] += sum.x * weight;
                px_out[1] += sum.y * weight;
                px_out[2] += sum.z * weight;
            }
        });
    Ok(())
}

fn reflect(d: Vec3, n: Vec3) -> Vec3 {
    d - n * (2.0 * d.dot(n))
}

#[derive(Debug, Clone, Copy)]
struct Ray {
    pos: Vec3,
    dir: Vec3,
}

struct CameraRays {
    pos: Vec3,
    forward: Vec3,
    hor: Vec3,
    ver: Vec3,
    aspect: f32,
    grid_w: f32,
    grid_h: f32,
}

impl CameraRays {
    fn new(g: &Globals, width: u32, height: u32, aa: u32) -> Self {
        let cd = g.cam_dir.try_normalize().unwrap_or(Vec3::NEG_Z);
        let hor = cd.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
        let ver = hor.cross(cd).normalize();
        let aspect = width as f32 / height as f32;
        let uv_dist = (aspect / 2.0) / (g.fov.to_radians() / 2.0).tan();
        CameraRays {
            pos: g.cam_pos,
            forward: cd * uv_dist,
            hor,
            ver,
            aspect,
            grid_w: (width * aa) as f32,
            grid_h: (height * aa) as f32,
        }
    }

    fn ray(&self, gx: u32, gy: u32) -> Ray {
        let u = ((gx as f32 + 0.5) / self.grid_w - 0.5) * self.aspect;
        let v = -((gy as f32 + 0.5) / self.grid_h - 0.5);
        let dir = (self.forward + self.hor * u + self.ver * v).normalize();
        Ray { pos: self.pos, dir }
    }
}

struct Hit {
    pos: Vec3,
    nor: Vec3,
    t: f32,
    mat: MaterialRecord,
}

struct SceneView<'a> {
    layout: SceneLayout,
    items: &'a [f32],
    globals: Globals,
}

impl SceneView<'_> {
    fn trace(&self, mut ray: Ray) -> Vec3 {
        let sky = self.globals.sky;
        let mut col = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut depth = self.layout.max_depth;
        loop {
            if depth == 0 {
                return col + throughput * sky;
            }
            let Some(hit) = self.intersect(ray) else {
                return col + throughput * sky;
            };
            let (diffuse, specular) = self.blinn(&hit, ray.dir);
            let r = hit.mat.reflectivity.clamp(0.0, 1.0);
            col += throughput * (diffuse * (1.0 - r) + specular);
            if r <= 0.0 {
                return col;
            }
            throughput *= r;
            ray = Ray { pos: hit.pos + hit.nor * EPSILON, dir: reflect(ray.dir, hit.nor).normalize() };
            depth -= 1;
        }
    }

    fn intersect(&self, ray: Ray) -> Option<Hit> {
        let mut closest: Option<Hit> = None;
        let mut best = MAX_RENDER_DIST;

        for i in 0..self.layout.planes.count {
            let p = self.layout.plane(self.items, i);
            let divisor = ray.dir.dot(p.nor);
            if divisor.abs() < EPSILON {
                continue;
            }
            let t = (p.pos - ray.pos).dot(p.nor) / divisor;
            if t < EPSILON || t > best {
                continue;
            }
            best = t;
            closest = Some(Hit { pos: ray.pos + ray.dir * t, nor: p.nor, t, mat: p.mat });
        }

        for i in 0..self.layout.spheres.count {
            let s = self.layout.sphere(self.items, i);
            let l = s.pos - ray.pos;
            let tca = ray.dir.dot(l);
            let d = tca * tca - l.dot(l) + s.radius * s.radius;
            if d < 0.0 {
                continue;
            }
            let dsqrt = d.sqrt();
            let mut t = tca - dsqrt;
            if t < 0.0 {
                t = tca + dsqrt;
                if t < 0.0 {
                    continue;
                }
            }
            if t > best {
                continue;
            }
            best = t;
            let pos = ray.pos + ray.dir * t;
            closest = Some(Hit { pos, nor: (pos - s.pos) / s.radius, t, mat: s.mat });
        }
        closest
    }

    fn blinn(&self, hit: &Hit, view_dir: Vec3) -> (Vec3, Vec3) {
        let mut light = Vec3::splat(self.globals.ambient);
        let mut spec = Vec3::ZERO;
        for i in 0..self.layout.lights.count {
            let l = self.layout.light(self.items, i);
            let (d, s) = self.blinn_single(hit, l.pos, l.intensity, hit.mat.shininess, view_dir);
            light += l.col * d;
            spec += l.col * s;
        }
        (light * hit.mat.col, spec)
    }

    fn blinn_single(&self, hit: &Hit, lpos: Vec3, intensity: f32, shininess: f32, view_dir: Vec3) -> (f32, f32) {
        let to_l = lpos - hit.pos;
        let dist = to_l.length();
        let to_l = to_l / (dist + EPSILON);
        let angle = hit.nor.dot(to_l);
        if angle < EPSILON {
            return (0.0, 0.0);
        }
        let power = intensity / (4.0 * PI * dist * dist);
        if power < MIN_LIGHT_POWER {
            return (0.0, 0.0);
        }
        let shadow = Ray { pos: hit.pos + hit.nor * EPSILON, dir: to_l };
        if matches!(self.intersect(shadow), Some(blocker) if blocker.t < dist) {
            return (0.0, 0.0);
        }
        let spec = if shininess > 0.0 {
            let half = (to_l - view_dir).normalize_or_zero();
            half.dot(hit.nor).max(0.0).powf(shininess)
        } else {
            0.0
        };
        (angle * power, spec * power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Light, Material, Scene, Sphere};

    fn grid(w: u32, h: u32, aa: u32) -> WorkSize {
        WorkSize::new(w * aa, h * aa)
    }

    #[test]
    fn clear_covers_all_channels() {
        let mut buf = vec![1.0f32; 4 * 2 * 3];
        clear(&mut buf, 4, 2, WorkSize::new(4, 2));
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn clear_respects_work_bounds() {
        let mut buf = vec![1.0f32; 4 * 2];
        clear(&mut buf, 4, 2, WorkSize::new(2, 1));
        assert_eq!(buf, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn empty_scene_renders_sky() {
        let sky = Vec3::new(0.25, 0.5, 0.75);
        let buffers = Scene::empty(sky).snapshot();
        for aa in [1, 2, 3] {
            let mut out = vec![0.0f32; 3 * 2 * 3];
            render(&mut out, 3, 2, aa, &buffers.params, &buffers.items, grid(3, 2, aa)).unwrap();
            for px in out.chunks(3) {
                assert!((Vec3::from_slice(px) - sky).abs().max_element() < 1e-6, "aa {aa}: {px:?}");
            }
        }
    }

    #[test]
    fn render_accumulates_into_output() {
        let buffers = Scene::empty(Vec3::splat(0.5)).snapshot();
        let mut out = vec![0.25f32; 2 * 2 * 3];
        render(&mut out, 2, 2, 1, &buffers.params, &buffers.items, grid(2, 2, 1)).unwrap();
        assert!(out.iter().all(|&v| (v - 0.75).abs() < 1e-6));
    }

    #[test]
    fn sphere_in_view_changes_centre_pixel() {
        let scene = Scene {
            spheres: vec![Sphere {
                pos: Vec3::new(0.0, 0.0, -3.0),
                rad: 1.0,
                mat: Material { col: Vec3::new(1.0, 0.0, 0.0), reflectivity: 0.0, shininess: 0.0 },
            }],
            lights: vec![Light { pos: Vec3::new(0.0, 0.0, 0.0), intensity: 200.0, col: Vec3::ONE }],
            ..Scene::empty(Vec3::new(0.0, 0.0, 1.0))
        };
        let b = scene.snapshot();
        let mut out = vec![0.0f32; 5 * 5 * 3];
        render(&mut out, 5, 5, 1, &b.params, &b.items, grid(5, 5, 1)).unwrap();
        let centre = &out[(2 * 5 + 2) * 3..][..3];
        let corner = &out[0..3];
        assert!(centre[0] > 0.1, "lit red sphere expected, got {centre:?}");
        assert_eq!(centre[2], 0.0);
        assert_eq!(corner, &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn zero_depth_sees_only_sky() {
        let mut scene = Scene::empty(Vec3::splat(0.3));
        scene.max_depth = 0;
        scene.spheres.push(Sphere { pos: Vec3::new(0.0, 0.0, -2.0), rad: 1.5, mat: Material::default() });
        let b = scene.snapshot();
        let mut out = vec![0.0f32; 3];
        render(&mut out, 1, 1, 1, &b.params, &b.items, grid(1, 1, 1)).unwrap();
        assert!(out.iter().all(|&v| (v - 0.3).abs() < 1e-6));
    }

    #[test]
    fn render_rejects_bad_layout() {
        let mut b = Scene::default().snapshot();
        b.items.pop();
        let mut out = vec![0.0f32; 3];
        let err = render(&mut out, 1, 1, 1, &b.params, &b.items, grid(1, 1, 1)).unwrap_err();
        assert!(matches!(err, RaysError::SceneLayout(_)));
    }

    #[test]
    fn image_packs_pixels() {
        let input = [1.0, 0.0, 0.0, 0.25, 0.5, 0.75];
        let mut output = [0i32; 2];
        image_from_floatmap(&input, &mut output, 2, 1, WorkSize::new(2, 1)).unwrap();
        assert_eq!(output, [0x00FF_0000, pack_rgb(Vec3::new(0.25, 0.5, 0.75))]);
        assert!(image_from_floatmap(&input[..3], &mut output, 2, 1, WorkSize::new(2, 1)).is_err());
    }
}
