// config.rs — render configuration loaded from TOML.
//
// ```toml
// [render]
// width = 640
// height = 480
// aa = 2
// backend = "gpu"          # "cpu" | "gpu"
// profile = "constrained"  # "native" | "constrained"
// frames = 10
// output = "frame.png"
//
// [scene]
// sky_col = [0.2, 0.2, 0.9]
// max_depth = 3
// camera = { pos = [0.0, 1.0, 4.0], dir = [0.0, 0.0, -1.0], fov = 70.0 }
//
// [[scene.spheres]]
// pos = [0.0, 1.0, 0.0]
// rad = 1.0
// mat = { col = [0.9, 0.2, 0.2], reflectivity = 0.3, shininess = 32.0 }
// ```
//
// Every field is optional. Zero width or height falls back to the default
// and `aa = 0` is treated as 1, so a partially written file still renders.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::BackendKind;
use crate::error::{RaysError, RaysResult};
use crate::gpu::device::DeviceProfile;
use crate::processor::PipelineSettings;
use crate::program::WorkSize;
use crate::scene::Scene;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub width: u32,
    pub height: u32,
    pub aa: u32,
    pub backend: BackendKind,
    pub profile: DeviceProfile,
    pub frames: u32,
    pub output: Option<PathBuf>,
}

impl Default for RenderSection {
    fn default() -> Self {
        RenderSection {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            aa: 1,
            backend: BackendKind::Cpu,
            profile: DeviceProfile::Native,
            frames: 1,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub render: RenderSection,
    pub scene: Scene,
}

impl RenderConfig {
    pub fn from_toml_str(src: &str) -> RaysResult<Self> {
        let config: RenderConfig =
            toml::from_str(src).map_err(|e| RaysError::config(e.to_string()))?;
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> RaysResult<Self> {
        let src = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&src)?;
        tracing::debug!(path = %path.display(), "loaded render config");
        Ok(config)
    }

    /// Apply the fallbacks for zero-valued fields.
    pub fn normalized(mut self) -> Self {
        let r = &mut self.render;
        if r.width == 0 {
            r.width = DEFAULT_WIDTH;
        }
        if r.height == 0 {
            r.height = DEFAULT_HEIGHT;
        }
        r.aa = r.aa.max(1);
        r.frames = r.frames.max(1);
        self
    }

    /// Reject settings whose supersampled work size does not fit in `u32`.
    pub fn validate(&self) -> RaysResult<()> {
        let r = &self.render;
        WorkSize::supersampled(r.width, r.height, r.aa)?;
        Ok(())
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings { width: self.render.width, height: self.render.height, aa: self.render.aa }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = RenderConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.render, RenderSection::default());
        assert_eq!(cfg.scene, Scene::default());
    }

    #[test]
    fn zero_fields_fall_back() {
        let cfg = RenderConfig::from_toml_str("[render]\nwidth = 0\nheight = 0\naa = 0\n").unwrap();
        assert_eq!((cfg.render.width, cfg.render.height, cfg.render.aa), (640, 480, 1));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = RenderConfig::from_toml_str("[render\nwidth = 3").unwrap_err();
        assert!(matches!(err, RaysError::Config(_)));
    }

    #[test]
    fn validate_rejects_overflowing_work_size() {
        let mut cfg = RenderConfig::default();
        cfg.render.width = u32::MAX;
        cfg.render.aa = 2;
        assert!(cfg.validate().is_err());
        assert!(RenderConfig::default().validate().is_ok());
    }
}
