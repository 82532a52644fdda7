use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::components::tools::Tool;
use crate::error::SettingsError;

const DOCUMENTATION: &str = r#"# maskforge editor settings. Unknown keys are ignored and missing keys take
# their default value. Comments are not preserved when the editor rewrites this file.

"#;

#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    let mut base_dir = dirs::config_dir()?;
    base_dir.push(env!("CARGO_PKG_NAME"));
    Some(base_dir)
}

/// Which refinement the drawing tools request when auto-post-process is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostProcessOption {
    #[default]
    Otsu,
    Crf,
    SamLike,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushSettings {
    pub line_width: f32,
    /// Extra pixels added around brush strokes when tracking the edited region.
    pub bbox_margin: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            line_width: 10.0,
            bbox_margin: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub initial_tool: Tool,
    pub erase_all: bool,
    pub swap_markers: bool,
    pub auto_post_process: bool,
    pub post_process: PostProcessOption,
    pub increment_after_stroke: bool,
    pub instance_shades: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            initial_tool: Tool::Pen,
            erase_all: false,
            swap_markers: false,
            auto_post_process: false,
            post_process: PostProcessOption::Otsu,
            increment_after_stroke: false,
            instance_shades: 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineSettings {
    pub otsu_opening: bool,
    pub otsu_inverse: bool,
    pub otsu_kernel_size: u32,
    pub otsu_connectedness: bool,
    /// Threshold forwarded to the SAM-like op.
    pub sam_threshold: u8,
    pub crf_spatial_weight: f32,
    pub crf_bilateral_weight: f32,
    pub crf_iterations: u32,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            otsu_opening: true,
            otsu_inverse: false,
            otsu_kernel_size: 3,
            otsu_connectedness: true,
            sam_threshold: 0,
            crf_spatial_weight: 0.25,
            crf_bilateral_weight: 2.0,
            crf_iterations: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub zoom_intensity: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub ease_factor: f32,
    pub scale_threshold: f32,
    pub offset_threshold: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            zoom_intensity: 0.25,
            min_scale: 0.01,
            max_scale: 10.0,
            ease_factor: 0.3,
            scale_threshold: 0.05,
            offset_threshold: 1.0,
        }
    }
}

impl ViewSettings {
    /// Replace values the viewport cannot work with. Inverted scale bounds
    /// are swapped; non-finite or non-positive values fall back to defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        let positive = |v: f32| v.is_finite() && v > 0.0;

        if !positive(self.min_scale) || !positive(self.max_scale) {
            log::warn!(
                "invalid zoom bounds {}..{}, using {}..{}",
                self.min_scale,
                self.max_scale,
                defaults.min_scale,
                defaults.max_scale
            );
            self.min_scale = defaults.min_scale;
            self.max_scale = defaults.max_scale;
        } else if self.min_scale > self.max_scale {
            log::warn!("zoom bounds {}..{} are inverted, swapping", self.min_scale, self.max_scale);
            std::mem::swap(&mut self.min_scale, &mut self.max_scale);
        }
        if !positive(self.ease_factor) || self.ease_factor > 1.0 {
            log::warn!("ease factor {} outside (0, 1], using {}", self.ease_factor, defaults.ease_factor);
            self.ease_factor = defaults.ease_factor;
        }
        if !positive(self.scale_threshold) {
            log::warn!("scale threshold {} must be positive, using {}", self.scale_threshold, defaults.scale_threshold);
            self.scale_threshold = defaults.scale_threshold;
        }
        if !positive(self.offset_threshold) {
            log::warn!("offset threshold {} must be positive, using {}", self.offset_threshold, defaults.offset_threshold);
            self.offset_threshold = defaults.offset_threshold;
        }
        if !self.zoom_intensity.is_finite() {
            log::warn!("zoom intensity {} is not finite, using {}", self.zoom_intensity, defaults.zoom_intensity);
            self.zoom_intensity = defaults.zoom_intensity;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub max_entries: usize,
    pub max_memory_mib: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_memory_mib: 512,
        }
    }
}

/// Persisted editor configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub brush: BrushSettings,
    pub tools: ToolSettings,
    pub refine: RefineSettings,
    pub view: ViewSettings,
    pub history: HistorySettings,
}

impl EditorSettings {
    const FILENAME: &'static str = "settings.toml";

    #[must_use]
    pub fn settings_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(Self::FILENAME))
    }

    /// Load from the user config dir, or defaults if unavailable.
    #[must_use]
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                log::warn!("no config directory, using default settings");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::info!("settings not loaded from {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<Self>(&text) {
            Ok(mut settings) => {
                settings.view = settings.view.sanitized();
                settings
            }
            Err(e) => {
                log::warn!("ignoring unparsable settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = toml::ser::to_string_pretty(self)?;
        std::fs::write(path, DOCUMENTATION.to_owned() + &body).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: EditorSettings = toml::from_str(
            r#"
            [brush]
            line_width = 4.0

            [tools]
            erase_all = true
            post_process = "sam-like"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.brush.line_width, 4.0);
        assert_eq!(parsed.brush.bbox_margin, 2.0);
        assert!(parsed.tools.erase_all);
        assert_eq!(parsed.tools.post_process, PostProcessOption::SamLike);
        assert_eq!(parsed.view, ViewSettings::default());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("maskforge-settings-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.toml");
        let mut settings = EditorSettings::default();
        settings.tools.initial_tool = Tool::Lasso;
        settings.history.max_entries = 7;
        settings.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path), settings);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unusable_view_values_are_replaced() {
        let view = ViewSettings {
            min_scale: 5.0,
            max_scale: 1.0,
            ease_factor: 0.0,
            scale_threshold: -1.0,
            offset_threshold: f32::NAN,
            ..ViewSettings::default()
        }
        .sanitized();
        assert_eq!((view.min_scale, view.max_scale), (1.0, 5.0));
        assert_eq!(view.ease_factor, 0.3);
        assert_eq!(view.scale_threshold, 0.05);
        assert_eq!(view.offset_threshold, 1.0);

        let nan = ViewSettings {
            min_scale: f32::NAN,
            ease_factor: 4.0,
            ..ViewSettings::default()
        }
        .sanitized();
        assert_eq!((nan.min_scale, nan.max_scale), (0.01, 10.0));
        assert_eq!(nan.ease_factor, 0.3);
        assert_eq!(ViewSettings::default().sanitized(), ViewSettings::default());
    }

    #[test]
    fn inverted_zoom_bounds_in_file_are_swapped() {
        let dir = std::env::temp_dir().join(format!("maskforge-settings-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "[view]\nmin_scale = 5.0\nmax_scale = 1.0\n").unwrap();
        let loaded = EditorSettings::load_from(&path);
        assert_eq!((loaded.view.min_scale, loaded.view.max_scale), (1.0, 5.0));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("maskforge-settings-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "brush = [[[").unwrap();
        assert_eq!(EditorSettings::load_from(&path), EditorSettings::default());
        let _ = std::fs::remove_dir_all(dir);
    }
}
