use anyhow::{bail, Context, Result};
use facegate_core::{CommandEncoder, MatchError, MatchPolicy, ENCODING_DIM};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runtime configuration.
///
/// Layered: defaults, then a TOML file, then `FACEGATE_*` environment
/// variables; command-line flags are applied last by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Gallery file written by `regenerate` and read by the recognisers.
    pub gallery_path: PathBuf,
    /// Directory scanned by `regenerate`.
    pub images_dir: PathBuf,
    /// Primary match tolerance (strict `<`).
    pub tolerance: f32,
    /// Optional secondary bound on the best candidate's distance.
    pub confidence_threshold: Option<f32>,
    /// V4L2 device path.
    pub camera_device: String,
    /// Resize factor applied to webcam frames before encoding.
    pub frame_scale: f32,
    /// External encoder executable.
    pub encoder_program: String,
    /// Extra arguments placed before the image path.
    pub encoder_args: Vec<String>,
    /// Expected encoding length.
    pub encoding_dim: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_path: data_dir().join("encodings.json"),
            images_dir: PathBuf::from("images"),
            tolerance: facegate_core::matcher::DEFAULT_TOLERANCE,
            confidence_threshold: None,
            camera_device: "/dev/video0".to_string(),
            frame_scale: 0.25,
            encoder_program: "facegate-encoder".to_string(),
            encoder_args: Vec::new(),
            encoding_dim: ENCODING_DIM,
        }
    }
}

impl Config {
    /// Load from `path` if given, else from the default location when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `FACEGATE_*` overrides read through `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("FACEGATE_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }
        if let Some(v) = get("FACEGATE_IMAGES_DIR") {
            self.images_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&get, "FACEGATE_TOLERANCE") {
            self.tolerance = v;
        }
        if let Some(v) = get("FACEGATE_CONFIDENCE_THRESHOLD") {
            let v = v.trim();
            if v.is_empty() || v.eq_ignore_ascii_case("none") {
                self.confidence_threshold = None;
            } else if let Some(t) = parse_var(&get, "FACEGATE_CONFIDENCE_THRESHOLD") {
                self.confidence_threshold = Some(t);
            }
        }
        if let Some(v) = get("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = parse_var(&get, "FACEGATE_FRAME_SCALE") {
            self.frame_scale = v;
        }
        if let Some(v) = get("FACEGATE_ENCODER") {
            self.encoder_program = v;
        }
        if let Some(v) = parse_var(&get, "FACEGATE_ENCODING_DIM") {
            self.encoding_dim = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.match_policy()?;
        if !(self.frame_scale > 0.0 && self.frame_scale <= 1.0) {
            bail!("frame_scale must be in (0, 1], got {}", self.frame_scale);
        }
        if self.encoding_dim == 0 {
            bail!("encoding_dim must be positive");
        }
        if self.encoder_program.trim().is_empty() {
            bail!("encoder_program must not be empty");
        }
        Ok(())
    }

    pub fn match_policy(&self) -> Result<MatchPolicy, MatchError> {
        MatchPolicy::new(self.tolerance, self.confidence_threshold)
    }

    pub fn encoder(&self) -> CommandEncoder {
        CommandEncoder::new(&self.encoder_program)
            .with_args(self.encoder_args.clone())
            .with_expected_dim(self.encoding_dim)
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("facegate/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.tolerance, 0.5);
        assert_eq!(config.confidence_threshold, None);
        assert_eq!(config.frame_scale, 0.25);
        assert!(config.gallery_path.ends_with("facegate/encodings.json"));
    }

    #[test]
    fn test_toml_partial_file() {
        let config: Config = toml::from_str(
            r#"
            tolerance = 0.45
            confidence_threshold = 0.55
            encoder_program = "python3"
            encoder_args = ["contrib/face_encoder.py"]
            "#,
        )
        .unwrap();
        assert_eq!(config.tolerance, 0.45);
        assert_eq!(config.confidence_threshold, Some(0.55));
        assert_eq!(config.encoder_args, vec!["contrib/face_encoder.py"]);
        // Untouched fields keep their defaults.
        assert_eq!(config.camera_device, "/dev/video0");
    }

    #[test]
    fn test_example_config_parses() {
        let text = include_str!("../../../contrib/config.example.toml");
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.encoder_program, "python3");
        assert_eq!(config.encoding_dim, 128);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("tolerence = 0.4").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "images_dir = \"faces\"\nframe_scale = 0.5\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.images_dir, PathBuf::from("faces"));
        assert_eq!(config.frame_scale, 0.5);
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("FACEGATE_GALLERY_PATH", "/srv/faces.json"),
            ("FACEGATE_TOLERANCE", "0.4"),
            ("FACEGATE_CONFIDENCE_THRESHOLD", "0.35"),
            ("FACEGATE_CAMERA_DEVICE", "/dev/video2"),
            ("FACEGATE_ENCODING_DIM", "512"),
        ]));
        assert_eq!(config.gallery_path, PathBuf::from("/srv/faces.json"));
        assert_eq!(config.tolerance, 0.4);
        assert_eq!(config.confidence_threshold, Some(0.35));
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.encoding_dim, 512);
    }

    #[test]
    fn test_env_clears_threshold_and_ignores_garbage() {
        let mut config = Config {
            confidence_threshold: Some(0.5),
            ..Config::default()
        };
        config.apply_env(env(&[
            ("FACEGATE_CONFIDENCE_THRESHOLD", "none"),
            ("FACEGATE_TOLERANCE", "loose"),
        ]));
        assert_eq!(config.confidence_threshold, None);
        assert_eq!(config.tolerance, 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_scale = Config {
            frame_scale: 1.5,
            ..Config::default()
        };
        assert!(bad_scale.validate().is_err());

        let bad_tolerance = Config {
            tolerance: -1.0,
            ..Config::default()
        };
        assert!(bad_tolerance.validate().is_err());

        let bad_threshold = Config {
            confidence_threshold: Some(f32::NAN),
            ..Config::default()
        };
        assert!(bad_threshold.validate().is_err());
    }
}
