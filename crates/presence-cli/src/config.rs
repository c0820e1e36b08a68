use anyhow::{bail, Context, Result};
use presence_core::session::DEFAULT_DOWNSAMPLE;
use presence_core::DEFAULT_TOLERANCE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "presence.toml";

/// CLI configuration.
///
/// Built from defaults, then the optional TOML file, then `PRESENCE_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after opening the camera.
    pub warmup_frames: usize,
    /// Directory of reference images, one per identity.
    pub gallery_dir: PathBuf,
    /// Attendance CSV file.
    pub ledger_path: PathBuf,
    /// Maximum embedding distance for a match.
    pub match_tolerance: f32,
    /// Frames are shrunk by this factor before detection.
    pub downsample: u32,
    /// External face encoder: program followed by its arguments.
    pub encoder_command: Vec<String>,
    /// Play frames from this directory instead of opening the camera.
    pub replay_dir: Option<PathBuf>,
    pub replay_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            gallery_dir: PathBuf::from("ImagesAttendance"),
            ledger_path: PathBuf::from("daily_attendance.csv"),
            match_tolerance: DEFAULT_TOLERANCE,
            downsample: DEFAULT_DOWNSAMPLE,
            encoder_command: Vec::new(),
            replay_dir: None,
            replay_interval_ms: 0,
        }
    }
}

impl Config {
    /// Load configuration. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `PRESENCE_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("PRESENCE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("PRESENCE_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRESENCE_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRESENCE_REPLAY_DIR") {
            self.replay_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("PRESENCE_ENCODER_COMMAND") {
            self.encoder_command = v.split_whitespace().map(str::to_string).collect();
        }
        parse_override(&lookup, "PRESENCE_MATCH_TOLERANCE", &mut self.match_tolerance)?;
        parse_override(&lookup, "PRESENCE_DOWNSAMPLE", &mut self.downsample)?;
        parse_override(&lookup, "PRESENCE_WARMUP_FRAMES", &mut self.warmup_frames)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.match_tolerance > 0.0 && self.match_tolerance.is_finite()) {
            bail!("match_tolerance must be a positive number, got {}", self.match_tolerance);
        }
        if self.downsample == 0 || self.downsample > 16 {
            bail!("downsample must be between 1 and 16, got {}", self.downsample);
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            bail!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera_width,
                self.camera_height
            );
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))?;
    }
    Ok(())
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.match_tolerance, 0.6);
        assert_eq!(config.downsample, 4);
        assert_eq!(config.ledger_path, PathBuf::from("daily_attendance.csv"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            gallery_dir = "/srv/faces"
            encoder_command = ["face-encode", "--json"]
            "#,
        )
        .unwrap();
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.encoder_command, vec!["face-encode", "--json"]);
        assert_eq!(config.camera_device, "/dev/video0");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("PRESENCE_MATCH_TOLERANCE", "0.45"),
                ("PRESENCE_DOWNSAMPLE", "2"),
                ("PRESENCE_ENCODER_COMMAND", "python3 encode.py"),
                ("PRESENCE_REPLAY_DIR", "/tmp/frames"),
            ]))
            .unwrap();
        assert_eq!(config.match_tolerance, 0.45);
        assert_eq!(config.downsample, 2);
        assert_eq!(config.encoder_command, vec!["python3", "encode.py"]);
        assert_eq!(config.replay_dir, Some(PathBuf::from("/tmp/frames")));
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("PRESENCE_DOWNSAMPLE", "four")]))
            .unwrap_err();
        assert!(err.to_string().contains("PRESENCE_DOWNSAMPLE"));
    }

    #[test]
    fn test_validate_rejects_zero_downsample() {
        let config = Config {
            downsample: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(Config::load(Some(missing.as_path())).is_err());
    }
}
