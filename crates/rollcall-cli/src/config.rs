use rollcall_core::samples::MAX_SAMPLES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Runtime configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for samples, registry, model and ledger.
    pub data_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Haar cascade in OpenCV's XML format.
    pub cascade_path: PathBuf,
    /// Samples stored per enrollment session, within `1..=MAX_SAMPLES`.
    pub max_samples: usize,
    /// External text-to-speech command; announcements are only logged when unset.
    pub notify_command: Option<String>,
    /// Announcement queue capacity.
    pub notify_queue: usize,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
}

/// On-disk form. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    camera_device: Option<String>,
    cascade_path: Option<PathBuf>,
    max_samples: Option<usize>,
    notify_command: Option<String>,
    notify_queue: Option<usize>,
    warmup_frames: Option<usize>,
}

impl Config {
    /// Load from `file`, or from `ROLLCALL_CONFIG` when no file is given,
    /// and apply environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| env("ROLLCALL_CONFIG").map(PathBuf::from));

        let parsed = match file {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let parsed = parse_file(&text, &path)?;
                tracing::debug!(path = %path.display(), "config file loaded");
                parsed
            }
            None => FileConfig::default(),
        };

        Ok(Self::resolve(parsed, env))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let cascade_path = env("ROLLCALL_CASCADE_PATH")
            .map(PathBuf::from)
            .or(file.cascade_path)
            .unwrap_or_else(|| data_dir.join("haarcascade_frontalface_default.xml"));

        Self {
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            cascade_path,
            max_samples: clamp_max_samples(
                env_parse(&env, "ROLLCALL_MAX_SAMPLES")
                    .or(file.max_samples)
                    .unwrap_or(MAX_SAMPLES),
            ),
            notify_command: env("ROLLCALL_NOTIFY_COMMAND")
                .or(file.notify_command)
                .filter(|cmd| !cmd.trim().is_empty()),
            notify_queue: env_parse(&env, "ROLLCALL_NOTIFY_QUEUE")
                .or(file.notify_queue)
                .unwrap_or(8),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(4),
            data_dir,
        }
    }

    /// Sample store directory.
    pub fn samples_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }

    pub fn labels_path(&self) -> PathBuf {
        self.data_dir.join("labels.txt")
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("classifier.xml")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("attendance.csv")
    }
}

fn parse_file(text: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn clamp_max_samples(requested: usize) -> usize {
    let clamped = requested.clamp(1, MAX_SAMPLES);
    if clamped != requested {
        tracing::warn!(requested, used = clamped, "max_samples out of range");
    }
    clamped
}

/// Parse an environment override; unparsable values are ignored.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
