use std::path::PathBuf;
use std::time::Duration;

use reelsmith_cloud::{StorageConfig, DEFAULT_URL_EXPIRY, MAX_URL_EXPIRY};
use reelsmith_core::ffmpeg::FFMPEG_BIN;
use reelsmith_core::render::{EngineConfig, DEFAULT_RENDER_TIMEOUT};
use reelsmith_core::request::QualityTier;
use reelsmith_core::storage::BackendKind;
use reelsmith_pipeline::ScriptRetention;

use crate::background::cleanup::DEFAULT_CLEANUP_INTERVAL;
use crate::background::health::DEFAULT_HEALTH_INTERVAL;
use crate::pool::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_POOL_SIZE};
use crate::queue::{QueueSettings, DEFAULT_ACK_TIMEOUT};
use crate::retry::{Backoff, RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};

const DEFAULT_DATABASE_URL: &str = "sqlite://reelsmith-jobs.db?mode=rwc";
const DEFAULT_ENGINE_BIN: &str = "manim";
const DEFAULT_SCRIPTS_DIR: &str = "/tmp/reelsmith/scripts";
const DEFAULT_OUTPUT_DIR: &str = "/tmp/reelsmith/output";
const DEFAULT_LOCAL_STORAGE_ROOT: &str = "/var/lib/reelsmith/artifacts";
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(900);
const DEFAULT_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
///
/// | Env Var                   | Default                               |
/// |---------------------------|---------------------------------------|
/// | `DATABASE_URL`            | `sqlite://reelsmith-jobs.db?mode=rwc` |
/// | `RENDER_ENGINE_BIN`       | `manim`                               |
/// | `RENDER_ENGINE_ARGS`      | (none, whitespace separated)          |
/// | `RENDER_QUALITY`          | `medium`                              |
/// | `RENDER_TIMEOUT_SECS`     | `600`                                 |
/// | `RENDER_MAX_MEMORY_MB`    | (unlimited)                           |
/// | `WORKER_POOL_SIZE`        | `4`                                   |
/// | `MAX_RETRY_ATTEMPTS`      | `3`                                   |
/// | `RETRY_BACKOFF_SECS`      | `60`                                  |
/// | `RETRY_BACKOFF_STRATEGY`  | `fixed` (or `exponential`)            |
/// | `RETRY_BACKOFF_MAX_SECS`  | `900`                                 |
/// | `HEARTBEAT_INTERVAL_SECS` | `10`                                  |
/// | `ACK_TIMEOUT_SECS`        | `60`                                  |
/// | `HEALTH_INTERVAL_SECS`    | `30`                                  |
/// | `CLEANUP_INTERVAL_SECS`   | `3600`                                |
/// | `CLEANUP_MAX_AGE_HOURS`   | `24`                                  |
/// | `SCRIPT_RETENTION`        | `retain` (or `delete_after_upload`)   |
/// | `THUMBNAILS_ENABLED`      | `false`                               |
/// | `FFMPEG_BIN`              | `ffmpeg`                              |
/// | `SCRIPTS_DIR`             | `/tmp/reelsmith/scripts`              |
/// | `OUTPUT_DIR`              | `/tmp/reelsmith/output`               |
/// | `TEMPLATE_DIR`            | (built-in templates only)             |
/// | `STORAGE_BACKEND`         | `local` (or `s3`, `gcs`)              |
/// | `LOCAL_STORAGE_ROOT`      | `/var/lib/reelsmith/artifacts`        |
/// | `SIGNED_URL_EXPIRY_SECS`  | `3600`                                |
///
/// Interval variables must be positive, and `HEARTBEAT_INTERVAL_SECS` may be
/// at most half of `ACK_TIMEOUT_SECS` so a live lease is never reaped.
/// `SIGNED_URL_EXPIRY_SECS` is bounded by the 7-day presigning limit.
///
/// The `s3` backend reads `S3_BUCKET` (required), `S3_REGION`,
/// `S3_ENDPOINT`, `S3_ACCESS_KEY_ID`, and `S3_SECRET_ACCESS_KEY`; `gcs`
/// requires `GCS_BUCKET`, `GCS_HMAC_ACCESS_ID`, and `GCS_HMAC_SECRET`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub engine_program: String,
    pub engine_args: Vec<String>,
    pub default_quality: QualityTier,
    pub render_timeout: Duration,
    pub max_memory_bytes: Option<u64>,
    pub pool_size: usize,
    pub retry: RetryPolicy,
    pub heartbeat_interval: Duration,
    pub ack_timeout: Duration,
    pub health_interval: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_max_age: Duration,
    pub script_retention: ScriptRetention,
    /// ffmpeg program when thumbnails are enabled.
    pub thumbnail_program: Option<String>,
    pub scripts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub storage: StorageConfig,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let default_quality = match env.get("RENDER_QUALITY") {
            Some(name) => QualityTier::from_name(&name).ok_or_else(|| ConfigError::Invalid {
                key: "RENDER_QUALITY",
                value: name.clone(),
                reason: "expected low, medium, high, or 4k".into(),
            })?,
            None => QualityTier::Medium,
        };

        let max_attempts = env.parse("MAX_RETRY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRY_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        let base = env.secs("RETRY_BACKOFF_SECS", DEFAULT_BACKOFF)?;
        let backoff = match env.get("RETRY_BACKOFF_STRATEGY").as_deref() {
            None | Some("fixed") => Backoff::Fixed(base),
            Some("exponential") => Backoff::Exponential {
                base,
                max: env.secs("RETRY_BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX)?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "RETRY_BACKOFF_STRATEGY",
                    value: other.into(),
                    reason: "expected fixed or exponential".into(),
                })
            }
        };

        let pool_size: usize = env.parse("WORKER_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_POOL_SIZE",
                value: "0".into(),
                reason: "the pool needs at least one worker".into(),
            });
        }

        let script_retention = match env.get("SCRIPT_RETENTION") {
            Some(name) => ScriptRetention::from_name(&name).ok_or_else(|| ConfigError::Invalid {
                key: "SCRIPT_RETENTION",
                value: name.clone(),
                reason: "expected retain or delete_after_upload".into(),
            })?,
            None => ScriptRetention::Retain,
        };

        let thumbnail_program = env
            .flag("THUMBNAILS_ENABLED", false)?
            .then(|| env.get("FFMPEG_BIN").unwrap_or_else(|| FFMPEG_BIN.into()));

        let max_age_hours = env.parse("CLEANUP_MAX_AGE_HOURS", DEFAULT_CLEANUP_MAX_AGE_HOURS)?;

        let heartbeat_interval =
            env.positive_secs("HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL)?;
        let ack_timeout = env.positive_secs("ACK_TIMEOUT_SECS", DEFAULT_ACK_TIMEOUT)?;
        if heartbeat_interval.saturating_mul(2) > ack_timeout {
            return Err(ConfigError::Invalid {
                key: "HEARTBEAT_INTERVAL_SECS",
                value: heartbeat_interval.as_secs().to_string(),
                reason: format!(
                    "must be at most half of ACK_TIMEOUT_SECS ({})",
                    ack_timeout.as_secs()
                ),
            });
        }

        Ok(Self {
            database_url: env
                .get("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            engine_program: env
                .get("RENDER_ENGINE_BIN")
                .unwrap_or_else(|| DEFAULT_ENGINE_BIN.into()),
            engine_args: env
                .get("RENDER_ENGINE_ARGS")
                .map(|args| args.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            default_quality,
            render_timeout: env.positive_secs("RENDER_TIMEOUT_SECS", DEFAULT_RENDER_TIMEOUT)?,
            max_memory_bytes: env
                .optional::<u64>("RENDER_MAX_MEMORY_MB")?
                .map(|mb| mb.saturating_mul(1024 * 1024)),
            pool_size,
            retry: RetryPolicy {
                max_attempts,
                backoff,
            },
            heartbeat_interval,
            ack_timeout,
            health_interval: env.positive_secs("HEALTH_INTERVAL_SECS", DEFAULT_HEALTH_INTERVAL)?,
            cleanup_interval: env
                .positive_secs("CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL)?,
            cleanup_max_age: Duration::from_secs(max_age_hours.saturating_mul(3600)),
            script_retention,
            thumbnail_program,
            scripts_dir: absolutize(env.path("SCRIPTS_DIR", DEFAULT_SCRIPTS_DIR)),
            output_dir: absolutize(env.path("OUTPUT_DIR", DEFAULT_OUTPUT_DIR)),
            template_dir: env.get("TEMPLATE_DIR").map(PathBuf::from),
            storage: storage_config(&env)?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(
            self.engine_program.clone(),
            self.scripts_dir.clone(),
            self.output_dir.clone(),
        );
        engine.extra_args = self.engine_args.clone();
        engine.timeout = self.render_timeout;
        engine.max_memory_bytes = self.max_memory_bytes;
        engine
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            retry: self.retry,
            default_quality: self.default_quality,
            ack_timeout: self.ack_timeout,
        }
    }
}

fn storage_config(env: &Env<'_>) -> Result<StorageConfig, ConfigError> {
    let backend = match env.get("STORAGE_BACKEND") {
        Some(name) => BackendKind::from_name(&name).ok_or_else(|| ConfigError::Invalid {
            key: "STORAGE_BACKEND",
            value: name.clone(),
            reason: "expected local, s3, or gcs".into(),
        })?,
        None => BackendKind::Local,
    };
    let url_expiry = env.positive_secs("SIGNED_URL_EXPIRY_SECS", DEFAULT_URL_EXPIRY)?;
    if url_expiry > MAX_URL_EXPIRY {
        return Err(ConfigError::Invalid {
            key: "SIGNED_URL_EXPIRY_SECS",
            value: url_expiry.as_secs().to_string(),
            reason: format!("presigned URLs last at most {}s", MAX_URL_EXPIRY.as_secs()),
        });
    }

    Ok(match backend {
        BackendKind::Local => StorageConfig::Local {
            root: env.path("LOCAL_STORAGE_ROOT", DEFAULT_LOCAL_STORAGE_ROOT),
        },
        BackendKind::S3 => StorageConfig::S3 {
            bucket: env.required("S3_BUCKET")?,
            region: env.get("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            endpoint: env.get("S3_ENDPOINT"),
            access_key_id: env.get("S3_ACCESS_KEY_ID"),
            secret_access_key: env.get("S3_SECRET_ACCESS_KEY"),
            url_expiry,
        },
        BackendKind::Gcs => StorageConfig::Gcs {
            bucket: env.required("GCS_BUCKET")?,
            hmac_access_id: env.required("GCS_HMAC_ACCESS_ID")?,
            hmac_secret: env.required("GCS_HMAC_SECRET")?,
            url_expiry,
        },
    })
}

/// The engine runs inside the scripts dir, so paths handed to it must not
/// be relative to the worker's own working directory.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Typed access over a variable lookup.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing { key })
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.get(key).unwrap_or_else(|| default.into()))
    }

    fn optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional::<u64>(key)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    /// Like [`Env::secs`] but rejects zero.
    fn positive_secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let value = self.secs(key, default)?;
        if value.is_zero() {
            return Err(ConfigError::Invalid {
                key,
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                key,
                value: other.into(),
                reason: "expected a boolean".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
