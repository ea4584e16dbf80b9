// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, TOML files and environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use loom_ff_core::BucketStrategy;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::RuntimeConfigLayer;
use crate::sections::{
	AuditConfigLayer, BucketConfigLayer, GuardConfigLayer, KillConfigLayer, LockConfigLayer,
	LoggingConfigLayer, MetricsConfigLayer, MetricsProvider, StoreAdapter, StoreConfigLayer,
	TelemetryConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<RuntimeConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<RuntimeConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(RuntimeConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/ff.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<RuntimeConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(RuntimeConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: RuntimeConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Reads the process environment unless built with [`EnvSource::from_vars`].
#[derive(Default)]
pub struct EnvSource {
	vars: Option<HashMap<String, String>>,
}

impl EnvSource {
	pub fn process() -> Self {
		Self { vars: None }
	}

	pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars
					.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.vars {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.trim().is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name).map(|v| {
			let v = v.trim();
			v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("on") || v == "1"
		})
	}

	fn path(&self, name: &str) -> Option<PathBuf> {
		self.var(name).map(PathBuf::from)
	}

	fn parsed<T: FromStr>(&self, name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid {kind} value '{v}'"),
			}),
			None => Ok(None),
		}
	}

	fn u32(&self, name: &str) -> Result<Option<u32>, ConfigError> {
		self.parsed(name, "u32")
	}

	fn u64(&self, name: &str) -> Result<Option<u64>, ConfigError> {
		self.parsed(name, "u64")
	}

	fn i64(&self, name: &str) -> Result<Option<i64>, ConfigError> {
		self.parsed(name, "i64")
	}

	fn usize(&self, name: &str) -> Result<Option<usize>, ConfigError> {
		self.parsed(name, "usize")
	}

	fn store(&self) -> Result<StoreConfigLayer, ConfigError> {
		let adapter = match self.var("FF_STORE_ADAPTER") {
			Some(v) => Some(StoreAdapter::from_str(&v).map_err(|message| {
				ConfigError::InvalidValue {
					key: "FF_STORE_ADAPTER".to_string(),
					message,
				}
			})?),
			None => None,
		};
		Ok(StoreConfigLayer {
			adapter,
			file: self.path("FF_STORE_FILE"),
			tmp_dir: self.path("FF_STORE_TMP"),
			cache_ttl_ms: self.u64("FF_STORE_CACHE_TTL_MS")?,
			redis_url: self.var("FF_REDIS_URL").or_else(|| self.var("REDIS_URL")),
		})
	}

	fn bucket(&self) -> Result<BucketConfigLayer, ConfigError> {
		let strategy = match self.var("FF_BUCKET_STRATEGY") {
			Some(v) => Some(BucketStrategy::from_str(&v).map_err(|e| {
				ConfigError::InvalidValue {
					key: "FF_BUCKET_STRATEGY".to_string(),
					message: e.to_string(),
				}
			})?),
			None => None,
		};
		Ok(BucketConfigLayer {
			strategy,
			cache_size: self.usize("FF_BUCKET_CACHE_SIZE")?,
		})
	}

	fn lock(&self) -> Result<LockConfigLayer, ConfigError> {
		Ok(LockConfigLayer {
			dir: self.path("FF_STORE_LOCK_DIR"),
			file_ttl_ms: self.u64("FF_STORE_LOCK_TTL_MS")?,
			file_retry_ms: self.u64("FF_STORE_LOCK_RETRY_MS")?,
			redis_ttl_ms: self.u64("ROLLOUT_LOCK_TTL_MS")?,
			redis_retry_ms: self.u64("ROLLOUT_LOCK_RETRY_MS")?,
			timeout_ms: self.u64("FF_LOCK_TIMEOUT_MS")?,
		})
	}

	fn telemetry(&self) -> Result<TelemetryConfigLayer, ConfigError> {
		Ok(TelemetryConfigLayer {
			sink: self.var("FF_TELEMETRY_SINK"),
			ring: self.usize("FF_TELEMETRY_RING")?,
			file: self.path("TELEMETRY_FILE"),
		})
	}

	fn metrics(&self) -> Result<MetricsConfigLayer, ConfigError> {
		Ok(MetricsConfigLayer {
			provider: self.var("METRICS_PROVIDER").map(MetricsProvider::from),
			vitals_file: self.path("METRICS_VITALS_FILE"),
			errors_file: self.path("METRICS_ERRORS_FILE"),
			window_ms: self.u64("METRICS_WINDOW_MS")?,
			cache_ttl_ms: self.u64("METRICS_CACHE_TTL_MS")?,
			max_chunk_days: self.u32("METRICS_MAX_CHUNK_DAYS")?,
			max_chunk_count: self.usize("METRICS_MAX_CHUNK_COUNT")?,
			min_samples: self.u64("METRICS_MIN_SAMPLES")?,
			erasure_file: self.path("PRIVACY_ERASURE_FILE"),
		})
	}

	fn guard(&self) -> Result<GuardConfigLayer, ConfigError> {
		let admin_override_rpm = self.i64("ADMIN_RATE_LIMIT_OVERRIDE_RPM")?;
		let override_rpm = match admin_override_rpm {
			Some(rpm) => Some(rpm),
			None => self.i64("FF_OVERRIDE_RPM")?,
		};
		Ok(GuardConfigLayer {
			override_rpm,
			tester_token: self.var("FF_TESTER_TOKEN"),
			environment: self.var("FF_ENV"),
			allow_dotted_overrides: self.bool("FF_ALLOW_DOTTED_OVERRIDES"),
			admin_override_rpm,
			admin_rollout_step_rpm: self.i64("ADMIN_RATE_LIMIT_ROLLOUT_STEP_RPM")?,
			admin_kill_rpm: self.i64("ADMIN_RATE_LIMIT_KILL_RPM")?,
			admin_telemetry_export_rpm: self.i64("ADMIN_RATE_LIMIT_TELEMETRY_EXPORT_RPM")?,
		})
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<RuntimeConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(RuntimeConfigLayer {
			store: Some(self.store()?),
			bucket: Some(self.bucket()?),
			kill: Some(KillConfigLayer {
				all: self.bool("FF_KILL_ALL"),
			}),
			lock: Some(self.lock()?),
			telemetry: Some(self.telemetry()?),
			audit: Some(AuditConfigLayer {
				file: self.path("FF_AUDIT_FILE"),
			}),
			metrics: Some(self.metrics()?),
			guard: Some(self.guard()?),
			logging: Some(LoggingConfigLayer {
				level: self.var("FF_LOG_LEVEL"),
			}),
		})
	}
}
