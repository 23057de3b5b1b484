#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use botgate_domain::SelfIdSource;
use botgate_identity::IdMapConfig;
use botgate_platform::{OpenApiConfig, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::delivery::{DeliverySettings, RetryPolicy};
use crate::server::normalize::{NormalizeSettings, SwitchTemplates};

/// Default config path: `~/.botgate/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".botgate").join("config.toml"))
}

/// Load the server config from TOML and env overrides, then validate it.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	cfg.validate()?;
	Ok(cfg)
}

/// Gateway config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub platform: PlatformSettings,
	pub server: ServerSettings,
	pub idmap: IdMapConfig,
	pub events: EventSettings,
	pub delivery: DeliveryFileSettings,
}

/// Platform application credentials.
#[derive(Debug, Clone, Default)]
pub struct PlatformSettings {
	pub app_id: u64,
	pub access_token: SecretString,
	/// OpenAPI base URL override.
	pub api_base_url: Option<String>,
	pub request_timeout: Option<Duration>,
}

/// Listener settings.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Token downstream clients must present at handshake.
	pub access_token: Option<SecretString>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Platform webhook bind address (host:port). Ingest is off without it.
	pub webhook_bind: Option<String>,
	pub webhook_path: String,
}

/// How inbound events are rendered for downstream clients.
#[derive(Debug, Clone, Default)]
pub struct EventSettings {
	pub as_messages: bool,
	pub native_ob11: bool,
	pub array: bool,
	pub two_way_echo: bool,
	/// Report `uin` as `self_id` instead of the app id.
	pub use_uin: bool,
	pub uin: i64,
	pub templates: SwitchTemplates,
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryFileSettings {
	pub save_error: bool,
	pub error_log_path: Option<PathBuf>,
	pub retry: RetryPolicy,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = SwitchTemplates::default();
		let template = |v: Option<String>, fallback: String| v.filter(|s| !s.trim().is_empty()).unwrap_or(fallback);

		let retry_defaults = RetryPolicy::default();

		Self {
			platform: PlatformSettings {
				app_id: file.platform.app_id.unwrap_or(0),
				access_token: SecretString::new(file.platform.access_token.unwrap_or_default()),
				api_base_url: file.platform.api_base_url.filter(|s| !s.trim().is_empty()),
				request_timeout: file.platform.request_timeout_ms.map(Duration::from_millis),
			},
			server: ServerSettings {
				access_token: file
					.server
					.access_token
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				webhook_bind: file.server.webhook_bind.filter(|s| !s.trim().is_empty()),
				webhook_path: file
					.server
					.webhook_path
					.filter(|s| s.starts_with('/'))
					.unwrap_or_else(|| "/webhook".to_string()),
			},
			idmap: IdMapConfig {
				hash_ids: file.idmap.hash_ids.unwrap_or(false),
				pro: file.idmap.pro.unwrap_or(false),
			},
			events: EventSettings {
				as_messages: file.events.as_messages.unwrap_or(false),
				native_ob11: file.events.native_ob11.unwrap_or(false),
				array: file.events.array.unwrap_or(false),
				two_way_echo: file.events.two_way_echo.unwrap_or(false),
				use_uin: file.events.use_uin.unwrap_or(false),
				uin: file.events.uin.unwrap_or(0),
				templates: SwitchTemplates {
					c2c_msg_reject: template(file.events.c2c_msg_reject, defaults.c2c_msg_reject),
					c2c_msg_receive: template(file.events.c2c_msg_receive, defaults.c2c_msg_receive),
					group_msg_reject: template(file.events.group_msg_reject, defaults.group_msg_reject),
					group_msg_receive: template(file.events.group_msg_receive, defaults.group_msg_receive),
				},
			},
			delivery: DeliveryFileSettings {
				save_error: file.delivery.save_error.unwrap_or(false),
				error_log_path: file
					.delivery
					.error_log_path
					.filter(|s| !s.trim().is_empty())
					.map(PathBuf::from),
				retry: RetryPolicy {
					max_attempts: file
						.delivery
						.max_attempts
						.filter(|n| *n > 0)
						.unwrap_or(retry_defaults.max_attempts),
					backoff: file
						.delivery
						.retry_backoff_ms
						.map(Duration::from_millis)
						.unwrap_or(retry_defaults.backoff),
				},
			},
		}
	}

	/// Reject settings the gateway cannot run with.
	pub fn validate(&self) -> anyhow::Result<()> {
		self.idmap.validate().context("invalid [idmap] settings")?;
		if self.events.use_uin && self.events.uin <= 0 {
			return Err(anyhow!("events.use_uin is set but events.uin is not a positive number"));
		}
		Ok(())
	}

	pub fn self_id(&self) -> SelfIdSource {
		if self.events.use_uin {
			SelfIdSource::Uin(self.events.uin)
		} else {
			SelfIdSource::AppId(self.platform.app_id)
		}
	}

	pub fn normalize_settings(&self) -> NormalizeSettings {
		NormalizeSettings {
			app_id: self.platform.app_id,
			self_id: self.self_id(),
			events_as_messages: self.events.as_messages,
			native_ob11: self.events.native_ob11,
			array: self.events.array,
			two_way_echo: self.events.two_way_echo,
			templates: self.events.templates.clone(),
		}
	}

	pub fn delivery_settings(&self) -> DeliverySettings {
		DeliverySettings {
			self_id: self.self_id().resolve(),
			retry: self.delivery.retry,
			save_error: self.delivery.save_error,
		}
	}

	pub fn open_api_config(&self) -> OpenApiConfig {
		let defaults = OpenApiConfig::default();
		OpenApiConfig {
			base_url: self.platform.api_base_url.clone().unwrap_or(defaults.base_url),
			app_id: self.platform.app_id,
			access_token: self.platform.access_token.clone(),
			timeout: self.platform.request_timeout.unwrap_or(defaults.timeout),
		}
	}

	/// Diagnostic log location; `~/.botgate/errors.jsonl` unless configured.
	pub fn error_log_path(&self) -> anyhow::Result<PathBuf> {
		if let Some(path) = self.delivery.error_log_path.clone() {
			return Ok(path);
		}
		let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
		Ok(home.join(".botgate").join("errors.jsonl"))
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	platform: FilePlatformSettings,

	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	idmap: FileIdMapSettings,

	#[serde(default)]
	events: FileEventSettings,

	#[serde(default)]
	delivery: FileDeliverySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePlatformSettings {
	app_id: Option<u64>,
	access_token: Option<String>,
	api_base_url: Option<String>,
	request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	access_token: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	webhook_bind: Option<String>,
	webhook_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileIdMapSettings {
	hash_ids: Option<bool>,
	pro: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileEventSettings {
	as_messages: Option<bool>,
	native_ob11: Option<bool>,
	array: Option<bool>,
	two_way_echo: Option<bool>,
	use_uin: Option<bool>,
	uin: Option<i64>,
	c2c_msg_reject: Option<String>,
	c2c_msg_receive: Option<String>,
	group_msg_reject: Option<String>,
	group_msg_receive: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDeliverySettings {
	save_error: Option<bool>,
	error_log_path: Option<String>,
	max_attempts: Option<u32>,
	retry_backoff_ms: Option<u64>,
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn env_string(name: &str) -> Option<String> {
	std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	std::env::var(name).ok().and_then(|v| parse_env_bool(&v))
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = env_string("BOTGATE_APP_ID") {
		match v.parse::<u64>() {
			Ok(app_id) => {
				cfg.platform.app_id = app_id;
				info!(app_id, "platform config: app_id overridden by env");
			}
			Err(e) => warn!(error = %e, "platform config: BOTGATE_APP_ID is not a number; ignored"),
		}
	}

	if let Some(v) = env_string("BOTGATE_ACCESS_TOKEN") {
		cfg.platform.access_token = SecretString::new(v);
		info!("platform config: access_token overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_API_BASE_URL") {
		cfg.platform.api_base_url = Some(v);
		info!("platform config: api_base_url overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_WS_ACCESS_TOKEN") {
		cfg.server.access_token = Some(SecretString::new(v));
		info!("server auth: access_token overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_WEBHOOK_BIND") {
		cfg.server.webhook_bind = Some(v);
		info!("server config: webhook_bind overridden by env");
	}

	if let Some(hash_ids) = env_bool("BOTGATE_HASH_IDS") {
		cfg.idmap.hash_ids = hash_ids;
		info!(hash_ids, "idmap config: hash_ids overridden by env");
	}

	if let Some(pro) = env_bool("BOTGATE_IDMAP_PRO") {
		cfg.idmap.pro = pro;
		info!(pro, "idmap config: pro overridden by env");
	}

	if let Some(enabled) = env_bool("BOTGATE_EVENTS_AS_MESSAGES") {
		cfg.events.as_messages = enabled;
		info!(enabled, "events config: as_messages overridden by env");
	}

	if let Some(enabled) = env_bool("BOTGATE_NATIVE_OB11") {
		cfg.events.native_ob11 = enabled;
		info!(enabled, "events config: native_ob11 overridden by env");
	}

	if let Some(enabled) = env_bool("BOTGATE_ARRAY") {
		cfg.events.array = enabled;
		info!(enabled, "events config: array overridden by env");
	}

	if let Some(enabled) = env_bool("BOTGATE_TWO_WAY_ECHO") {
		cfg.events.two_way_echo = enabled;
		info!(enabled, "events config: two_way_echo overridden by env");
	}

	if let Some(enabled) = env_bool("BOTGATE_SAVE_ERROR") {
		cfg.delivery.save_error = enabled;
		info!(enabled, "delivery config: save_error overridden by env");
	}

	if let Some(v) = env_string("BOTGATE_RETRY_BACKOFF_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.delivery.retry.backoff = Duration::from_millis(ms);
		info!(ms, "delivery config: retry_backoff overridden by env");
	}

	if cfg.platform.access_token.is_empty() {
		warn!("platform config: no access_token configured; outbound sends will fail");
	}
	if cfg.platform.app_id == 0 {
		warn!("platform config: app_id is 0");
	}
}
