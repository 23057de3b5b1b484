#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use botgate_domain::OpenId;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::message::{MediaHandle, MediaUpload, MessageToCreate, SentMessage, UrlLinkRequest, UrlLinkResponse};
use crate::{PlatformClient, PlatformError, SecretString};

pub const DEFAULT_BASE_URL: &str = "https://api.sgroup.qq.com";
pub const GENERATE_URL_LINK_PATH: &str = "/v2/generate_url_link";

#[derive(Debug, Clone)]
pub struct OpenApiConfig {
	pub base_url: String,
	pub app_id: u64,
	pub access_token: SecretString,
	pub timeout: Duration,
}

impl Default for OpenApiConfig {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.to_string(),
			app_id: 0,
			access_token: SecretString::default(),
			timeout: Duration::from_secs(30),
		}
	}
}

/// Platform error body.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
	#[serde(default)]
	code: i64,
	#[serde(default, alias = "msg")]
	message: String,
}

/// Open-API HTTP client.
#[derive(Debug, Clone)]
pub struct OpenApiClient {
	cfg: OpenApiConfig,
	http: reqwest::Client,
}

impl OpenApiClient {
	pub fn new(cfg: OpenApiConfig) -> Result<Self, PlatformError> {
		let http = reqwest::Client::builder()
			.timeout(cfg.timeout)
			.build()
			.map_err(|e| PlatformError::Transport(e.to_string()))?;
		Ok(Self { cfg, http })
	}

	pub fn app_id(&self) -> u64 {
		self.cfg.app_id
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
	}

	fn auth_header(&self) -> Result<String, PlatformError> {
		if self.cfg.access_token.is_empty() {
			return Err(PlatformError::MissingToken);
		}
		Ok(format!("QQBot {}", self.cfg.access_token.expose().trim()))
	}

	async fn post_json<B, T>(&self, path: &str, body: &B, label: &'static str) -> Result<T, PlatformError>
	where
		B: serde::Serialize + ?Sized + Sync,
		T: DeserializeOwned,
	{
		let resp = self
			.http
			.post(self.url(path))
			.header("Authorization", self.auth_header()?)
			.header("X-Union-Appid", self.cfg.app_id.to_string())
			.json(body)
			.send()
			.await
			.map_err(map_reqwest_error)?;

		let status = resp.status();
		let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
		metrics::counter!("botgate_openapi_requests_total").increment(1);

		if !status.is_success() {
			metrics::counter!("botgate_openapi_errors_total").increment(1);
			debug!(%status, label, "open api call failed");
			return Err(error_from_body(status.as_u16(), &bytes));
		}

		serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(format!("{label}: {e}")))
	}
}

fn map_reqwest_error(e: reqwest::Error) -> PlatformError {
	if e.is_timeout() {
		PlatformError::DeadlineExceeded
	} else {
		PlatformError::Transport(e.to_string())
	}
}

/// Build the error for a non-success response body.
pub(crate) fn error_from_body(status: u16, body: &[u8]) -> PlatformError {
	match serde_json::from_slice::<ApiErrorBody>(body) {
		Ok(err) if err.code != 0 || !err.message.is_empty() => PlatformError::Api {
			code: err.code,
			message: err.message,
		},
		_ => PlatformError::Http {
			status,
			body: String::from_utf8_lossy(body).chars().take(512).collect(),
		},
	}
}

#[async_trait]
impl PlatformClient for OpenApiClient {
	async fn upload_media(&self, user: &OpenId, media: &MediaUpload) -> Result<MediaHandle, PlatformError> {
		let path = format!("/v2/users/{}/files", user.as_str());
		self.post_json(&path, media, "POST /v2/users/{openid}/files").await
	}

	async fn post_c2c_message(&self, user: &OpenId, message: &MessageToCreate) -> Result<SentMessage, PlatformError> {
		let path = format!("/v2/users/{}/messages", user.as_str());
		self.post_json(&path, message, "POST /v2/users/{openid}/messages").await
	}

	async fn generate_url_link(&self, callback_data: &str) -> Result<String, PlatformError> {
		let resp: UrlLinkResponse = self
			.post_json(
				GENERATE_URL_LINK_PATH,
				&UrlLinkRequest { callback_data },
				"POST /v2/generate_url_link",
			)
			.await?;
		if resp.url.is_empty() {
			return Err(PlatformError::Decode("share link response without url".to_string()));
		}
		Ok(resp.url)
	}
}
