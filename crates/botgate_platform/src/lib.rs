#![forbid(unsafe_code)]

//! Upstream bot platform surface: inbound dispatch parsing, outbound open-API
//! DTOs and the HTTP client that talks to the platform.

pub mod client;
pub mod event;
pub mod message;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use botgate_domain::OpenId;
use thiserror::Error;

pub use client::{OpenApiClient, OpenApiConfig};
pub use event::{
	C2cSwitch, Dispatch, EventParseError, FriendAdd, FriendDel, Frame, GroupSwitch, InboundEvent, parse_frame,
};
pub use message::{MediaHandle, MediaUpload, MessageToCreate, ReplyTarget, SentMessage, file_type, msg_type};

/// Error text the platform returns when a rich-media upload times out on its side.
pub const MEDIA_UPLOAD_TIMEOUT_MSG: &str = "富媒体文件上传超时";

const DEADLINE_EXCEEDED_MSG: &str = "context deadline exceeded";

/// Open-API call failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
	/// The request did not complete before the client deadline.
	#[error("context deadline exceeded")]
	DeadlineExceeded,

	/// The platform answered with a business error body.
	#[error("api error code={code}: {message}")]
	Api { code: i64, message: String },

	/// Non-success status without a recognizable error body.
	#[error("http status {status}: {body}")]
	Http { status: u16, body: String },

	#[error("transport: {0}")]
	Transport(String),

	#[error("decode response: {0}")]
	Decode(String),

	#[error("missing access token")]
	MissingToken,
}

impl PlatformError {
	/// Transient failures are worth retrying; everything else is terminal.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::DeadlineExceeded => true,
			Self::MissingToken => false,
			other => {
				let msg = other.to_string();
				msg.contains(DEADLINE_EXCEEDED_MSG) || msg.contains(MEDIA_UPLOAD_TIMEOUT_MSG)
			}
		}
	}
}

/// The platform operations the gateway needs for outbound delivery.
#[async_trait]
pub trait PlatformClient: Send + Sync + 'static {
	/// Upload a rich-media object for a C2C conversation.
	async fn upload_media(&self, user: &OpenId, media: &MediaUpload) -> Result<MediaHandle, PlatformError>;

	/// Post a message into a C2C conversation.
	async fn post_c2c_message(&self, user: &OpenId, message: &MessageToCreate) -> Result<SentMessage, PlatformError>;

	/// Ask the platform for a share link that carries `callback_data`.
	async fn generate_url_link(&self, callback_data: &str) -> Result<String, PlatformError>;
}

/// Read access to the latest upstream session sequence.
pub trait SessionSequence: Send + Sync {
	fn current(&self) -> u64;
}

/// Tracks the highest dispatch sequence seen on the upstream session.
#[derive(Debug, Default)]
pub struct SessionTracker {
	seq: AtomicU64,
}

impl SessionTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a dispatch sequence. Older sequences never move the tracker back.
	pub fn observe(&self, seq: u64) {
		self.seq.fetch_max(seq, Ordering::Relaxed);
	}
}

impl SessionSequence for SessionTracker {
	fn current(&self) -> u64 {
		self.seq.load(Ordering::Relaxed)
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}
