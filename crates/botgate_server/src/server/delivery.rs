#![forbid(unsafe_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use botgate_domain::OpenId;
use botgate_identity::UnionCache;
use botgate_platform::{MediaHandle, MediaUpload, MessageToCreate, PlatformClient, PlatformError, ReplyTarget, file_type};
use botgate_protocol::{MediaItem, ParsedContent, SendResultNotice};
use botgate_util::markup::rewrite_at_user_ids;
use tracing::{debug, info, warn};

use crate::server::error_log::{AttemptRecord, ErrorLog};
use crate::util::time::{unix_ms_now, unix_now};

/// Bounded retry for transient platform failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			backoff: Duration::from_secs(3),
		}
	}
}

/// Immutable delivery settings, built once from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
	pub self_id: i64,
	pub retry: RetryPolicy,
	/// Write every send attempt to the diagnostic log.
	pub save_error: bool,
}

impl Default for DeliverySettings {
	fn default() -> Self {
		Self {
			self_id: 0,
			retry: RetryPolicy::default(),
			save_error: false,
		}
	}
}

/// One proactive (wakeup) send to a C2C user.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
	pub target: OpenId,
	pub content: ParsedContent,
}

/// What one send unit carries.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendUnit {
	/// One image plus the message text in a single media message.
	Combined { text: String, image: MediaItem },
	Text(String),
	Item(MediaItem),
}

/// Split content into independent send units.
fn plan(content: ParsedContent) -> Vec<SendUnit> {
	let combined = content.is_single_image_with_text();
	let ParsedContent { text, mut items, .. } = content;
	let mut units = Vec::with_capacity(items.len() + 1);
	let mut text = text.trim().to_string();

	if combined && let Some(idx) = items.iter().position(MediaItem::is_image)
	{
		let image = items.remove(idx);
		units.push(SendUnit::Combined {
			text: std::mem::take(&mut text),
			image,
		});
	}

	if !text.is_empty() {
		units.push(SendUnit::Text(text));
	}
	units.extend(items.into_iter().map(SendUnit::Item));
	units
}

/// Sends wakeup messages with bounded retry and reports one result per unit.
pub struct DeliveryPipeline {
	client: Arc<dyn PlatformClient>,
	settings: Arc<DeliverySettings>,
	unions: Arc<UnionCache>,
	error_log: Option<Arc<ErrorLog>>,
}

impl DeliveryPipeline {
	pub fn new(
		client: Arc<dyn PlatformClient>,
		settings: Arc<DeliverySettings>,
		unions: Arc<UnionCache>,
		error_log: Option<Arc<ErrorLog>>,
	) -> Self {
		Self {
			client,
			settings,
			unions,
			error_log,
		}
	}

	/// Deliver every unit of `req`. A failing unit never stops the others.
	pub async fn deliver(&self, req: DeliveryRequest) -> Vec<SendResultNotice> {
		let target = req.target;
		let units = plan(req.content);
		debug!(target = %target, units = units.len(), "delivery planned");

		let mut results = Vec::with_capacity(units.len());
		for unit in units {
			let outcome = self.send_unit(&target, unit).await;
			results.push(self.result_notice(&target, outcome));
		}
		results
	}

	fn result_notice(&self, target: &OpenId, outcome: Result<String, PlatformError>) -> SendResultNotice {
		let self_id = self.settings.self_id;
		match outcome {
			Ok(message_id) => {
				metrics::counter!("botgate_delivery_success_total").increment(1);
				info!(target = %target, %message_id, "wakeup message sent");
				SendResultNotice::success(target.as_str(), message_id, self_id, unix_now())
			}
			Err(e) => {
				metrics::counter!("botgate_delivery_failed_total").increment(1);
				warn!(target = %target, error = %e, "wakeup message failed");
				SendResultNotice::failed(target.as_str(), e.to_string(), self_id, unix_now())
			}
		}
	}

	async fn send_unit(&self, target: &OpenId, unit: SendUnit) -> Result<String, PlatformError> {
		let message = match unit {
			SendUnit::Combined { text, image } => {
				let handle = self.upload(target, &image).await?;
				MessageToCreate::media(text, handle.file_info, ReplyTarget::Wakeup)
			}
			SendUnit::Text(text) => MessageToCreate::text(text, ReplyTarget::Wakeup),
			SendUnit::Item(MediaItem::Markdown(markup)) => {
				let rewritten = rewrite_at_user_ids(&markup, self.unions.as_ref());
				MessageToCreate::markdown(rewritten.into_owned(), ReplyTarget::Wakeup)
			}
			SendUnit::Item(MediaItem::QqMusic(song_id)) => MessageToCreate::music(&song_id, ReplyTarget::Wakeup),
			SendUnit::Item(media) => {
				let handle = self.upload(target, &media).await?;
				MessageToCreate::media(" ", handle.file_info, ReplyTarget::Wakeup)
			}
		};

		let sent = self
			.with_retry(target, "post_c2c_message", || self.client.post_c2c_message(target, &message))
			.await?;
		Ok(sent.id)
	}

	async fn upload(&self, target: &OpenId, item: &MediaItem) -> Result<MediaHandle, PlatformError> {
		let upload = media_upload(item).await?;
		self.with_retry(target, "upload_media", || self.client.upload_media(target, &upload))
			.await
	}

	/// Run `call` until it succeeds, fails terminally, or runs out of attempts.
	pub(crate) async fn with_retry<T, F, Fut>(
		&self,
		target: &OpenId,
		op: &'static str,
		mut call: F,
	) -> Result<T, PlatformError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, PlatformError>>,
	{
		let policy = self.settings.retry;
		let max_attempts = policy.max_attempts.max(1);
		let mut attempt = 1;

		loop {
			let result = call().await;
			self.record_attempt(target, op, attempt, result.as_ref().err()).await;

			match result {
				Ok(v) => return Ok(v),
				Err(e) if e.is_transient() && attempt < max_attempts => {
					metrics::counter!("botgate_delivery_retries_total").increment(1);
					warn!(
						target = %target,
						op,
						attempt,
						max_attempts,
						error = %e,
						"transient platform error; retrying"
					);
					tokio::time::sleep(policy.backoff).await;
					attempt += 1;
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn record_attempt(&self, target: &OpenId, op: &str, attempt: u32, error: Option<&PlatformError>) {
		if !self.settings.save_error {
			return;
		}
		let Some(log) = self.error_log.as_ref() else {
			return;
		};

		let record = AttemptRecord {
			time_ms: unix_ms_now(),
			target: target.as_str(),
			op,
			attempt,
			ok: error.is_none(),
			error: error.map(ToString::to_string),
		};
		if let Err(e) = log.append(&record).await {
			warn!(path = %log.path().display(), error = %e, "failed to write delivery error log");
		}
	}
}

/// Upload body for a media item. Local files are read and sent inline.
async fn media_upload(item: &MediaItem) -> Result<MediaUpload, PlatformError> {
	Ok(match item {
		MediaItem::UrlImage(url) => MediaUpload::from_url(file_type::IMAGE, url),
		MediaItem::Base64Image(data) => MediaUpload::from_base64(file_type::IMAGE, data),
		MediaItem::LocalImage(path) => MediaUpload::from_base64(file_type::IMAGE, read_base64(path).await?),
		MediaItem::UrlRecord(url) => MediaUpload::from_url(file_type::VOICE, url),
		MediaItem::Base64Record(data) => MediaUpload::from_base64(file_type::VOICE, data),
		MediaItem::LocalRecord(path) => MediaUpload::from_base64(file_type::VOICE, read_base64(path).await?),
		MediaItem::Markdown(_) | MediaItem::QqMusic(_) => {
			return Err(PlatformError::Transport(format!("{} items are not uploaded", item.kind())));
		}
	})
}

async fn read_base64(path: &Path) -> Result<String, PlatformError> {
	let bytes = tokio::fs::read(path)
		.await
		.map_err(|e| PlatformError::Transport(format!("read {}: {e}", path.display())))?;
	Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	fn content(text: &str, items: Vec<MediaItem>) -> ParsedContent {
		ParsedContent {
			text: text.to_string(),
			items,
			skipped: Vec::new(),
		}
	}

	#[test]
	fn single_image_with_text_is_combined() {
		let image = MediaItem::UrlImage("https://x/a.png".into());
		let units = plan(content("hello", vec![image.clone(), MediaItem::QqMusic("1".into())]));
		assert_eq!(
			units,
			vec![
				SendUnit::Combined {
					text: "hello".into(),
					image
				},
				SendUnit::Item(MediaItem::QqMusic("1".into())),
			]
		);
	}

	#[test]
	fn two_images_are_sent_separately_after_text() {
		let a = MediaItem::UrlImage("a".into());
		let b = MediaItem::Base64Image("b".into());
		let units = plan(content("hi", vec![a.clone(), b.clone()]));
		assert_eq!(
			units,
			vec![SendUnit::Text("hi".into()), SendUnit::Item(a), SendUnit::Item(b)]
		);
	}

	#[test]
	fn image_without_text_is_an_item() {
		let a = MediaItem::LocalImage(PathBuf::from("/tmp/a.png"));
		assert_eq!(plan(content("  ", vec![a.clone()])), vec![SendUnit::Item(a)]);
	}

	#[test]
	fn empty_content_plans_nothing() {
		assert!(plan(content("", Vec::new())).is_empty());
	}

	#[tokio::test]
	async fn local_files_are_uploaded_inline() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("v.silk");
		tokio::fs::write(&path, b"abc").await.unwrap();

		let upload = media_upload(&MediaItem::LocalRecord(path)).await.unwrap();
		assert_eq!(upload.file_type, file_type::VOICE);
		assert_eq!(upload.file_data.as_deref(), Some("YWJj"));
		assert_eq!(upload.url, None);

		let missing = media_upload(&MediaItem::LocalImage(dir.path().join("nope.png"))).await;
		assert!(matches!(missing, Err(PlatformError::Transport(_))));
	}
}
