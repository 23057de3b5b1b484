#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `msg_type` values of the open-API message body.
pub mod msg_type {
	pub const TEXT: u8 = 0;
	pub const MARKDOWN: u8 = 2;
	pub const ARK: u8 = 3;
	pub const MEDIA: u8 = 7;
}

/// `file_type` values of the rich-media upload body.
pub mod file_type {
	pub const IMAGE: u8 = 1;
	pub const VIDEO: u8 = 2;
	pub const VOICE: u8 = 3;
}

/// Ark template used for music share cards.
pub const MUSIC_ARK_TEMPLATE_ID: u32 = 37;

/// How an outbound message relates to earlier traffic.
///
/// A reply carries the originating message/event ids; a wakeup carries
/// neither and sets `is_wakeup`. One message is never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
	Reply {
		msg_id: Option<String>,
		event_id: Option<String>,
	},
	Wakeup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Media {
	pub file_info: String,
}

/// Open-API message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageToCreate {
	pub content: String,
	pub msg_type: u8,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub markdown: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ark: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub media: Option<Media>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub msg_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub event_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub msg_seq: Option<u32>,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub is_wakeup: bool,
}

impl MessageToCreate {
	pub fn text(content: impl Into<String>, target: ReplyTarget) -> Self {
		Self {
			content: content.into(),
			msg_type: msg_type::TEXT,
			..Self::default()
		}
		.with_target(target)
	}

	/// Media message. `content` may be empty; the platform wants at least a blank.
	pub fn media(content: impl Into<String>, file_info: impl Into<String>, target: ReplyTarget) -> Self {
		let content = content.into();
		Self {
			content: if content.is_empty() { " ".to_string() } else { content },
			msg_type: msg_type::MEDIA,
			media: Some(Media {
				file_info: file_info.into(),
			}),
			..Self::default()
		}
		.with_target(target)
	}

	pub fn markdown(content: impl Into<String>, target: ReplyTarget) -> Self {
		Self {
			msg_type: msg_type::MARKDOWN,
			markdown: Some(serde_json::json!({ "content": content.into() })),
			..Self::default()
		}
		.with_target(target)
	}

	/// Music share card for a song id.
	pub fn music(song_id: &str, target: ReplyTarget) -> Self {
		let url = format!("https://y.qq.com/n/ryqq/songDetail/{song_id}");
		Self {
			msg_type: msg_type::ARK,
			ark: Some(serde_json::json!({
				"template_id": MUSIC_ARK_TEMPLATE_ID,
				"kv": [
					{ "key": "#PROMPT#", "value": "[music]" },
					{ "key": "#METATITLE#", "value": song_id },
					{ "key": "#METAURL#", "value": url },
				],
			})),
			..Self::default()
		}
		.with_target(target)
	}

	/// Apply the reply/wakeup mode, replacing whatever mode was set before.
	pub fn with_target(mut self, target: ReplyTarget) -> Self {
		match target {
			ReplyTarget::Reply { msg_id, event_id } => {
				self.msg_id = msg_id.filter(|s| !s.is_empty());
				self.event_id = event_id.filter(|s| !s.is_empty());
				self.is_wakeup = false;
			}
			ReplyTarget::Wakeup => {
				self.msg_id = None;
				self.event_id = None;
				self.is_wakeup = true;
			}
		}
		self
	}

	pub fn with_seq(mut self, seq: u32) -> Self {
		self.msg_seq = Some(seq);
		self
	}
}

/// Rich-media upload body. Exactly one of `url` / `file_data` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaUpload {
	pub file_type: u8,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	/// Base64 payload.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_data: Option<String>,
	pub srv_send_msg: bool,
}

impl MediaUpload {
	pub fn from_url(file_type: u8, url: impl Into<String>) -> Self {
		Self {
			file_type,
			url: Some(url.into()),
			file_data: None,
			srv_send_msg: false,
		}
	}

	pub fn from_base64(file_type: u8, data: impl Into<String>) -> Self {
		Self {
			file_type,
			url: None,
			file_data: Some(data.into()),
			srv_send_msg: false,
		}
	}
}

/// Upload response; `file_info` is what a media message references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MediaHandle {
	#[serde(default)]
	pub file_uuid: String,
	#[serde(default)]
	pub file_info: String,
	#[serde(default)]
	pub ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SentMessage {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub timestamp: Option<Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UrlLinkRequest<'a> {
	#[serde(rename = "callbackData")]
	pub callback_data: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UrlLinkResponse {
	#[serde(default)]
	pub url: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wakeup_clears_reply_ids() {
		let msg = MessageToCreate::text(
			"hi",
			ReplyTarget::Reply {
				msg_id: Some("m1".into()),
				event_id: Some("e1".into()),
			},
		)
		.with_target(ReplyTarget::Wakeup);

		assert!(msg.is_wakeup);
		assert_eq!(msg.msg_id, None);
		assert_eq!(msg.event_id, None);

		let json = serde_json::to_value(&msg).unwrap();
		assert_eq!(json["is_wakeup"], true);
		assert!(json.get("msg_id").is_none());
		assert!(json.get("event_id").is_none());
	}

	#[test]
	fn reply_never_sets_wakeup() {
		let msg = MessageToCreate::text("hi", ReplyTarget::Wakeup).with_target(ReplyTarget::Reply {
			msg_id: Some("m1".into()),
			event_id: None,
		});
		assert!(!msg.is_wakeup);
		assert_eq!(msg.msg_id.as_deref(), Some("m1"));

		let json = serde_json::to_value(&msg).unwrap();
		assert!(json.get("is_wakeup").is_none());
	}

	#[test]
	fn media_message_shape() {
		let msg = MessageToCreate::media("", "INFO", ReplyTarget::Wakeup);
		let json = serde_json::to_value(&msg).unwrap();
		assert_eq!(json["msg_type"], 7);
		assert_eq!(json["content"], " ");
		assert_eq!(json["media"]["file_info"], "INFO");
	}

	#[test]
	fn upload_body_carries_one_source() {
		let json = serde_json::to_value(MediaUpload::from_base64(file_type::VOICE, "AAAA")).unwrap();
		assert_eq!(json["file_type"], 3);
		assert_eq!(json["file_data"], "AAAA");
		assert!(json.get("url").is_none());
		assert_eq!(json["srv_send_msg"], false);
	}
}
