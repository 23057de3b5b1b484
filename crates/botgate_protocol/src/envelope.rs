#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::names;

/// Correlation token (`echo`) tying a synthesized message to later replies.
///
/// Format: `{app_id}_{session_seq}_{unix_millis}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
	pub fn new(app_id: u64, session_seq: u64, unix_millis: i64) -> Self {
		Self(format!("{app_id}_{session_seq}_{unix_millis}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CorrelationToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One message segment (`{"type": ..., "data": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
	#[serde(rename = "type")]
	pub kind: String,
	pub data: Value,
}

impl Segment {
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			kind: "text".to_string(),
			data: serde_json::json!({ "text": text.into() }),
		}
	}
}

/// `message` field: raw string or segment array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageBody {
	Text(String),
	Segments(Vec<Segment>),
}

impl MessageBody {
	/// Plain text, or a single text segment when `array` is set.
	pub fn from_text(text: &str, array: bool) -> Self {
		if array {
			Self::Segments(vec![Segment::text(text)])
		} else {
			Self::Text(text.to_string())
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sender {
	pub user_id: i64,
	pub nickname: String,
}

/// Generic notice. Event-specific fields are optional.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
	pub post_type: &'static str,
	pub notice_type: String,
	pub self_id: i64,
	pub time: i64,
	pub user_id: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_user_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub group_id: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_group_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scene: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scene_param: Option<String>,
}

impl Notice {
	pub fn new(notice_type: impl Into<String>, self_id: i64, time: i64, user_id: i64) -> Self {
		Self {
			post_type: names::POST_NOTICE,
			notice_type: notice_type.into(),
			self_id,
			time,
			user_id,
			real_user_id: None,
			group_id: None,
			real_group_id: None,
			scene: None,
			scene_param: None,
		}
	}
}

/// Friend request raised by a friend-add event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendRequest {
	pub post_type: &'static str,
	pub request_type: &'static str,
	pub self_id: i64,
	pub time: i64,
	pub user_id: i64,
	pub comment: String,
	pub flag: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_user_id: Option<String>,
}

impl FriendRequest {
	pub fn new(self_id: i64, time: i64, user_id: i64, comment: String, flag: String) -> Self {
		Self {
			post_type: names::POST_REQUEST,
			request_type: "friend",
			self_id,
			time,
			user_id,
			comment,
			flag,
			real_user_id: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivateMessage {
	pub post_type: &'static str,
	pub message_type: &'static str,
	pub sub_type: &'static str,
	pub time: i64,
	pub self_id: i64,
	pub user_id: i64,
	pub message_id: i64,
	pub message: MessageBody,
	pub raw_message: String,
	pub font: i32,
	pub sender: Sender,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub echo: Option<CorrelationToken>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_message_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_user_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_binded_user_id: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMessage {
	pub post_type: &'static str,
	pub message_type: &'static str,
	pub sub_type: &'static str,
	pub time: i64,
	pub self_id: i64,
	pub group_id: i64,
	pub user_id: i64,
	pub message_id: i64,
	pub message: MessageBody,
	pub raw_message: String,
	pub font: i32,
	pub sender: Sender,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub echo: Option<CorrelationToken>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_message_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_group_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub real_user_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_binded_group_id: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_binded_user_id: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
	Success,
	Failed,
}

/// Result of one outbound send, delivered to the requesting client only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResultNotice {
	pub post_type: &'static str,
	pub notice_type: &'static str,
	pub user_id: i64,
	pub real_user_id: String,
	pub status: SendStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_msg: Option<String>,
	pub time: i64,
	pub self_id: i64,
}

impl SendResultNotice {
	pub fn success(real_user_id: &str, message_id: String, self_id: i64, time: i64) -> Self {
		Self::build(real_user_id, SendStatus::Success, Some(message_id), None, self_id, time)
	}

	pub fn failed(real_user_id: &str, error_msg: String, self_id: i64, time: i64) -> Self {
		Self::build(real_user_id, SendStatus::Failed, None, Some(error_msg), self_id, time)
	}

	fn build(
		real_user_id: &str,
		status: SendStatus,
		message_id: Option<String>,
		error_msg: Option<String>,
		self_id: i64,
		time: i64,
	) -> Self {
		Self {
			post_type: names::POST_NOTICE,
			notice_type: names::NOTICE_SEND_RESULT,
			user_id: 0,
			real_user_id: real_user_id.to_string(),
			status,
			message_id,
			error_msg,
			time,
			self_id,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareLinkNotice {
	pub post_type: &'static str,
	pub notice_type: &'static str,
	pub url: String,
	pub callback_data: String,
	pub time: i64,
	pub self_id: i64,
}

impl ShareLinkNotice {
	pub fn new(url: String, callback_data: String, self_id: i64, time: i64) -> Self {
		Self {
			post_type: names::POST_NOTICE,
			notice_type: names::NOTICE_SHARE_LINK,
			url,
			callback_data,
			time,
			self_id,
		}
	}
}

/// Anything the gateway pushes to downstream clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
	Notice(Notice),
	Request(FriendRequest),
	PrivateMessage(Box<PrivateMessage>),
	GroupMessage(Box<GroupMessage>),
	SendResult(SendResultNotice),
	ShareLink(ShareLinkNotice),
}

impl Envelope {
	pub fn post_type(&self) -> &'static str {
		match self {
			Self::Notice(_) | Self::SendResult(_) | Self::ShareLink(_) => names::POST_NOTICE,
			Self::Request(_) => names::POST_REQUEST,
			Self::PrivateMessage(_) | Self::GroupMessage(_) => names::POST_MESSAGE,
		}
	}

	/// `notice_type` for notices, `None` for everything else.
	pub fn notice_type(&self) -> Option<&str> {
		match self {
			Self::Notice(n) => Some(&n.notice_type),
			Self::SendResult(n) => Some(n.notice_type),
			Self::ShareLink(n) => Some(n.notice_type),
			_ => None,
		}
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn correlation_token_format() {
		let t = CorrelationToken::new(102005, 17, 1_700_000_000_123);
		assert_eq!(t.as_str(), "102005_17_1700000000123");
		assert_eq!(serde_json::to_value(&t).unwrap(), "102005_17_1700000000123");
	}

	#[test]
	fn message_body_shapes() {
		assert_eq!(serde_json::to_value(MessageBody::from_text("hi", false)).unwrap(), "hi");
		assert_eq!(
			serde_json::to_value(MessageBody::from_text("hi", true)).unwrap(),
			serde_json::json!([{ "type": "text", "data": { "text": "hi" } }])
		);
	}

	#[test]
	fn notice_omits_unset_optionals() {
		let env = Envelope::Notice(Notice::new("friend_decrease", 1, 2, 3));
		let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
		assert_eq!(
			v,
			serde_json::json!({
				"post_type": "notice",
				"notice_type": "friend_decrease",
				"self_id": 1,
				"time": 2,
				"user_id": 3
			})
		);
		assert_eq!(env.post_type(), "notice");
		assert_eq!(env.notice_type(), Some("friend_decrease"));
	}

	#[test]
	fn send_result_success_and_failure() {
		let ok = serde_json::to_value(SendResultNotice::success("OPEN", "m-1".into(), 9, 10)).unwrap();
		assert_eq!(ok["notice_type"], "c2c_wakeup_resp");
		assert_eq!(ok["status"], "success");
		assert_eq!(ok["message_id"], "m-1");
		assert_eq!(ok["user_id"], 0);
		assert_eq!(ok["real_user_id"], "OPEN");
		assert!(ok.get("error_msg").is_none());

		let failed = serde_json::to_value(SendResultNotice::failed("OPEN", "boom".into(), 9, 10)).unwrap();
		assert_eq!(failed["status"], "failed");
		assert_eq!(failed["error_msg"], "boom");
		assert!(failed.get("message_id").is_none());
	}
}
