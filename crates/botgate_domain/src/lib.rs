#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown event type: {0}")]
	UnknownEvent(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Platform-issued opaque user or group identifier (`openid`).
///
/// Never interpreted by the gateway beyond being non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenId(String);

impl OpenId {
	/// Length of the opaque ids the platform currently issues.
	pub const OBSERVED_LEN: usize = 32;

	/// Create a non-empty `OpenId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	/// Like `new`, but also requires the observed platform length.
	pub fn new_strict(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = Self::new(id)?;
		if id.0.chars().count() != Self::OBSERVED_LEN {
			return Err(ParseIdError::InvalidFormat(format!(
				"expected {} characters, got {}",
				Self::OBSERVED_LEN,
				id.0.chars().count()
			)));
		}
		Ok(id)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for OpenId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for OpenId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OpenId::new(s.to_string())
	}
}

/// Event-scoped identifier assigned by the platform to a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
	/// Create a non-empty `EventId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Inbound platform event kinds handled by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	FriendAdd,
	FriendDel,
	C2cMsgReject,
	C2cMsgReceive,
	GroupMsgReject,
	GroupMsgReceive,
}

impl EventKind {
	pub const ALL: [EventKind; 6] = [
		EventKind::FriendAdd,
		EventKind::FriendDel,
		EventKind::C2cMsgReject,
		EventKind::C2cMsgReceive,
		EventKind::GroupMsgReject,
		EventKind::GroupMsgReceive,
	];

	/// Dispatch type string as sent by the platform (`t` field).
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::FriendAdd => "FRIEND_ADD",
			EventKind::FriendDel => "FRIEND_DEL",
			EventKind::C2cMsgReject => "C2C_MSG_REJECT",
			EventKind::C2cMsgReceive => "C2C_MSG_RECEIVE",
			EventKind::GroupMsgReject => "GROUP_MSG_REJECT",
			EventKind::GroupMsgReceive => "GROUP_MSG_RECEIVE",
		}
	}

	/// Downstream `notice_type` for this kind.
	pub const fn notice_type(self) -> &'static str {
		match self {
			EventKind::FriendAdd => "friend_add",
			EventKind::FriendDel => "friend_decrease",
			EventKind::C2cMsgReject => "c2c_msg_reject",
			EventKind::C2cMsgReceive => "c2c_msg_receive",
			EventKind::GroupMsgReject => "group_msg_reject",
			EventKind::GroupMsgReceive => "group_msg_receive",
		}
	}

	/// Message-switch events may be disguised as messages; friend events never are.
	pub const fn is_switch(self) -> bool {
		matches!(
			self,
			EventKind::C2cMsgReject | EventKind::C2cMsgReceive | EventKind::GroupMsgReject | EventKind::GroupMsgReceive
		)
	}

	pub const fn is_group(self) -> bool {
		matches!(self, EventKind::GroupMsgReject | EventKind::GroupMsgReceive)
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		EventKind::ALL
			.into_iter()
			.find(|k| k.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| ParseIdError::UnknownEvent(s.to_string()))
	}
}

/// Where the gateway's own `self_id` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfIdSource {
	/// A configured numeric UIN.
	Uin(i64),
	/// The platform application id.
	AppId(u64),
}

impl SelfIdSource {
	/// Resolve the numeric self id.
	pub fn resolve(self) -> i64 {
		match self {
			SelfIdSource::Uin(uin) => uin,
			SelfIdSource::AppId(app_id) => app_id as i64,
		}
	}
}
