#![forbid(unsafe_code)]

use botgate_domain::{EventId, EventKind, OpenId, ParseIdError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Dispatch opcode.
pub const OP_DISPATCH: u8 = 0;
/// Acknowledgement opcode sent back for webhook deliveries.
pub const OP_HTTP_CALLBACK_ACK: u8 = 12;

#[derive(Debug, Error)]
pub enum EventParseError {
	#[error("invalid payload json: {0}")]
	Json(#[from] serde_json::Error),

	#[error("{event}: missing field {field}")]
	MissingField { event: EventKind, field: &'static str },

	#[error("{event}: invalid {field}: {source}")]
	InvalidId {
		event: EventKind,
		field: &'static str,
		source: ParseIdError,
	},
}

/// One webhook frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
	pub op: u8,
	pub seq: Option<u64>,
	/// The dispatch type as sent, also for event kinds the gateway ignores.
	pub event_type: Option<String>,
	/// Parsed dispatch, present only for supported `op = 0` events.
	pub dispatch: Option<Dispatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
	pub seq: Option<u64>,
	pub event: InboundEvent,
}

/// Inbound platform events the gateway normalizes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
	FriendAdd(FriendAdd),
	FriendDel(FriendDel),
	C2cMsgReject(C2cSwitch),
	C2cMsgReceive(C2cSwitch),
	GroupMsgReject(GroupSwitch),
	GroupMsgReceive(GroupSwitch),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendAdd {
	pub event_id: Option<EventId>,
	pub open_id: OpenId,
	pub union_open_id: Option<String>,
	pub timestamp: Option<i64>,
	pub scene: i64,
	pub scene_param: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendDel {
	pub event_id: Option<EventId>,
	pub open_id: OpenId,
	pub union_open_id: Option<String>,
	pub timestamp: Option<i64>,
}

/// C2C message switch toggled by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct C2cSwitch {
	pub event_id: Option<EventId>,
	pub open_id: OpenId,
	pub union_open_id: Option<String>,
	pub timestamp: Option<i64>,
}

/// Group message switch toggled by a group member.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSwitch {
	pub event_id: Option<EventId>,
	pub group_open_id: OpenId,
	pub op_member_open_id: OpenId,
	pub timestamp: Option<i64>,
}

impl InboundEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			Self::FriendAdd(_) => EventKind::FriendAdd,
			Self::FriendDel(_) => EventKind::FriendDel,
			Self::C2cMsgReject(_) => EventKind::C2cMsgReject,
			Self::C2cMsgReceive(_) => EventKind::C2cMsgReceive,
			Self::GroupMsgReject(_) => EventKind::GroupMsgReject,
			Self::GroupMsgReceive(_) => EventKind::GroupMsgReceive,
		}
	}

	pub fn event_id(&self) -> Option<&EventId> {
		match self {
			Self::FriendAdd(e) => e.event_id.as_ref(),
			Self::FriendDel(e) => e.event_id.as_ref(),
			Self::C2cMsgReject(e) | Self::C2cMsgReceive(e) => e.event_id.as_ref(),
			Self::GroupMsgReject(e) | Self::GroupMsgReceive(e) => e.event_id.as_ref(),
		}
	}

	/// Platform timestamp in unix seconds, when the payload carried a usable one.
	pub fn timestamp(&self) -> Option<i64> {
		match self {
			Self::FriendAdd(e) => e.timestamp,
			Self::FriendDel(e) => e.timestamp,
			Self::C2cMsgReject(e) | Self::C2cMsgReceive(e) => e.timestamp,
			Self::GroupMsgReject(e) | Self::GroupMsgReceive(e) => e.timestamp,
		}
	}

	/// The `(raw id, union id)` pair carried by the event, if any.
	pub fn union_binding(&self) -> Option<(&str, &str)> {
		let (open_id, union) = match self {
			Self::FriendAdd(e) => (&e.open_id, e.union_open_id.as_deref()),
			Self::FriendDel(e) => (&e.open_id, e.union_open_id.as_deref()),
			Self::C2cMsgReject(e) | Self::C2cMsgReceive(e) => (&e.open_id, e.union_open_id.as_deref()),
			Self::GroupMsgReject(_) | Self::GroupMsgReceive(_) => return None,
		};
		union.filter(|u| !u.is_empty()).map(|u| (open_id.as_str(), u))
	}
}

#[derive(Debug, Deserialize)]
struct RawFrame {
	op: u8,
	#[serde(default)]
	id: Option<String>,
	#[serde(default)]
	s: Option<u64>,
	#[serde(default)]
	t: Option<String>,
	#[serde(default)]
	d: Option<Value>,
}

/// Platform timestamps arrive as numbers or strings (decimal or RFC 3339).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
	Int(i64),
	Float(f64),
	Text(String),
}

impl RawTimestamp {
	fn unix_seconds(&self) -> Option<i64> {
		let secs = match self {
			Self::Int(v) => *v,
			Self::Float(v) if v.is_finite() => *v as i64,
			Self::Float(_) => return None,
			Self::Text(s) => {
				let s = s.trim();
				if let Ok(v) = s.parse::<i64>() {
					v
				} else {
					chrono::DateTime::parse_from_rfc3339(s).ok()?.timestamp()
				}
			}
		};
		// Millisecond timestamps show up on some event kinds.
		let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
		(secs > 0).then_some(secs)
	}
}

#[derive(Debug, Deserialize)]
struct RawUserData {
	#[serde(default)]
	event_id: Option<String>,
	#[serde(default)]
	openid: String,
	#[serde(default)]
	union_openid: Option<String>,
	#[serde(default)]
	timestamp: Option<RawTimestamp>,
	#[serde(default)]
	scene: i64,
	#[serde(default)]
	scene_param: String,
}

#[derive(Debug, Deserialize)]
struct RawGroupData {
	#[serde(default)]
	event_id: Option<String>,
	#[serde(default)]
	group_openid: String,
	#[serde(default)]
	op_member_openid: String,
	#[serde(default)]
	timestamp: Option<RawTimestamp>,
}

fn required_open_id(event: EventKind, field: &'static str, raw: String) -> Result<OpenId, EventParseError> {
	if raw.trim().is_empty() {
		return Err(EventParseError::MissingField { event, field });
	}
	OpenId::new(raw).map_err(|source| EventParseError::InvalidId { event, field, source })
}

fn event_id(outer: Option<&str>, inner: Option<String>) -> Option<EventId> {
	outer
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.or(inner)
		.and_then(|s| EventId::new(s).ok())
}

/// Parse one webhook body.
///
/// Non-dispatch frames and dispatch types the gateway does not handle come
/// back with `dispatch = None`. A supported dispatch whose data is unusable is
/// an error. The outer `id` becomes the event id of the parsed event.
pub fn parse_frame(raw: &[u8]) -> Result<Frame, EventParseError> {
	let frame: RawFrame = serde_json::from_slice(raw)?;

	let mut out = Frame {
		op: frame.op,
		seq: frame.s,
		event_type: frame.t.clone(),
		dispatch: None,
	};

	if frame.op != OP_DISPATCH {
		return Ok(out);
	}
	let Some(kind) = frame.t.as_deref().and_then(|t| t.parse::<EventKind>().ok()) else {
		return Ok(out);
	};

	let data = frame.d.unwrap_or(Value::Null);
	let outer_id = frame.id.as_deref();

	let event = if kind.is_group() {
		let d: RawGroupData = serde_json::from_value(data)?;
		let group = GroupSwitch {
			event_id: event_id(outer_id, d.event_id),
			group_open_id: required_open_id(kind, "group_openid", d.group_openid)?,
			op_member_open_id: required_open_id(kind, "op_member_openid", d.op_member_openid)?,
			timestamp: d.timestamp.as_ref().and_then(RawTimestamp::unix_seconds),
		};
		match kind {
			EventKind::GroupMsgReject => InboundEvent::GroupMsgReject(group),
			_ => InboundEvent::GroupMsgReceive(group),
		}
	} else {
		let d: RawUserData = serde_json::from_value(data)?;
		let event_id = event_id(outer_id, d.event_id);
		let open_id = required_open_id(kind, "openid", d.openid)?;
		let union_open_id = d.union_openid.filter(|u| !u.is_empty());
		let timestamp = d.timestamp.as_ref().and_then(RawTimestamp::unix_seconds);
		match kind {
			EventKind::FriendAdd => InboundEvent::FriendAdd(FriendAdd {
				event_id,
				open_id,
				union_open_id,
				timestamp,
				scene: d.scene,
				scene_param: d.scene_param,
			}),
			EventKind::FriendDel => InboundEvent::FriendDel(FriendDel {
				event_id,
				open_id,
				union_open_id,
				timestamp,
			}),
			EventKind::C2cMsgReject => InboundEvent::C2cMsgReject(C2cSwitch {
				event_id,
				open_id,
				union_open_id,
				timestamp,
			}),
			_ => InboundEvent::C2cMsgReceive(C2cSwitch {
				event_id,
				open_id,
				union_open_id,
				timestamp,
			}),
		}
	};

	out.dispatch = Some(Dispatch { seq: frame.s, event });
	Ok(out)
}
