#![forbid(unsafe_code)]

//! Downstream (OneBot v11 style) wire types: event envelopes pushed to
//! clients, actions received from them, and message content parsing.

pub mod action;
pub mod content;
pub mod envelope;

pub use action::{Action, ActionRequest, ActionResponse, ShareLinkParams, WakeupParams};
pub use content::{ContentError, MediaItem, ParsedContent, parse_content};
pub use envelope::{
	CorrelationToken, Envelope, FriendRequest, GroupMessage, MessageBody, Notice, PrivateMessage, Segment, Sender,
	SendResultNotice, SendStatus, ShareLinkNotice,
};

/// Well-known `post_type` / `notice_type` strings.
pub mod names {
	pub const POST_NOTICE: &str = "notice";
	pub const POST_REQUEST: &str = "request";
	pub const POST_MESSAGE: &str = "message";

	pub const NOTICE_SEND_RESULT: &str = "c2c_wakeup_resp";
	pub const NOTICE_SHARE_LINK: &str = "share_link_generated";

	pub const ACTION_SEND_PRIVATE_MSG_WAKEUP: &str = "send_private_msg_wakeup";
	pub const ACTION_GET_ROBOT_SHARE_LINK: &str = "get_robot_share_link";
}
