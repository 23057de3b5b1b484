#![forbid(unsafe_code)]

use std::sync::Arc;

use botgate_domain::{EventId, EventKind, OpenId, SelfIdSource};
use botgate_identity::{IdMap, IdMapError, UnionCache};
use botgate_platform::{C2cSwitch, FriendAdd, FriendDel, GroupSwitch, InboundEvent, SessionSequence};
use botgate_protocol::{
	CorrelationToken, Envelope, FriendRequest, GroupMessage, MessageBody, Notice, PrivateMessage, Sender,
	names::POST_MESSAGE,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::correlation::CorrelationRegistry;
use crate::server::fanout::Broadcaster;
use crate::util::time::{unix_ms_now, unix_now};

/// `message_id` carried by messages synthesized from switch events.
pub const SYNTHETIC_MESSAGE_ID: i64 = 123;

/// Texts used when switch events are delivered as messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTemplates {
	pub c2c_msg_reject: String,
	pub c2c_msg_receive: String,
	pub group_msg_reject: String,
	pub group_msg_receive: String,
}

impl Default for SwitchTemplates {
	fn default() -> Self {
		Self {
			c2c_msg_reject: "关闭主动消息".to_string(),
			c2c_msg_receive: "开启主动消息".to_string(),
			group_msg_reject: "群关闭主动消息".to_string(),
			group_msg_receive: "群开启主动消息".to_string(),
		}
	}
}

/// Immutable normalization settings, built once from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeSettings {
	pub app_id: u64,
	pub self_id: SelfIdSource,
	/// Deliver switch events as messages instead of notices.
	pub events_as_messages: bool,
	/// Plain OneBot output: no `real_*` / binding / avatar extensions.
	pub native_ob11: bool,
	/// Segment-array `message` fields instead of raw strings.
	pub array: bool,
	pub two_way_echo: bool,
	pub templates: SwitchTemplates,
}

impl Default for NormalizeSettings {
	fn default() -> Self {
		Self {
			app_id: 0,
			self_id: SelfIdSource::AppId(0),
			events_as_messages: false,
			native_ob11: false,
			array: false,
			two_way_echo: false,
			templates: SwitchTemplates::default(),
		}
	}
}

/// Per-kind behavior of the four message-switch events.
#[derive(Debug, Clone, Copy)]
pub struct SwitchEventRule {
	pub kind: EventKind,
	/// `message_type` used when the event becomes a message.
	pub message_type: &'static str,
	template: fn(&SwitchTemplates) -> &str,
}

impl SwitchEventRule {
	pub fn notice_type(&self) -> &'static str {
		self.kind.notice_type()
	}

	pub fn template<'a>(&self, templates: &'a SwitchTemplates) -> &'a str {
		(self.template)(templates)
	}
}

fn c2c_msg_reject(t: &SwitchTemplates) -> &str {
	&t.c2c_msg_reject
}

fn c2c_msg_receive(t: &SwitchTemplates) -> &str {
	&t.c2c_msg_receive
}

fn group_msg_reject(t: &SwitchTemplates) -> &str {
	&t.group_msg_reject
}

fn group_msg_receive(t: &SwitchTemplates) -> &str {
	&t.group_msg_receive
}

pub const SWITCH_EVENTS: [SwitchEventRule; 4] = [
	SwitchEventRule {
		kind: EventKind::C2cMsgReject,
		message_type: "private",
		template: c2c_msg_reject,
	},
	SwitchEventRule {
		kind: EventKind::C2cMsgReceive,
		message_type: "private",
		template: c2c_msg_receive,
	},
	SwitchEventRule {
		kind: EventKind::GroupMsgReject,
		message_type: "group",
		template: group_msg_reject,
	},
	SwitchEventRule {
		kind: EventKind::GroupMsgReceive,
		message_type: "group",
		template: group_msg_receive,
	},
];

pub fn switch_rule(kind: EventKind) -> Option<&'static SwitchEventRule> {
	SWITCH_EVENTS.iter().find(|s| s.kind == kind)
}

#[derive(Debug, Error)]
pub enum NormalizeError {
	#[error("identity resolution failed for {kind}: {source}")]
	Identity { kind: EventKind, source: IdMapError },

	#[error("{0} is not a message-switch event")]
	NotASwitchEvent(EventKind),
}

/// Avatar URL for an open id under an app.
pub fn avatar_url(app_id: u64, open_id: &str) -> String {
	format!("http://q.qlogo.cn/qqapp/{app_id}/{open_id}/640")
}

/// Turns inbound platform events into downstream envelopes.
pub struct EventNormalizer {
	settings: Arc<NormalizeSettings>,
	ids: Arc<IdMap>,
	unions: Arc<UnionCache>,
	registry: Arc<dyn CorrelationRegistry>,
	session: Arc<dyn SessionSequence>,
	out: Broadcaster,
}

impl EventNormalizer {
	pub fn new(
		settings: Arc<NormalizeSettings>,
		ids: Arc<IdMap>,
		unions: Arc<UnionCache>,
		registry: Arc<dyn CorrelationRegistry>,
		session: Arc<dyn SessionSequence>,
		out: Broadcaster,
	) -> Self {
		Self {
			settings,
			ids,
			unions,
			registry,
			session,
			out,
		}
	}

	pub fn settings(&self) -> &NormalizeSettings {
		&self.settings
	}

	/// Normalize one event and hand the envelopes to the fan-out channel.
	///
	/// Returns the number of envelopes queued. An event's envelopes are queued
	/// together or not at all, and identity failures drop the event as a whole.
	pub fn process(&self, event: &InboundEvent) -> usize {
		let kind = event.kind();
		match self.normalize(event) {
			Ok(envelopes) => {
				let n = self.out.submit_all(envelopes);
				if n == 0 {
					metrics::counter!("botgate_events_dropped_total").increment(1);
					return 0;
				}
				metrics::counter!("botgate_events_normalized_total").increment(1);
				debug!(%kind, envelopes = n, "event normalized");
				n
			}
			Err(e) => {
				metrics::counter!("botgate_events_dropped_total").increment(1);
				warn!(%kind, error = %e, "dropping event");
				0
			}
		}
	}

	/// Build the envelopes for one event without submitting them.
	pub fn normalize(&self, event: &InboundEvent) -> Result<Vec<Envelope>, NormalizeError> {
		if let Some((raw, union)) = event.union_binding() {
			self.unions.bind(raw, union);
		}

		let time = event.timestamp().unwrap_or_else(unix_now);
		match event {
			InboundEvent::FriendAdd(e) => self.friend_add(e, time),
			InboundEvent::FriendDel(e) => self.friend_del(e, time),
			InboundEvent::C2cMsgReject(e) | InboundEvent::C2cMsgReceive(e) => self.c2c_switch(event.kind(), e, time),
			InboundEvent::GroupMsgReject(e) | InboundEvent::GroupMsgReceive(e) => {
				self.group_switch(event.kind(), e, time)
			}
		}
	}

	fn self_id(&self) -> i64 {
		self.settings.self_id.resolve()
	}

	fn real(&self, s: &str) -> Option<String> {
		(!self.settings.native_ob11).then(|| s.to_string())
	}

	fn resolve_user(&self, kind: EventKind, open_id: &OpenId) -> Result<i64, NormalizeError> {
		let identity = |source| NormalizeError::Identity { kind, source };

		if !self.ids.config().pro {
			return self.ids.store(open_id).map_err(identity);
		}

		let (_, user_id) = self.ids.store_pro("", open_id).map_err(identity)?;
		self.safety_net(open_id);
		Ok(user_id)
	}

	fn resolve_group(&self, kind: EventKind, group: &OpenId, member: &OpenId) -> Result<(i64, i64), NormalizeError> {
		let identity = |source| NormalizeError::Identity { kind, source };

		if !self.ids.config().pro {
			let group_id = self.ids.store(group).map_err(identity)?;
			let user_id = self.ids.store(member).map_err(identity)?;
			return Ok((group_id, user_id));
		}

		let ids = self.ids.store_pro(group.as_str(), member).map_err(identity)?;
		self.safety_net(group);
		self.safety_net(member);
		Ok(ids)
	}

	/// Plain binding kept alongside pro ids so non-pro lookups still resolve.
	fn safety_net(&self, open_id: &OpenId) {
		if let Err(e) = self.ids.store(open_id) {
			warn!(error = %e, "secondary id binding failed");
		}
	}

	fn register_event_id(&self, scope_id: i64, event_id: Option<&EventId>) {
		if let Some(event_id) = event_id {
			self.registry.register_event_id(self.settings.app_id, scope_id, event_id);
		}
	}

	fn friend_add(&self, e: &FriendAdd, time: i64) -> Result<Vec<Envelope>, NormalizeError> {
		let user_id = self.resolve_user(EventKind::FriendAdd, &e.open_id)?;
		self.register_event_id(0, e.event_id.as_ref());

		let comment = if e.scene_param.is_empty() {
			format!("Scene: {}", e.scene)
		} else {
			e.scene_param.clone()
		};
		let flag = e.event_id.as_ref().map(|id| id.as_str().to_string()).unwrap_or_default();

		let mut request = FriendRequest::new(self.self_id(), time, user_id, comment, flag);
		request.real_user_id = self.real(e.open_id.as_str());

		let mut notice = Notice::new(EventKind::FriendAdd.notice_type(), self.self_id(), time, user_id);
		notice.real_user_id = self.real(e.open_id.as_str());
		notice.scene = Some(e.scene);
		notice.scene_param = Some(e.scene_param.clone());

		Ok(vec![Envelope::Request(request), Envelope::Notice(notice)])
	}

	fn friend_del(&self, e: &FriendDel, time: i64) -> Result<Vec<Envelope>, NormalizeError> {
		let user_id = self.resolve_user(EventKind::FriendDel, &e.open_id)?;
		self.register_event_id(0, e.event_id.as_ref());

		let mut notice = Notice::new(EventKind::FriendDel.notice_type(), self.self_id(), time, user_id);
		notice.real_user_id = self.real(e.open_id.as_str());
		Ok(vec![Envelope::Notice(notice)])
	}

	fn c2c_switch(&self, kind: EventKind, e: &C2cSwitch, time: i64) -> Result<Vec<Envelope>, NormalizeError> {
		let rule = switch_rule(kind).ok_or(NormalizeError::NotASwitchEvent(kind))?;
		let user_id = self.resolve_user(kind, &e.open_id)?;
		self.register_event_id(0, e.event_id.as_ref());

		if !self.settings.events_as_messages {
			let mut notice = Notice::new(rule.notice_type(), self.self_id(), time, user_id);
			notice.real_user_id = self.real(e.open_id.as_str());
			return Ok(vec![Envelope::Notice(notice)]);
		}

		let content = rule.template(&self.settings.templates).to_string();
		let echo = self.correlate(rule, &content);

		let mut msg = PrivateMessage {
			post_type: POST_MESSAGE,
			message_type: "private",
			sub_type: "friend",
			time,
			self_id: self.self_id(),
			user_id,
			message_id: SYNTHETIC_MESSAGE_ID,
			message: MessageBody::from_text(&content, self.settings.array),
			raw_message: content,
			font: 0,
			sender: Sender {
				user_id,
				nickname: String::new(),
			},
			echo,
			real_message_type: None,
			real_user_id: None,
			is_binded_user_id: None,
			avatar: None,
		};

		if !self.settings.native_ob11 {
			let open_id = e.open_id.as_str();
			msg.real_message_type = Some(rule.notice_type().to_string());
			msg.real_user_id = Some(open_id.to_string());
			msg.is_binded_user_id = Some(self.ids.check_binding(open_id, user_id));
			msg.avatar = Some(avatar_url(self.settings.app_id, open_id));
		}

		Ok(vec![Envelope::PrivateMessage(Box::new(msg))])
	}

	fn group_switch(&self, kind: EventKind, e: &GroupSwitch, time: i64) -> Result<Vec<Envelope>, NormalizeError> {
		let rule = switch_rule(kind).ok_or(NormalizeError::NotASwitchEvent(kind))?;
		let (group_id, user_id) = self.resolve_group(kind, &e.group_open_id, &e.op_member_open_id)?;
		self.register_event_id(group_id, e.event_id.as_ref());

		if !self.settings.events_as_messages {
			let mut notice = Notice::new(rule.notice_type(), self.self_id(), time, user_id);
			notice.group_id = Some(group_id);
			notice.real_user_id = self.real(e.op_member_open_id.as_str());
			notice.real_group_id = self.real(e.group_open_id.as_str());
			return Ok(vec![Envelope::Notice(notice)]);
		}

		let content = rule.template(&self.settings.templates).to_string();
		let echo = self.correlate(rule, &content);

		let mut msg = GroupMessage {
			post_type: POST_MESSAGE,
			message_type: "group",
			sub_type: "normal",
			time,
			self_id: self.self_id(),
			group_id,
			user_id,
			message_id: SYNTHETIC_MESSAGE_ID,
			message: MessageBody::from_text(&content, self.settings.array),
			raw_message: content,
			font: 0,
			sender: Sender {
				user_id,
				nickname: String::new(),
			},
			echo,
			real_message_type: None,
			real_group_id: None,
			real_user_id: None,
			is_binded_group_id: None,
			is_binded_user_id: None,
			avatar: None,
		};

		if !self.settings.native_ob11 {
			let member = e.op_member_open_id.as_str();
			let group = e.group_open_id.as_str();
			msg.real_message_type = Some(rule.notice_type().to_string());
			msg.real_group_id = Some(group.to_string());
			msg.real_user_id = Some(member.to_string());
			msg.is_binded_group_id = Some(self.ids.check_binding(group, group_id));
			msg.is_binded_user_id = Some(self.ids.check_binding(member, user_id));
			msg.avatar = Some(avatar_url(self.settings.app_id, member));
		}

		Ok(vec![Envelope::GroupMessage(Box::new(msg))])
	}

	/// Message-mode bookkeeping: message type per sequence and the optional echo token.
	fn correlate(&self, rule: &SwitchEventRule, content: &str) -> Option<CorrelationToken> {
		let app_id = self.settings.app_id;
		let seq = self.session.current();
		self.registry.register_msg_type(app_id, seq, rule.message_type);

		if !self.settings.two_way_echo {
			return None;
		}
		let token = CorrelationToken::new(app_id, seq, unix_ms_now());
		self.registry.register_token(app_id, &token, content);
		Some(token)
	}
}
