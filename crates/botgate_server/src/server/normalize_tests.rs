#![forbid(unsafe_code)]

use std::sync::Arc;

use botgate_domain::{EventId, EventKind, OpenId, SelfIdSource};
use botgate_identity::{IdMap, IdMapConfig, IdMapError, KvStore, MemoryKvStore, UnionCache, hashed_id};
use botgate_platform::{C2cSwitch, FriendAdd, FriendDel, GroupSwitch, InboundEvent, SessionTracker};
use botgate_protocol::{Envelope, Notice};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::server::correlation::MemoryCorrelationRegistry;
use crate::server::fanout::Broadcaster;
use crate::server::normalize::{
	EventNormalizer, NormalizeError, NormalizeSettings, SWITCH_EVENTS, SYNTHETIC_MESSAGE_ID, avatar_url,
};

const USER: &str = "E4F1C2D3B4A5968778695A4B3C2D1E0F";
const GROUP: &str = "0F1E2D3C4B5A69788796A5B4D3C2F1E4";
const APP_ID: u64 = 102005;

struct Fixture {
	normalizer: EventNormalizer,
	registry: Arc<MemoryCorrelationRegistry>,
	unions: Arc<UnionCache>,
	ids: Arc<IdMap>,
	session: Arc<SessionTracker>,
	out: Broadcaster,
	rx: mpsc::Receiver<Envelope>,
}

fn fixture_with(settings: NormalizeSettings, ids: IdMapConfig, store: Arc<dyn KvStore>) -> Fixture {
	fixture_sized(settings, ids, store, 16)
}

fn fixture_sized(settings: NormalizeSettings, ids: IdMapConfig, store: Arc<dyn KvStore>, capacity: usize) -> Fixture {
	let ids = Arc::new(IdMap::new(ids, store).unwrap());
	let unions = Arc::new(UnionCache::new());
	let registry = Arc::new(MemoryCorrelationRegistry::new());
	let session = Arc::new(SessionTracker::new());
	let (out, rx) = Broadcaster::channel(capacity);

	let normalizer = EventNormalizer::new(
		Arc::new(settings),
		Arc::clone(&ids),
		Arc::clone(&unions),
		registry.clone(),
		session.clone(),
		out.clone(),
	);

	Fixture {
		normalizer,
		registry,
		unions,
		ids,
		session,
		out,
		rx,
	}
}

fn fixture(settings: NormalizeSettings) -> Fixture {
	fixture_with(settings, IdMapConfig::default(), Arc::new(MemoryKvStore::new()))
}

fn settings() -> NormalizeSettings {
	NormalizeSettings {
		app_id: APP_ID,
		self_id: SelfIdSource::AppId(APP_ID),
		..NormalizeSettings::default()
	}
}

fn open(s: &str) -> OpenId {
	OpenId::new(s).unwrap()
}

fn c2c(event_id: &str) -> C2cSwitch {
	C2cSwitch {
		event_id: Some(EventId::new(event_id).unwrap()),
		open_id: open(USER),
		union_open_id: None,
		timestamp: Some(1_700_000_000),
	}
}

fn group(event_id: &str) -> GroupSwitch {
	GroupSwitch {
		event_id: Some(EventId::new(event_id).unwrap()),
		group_open_id: open(GROUP),
		op_member_open_id: open(USER),
		timestamp: Some(1_700_000_000),
	}
}

fn json(envelope: &Envelope) -> Value {
	serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
}

#[test]
fn friend_add_emits_request_then_notice() {
	let f = fixture(settings());
	let event = InboundEvent::FriendAdd(FriendAdd {
		event_id: Some(EventId::new("FRIEND_ADD:abc").unwrap()),
		open_id: open(USER),
		union_open_id: Some("UNION-1".to_string()),
		timestamp: Some(1_700_000_000),
		scene: 1,
		scene_param: "src=share".to_string(),
	});

	let out = f.normalizer.normalize(&event).unwrap();
	assert_eq!(out.len(), 2);

	let request = json(&out[0]);
	assert_eq!(request["post_type"], "request");
	assert_eq!(request["request_type"], "friend");
	assert_eq!(request["comment"], "src=share");
	assert_eq!(request["flag"], "FRIEND_ADD:abc");
	assert_eq!(request["time"], 1_700_000_000);
	assert_eq!(request["self_id"], APP_ID);
	assert_eq!(request["real_user_id"], USER);

	let notice = json(&out[1]);
	assert_eq!(notice["post_type"], "notice");
	assert_eq!(notice["notice_type"], "friend_add");
	assert_eq!(notice["scene"], 1);
	assert_eq!(notice["scene_param"], "src=share");
	assert_eq!(notice["user_id"], request["user_id"]);

	assert_eq!(f.unions.id_for("UNION-1").as_deref(), Some(USER));
	assert_eq!(f.registry.event_id(APP_ID, 0).as_deref(), Some("FRIEND_ADD:abc"));
}

#[test]
fn friend_add_without_scene_param_describes_the_scene() {
	let f = fixture(settings());
	let event = InboundEvent::FriendAdd(FriendAdd {
		event_id: None,
		open_id: open(USER),
		union_open_id: None,
		timestamp: None,
		scene: 7,
		scene_param: String::new(),
	});

	let out = f.normalizer.normalize(&event).unwrap();
	let request = json(&out[0]);
	assert_eq!(request["comment"], "Scene: 7");
	assert_eq!(request["flag"], "");
	assert!(request["time"].as_i64().unwrap() > 1_600_000_000);
}

#[test]
fn friend_del_is_a_friend_decrease_notice() {
	let f = fixture(settings());
	let event = InboundEvent::FriendDel(FriendDel {
		event_id: None,
		open_id: open(USER),
		union_open_id: None,
		timestamp: Some(1_700_000_001),
	});

	let out = f.normalizer.normalize(&event).unwrap();
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].notice_type(), Some("friend_decrease"));
}

#[test]
fn sequential_ids_are_stable_across_events() {
	let f = fixture(settings());
	let a = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	let b = f.normalizer.normalize(&InboundEvent::C2cMsgReceive(c2c("e2"))).unwrap();
	assert_eq!(json(&a[0])["user_id"], 1);
	assert_eq!(json(&b[0])["user_id"], 1);
	assert_eq!(f.ids.open_id_for(1).unwrap().as_deref(), Some(USER));
}

#[test]
fn switch_events_are_notices_by_default() {
	let f = fixture(settings());
	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();

	assert_eq!(out.len(), 1);
	assert!(matches!(out[0], Envelope::Notice(_)));
	let notice = json(&out[0]);
	assert_eq!(notice["notice_type"], "c2c_msg_reject");
	assert_eq!(notice["real_user_id"], USER);
	assert!(f.registry.msg_type(APP_ID, 0).is_none());
}

#[test]
fn switch_events_become_messages_when_enabled() {
	let f = fixture(NormalizeSettings {
		events_as_messages: true,
		..settings()
	});
	f.session.observe(42);

	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReceive(c2c("e1"))).unwrap();
	assert_eq!(out.len(), 1);
	let Envelope::PrivateMessage(msg) = &out[0] else {
		panic!("expected a private message, got {:?}", out[0]);
	};

	assert_eq!(msg.message_type, "private");
	assert_eq!(msg.sub_type, "friend");
	assert_eq!(msg.message_id, SYNTHETIC_MESSAGE_ID);
	assert_eq!(msg.raw_message, "开启主动消息");
	assert_eq!(msg.real_message_type.as_deref(), Some("c2c_msg_receive"));
	assert_eq!(msg.real_user_id.as_deref(), Some(USER));
	assert_eq!(msg.is_binded_user_id, Some(true));
	assert_eq!(msg.avatar.as_deref(), Some(avatar_url(APP_ID, USER).as_str()));
	assert!(msg.echo.is_none());

	let value = json(&out[0]);
	assert_eq!(value["message"], "开启主动消息");
	assert_eq!(f.registry.msg_type(APP_ID, 42).as_deref(), Some("private"));
}

#[test]
fn native_mode_omits_extension_fields() {
	let f = fixture(NormalizeSettings {
		events_as_messages: true,
		native_ob11: true,
		..settings()
	});

	let out = f.normalizer.normalize(&InboundEvent::GroupMsgReject(group("g1"))).unwrap();
	let value = json(&out[0]);
	let obj = value.as_object().unwrap();
	for field in ["real_message_type", "real_group_id", "real_user_id", "is_binded_group_id", "is_binded_user_id", "avatar"] {
		assert!(!obj.contains_key(field), "{field} should be absent");
	}
	assert_eq!(value["message_type"], "group");
	assert_eq!(value["raw_message"], "群关闭主动消息");

	let f = fixture(NormalizeSettings {
		native_ob11: true,
		..settings()
	});
	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	assert!(json(&out[0]).get("real_user_id").is_none());
}

#[test]
fn array_mode_wraps_text_in_a_segment() {
	let f = fixture(NormalizeSettings {
		events_as_messages: true,
		array: true,
		..settings()
	});

	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	let value = json(&out[0]);
	assert_eq!(value["message"][0]["type"], "text");
	assert_eq!(value["message"][0]["data"]["text"], "关闭主动消息");
	assert_eq!(value["raw_message"], "关闭主动消息");
}

#[test]
fn two_way_echo_registers_a_token() {
	let f = fixture(NormalizeSettings {
		events_as_messages: true,
		two_way_echo: true,
		..settings()
	});
	f.session.observe(9);

	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	let Envelope::PrivateMessage(msg) = &out[0] else {
		panic!("expected a private message");
	};
	let token = msg.echo.as_ref().unwrap();
	assert!(token.as_str().starts_with(&format!("{APP_ID}_9_")));
	assert_eq!(f.registry.token_payload(APP_ID, token.as_str()).as_deref(), Some("关闭主动消息"));
	assert_eq!(f.registry.token_count(), 1);
}

#[test]
fn group_events_carry_group_ids_and_scope_event_ids() {
	let f = fixture(settings());
	let out = f.normalizer.normalize(&InboundEvent::GroupMsgReceive(group("g1"))).unwrap();

	let notice = json(&out[0]);
	assert_eq!(notice["notice_type"], "group_msg_receive");
	assert_eq!(notice["real_group_id"], GROUP);
	assert_eq!(notice["real_user_id"], USER);

	let group_id = notice["group_id"].as_i64().unwrap();
	assert_eq!(f.ids.open_id_for(group_id).unwrap().as_deref(), Some(GROUP));
	assert_eq!(f.registry.event_id(APP_ID, group_id).as_deref(), Some("g1"));
	assert!(f.registry.event_id(APP_ID, 0).is_none());
}

#[test]
fn configured_uin_overrides_app_id() {
	let f = fixture(NormalizeSettings {
		self_id: SelfIdSource::Uin(10001),
		..settings()
	});
	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	assert_eq!(json(&out[0])["self_id"], 10001);
}

#[test]
fn pro_mode_scopes_member_ids_by_group() {
	let cfg = IdMapConfig { hash_ids: true, pro: true };
	let f = fixture_with(
		NormalizeSettings {
			events_as_messages: true,
			..settings()
		},
		cfg,
		Arc::new(MemoryKvStore::new()),
	);

	let out = f.normalizer.normalize(&InboundEvent::GroupMsgReceive(group("g1"))).unwrap();
	let Envelope::GroupMessage(msg) = &out[0] else {
		panic!("expected a group message");
	};
	assert_eq!(msg.group_id, hashed_id(GROUP));
	assert_eq!(msg.user_id, hashed_id(&format!("{GROUP}/{USER}")));
	assert_eq!(msg.is_binded_group_id, Some(true));
	assert_eq!(msg.is_binded_user_id, Some(true));

	// Plain binding exists alongside the scoped one.
	assert_eq!(f.ids.open_id_for(hashed_id(USER)).unwrap().as_deref(), Some(USER));

	let out = f.normalizer.normalize(&InboundEvent::C2cMsgReject(c2c("e1"))).unwrap();
	let Envelope::PrivateMessage(msg) = &out[0] else {
		panic!("expected a private message");
	};
	assert_eq!(msg.user_id, hashed_id(&format!("/{USER}")));
}

struct FailingStore;

impl KvStore for FailingStore {
	fn get(&self, _key: &str) -> Result<Option<String>, IdMapError> {
		Err(IdMapError::Store("unavailable".to_string()))
	}

	fn put(&self, _key: &str, _value: &str) -> Result<(), IdMapError> {
		Err(IdMapError::Store("unavailable".to_string()))
	}

	fn put_if_absent(&self, _key: &str, _value: &str) -> Result<bool, IdMapError> {
		Err(IdMapError::Store("unavailable".to_string()))
	}

	fn next_sequence(&self, _name: &str) -> Result<i64, IdMapError> {
		Err(IdMapError::Store("unavailable".to_string()))
	}
}

#[test]
fn identity_failure_drops_the_whole_event() {
	let mut f = fixture_with(settings(), IdMapConfig::default(), Arc::new(FailingStore));
	let event = InboundEvent::FriendAdd(FriendAdd {
		event_id: None,
		open_id: open(USER),
		union_open_id: None,
		timestamp: None,
		scene: 1,
		scene_param: String::new(),
	});

	let err = f.normalizer.normalize(&event).unwrap_err();
	assert!(matches!(
		err,
		NormalizeError::Identity {
			kind: EventKind::FriendAdd,
			..
		}
	));

	assert_eq!(f.normalizer.process(&event), 0);
	assert!(f.rx.try_recv().is_err());
}

#[test]
fn process_submits_every_envelope() {
	let mut f = fixture(settings());
	let event = InboundEvent::FriendAdd(FriendAdd {
		event_id: None,
		open_id: open(USER),
		union_open_id: None,
		timestamp: None,
		scene: 1,
		scene_param: String::new(),
	});

	assert_eq!(f.normalizer.process(&event), 2);
	assert_eq!(f.rx.try_recv().unwrap().post_type(), "request");
	assert_eq!(f.rx.try_recv().unwrap().post_type(), "notice");
}

fn friend_add_event() -> InboundEvent {
	InboundEvent::FriendAdd(FriendAdd {
		event_id: Some(EventId::new("FRIEND_ADD:abc").unwrap()),
		open_id: open(USER),
		union_open_id: None,
		timestamp: Some(1_700_000_000),
		scene: 1,
		scene_param: "src=share".to_string(),
	})
}

#[test]
fn friend_add_is_queued_whole_or_not_at_all() {
	let mut f = fixture_sized(settings(), IdMapConfig::default(), Arc::new(MemoryKvStore::new()), 2);
	assert!(f.out.submit(Envelope::Notice(Notice::new("friend_decrease", 1, 2, 3))));

	assert_eq!(f.normalizer.process(&friend_add_event()), 0);
	assert_eq!(f.rx.try_recv().unwrap().notice_type(), Some("friend_decrease"));
	assert!(f.rx.try_recv().is_err());

	assert_eq!(f.normalizer.process(&friend_add_event()), 2);
	assert_eq!(f.rx.try_recv().unwrap().post_type(), "request");
	assert_eq!(f.rx.try_recv().unwrap().post_type(), "notice");
}

#[test]
fn friend_events_ignore_the_message_switch() {
	for events_as_messages in [false, true] {
		let f = fixture(NormalizeSettings {
			events_as_messages,
			..settings()
		});

		let out = f.normalizer.normalize(&friend_add_event()).unwrap();
		let kinds: Vec<_> = out.iter().map(Envelope::post_type).collect();
		assert_eq!(kinds, ["request", "notice"], "events_as_messages = {events_as_messages}");
		assert_eq!(out[1].notice_type(), Some("friend_add"));

		let del = InboundEvent::FriendDel(FriendDel {
			event_id: None,
			open_id: open(USER),
			union_open_id: None,
			timestamp: Some(1_700_000_001),
		});
		let out = f.normalizer.normalize(&del).unwrap();
		assert_eq!(out.len(), 1, "events_as_messages = {events_as_messages}");
		assert_eq!(out[0].post_type(), "notice");
		assert_eq!(out[0].notice_type(), Some("friend_decrease"));
	}
}

#[test]
fn each_switch_event_yields_exactly_one_envelope() {
	for rule in &SWITCH_EVENTS {
		let event = match rule.kind {
			EventKind::C2cMsgReject => InboundEvent::C2cMsgReject(c2c("e1")),
			EventKind::C2cMsgReceive => InboundEvent::C2cMsgReceive(c2c("e1")),
			EventKind::GroupMsgReject => InboundEvent::GroupMsgReject(group("g1")),
			EventKind::GroupMsgReceive => InboundEvent::GroupMsgReceive(group("g1")),
			other => panic!("{other} is not a switch event"),
		};

		for events_as_messages in [false, true] {
			let f = fixture(NormalizeSettings {
				events_as_messages,
				..settings()
			});
			let out = f.normalizer.normalize(&event).unwrap();
			assert_eq!(out.len(), 1, "{} with events_as_messages = {events_as_messages}", rule.kind);

			let value = json(&out[0]);
			if events_as_messages {
				assert_eq!(value["post_type"], "message");
				assert_eq!(value["message_type"], rule.message_type);
				assert_eq!(value["real_message_type"], rule.notice_type());
				if rule.kind.is_group() {
					assert!(matches!(out[0], Envelope::GroupMessage(_)));
				} else {
					assert!(matches!(out[0], Envelope::PrivateMessage(_)));
				}
			} else {
				assert!(matches!(out[0], Envelope::Notice(_)));
				assert_eq!(value["notice_type"], rule.notice_type());
			}
		}
	}
}
