#![forbid(unsafe_code)]

use botgate_domain::EventId;
use botgate_protocol::CorrelationToken;
use dashmap::DashMap;

/// Bookkeeping that lets later replies find the event they answer.
///
/// Entries are never expired here.
pub trait CorrelationRegistry: Send + Sync {
	/// Remember the content synthesized for a correlation token.
	fn register_token(&self, app_id: u64, token: &CorrelationToken, payload: &str);

	/// Remember the latest event id seen in a scope (0 for C2C, the virtual group id otherwise).
	fn register_event_id(&self, app_id: u64, scope_id: i64, event_id: &EventId);

	/// Remember the message type delivered under a session sequence.
	fn register_msg_type(&self, app_id: u64, seq: u64, msg_type: &str);
}

#[derive(Debug, Default)]
pub struct MemoryCorrelationRegistry {
	tokens: DashMap<(u64, String), String>,
	event_ids: DashMap<(u64, i64), String>,
	msg_types: DashMap<(u64, u64), String>,
}

impl MemoryCorrelationRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn token_payload(&self, app_id: u64, token: &str) -> Option<String> {
		self.tokens.get(&(app_id, token.to_string())).map(|v| v.clone())
	}

	pub fn event_id(&self, app_id: u64, scope_id: i64) -> Option<String> {
		self.event_ids.get(&(app_id, scope_id)).map(|v| v.clone())
	}

	pub fn msg_type(&self, app_id: u64, seq: u64) -> Option<String> {
		self.msg_types.get(&(app_id, seq)).map(|v| v.clone())
	}

	pub fn token_count(&self) -> usize {
		self.tokens.len()
	}
}

impl CorrelationRegistry for MemoryCorrelationRegistry {
	fn register_token(&self, app_id: u64, token: &CorrelationToken, payload: &str) {
		self.tokens.insert((app_id, token.as_str().to_string()), payload.to_string());
	}

	fn register_event_id(&self, app_id: u64, scope_id: i64, event_id: &EventId) {
		self.event_ids.insert((app_id, scope_id), event_id.as_str().to_string());
	}

	fn register_msg_type(&self, app_id: u64, seq: u64, msg_type: &str) {
		self.msg_types.insert((app_id, seq), msg_type.to_string());
	}
}
