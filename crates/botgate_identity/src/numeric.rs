#![forbid(unsafe_code)]

use std::sync::Arc;

use botgate_domain::OpenId;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{IdMapError, KvStore};

const SEQUENCE_NAME: &str = "virtual_id";

/// Numeric id map settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdMapConfig {
	/// Derive ids from a hash of the open id instead of a counter.
	pub hash_ids: bool,
	/// Group-scoped hashing ("pro" mode). Requires `hash_ids`.
	pub pro: bool,
}

impl IdMapConfig {
	/// Reject combinations that would produce an inconsistent id scheme.
	pub fn validate(&self) -> Result<(), IdMapError> {
		if self.pro && !self.hash_ids {
			return Err(IdMapError::ProRequiresHashIds);
		}
		Ok(())
	}
}

/// Positive 63-bit id derived from SHA-256 of `input`. Never zero.
pub fn hashed_id(input: &str) -> i64 {
	let digest = Sha256::digest(input.as_bytes());
	let mut buf = [0u8; 8];
	buf.copy_from_slice(&digest[..8]);
	let id = (u64::from_be_bytes(buf) & (i64::MAX as u64)) as i64;
	if id == 0 { 1 } else { id }
}

/// Open id -> numeric virtual id map.
///
/// Forward bindings are a function of the open id. Reverse bindings keep the
/// first owner of a numeric id, so a hash collision never rejects an id; use
/// [`IdMap::check_binding`] where collision safety matters.
pub struct IdMap {
	cfg: IdMapConfig,
	store: Arc<dyn KvStore>,
	alloc: Mutex<()>,
}

impl std::fmt::Debug for IdMap {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IdMap").field("cfg", &self.cfg).finish_non_exhaustive()
	}
}

fn forward_key(open_id: &str) -> String {
	format!("fwd:{open_id}")
}

fn reverse_key(id: i64) -> String {
	format!("rev:{id}")
}

fn pro_key(group: &str, user: &str) -> String {
	format!("pro:{group}:{user}")
}

fn parse_id(key: &str, value: &str) -> Result<i64, IdMapError> {
	value.trim().parse::<i64>().map_err(|_| IdMapError::Corrupt {
		key: key.to_string(),
		value: value.to_string(),
	})
}

impl IdMap {
	pub fn new(cfg: IdMapConfig, store: Arc<dyn KvStore>) -> Result<Self, IdMapError> {
		cfg.validate()?;
		Ok(Self {
			cfg,
			store,
			alloc: Mutex::new(()),
		})
	}

	pub fn config(&self) -> IdMapConfig {
		self.cfg
	}

	/// Stable numeric id for `open_id`, allocating one on first sight.
	pub fn store(&self, open_id: &OpenId) -> Result<i64, IdMapError> {
		let key = forward_key(open_id.as_str());
		if let Some(v) = self.store.get(&key)? {
			return parse_id(&key, &v);
		}

		let _guard = self.alloc.lock();
		if let Some(v) = self.store.get(&key)? {
			return parse_id(&key, &v);
		}

		let id = if self.cfg.hash_ids {
			hashed_id(open_id.as_str())
		} else {
			self.store.next_sequence(SEQUENCE_NAME)?
		};

		self.store.put(&key, &id.to_string())?;
		self.bind_reverse(id, open_id.as_str())?;
		Ok(id)
	}

	/// Group-scoped ids: `(group_id, user_id)` derived from both strings.
	///
	/// `group` may be empty for C2C scope, which yields group id `0`.
	pub fn store_pro(&self, group: &str, user: &OpenId) -> Result<(i64, i64), IdMapError> {
		if !self.cfg.pro {
			return Err(IdMapError::Store("pro id mapping is disabled".to_string()));
		}

		let key = pro_key(group, user.as_str());
		if let Some(v) = self.store.get(&key)? {
			let (g, u) = v.split_once(',').ok_or_else(|| IdMapError::Corrupt {
				key: key.clone(),
				value: v.clone(),
			})?;
			return Ok((parse_id(&key, g)?, parse_id(&key, u)?));
		}

		let group_id = if group.is_empty() { 0 } else { hashed_id(group) };
		let user_id = hashed_id(&format!("{group}/{}", user.as_str()));

		let _guard = self.alloc.lock();
		self.store.put(&key, &format!("{group_id},{user_id}"))?;
		if group_id != 0 {
			self.bind_reverse(group_id, group)?;
		}
		self.bind_reverse(user_id, user.as_str())?;
		Ok((group_id, user_id))
	}

	fn bind_reverse(&self, id: i64, open_id: &str) -> Result<(), IdMapError> {
		if !self.store.put_if_absent(&reverse_key(id), open_id)? {
			let owner = self.store.get(&reverse_key(id))?;
			if owner.as_deref() != Some(open_id) {
				debug!(id, "virtual id already owned by another open id (hash collision tolerated)");
			}
		}
		Ok(())
	}

	/// Open id that owns a numeric id.
	pub fn open_id_for(&self, id: i64) -> Result<Option<String>, IdMapError> {
		self.store.get(&reverse_key(id))
	}

	/// Whether any open id owns `id`.
	pub fn is_bound(&self, id: i64) -> bool {
		matches!(self.open_id_for(id), Ok(Some(_)))
	}

	/// Whether `id` is owned by exactly `open_id`.
	pub fn check_binding(&self, open_id: &str, id: i64) -> bool {
		matches!(self.open_id_for(id), Ok(Some(owner)) if owner == open_id)
	}
}
