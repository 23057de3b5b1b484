#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::IdMapError;

/// Durable key-value capability backing the numeric id map.
pub trait KvStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>, IdMapError>;

	fn put(&self, key: &str, value: &str) -> Result<(), IdMapError>;

	/// Write only when the key is vacant; returns whether the write happened.
	fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, IdMapError>;

	/// Next value of a named, strictly increasing sequence starting at 1.
	fn next_sequence(&self, name: &str) -> Result<i64, IdMapError>;
}

/// In-process `KvStore`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
	entries: RwLock<HashMap<String, String>>,
	sequences: RwLock<HashMap<String, i64>>,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl KvStore for MemoryKvStore {
	fn get(&self, key: &str) -> Result<Option<String>, IdMapError> {
		Ok(self.entries.read().get(key).cloned())
	}

	fn put(&self, key: &str, value: &str) -> Result<(), IdMapError> {
		self.entries.write().insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, IdMapError> {
		let mut entries = self.entries.write();
		if entries.contains_key(key) {
			return Ok(false);
		}
		entries.insert(key.to_string(), value.to_string());
		Ok(true)
	}

	fn next_sequence(&self, name: &str) -> Result<i64, IdMapError> {
		let mut sequences = self.sequences.write();
		let current = sequences.entry(name.to_string()).or_insert(0);
		*current = current.checked_add(1).ok_or(IdMapError::SequenceExhausted)?;
		Ok(*current)
	}
}
