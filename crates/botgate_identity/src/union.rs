#![forbid(unsafe_code)]

use botgate_util::markup::ReferenceResolver;
use dashmap::DashMap;
use parking_lot::Mutex;

/// Bidirectional raw id <-> union id map with at most one live pairing per key.
///
/// Lookups go straight to sharded maps and never touch the writer lock.
/// Writers serialize on a small mutex that only covers the clear-then-set
/// sequence, so the two directions are always updated together.
#[derive(Debug, Default)]
pub struct UnionCache {
	id_to_union: DashMap<String, String>,
	union_to_id: DashMap<String, String>,
	write: Mutex<()>,
}

impl UnionCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bind `id` to `union_id`, dropping any previous pairing of either side.
	///
	/// Empty keys are ignored.
	pub fn bind(&self, id: &str, union_id: &str) {
		if id.is_empty() || union_id.is_empty() {
			return;
		}

		let _guard = self.write.lock();

		if let Some(old_union) = self.id_to_union.get(id).map(|v| v.clone())
			&& old_union != union_id
		{
			self.union_to_id.remove(&old_union);
		}

		if let Some(old_id) = self.union_to_id.get(union_id).map(|v| v.clone())
			&& old_id != id
		{
			self.id_to_union.remove(&old_id);
		}

		self.id_to_union.insert(id.to_string(), union_id.to_string());
		self.union_to_id.insert(union_id.to_string(), id.to_string());
	}

	/// Union id bound to a raw id.
	pub fn union_for(&self, id: &str) -> Option<String> {
		self.id_to_union
			.get(id)
			.map(|v| v.clone())
			.filter(|v| !v.is_empty())
	}

	/// Raw id bound to a union id.
	pub fn id_for(&self, union_id: &str) -> Option<String> {
		self.union_to_id
			.get(union_id)
			.map(|v| v.clone())
			.filter(|v| !v.is_empty())
	}

	/// Remove the pairing of a raw id (both directions).
	pub fn remove_id(&self, id: &str) {
		if id.is_empty() {
			return;
		}

		let _guard = self.write.lock();
		if let Some((_, union_id)) = self.id_to_union.remove(id) {
			self.union_to_id.remove(&union_id);
		}
	}

	/// Remove the pairing of a union id (both directions).
	pub fn remove_union(&self, union_id: &str) {
		if union_id.is_empty() {
			return;
		}

		let _guard = self.write.lock();
		if let Some((_, id)) = self.union_to_id.remove(union_id) {
			self.id_to_union.remove(&id);
		}
	}

	/// Drop every binding. Meant for tests and controlled resets.
	pub fn clear(&self) {
		let _guard = self.write.lock();
		self.id_to_union.clear();
		self.union_to_id.clear();
	}

	/// Number of live pairings.
	pub fn len(&self) -> usize {
		self.id_to_union.len()
	}

	pub fn is_empty(&self) -> bool {
		self.id_to_union.is_empty()
	}
}

impl ReferenceResolver for UnionCache {
	fn raw_id(&self, union_id: &str) -> Option<String> {
		self.id_for(union_id)
	}
}
