#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use botgate_protocol::Envelope;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

pub type ClientId = u64;

/// Downstream client registry that fans out serialized frames.
#[derive(Debug, Clone)]
pub struct ClientHub {
	inner: Arc<Mutex<Inner>>,
	next_id: Arc<AtomicU64>,
	cfg: ClientHubConfig,
}

/// Configuration for `ClientHub`.
#[derive(Debug, Clone)]
pub struct ClientHubConfig {
	/// Maximum number of queued frames per client.
	pub client_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for ClientHubConfig {
	fn default() -> Self {
		Self {
			client_queue_capacity: 1024,
			debug_logs: false,
		}
	}
}

/// Items emitted on a client stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HubItem {
	/// A JSON text frame.
	Frame(Arc<str>),

	/// Indicates the client is lagging and frames were dropped.
	Lagged { dropped: u64 },
}

impl ClientHub {
	pub fn new(cfg: ClientHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			next_id: Arc::new(AtomicU64::new(1)),
			cfg,
		}
	}

	/// Register a client and get its frame stream.
	pub async fn register(&self) -> (ClientId, mpsc::Receiver<HubItem>) {
		let (tx, rx) = mpsc::channel(self.cfg.client_queue_capacity);
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		let mut inner = self.inner.lock().await;
		prune_closed_clients(&mut inner);
		inner.clients.insert(id, ClientEntry { tx, pending_lag: 0 });

		if self.cfg.debug_logs {
			debug!(client_id = id, clients = inner.clients.len(), "client hub: registered");
		}

		(id, rx)
	}

	pub async fn unregister(&self, id: ClientId) {
		let mut inner = self.inner.lock().await;
		inner.clients.remove(&id);
		prune_closed_clients(&mut inner);
	}

	/// Push a frame to every connected client.
	pub async fn broadcast(&self, frame: Arc<str>) {
		let mut inner = self.inner.lock().await;
		prune_closed_clients(&mut inner);

		let mut dropped_total: u64 = 0;
		for entry in inner.clients.values_mut() {
			if !entry.offer(HubItem::Frame(Arc::clone(&frame))) {
				dropped_total += 1;
			}
		}

		prune_closed_clients(&mut inner);

		if dropped_total > 0 {
			metrics::counter!("botgate_hub_dropped_frames_total").increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(dropped = dropped_total, "client hub: dropped due to full client queues");
			}
		}
	}

	/// Push a frame to one client. Returns whether it was queued.
	pub async fn send_to(&self, id: ClientId, frame: Arc<str>) -> bool {
		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.clients.get_mut(&id) else {
			return false;
		};
		let queued = entry.offer(HubItem::Frame(frame));
		if !queued {
			metrics::counter!("botgate_hub_dropped_frames_total").increment(1);
		}
		prune_closed_clients(&mut inner);
		queued
	}

	/// Serialize and push an envelope to one client.
	pub async fn send_envelope(&self, id: ClientId, envelope: &Envelope) -> bool {
		match envelope.to_json() {
			Ok(json) => self.send_to(id, Arc::from(json)).await,
			Err(e) => {
				warn!(client_id = id, error = %e, "client hub: envelope serialization failed");
				false
			}
		}
	}

	/// Number of live clients.
	pub async fn client_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.clients.values().filter(|c| !c.tx.is_closed()).count()
	}
}

#[derive(Debug, Default)]
struct Inner {
	clients: HashMap<ClientId, ClientEntry>,
}

#[derive(Debug)]
struct ClientEntry {
	tx: mpsc::Sender<HubItem>,

	/// Frames dropped since the last lag marker went out.
	pending_lag: u64,
}

impl ClientEntry {
	fn offer(&mut self, item: HubItem) -> bool {
		match self.tx.try_send(item) {
			Ok(()) => {
				if self.pending_lag > 0
					&& self
						.tx
						.try_send(HubItem::Lagged {
							dropped: self.pending_lag,
						})
						.is_ok()
				{
					self.pending_lag = 0;
				}
				true
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				self.pending_lag = self.pending_lag.saturating_add(1);
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}
}

fn prune_closed_clients(inner: &mut Inner) {
	inner.clients.retain(|_, c| !c.tx.is_closed());
}
