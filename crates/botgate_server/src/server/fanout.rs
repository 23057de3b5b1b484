#![forbid(unsafe_code)]

use std::sync::Arc;

use botgate_protocol::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::hub::ClientHub;

/// Settings for the fan-out task.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
	/// Envelopes waiting for the fan-out task.
	pub queue_capacity: usize,

	pub debug_log_envelopes: bool,
}

impl Default for BroadcasterConfig {
	fn default() -> Self {
		Self {
			queue_capacity: 4096,
			debug_log_envelopes: false,
		}
	}
}

/// Fire-and-forget handle into the fan-out channel.
#[derive(Debug, Clone)]
pub struct Broadcaster {
	tx: mpsc::Sender<Envelope>,
}

impl Broadcaster {
	/// A broadcaster plus the receiving end of its channel.
	pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		(Self { tx }, rx)
	}

	/// Queue an envelope for every client. Never waits.
	pub fn submit(&self, envelope: Envelope) -> bool {
		match self.tx.try_send(envelope) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(env)) => {
				metrics::counter!("botgate_fanout_dropped_total").increment(1);
				warn!(post_type = env.post_type(), "fan-out queue full; envelope dropped");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				warn!("fan-out task is gone; envelope dropped");
				false
			}
		}
	}

	/// Queue every envelope of one event, or none of them. Never waits.
	///
	/// Returns the number of envelopes queued: `envelopes.len()` or 0.
	pub fn submit_all(&self, envelopes: Vec<Envelope>) -> usize {
		let n = envelopes.len();
		if n == 0 {
			return 0;
		}

		match self.tx.try_reserve_many(n) {
			Ok(permits) => {
				for (permit, envelope) in permits.zip(envelopes) {
					permit.send(envelope);
				}
				n
			}
			Err(mpsc::error::TrySendError::Full(())) => {
				metrics::counter!("botgate_fanout_dropped_total").increment(n as u64);
				warn!(envelopes = n, "fan-out queue full; event dropped");
				0
			}
			Err(mpsc::error::TrySendError::Closed(())) => {
				warn!(envelopes = n, "fan-out task is gone; event dropped");
				0
			}
		}
	}
}

/// Task that drains the fan-out channel into the client hub.
#[derive(Debug)]
pub struct FanoutTask {
	cfg: BroadcasterConfig,
	hub: ClientHub,
	rx: mpsc::Receiver<Envelope>,
}

impl FanoutTask {
	pub fn new(rx: mpsc::Receiver<Envelope>, hub: ClientHub, cfg: BroadcasterConfig) -> Self {
		Self { cfg, hub, rx }
	}

	/// Run until every `Broadcaster` handle is dropped.
	pub async fn run(mut self) {
		info!("fan-out task started");

		while let Some(envelope) = self.rx.recv().await {
			let frame = match envelope.to_json() {
				Ok(json) => Arc::<str>::from(json),
				Err(e) => {
					warn!(error = %e, "envelope serialization failed; dropped");
					continue;
				}
			};

			if self.cfg.debug_log_envelopes {
				debug!(
					post_type = envelope.post_type(),
					notice_type = envelope.notice_type().unwrap_or(""),
					"broadcasting envelope"
				);
			}

			metrics::counter!("botgate_envelopes_broadcast_total").increment(1);
			self.hub.broadcast(frame).await;
		}

		info!("fan-out task exiting (all broadcasters dropped)");
	}
}

/// Spawn the fan-out task and return a handle that feeds it.
pub fn spawn_broadcaster(hub: ClientHub, cfg: BroadcasterConfig) -> Broadcaster {
	let (broadcaster, rx) = Broadcaster::channel(cfg.queue_capacity);
	let task = FanoutTask::new(rx, hub, cfg);

	tokio::spawn(async move {
		task.run().await;
	});

	broadcaster
}
