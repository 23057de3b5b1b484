#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use botgate_protocol::{Envelope, Notice};
use tokio::time::timeout;

use crate::server::fanout::{BroadcasterConfig, spawn_broadcaster};
use crate::server::hub::{ClientHub, ClientHubConfig, HubItem};

fn hub(capacity: usize) -> ClientHub {
	ClientHub::new(ClientHubConfig {
		client_queue_capacity: capacity,
		debug_logs: false,
	})
}

fn frame(s: &str) -> Arc<str> {
	Arc::from(s)
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
	let hub = hub(16);
	let (_a, mut rx_a) = hub.register().await;
	let (_b, mut rx_b) = hub.register().await;

	hub.broadcast(frame("x")).await;

	for rx in [&mut rx_a, &mut rx_b] {
		let item = timeout(Duration::from_millis(250), rx.recv())
			.await
			.expect("expected to receive within timeout")
			.expect("channel open");
		assert_eq!(item, HubItem::Frame(frame("x")));
	}
}

#[tokio::test]
async fn send_to_reaches_only_the_target() {
	let hub = hub(16);
	let (a, mut rx_a) = hub.register().await;
	let (_b, mut rx_b) = hub.register().await;

	assert!(hub.send_to(a, frame("only-a")).await);

	let item = timeout(Duration::from_millis(250), rx_a.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open");
	assert_eq!(item, HubItem::Frame(frame("only-a")));

	let unexpected = timeout(Duration::from_millis(50), rx_b.recv()).await;
	assert!(unexpected.is_err(), "client B unexpectedly received a targeted frame");
}

#[tokio::test]
async fn dropped_clients_are_pruned() {
	let hub = hub(16);
	let (id, rx) = hub.register().await;
	drop(rx);

	hub.broadcast(frame("x")).await;
	assert_eq!(hub.client_count().await, 0);
	assert!(!hub.send_to(id, frame("y")).await);
}

#[tokio::test]
async fn full_queue_drops_and_reports_lag() {
	let hub = hub(1);
	let (_id, mut rx) = hub.register().await;

	hub.broadcast(frame("1")).await;
	hub.broadcast(frame("2")).await;
	hub.broadcast(frame("3")).await;

	assert_eq!(rx.recv().await, Some(HubItem::Frame(frame("1"))));

	// Queue has room again; the next frame goes out and the lag marker follows when it fits.
	hub.broadcast(frame("4")).await;
	assert_eq!(rx.recv().await, Some(HubItem::Frame(frame("4"))));

	hub.broadcast(frame("5")).await;
	let next = rx.recv().await.expect("channel open");
	assert!(
		matches!(next, HubItem::Frame(_) | HubItem::Lagged { .. }),
		"unexpected item {next:?}"
	);
}

#[tokio::test]
async fn fanout_task_serializes_envelopes_for_clients() {
	let hub = hub(16);
	let (_id, mut rx) = hub.register().await;
	let broadcaster = spawn_broadcaster(hub.clone(), BroadcasterConfig::default());

	assert!(broadcaster.submit(Envelope::Notice(Notice::new("friend_decrease", 1, 2, 3))));

	let item = timeout(Duration::from_millis(500), rx.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open");
	let HubItem::Frame(json) = item else {
		panic!("expected frame, got {item:?}");
	};
	let v: serde_json::Value = serde_json::from_str(&json).unwrap();
	assert_eq!(v["notice_type"], "friend_decrease");
	assert_eq!(v["user_id"], 3);
}
