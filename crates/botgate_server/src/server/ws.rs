#![forbid(unsafe_code)]

use std::net::SocketAddr;

use botgate_platform::SecretString;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::server::actions::{ActionContext, handle_action_frame};
use crate::server::hub::HubItem;

/// Downstream WebSocket server settings.
#[derive(Clone)]
pub struct WsSettings {
	/// Required bearer token, if any.
	pub access_token: Option<SecretString>,
}

/// Whether a handshake request carries the expected token.
///
/// Accepts `Authorization: Bearer <token>` (or `Token <token>`) and the
/// `access_token` query parameter.
pub fn handshake_authorized(req: &Request, expected: Option<&SecretString>) -> bool {
	let Some(expected) = expected.filter(|t| !t.is_empty()) else {
		return true;
	};
	let expected = expected.expose().trim();

	let from_header = req
		.headers()
		.get("authorization")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("Token ")))
		.map(str::trim);
	if from_header == Some(expected) {
		return true;
	}

	req.uri()
		.query()
		.into_iter()
		.flat_map(|q| q.split('&'))
		.filter_map(|kv| kv.split_once('='))
		.any(|(k, v)| k == "access_token" && v == expected)
}

/// Accept downstream clients until the listener fails.
pub async fn run_ws_server(listener: TcpListener, settings: WsSettings, ctx: ActionContext) -> anyhow::Result<()> {
	loop {
		let (stream, remote) = listener.accept().await?;
		metrics::counter!("botgate_ws_connections_total").increment(1);

		let settings = settings.clone();
		let ctx = ctx.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_ws_connection(stream, remote, settings, ctx).await {
				warn!(%remote, error = %e, "downstream connection ended with error");
			}
		});
	}
}

async fn handle_ws_connection(
	stream: TcpStream,
	remote: SocketAddr,
	settings: WsSettings,
	ctx: ActionContext,
) -> anyhow::Result<()> {
	let token = settings.access_token.clone();
	let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		if handshake_authorized(req, token.as_ref()) {
			Ok(resp)
		} else {
			let mut err = ErrorResponse::new(Some("unauthorized".to_string()));
			*err.status_mut() = StatusCode::UNAUTHORIZED;
			Err(err)
		}
	};

	let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
		Ok(ws) => ws,
		Err(e) => {
			metrics::counter!("botgate_ws_handshake_failures_total").increment(1);
			debug!(%remote, error = %e, "downstream handshake rejected");
			return Ok(());
		}
	};

	let (mut sink, mut source) = ws.split();
	let (client_id, mut rx) = ctx.hub.register().await;
	info!(client_id, %remote, "downstream client connected");

	let writer = tokio::spawn(async move {
		while let Some(item) = rx.recv().await {
			match item {
				HubItem::Frame(frame) => {
					if sink.send(Message::text(frame.to_string())).await.is_err() {
						break;
					}
				}
				HubItem::Lagged { dropped } => {
					warn!(client_id, dropped, "downstream client lagging; frames dropped");
				}
			}
		}
		let _ = sink.close().await;
	});

	while let Some(msg) = source.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				let resp = handle_action_frame(&ctx, client_id, text.as_str()).await;
				match serde_json::to_string(&resp) {
					Ok(json) => {
						ctx.hub.send_to(client_id, json.into()).await;
					}
					Err(e) => warn!(client_id, error = %e, "action response serialization failed"),
				}
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(e) => {
				debug!(client_id, error = %e, "downstream read error");
				break;
			}
		}
	}

	ctx.hub.unregister(client_id).await;
	writer.abort();
	info!(client_id, %remote, "downstream client disconnected");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn req(uri: &str, auth: Option<&str>) -> Request {
		let mut b = Request::builder().uri(uri);
		if let Some(auth) = auth {
			b = b.header("Authorization", auth);
		}
		b.body(()).unwrap()
	}

	#[test]
	fn no_token_configured_allows_everyone() {
		assert!(handshake_authorized(&req("/", None), None));
		assert!(handshake_authorized(&req("/", None), Some(&SecretString::new(""))));
	}

	#[test]
	fn bearer_header_and_query_are_accepted() {
		let token = SecretString::new("s3cret");
		assert!(handshake_authorized(&req("/", Some("Bearer s3cret")), Some(&token)));
		assert!(handshake_authorized(&req("/", Some("Token s3cret")), Some(&token)));
		assert!(handshake_authorized(&req("/?access_token=s3cret", None), Some(&token)));
	}

	#[test]
	fn wrong_or_missing_token_is_rejected() {
		let token = SecretString::new("s3cret");
		assert!(!handshake_authorized(&req("/", None), Some(&token)));
		assert!(!handshake_authorized(&req("/", Some("Bearer nope")), Some(&token)));
		assert!(!handshake_authorized(&req("/?access_token=nope", None), Some(&token)));
	}
}
