#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use botgate_platform::SessionTracker;
use botgate_platform::event::{OP_DISPATCH, OP_HTTP_CALLBACK_ACK, parse_frame};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::server::normalize::EventNormalizer;

#[derive(Clone)]
pub struct WebhookState {
	pub path: Arc<str>,
	pub normalizer: Arc<EventNormalizer>,
	pub session: Arc<SessionTracker>,
}

pub fn spawn_webhook_server(bind: SocketAddr, state: WebhookState) {
	tokio::spawn(async move {
		if let Err(err) = run_webhook_server(bind, state).await {
			warn!(error = %err, "webhook server stopped");
		}
	});
}

async fn run_webhook_server(bind: SocketAddr, state: WebhookState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_webhook(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "webhook connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body));
	*resp.status_mut() = status;
	resp
}

fn ack() -> Bytes {
	Bytes::from(format!(r#"{{"op":{OP_HTTP_CALLBACK_ACK}}}"#))
}

async fn handle_webhook(req: Request<Incoming>, state: WebhookState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let (parts, body) = req.into_parts();

	if parts.method != Method::POST {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}
	if parts.uri.path() != state.path.as_ref() {
		return Ok(respond(StatusCode::NOT_FOUND, Bytes::new()));
	}

	metrics::counter!("botgate_webhook_requests_total").increment(1);

	let body_bytes = match body.collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => {
			warn!(error = %err, "webhook body read failed");
			metrics::counter!("botgate_webhook_body_errors_total").increment(1);
			return Ok(respond(StatusCode::BAD_REQUEST, Bytes::new()));
		}
	};

	let (status, body) = handle_webhook_body(&state, &body_bytes);
	Ok(respond(status, body))
}

/// Process one webhook body and build the HTTP reply.
///
/// Unusable dispatch data is logged and still acknowledged; only bodies that
/// are not JSON frames at all get a 400.
pub(crate) fn handle_webhook_body(state: &WebhookState, body: &[u8]) -> (StatusCode, Bytes) {
	let frame = match parse_frame(body) {
		Ok(frame) => frame,
		Err(botgate_platform::EventParseError::Json(e)) => {
			metrics::counter!("botgate_webhook_invalid_json_total").increment(1);
			warn!(error = %e, "webhook body is not a valid frame");
			return (StatusCode::BAD_REQUEST, Bytes::new());
		}
		Err(e) => {
			metrics::counter!("botgate_webhook_invalid_events_total").increment(1);
			warn!(error = %e, "skipping malformed dispatch");
			return (StatusCode::OK, ack());
		}
	};

	if frame.op != OP_DISPATCH {
		debug!(op = frame.op, "non-dispatch webhook frame");
		return (StatusCode::OK, ack());
	}

	if let Some(seq) = frame.seq {
		state.session.observe(seq);
	}

	match frame.dispatch {
		Some(dispatch) => {
			state.normalizer.process(&dispatch.event);
		}
		None => {
			debug!(event_type = frame.event_type.as_deref().unwrap_or(""), "ignoring dispatch type");
		}
	}

	(StatusCode::OK, ack())
}
