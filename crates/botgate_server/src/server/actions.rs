#![forbid(unsafe_code)]

use std::sync::Arc;

use botgate_domain::OpenId;
use botgate_platform::PlatformClient;
use botgate_protocol::{
	Action, ActionRequest, ActionResponse, Envelope, ShareLinkNotice, ShareLinkParams, WakeupParams, parse_content,
};
use tracing::{info, warn};

use crate::server::delivery::{DeliveryPipeline, DeliveryRequest};
use crate::server::hub::{ClientHub, ClientId};
use crate::util::time::unix_now;

pub const RETCODE_BAD_REQUEST: i64 = 1400;
pub const RETCODE_UNSUPPORTED: i64 = 1404;

/// Everything action handlers need.
#[derive(Clone)]
pub struct ActionContext {
	pub delivery: Arc<DeliveryPipeline>,
	pub client: Arc<dyn PlatformClient>,
	pub hub: ClientHub,
	pub self_id: i64,
}

/// Handle one action frame from `client_id`.
///
/// Sends run in the background; their results reach `client_id` as notices.
/// The returned response only says whether the action was accepted.
pub async fn handle_action_frame(ctx: &ActionContext, client_id: ClientId, raw: &str) -> ActionResponse {
	let req = match ActionRequest::parse(raw) {
		Ok(req) => req,
		Err(e) => {
			metrics::counter!("botgate_actions_rejected_total").increment(1);
			return ActionResponse::failed(RETCODE_BAD_REQUEST, format!("invalid action frame: {e}"), None);
		}
	};
	let echo = req.echo.clone();

	let action = match req.decode() {
		Ok(action) => action,
		Err(e) => {
			metrics::counter!("botgate_actions_rejected_total").increment(1);
			return ActionResponse::failed(RETCODE_BAD_REQUEST, format!("invalid params: {e}"), echo);
		}
	};

	metrics::counter!("botgate_actions_total").increment(1);
	match action {
		Action::SendPrivateMsgWakeup(params) => send_private_msg_wakeup(ctx, client_id, params, echo),
		Action::GetRobotShareLink(params) => get_robot_share_link(ctx, client_id, params, echo),
		Action::Unsupported(name) => {
			warn!(client_id, action = %name, "unsupported action");
			ActionResponse::failed(RETCODE_UNSUPPORTED, format!("unsupported action: {name}"), echo)
		}
	}
}

fn send_private_msg_wakeup(
	ctx: &ActionContext,
	client_id: ClientId,
	params: WakeupParams,
	echo: Option<serde_json::Value>,
) -> ActionResponse {
	let target = match OpenId::new_strict(params.user_id) {
		Ok(id) => id,
		Err(e) => return ActionResponse::failed(RETCODE_BAD_REQUEST, format!("user_id: {e}"), echo),
	};

	let content = match parse_content(&params.message) {
		Ok(c) => c,
		Err(e) => return ActionResponse::failed(RETCODE_BAD_REQUEST, format!("message: {e}"), echo),
	};
	for skipped in &content.skipped {
		metrics::counter!("botgate_content_items_skipped_total").increment(1);
		warn!(client_id, error = %skipped, "skipping message item");
	}
	if content.is_empty() {
		return ActionResponse::failed(RETCODE_BAD_REQUEST, "message has nothing to send", echo);
	}

	info!(client_id, target = %target, items = content.items.len(), "wakeup send accepted");

	let delivery = Arc::clone(&ctx.delivery);
	let hub = ctx.hub.clone();
	tokio::spawn(async move {
		let results = delivery.deliver(DeliveryRequest { target, content }).await;
		for notice in results {
			if !hub.send_envelope(client_id, &Envelope::SendResult(notice)).await {
				warn!(client_id, "requesting client is gone; send result dropped");
			}
		}
	});

	ActionResponse::ok(echo)
}

fn get_robot_share_link(
	ctx: &ActionContext,
	client_id: ClientId,
	params: ShareLinkParams,
	echo: Option<serde_json::Value>,
) -> ActionResponse {
	let client = Arc::clone(&ctx.client);
	let hub = ctx.hub.clone();
	let self_id = ctx.self_id;

	tokio::spawn(async move {
		match client.generate_url_link(&params.callback_data).await {
			Ok(url) => {
				let notice = ShareLinkNotice::new(url, params.callback_data, self_id, unix_now());
				hub.send_envelope(client_id, &Envelope::ShareLink(notice)).await;
			}
			Err(e) => warn!(client_id, error = %e, "share link generation failed"),
		}
	});

	ActionResponse::ok(echo)
}
