#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::names;

/// Action frame sent by a downstream client.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
	pub action: String,
	#[serde(default)]
	pub params: Value,
	#[serde(default)]
	pub echo: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WakeupParams {
	/// Target open id. Accepted as string or number on the wire.
	#[serde(deserialize_with = "string_or_number")]
	pub user_id: String,
	#[serde(default)]
	pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShareLinkParams {
	#[serde(default)]
	pub callback_data: String,
}

/// Actions the gateway understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
	SendPrivateMsgWakeup(WakeupParams),
	GetRobotShareLink(ShareLinkParams),
	Unsupported(String),
}

impl ActionRequest {
	pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(raw)
	}

	/// Typed view of the action. Known actions with bad params are errors.
	pub fn decode(&self) -> Result<Action, serde_json::Error> {
		match self.action.as_str() {
			names::ACTION_SEND_PRIVATE_MSG_WAKEUP => {
				Ok(Action::SendPrivateMsgWakeup(serde_json::from_value(self.params.clone())?))
			}
			names::ACTION_GET_ROBOT_SHARE_LINK => {
				let params = if self.params.is_null() {
					ShareLinkParams {
						callback_data: String::new(),
					}
				} else {
					serde_json::from_value(self.params.clone())?
				};
				Ok(Action::GetRobotShareLink(params))
			}
			other => Ok(Action::Unsupported(other.to_string())),
		}
	}
}

/// Immediate reply to an action frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResponse {
	pub status: &'static str,
	pub retcode: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub echo: Option<Value>,
}

impl ActionResponse {
	pub fn ok(echo: Option<Value>) -> Self {
		Self {
			status: "ok",
			retcode: 0,
			message: None,
			echo,
		}
	}

	pub fn failed(retcode: i64, message: impl Into<String>, echo: Option<Value>) -> Self {
		Self {
			status: "failed",
			retcode,
			message: Some(message.into()),
			echo,
		}
	}
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: serde::Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Str(String),
		Int(i64),
		Uint(u64),
	}

	Ok(match Raw::deserialize(deserializer)? {
		Raw::Str(s) => s,
		Raw::Int(v) => v.to_string(),
		Raw::Uint(v) => v.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_wakeup_action() {
		let req = ActionRequest::parse(
			r#"{"action":"send_private_msg_wakeup","params":{"user_id":"E4F1C0DE","message":"hello"},"echo":"c1"}"#,
		)
		.unwrap();
		assert_eq!(req.echo, Some(Value::String("c1".into())));
		let Action::SendPrivateMsgWakeup(p) = req.decode().unwrap() else {
			panic!("wrong action");
		};
		assert_eq!(p.user_id, "E4F1C0DE");
		assert_eq!(p.message, Value::String("hello".into()));
	}

	#[test]
	fn numeric_user_id_is_stringified() {
		let req = ActionRequest::parse(r#"{"action":"send_private_msg_wakeup","params":{"user_id":12345}}"#).unwrap();
		let Action::SendPrivateMsgWakeup(p) = req.decode().unwrap() else {
			panic!("wrong action");
		};
		assert_eq!(p.user_id, "12345");
	}

	#[test]
	fn share_link_params_are_optional() {
		let req = ActionRequest::parse(r#"{"action":"get_robot_share_link"}"#).unwrap();
		assert_eq!(
			req.decode().unwrap(),
			Action::GetRobotShareLink(ShareLinkParams {
				callback_data: String::new()
			})
		);
	}

	#[test]
	fn unknown_actions_are_reported_by_name() {
		let req = ActionRequest::parse(r#"{"action":"send_group_msg","params":{}}"#).unwrap();
		assert_eq!(req.decode().unwrap(), Action::Unsupported("send_group_msg".into()));
	}

	#[test]
	fn response_shape() {
		assert_eq!(
			serde_json::to_value(ActionResponse::ok(None)).unwrap(),
			serde_json::json!({ "status": "ok", "retcode": 0 })
		);
		let failed = serde_json::to_value(ActionResponse::failed(1400, "bad", Some("e".into()))).unwrap();
		assert_eq!(failed["retcode"], 1400);
		assert_eq!(failed["echo"], "e");
	}
}
