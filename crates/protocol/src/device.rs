//! Device aggregator wire protocol.
//!
//! The aggregator speaks loosely-typed JSON. Inbound objects look like:
//!
//! ```text
//! {"type": "choices", "data": [{"id": "a1", "choice": "A"}]}
//! {"type": "command", "command": "enable choices", "data": true}
//! {"type": "error",   "command": "enable choices", "error": "not allowed"}
//! ```
//!
//! Ids and choices are sometimes sent as numbers, so both are normalized to
//! strings on decode. Outbound commands are either a JSON object
//! (`{"command": token, "arguments": [...]}`) or a bare JSON string, written
//! one per line.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// A single participant choice reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceEntry {
	/// Participant alias (device id).
	#[serde(deserialize_with = "loose_string")]
	pub id: String,
	/// The button pressed.
	#[serde(deserialize_with = "loose_string")]
	pub choice: String,
	/// Set by the aggregator when the press came from the instructor's device.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub instructor: bool,
}

impl ChoiceEntry {
	pub fn new(id: impl Into<String>, choice: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			choice: choice.into(),
			instructor: false,
		}
	}

	pub fn instructor(id: impl Into<String>, choice: impl Into<String>) -> Self {
		Self {
			instructor: true,
			..Self::new(id, choice)
		}
	}
}

/// One decoded object from the aggregator socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceFrame {
	/// A batch of participant choices.
	Choices {
		#[serde(default)]
		data: Vec<ChoiceEntry>,
	},
	/// Acknowledgement of a command we sent, echoing its protocol token.
	Command {
		command: String,
		#[serde(default)]
		data: Value,
	},
	/// The aggregator rejected a command.
	Error {
		#[serde(default)]
		command: Option<String>,
		#[serde(default)]
		error: Value,
	},
}

impl DeviceFrame {
	/// Short label used for grouping and logging.
	pub fn kind(&self) -> &'static str {
		match self {
			DeviceFrame::Choices { .. } => "choices",
			DeviceFrame::Command { .. } => "command",
			DeviceFrame::Error { .. } => "error",
		}
	}

	/// Converts an already-parsed JSON object into a frame.
	pub fn from_value(value: Value) -> Result<Self> {
		let kind = value
			.get("type")
			.and_then(Value::as_str)
			.map(str::to_owned);
		match kind.as_deref() {
			Some("choices" | "command" | "error") => Ok(serde_json::from_value(value)?),
			Some(other) => Err(ProtocolError::UnknownKind(other.to_string())),
			None => Err(ProtocolError::UnknownKind("<missing type>".to_string())),
		}
	}
}

/// Command written to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceCommand {
	/// Structured command with optional arguments.
	Named {
		command: String,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		arguments: Vec<Value>,
	},
	/// Bare string token.
	Raw(String),
}

impl DeviceCommand {
	pub fn named(token: impl Into<String>) -> Self {
		DeviceCommand::Named {
			command: token.into(),
			arguments: Vec::new(),
		}
	}

	/// The protocol token this command carries.
	pub fn token(&self) -> &str {
		match self {
			DeviceCommand::Named { command, .. } => command,
			DeviceCommand::Raw(token) => token,
		}
	}

	/// Serializes to a single newline-terminated line.
	pub fn to_line(&self) -> Result<String> {
		let mut line = serde_json::to_string(self)?;
		line.push('\n');
		Ok(line)
	}
}

fn loose_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	match Value::deserialize(deserializer)? {
		Value::String(s) => Ok(s),
		Value::Number(n) => Ok(n.to_string()),
		Value::Bool(b) => Ok(b.to_string()),
		other => Err(de::Error::custom(format!("expected string or number, got {other}"))),
	}
}
