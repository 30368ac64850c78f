//! Protocol types for the browser side of the relay.
//!
//! Every websocket frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! A browser opens with a single [`ClientEvent::Register`] naming its role and
//! the session it belongs to:
//!
//! 1. Browser connects and sends `register` with `{type, sessionId, name}`
//! 2. Relay answers with [`ServerEvent::Registered`] carrying the assigned id
//! 3. Controllers then drive the session (voting, navigation, configuration),
//!    viewers receive [`ServerEvent::LoadView`] / [`ServerEvent::UpdateView`]
//!
//! # Main Types
//!
//! - [`ClientEvent`] - frames sent by controller and viewer browsers
//! - [`ServerEvent`] - frames sent by the relay to browsers
//! - [`Registration`] - the opening handshake payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::ChoiceEntry;
use crate::error::Result;

/// Role a browser connection registers as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	/// Privileged connection that drives the session.
	Controller,
	/// Passive display.
	Viewer,
	/// Anything else; logged and left unattached.
	#[serde(other)]
	Unknown,
}

impl std::fmt::Display for Role {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Role::Controller => "controller",
			Role::Viewer => "viewer",
			Role::Unknown => "unknown",
		})
	}
}

/// Opening handshake sent once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
	#[serde(rename = "type")]
	pub role: Role,
	/// External session key, e.g. `"m1"`.
	#[serde(rename = "sessionId", alias = "manager")]
	pub session_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Public description of an attached browser, as shown to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Acknowledgement payload sent after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
	#[serde(rename = "type")]
	pub role: Role,
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Snapshot of the state machine position reported to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
	/// Name of the active top-level state.
	pub current: String,
	/// Human readable description of the active chain, e.g. `phase[2] play`.
	pub description: String,
	pub has_next: bool,
	pub has_prev: bool,
}

/// A device command that came back as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailure {
	/// Command name (not the protocol token), when the token was recognized.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub command: Option<String>,
	pub message: Value,
}

/// Frame sent by a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
	/// Opening handshake.
	Register(Registration),
	/// A choice submitted from a web participant rather than a device.
	SubmitChoice(ChoiceEntry),
	/// Ask the device to start accepting votes.
	EnableChoices,
	/// Ask the device to stop accepting votes.
	DisableChoices,
	/// Ask the device for its status.
	Status,
	/// Opaque application message routed between controller and viewers.
	AppMessage(Value),
	/// Advance the session's state machine.
	AppNext,
	/// Retreat the session's state machine.
	AppPrev,
	/// Merge a partial configuration into the running app.
	AppConfigure(Map<String, Value>),
	/// Forward an update blob to the active state.
	AppUpdate(Value),
}

impl ClientEvent {
	pub fn decode(text: &str) -> Result<Self> {
		Ok(serde_json::from_str(text)?)
	}

	/// Event name as it appears on the wire.
	pub fn name(&self) -> &'static str {
		match self {
			ClientEvent::Register(_) => "register",
			ClientEvent::SubmitChoice(_) => "submit-choice",
			ClientEvent::EnableChoices => "enable-choices",
			ClientEvent::DisableChoices => "disable-choices",
			ClientEvent::Status => "status",
			ClientEvent::AppMessage(_) => "app-message",
			ClientEvent::AppNext => "app-next",
			ClientEvent::AppPrev => "app-prev",
			ClientEvent::AppConfigure(_) => "app-configure",
			ClientEvent::AppUpdate(_) => "app-update",
		}
	}
}

/// Frame sent by the relay to a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
	/// Registration acknowledgement.
	Registered(Registered),
	/// Device connectivity flag.
	ConnectParticipantServer(bool),
	/// Choices reported by the device.
	ChoiceData { choices: Vec<ChoiceEntry> },
	/// Device acknowledged `enableChoices`.
	EnableChoices(Value),
	/// Device acknowledged `disableChoices`.
	DisableChoices(Value),
	/// Device status report.
	Status(Value),
	/// A device command failed.
	CommandError(CommandFailure),
	/// Opaque application message.
	AppMessage(Value),
	/// A viewer attached to the session.
	ViewerConnect(ClientInfo),
	/// A viewer left the session.
	ViewerDisconnect(ClientInfo),
	/// Current viewer roster, sent to a newly registered controller.
	ViewerList { viewers: Vec<ClientInfo> },
	/// Replace the displayed view.
	LoadView { view: String, options: Value },
	/// Patch the displayed view.
	UpdateView { options: Value },
	/// State machine position changed.
	AppState(AppStatus),
}

impl ServerEvent {
	pub fn encode(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}

/// Viewer id an application message is addressed to, if any.
///
/// Controller messages carrying a `viewer` field go only to that viewer;
/// everything else is broadcast.
pub fn target_viewer(message: &Value) -> Option<&str> {
	message.get("viewer").and_then(Value::as_str)
}
