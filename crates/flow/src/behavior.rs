//! Hooks a state plugs into the machine, and the host it talks to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::StateMessage;
use crate::participant::{ChoiceReport, Participant, SharedRoster};

/// What a state's body wants after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	/// Move on immediately (non-view states).
	Advance,
	/// Stay until the controller navigates.
	Stay,
}

/// Update buffering modes requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppress {
	/// Buffer changes normally.
	Off,
	/// Drop the next batch of changes only.
	Once,
	/// Drop every change until [`Suppress::Off`].
	UntilResumed,
}

/// Event streams a state can subscribe to while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
	/// Called after device choices were applied to the roster.
	Choices,
}

/// External collaborators of a running app.
///
/// The relay implements this per session; tests use recording fakes.
#[async_trait]
pub trait Host: Send + Sync {
	/// Loads the roster from wherever participants are persisted.
	async fn fetch_roster(&self) -> Result<Vec<Participant>>;

	/// Persists an exercise log.
	async fn write_log(&self, app_id: &str, log: Value) -> Result<()>;

	/// Replaces every viewer's view.
	fn load_view(&self, view: &str, options: Value);

	/// Patches every viewer's view.
	fn update_view(&self, options: Value);

	/// Receives participant changes for batching. Called with the roster
	/// locked, so it must not touch the roster itself.
	fn participants_changed(&self, batch: &[Participant]);

	fn suppress_updates(&self, mode: Suppress);

	/// Toggles discarding of inbound device choices.
	fn set_choices_ignored(&self, ignored: bool);
}

/// Data shared by every state of one app.
pub(crate) struct Shared {
	pub host: Arc<dyn Host>,
	pub roster: SharedRoster,
	pub config: Map<String, Value>,
	pub log: Option<Map<String, Value>>,
	pub write_requested: bool,
}

/// Per-call view of the app handed to behavior hooks.
pub struct Context<'a> {
	pub(crate) shared: &'a mut Shared,
	pub(crate) subscriptions: &'a mut Vec<Topic>,
	pub(crate) name: &'a str,
}

impl Context<'_> {
	/// Name of the state being driven.
	pub fn name(&self) -> &str {
		self.name
	}

	pub fn host(&self) -> &dyn Host {
		self.shared.host.as_ref()
	}

	/// The app's live roster.
	pub fn roster(&self) -> &SharedRoster {
		&self.shared.roster
	}

	pub fn config(&self) -> &Map<String, Value> {
		&self.shared.config
	}

	pub fn config_value(&self, key: &str) -> Option<&Value> {
		self.shared.config.get(key)
	}

	/// Merges `data` into the app's pending exercise log.
	pub fn log(&mut self, data: Map<String, Value>) {
		self.shared.log.get_or_insert_with(Map::new).extend(data);
	}

	/// Asks the app to write its log once the current transition settles.
	pub fn request_log_write(&mut self) {
		self.shared.write_requested = true;
	}

	/// Subscribes the state to `topic` until it exits.
	pub fn subscribe(&mut self, topic: Topic) {
		if !self.subscriptions.contains(&topic) {
			self.subscriptions.push(topic);
		}
	}

	pub fn is_subscribed(&self, topic: Topic) -> bool {
		self.subscriptions.contains(&topic)
	}

	/// Loads a view with updates suppressed, so the changes made while
	/// preparing it are not sent a second time.
	pub fn render(&self, view: &str, options: Value) {
		let host = self.host();
		host.suppress_updates(Suppress::UntilResumed);
		host.load_view(view, options);
		host.suppress_updates(Suppress::Off);
	}
}

/// The pluggable part of a leaf state.
///
/// Every hook has a default, so a state only implements what it needs. A
/// bare implementation is a pass-through state that advances immediately.
#[async_trait]
pub trait Behavior: Send + Sync {
	/// Default state name.
	fn name(&self) -> &str;

	/// Runs before the body. The machine waits for it, so it may fetch.
	async fn on_entry(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) -> Result<()> {
		Ok(())
	}

	/// Adds queued participants when the state supports late joiners.
	fn add_new_participants(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) {}

	fn run(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		Flow::Advance
	}

	/// Transforms the output on forward exit. `None` passes the input on.
	fn on_exit(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		None
	}

	fn validate_next(&self, _input: &StateMessage) -> bool {
		true
	}

	fn validate_prev(&self, _input: &StateMessage) -> bool {
		true
	}

	fn on_choices(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage, _report: &ChoiceReport) {}

	fn handle_configure(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) {}

	/// Controller supplied update for the active state.
	fn update(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage, _data: &Value) {}

	/// Replays the current view without running any logic.
	fn rerender(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) {}
}
