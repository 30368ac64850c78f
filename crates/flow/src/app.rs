//! The top-level orchestrator driven by the controller.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::behavior::Host;
use crate::builder::StateSpec;
use crate::error::{FlowError, Result};
use crate::machine::{Machine, Outcome, StateId};
use crate::message::StateMessage;
use crate::participant::{Choice, ChoiceReport, Participant, Roster, SharedRoster};

/// Everything needed to assemble a [`StateApp`].
pub struct AppDefinition {
	pub id: String,
	pub version: String,
	pub states: Vec<(String, StateSpec)>,
	/// Default config; `restore_default_config` returns to it.
	pub config: Map<String, Value>,
	pub write_log_at_end: bool,
	pub validate_choices: bool,
}

impl AppDefinition {
	pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			version: version.into(),
			states: Vec::new(),
			config: Map::new(),
			write_log_at_end: true,
			validate_choices: true,
		}
	}

	/// Appends a top-level state under `key`.
	pub fn state(mut self, key: impl Into<String>, spec: StateSpec) -> Self {
		self.states.push((key.into(), spec));
		self
	}

	pub fn config(mut self, config: Map<String, Value>) -> Self {
		self.config = config;
		self
	}

	pub fn write_log_at_end(mut self, write: bool) -> Self {
		self.write_log_at_end = write;
		self
	}

	pub fn validate_choices(mut self, validate: bool) -> Self {
		self.validate_choices = validate;
		self
	}
}

/// Snapshot of where the app is, for controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
	pub current: Option<String>,
	pub description: String,
	pub has_next: bool,
	pub has_prev: bool,
}

/// A running exercise: the wired machine plus config and log handling.
///
/// Transitions take `&mut self`; callers sharing an app across tasks hold
/// it behind an async mutex so a transition always settles before the next
/// one starts.
pub struct StateApp {
	id: String,
	version: String,
	machine: Machine,
	defaults: Map<String, Value>,
	write_log_at_end: bool,
}

impl StateApp {
	/// Wires the machine. The roster reports every change to `host`.
	pub fn new(definition: AppDefinition, host: Arc<dyn Host>) -> Result<Self> {
		let AppDefinition {
			id,
			version,
			states,
			config,
			write_log_at_end,
			validate_choices,
		} = definition;
		if states.is_empty() {
			return Err(FlowError::NoStates(id));
		}

		let mut roster = Roster::new();
		roster.set_validate_choices(validate_choices);
		let sink = host.clone();
		roster.set_watcher(Some(Arc::new(move |batch: &[Participant]| {
			sink.participants_changed(batch)
		})));

		let machine = Machine::build(
			states,
			host,
			roster.shared(),
			config.clone(),
			&mut rand::rng(),
		)?;
		Ok(Self {
			id,
			version,
			machine,
			defaults: config,
			write_log_at_end,
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn machine(&self) -> &Machine {
		&self.machine
	}

	pub fn roster(&self) -> SharedRoster {
		self.machine.shared.roster.clone()
	}

	pub fn config(&self) -> &Map<String, Value> {
		&self.machine.shared.config
	}

	/// Top-level state the app is on.
	pub fn current(&self) -> Option<StateId> {
		self.machine.active()
	}

	pub fn current_name(&self) -> Option<&str> {
		self.current().map(|id| self.machine.name(id))
	}

	fn host(&self) -> Arc<dyn Host> {
		self.machine.shared.host.clone()
	}

	/// Enters the first state with the live roster.
	pub async fn start(&mut self) -> Option<StateId> {
		let first = self.machine.top_level().first().map(|(_, id)| *id)?;
		let input = StateMessage::with_roster(self.roster());
		info!(target = "clicker.flow", app = %self.id, state = %self.machine.name(first), "starting app");

		let host = self.host();
		host.set_choices_ignored(true);
		let outcome = self.machine.enter(first, Some(input), None).await;
		host.set_choices_ignored(false);
		self.settle(outcome, Step::Load).await
	}

	/// Advances the active state. Returns the state reached, or `None` when
	/// nothing moved.
	pub async fn next(&mut self) -> Option<StateId> {
		let current = self.current()?;
		debug!(target = "clicker.flow", app = %self.id, "{}", self.machine.next_string(current));

		let host = self.host();
		host.set_choices_ignored(true);
		let outcome = self.machine.next(current).await;
		host.set_choices_ignored(false);
		self.settle(outcome, Step::Forward).await
	}

	pub async fn prev(&mut self) -> Option<StateId> {
		let current = self.current()?;
		debug!(target = "clicker.flow", app = %self.id, "{}", self.machine.prev_string(current));

		let host = self.host();
		host.set_choices_ignored(true);
		let outcome = self.machine.prev(current).await;
		host.set_choices_ignored(false);
		self.settle(outcome, Step::Backward).await
	}

	/// Jumps to a top-level state. Unknown ids are logged and ignored.
	pub async fn load_state(&mut self, key: &str, input: Option<StateMessage>) -> bool {
		let Some(id) = self.machine.find(key) else {
			warn!(target = "clicker.flow", app = %self.id, state = key, "no such state");
			return false;
		};
		let from = self.current();

		let host = self.host();
		host.set_choices_ignored(true);
		let outcome = self.machine.enter(id, input, from).await;
		host.set_choices_ignored(false);
		self.settle(outcome, Step::Load).await;
		true
	}

	async fn settle(&mut self, outcome: Outcome, step: Step) -> Option<StateId> {
		let moved = match outcome {
			Outcome::Settled(_) => self.current(),
			Outcome::Blocked | Outcome::Edge => None,
		};

		if let Some(current) = moved {
			if step == Step::Forward && !self.machine.has_next(current) && self.write_log_at_end {
				self.machine.shared.write_requested = true;
			}
			if step == Step::Backward && !self.machine.has_prev(current) {
				self.clear_log_data();
			}
		}

		if std::mem::take(&mut self.machine.shared.write_requested) {
			if let Err(err) = self.write_log().await {
				warn!(target = "clicker.flow", app = %self.id, error = %err, "failed to write log");
			}
		}
		moved
	}

	/// Shallow-merges `partial` into the live config and tells the active
	/// states.
	pub fn configure(&mut self, partial: Map<String, Value>) {
		debug!(target = "clicker.flow", app = %self.id, keys = ?partial.keys().collect::<Vec<_>>(), "configure");
		self.machine.shared.config.extend(partial);
		self.machine.handle_configure();
	}

	/// Changes the number of instances of the repeating state `key`; see
	/// [`Machine::set_repeats`].
	pub fn set_repeats(&mut self, key: &str, count: usize) -> Result<usize> {
		let id = self
			.machine
			.lookup(key)
			.ok_or_else(|| FlowError::UnknownState(key.to_string()))?;
		self.machine.set_repeats(id, count)
	}

	/// Deep-merges the default config back over the live one.
	pub fn restore_default_config(&mut self) {
		let defaults = Value::Object(self.defaults.clone());
		let mut config = Value::Object(std::mem::take(&mut self.machine.shared.config));
		deep_merge(&mut config, &defaults);
		if let Value::Object(config) = config {
			self.machine.shared.config = config;
		}
	}

	/// Replays the current view, e.g. for a viewer that just connected.
	pub fn rerender(&mut self) {
		self.machine.rerender();
	}

	/// Forwards a controller update to the innermost active state.
	pub fn update(&mut self, data: &Value) {
		self.machine.update(data);
	}

	/// Applies device choices to the roster and notifies subscribed states.
	pub fn dispatch_choices(&mut self, choices: &[Choice]) -> ChoiceReport {
		let report = self.machine.shared.roster.lock().apply_choices(choices);
		for err in &report.rejected {
			debug!(target = "clicker.flow", app = %self.id, error = %err, "choice ignored");
		}
		self.machine.dispatch_choices(&report);
		report
	}

	pub fn status(&self) -> Progress {
		match self.current() {
			Some(id) => Progress {
				current: Some(self.machine.name(id).to_string()),
				description: self.machine.describe(id),
				has_next: self.machine.has_next(id),
				has_prev: self.machine.has_prev(id),
			},
			None => Progress {
				current: None,
				description: String::new(),
				has_next: false,
				has_prev: false,
			},
		}
	}

	pub fn add_log_data(&mut self, data: Map<String, Value>) {
		self.machine.shared.log.get_or_insert_with(Map::new).extend(data);
	}

	pub fn clear_log_data(&mut self) {
		self.machine.shared.log = None;
	}

	pub fn log_data(&self) -> Option<&Map<String, Value>> {
		self.machine.shared.log.as_ref()
	}

	/// Hands `{config, version, ...log}` to the host.
	pub async fn write_log(&mut self) -> Result<()> {
		let mut payload = Map::new();
		payload.insert("config".into(), Value::Object(self.config().clone()));
		payload.insert("version".into(), json!(self.version));
		if let Some(log) = &self.machine.shared.log {
			payload.extend(log.clone());
		}
		info!(target = "clicker.flow", app = %self.id, "writing exercise log");
		self.host().write_log(&self.id, Value::Object(payload)).await
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Step {
	Load,
	Forward,
	Backward,
}

fn deep_merge(target: &mut Value, source: &Value) {
	match (target, source) {
		(Value::Object(target), Value::Object(source)) => {
			for (key, value) in source {
				deep_merge(target.entry(key.clone()).or_insert(Value::Null), value);
			}
		}
		(target, source) => *target = source.clone(),
	}
}

#[cfg(test)]
mod tests;
