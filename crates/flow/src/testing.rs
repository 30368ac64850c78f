//! Fakes shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::behavior::{Behavior, Context, Flow, Host, Suppress, Topic};
use crate::error::{FlowError, Result};
use crate::message::StateMessage;
use crate::participant::{ChoiceReport, Participant};

/// Host that records every call.
#[derive(Default)]
pub(crate) struct RecordingHost {
	pub seed: Mutex<Vec<Participant>>,
	pub fail_fetch: AtomicBool,
	pub views: Mutex<Vec<(String, Value)>>,
	pub updates: Mutex<Vec<Value>>,
	pub changes: Mutex<Vec<Vec<String>>>,
	pub suppress: Mutex<Vec<Suppress>>,
	pub ignored: Mutex<Vec<bool>>,
	pub logs: Mutex<Vec<(String, Value)>>,
}

impl RecordingHost {
	pub fn with_seed(seed: Vec<Participant>) -> Arc<Self> {
		let host = Self::default();
		*host.seed.lock() = seed;
		Arc::new(host)
	}

	pub fn last_view(&self) -> Option<String> {
		self.views.lock().last().map(|(v, _)| v.clone())
	}
}

#[async_trait]
impl Host for RecordingHost {
	async fn fetch_roster(&self) -> Result<Vec<Participant>> {
		if self.fail_fetch.load(Ordering::SeqCst) {
			return Err(FlowError::Host("roster unavailable".into()));
		}
		Ok(self.seed.lock().clone())
	}

	async fn write_log(&self, app_id: &str, log: Value) -> Result<()> {
		self.logs.lock().push((app_id.to_string(), log));
		Ok(())
	}

	fn load_view(&self, view: &str, options: Value) {
		self.views.lock().push((view.to_string(), options));
	}

	fn update_view(&self, options: Value) {
		self.updates.lock().push(options);
	}

	fn participants_changed(&self, batch: &[Participant]) {
		self.changes
			.lock()
			.push(batch.iter().map(|p| p.alias.clone()).collect());
	}

	fn suppress_updates(&self, mode: Suppress) {
		self.suppress.lock().push(mode);
	}

	fn set_choices_ignored(&self, ignored: bool) {
		self.ignored.lock().push(ignored);
	}
}

/// Configurable behavior that journals its hooks.
pub(crate) struct Scripted {
	name: String,
	flow: Flow,
	journal: Arc<Mutex<Vec<String>>>,
	pub allow_next: Arc<AtomicBool>,
	fail_entry: bool,
	subscribe: bool,
}

impl Scripted {
	pub fn view(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
		Self {
			name: name.to_string(),
			flow: Flow::Stay,
			journal: journal.clone(),
			allow_next: Arc::new(AtomicBool::new(true)),
			fail_entry: false,
			subscribe: false,
		}
	}

	pub fn pass(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
		Self {
			flow: Flow::Advance,
			..Self::view(name, journal)
		}
	}

	pub fn failing_entry(mut self) -> Self {
		self.fail_entry = true;
		self
	}

	pub fn subscribing(mut self) -> Self {
		self.subscribe = true;
		self
	}

	fn note(&self, event: &str) {
		self.journal.lock().push(format!("{event}:{}", self.name));
	}
}

#[async_trait]
impl Behavior for Scripted {
	fn name(&self) -> &str {
		&self.name
	}

	async fn on_entry(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) -> Result<()> {
		self.note("enter");
		if self.fail_entry {
			return Err(FlowError::Host("entry failed".into()));
		}
		Ok(())
	}

	fn run(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		if self.subscribe {
			ctx.subscribe(Topic::Choices);
		}
		if self.flow == Flow::Stay {
			ctx.render(&self.name, json!({}));
		}
		self.flow
	}

	fn on_exit(&mut self, _ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		self.note("exit");
		Some(input.clone().with("last", json!(self.name)))
	}

	fn validate_next(&self, _input: &StateMessage) -> bool {
		self.allow_next.load(Ordering::SeqCst)
	}

	fn on_choices(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage, report: &ChoiceReport) {
		self.journal
			.lock()
			.push(format!("choices:{}:{}", self.name, report.applied.len()));
	}

	fn rerender(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) {
		self.note("rerender");
		ctx.render(&self.name, json!({}));
	}

	fn handle_configure(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage) {
		self.note("configure");
	}

	fn update(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage, data: &Value) {
		self.journal.lock().push(format!("update:{}:{data}", self.name));
	}
}

pub(crate) fn journal() -> Arc<Mutex<Vec<String>>> {
	Arc::new(Mutex::new(Vec::new()))
}
