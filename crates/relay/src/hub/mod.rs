//! Session hub - one running exercise and everything attached to it.
//!
//! A [`SessionHub`] joins three parties:
//!
//! - the shared [`DeviceLink`], heard through a keyed listener so a
//!   reconnect never delivers an event twice
//! - at most one controller and any number of viewers ([`Audience`])
//! - the session's [`StateApp`], driven by the controller and fed with
//!   device choices
//!
//! Device events go to the controller only. Participant changes made by the
//! app are coalesced in an [`UpdateBuffer`] and flushed to viewers on a
//! fixed interval.

mod audience;
mod buffer;
mod gate;
mod host;

use std::sync::{Arc, Weak};

use clicker_device::commands::{DISABLE_CHOICES, ENABLE_CHOICES, PING, STATUS, SUBMIT_CHOICE};
use clicker_device::{DeviceEvent, DeviceLink, LinkEvent};
use clicker_flow::{AppDefinition, Choice, Progress, StateApp};
use clicker_protocol::{
	AppStatus, ChoiceEntry, ClientEvent, CommandFailure, Role, ServerEvent, target_viewer,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

pub use audience::Audience;
pub use buffer::UpdateBuffer;
pub use gate::ChoiceGate;
pub use host::HubHost;

use crate::config::RelayConfig;
use crate::error::Result;

/// Suffix of the device listener key registered by each hub.
const LISTENER_SUFFIX: &str = "PSH";

pub struct SessionHub {
	id: String,
	config: Arc<RelayConfig>,
	link: Arc<DeviceLink>,
	audience: Arc<Audience>,
	buffer: Arc<UpdateBuffer>,
	gate: Arc<ChoiceGate>,
	app: tokio::sync::Mutex<StateApp>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionHub {
	/// Builds the hub and wires `definition` to it. Nothing runs until
	/// [`SessionHub::start`].
	pub fn new(
		id: impl Into<String>,
		config: Arc<RelayConfig>,
		link: Arc<DeviceLink>,
		definition: AppDefinition,
	) -> Result<Arc<Self>> {
		let id = id.into();
		let audience = Arc::new(Audience::new(id.clone()));
		let buffer = Arc::new(UpdateBuffer::new());
		let gate = Arc::new(ChoiceGate::new());
		let host = HubHost::new(
			id.clone(),
			config.roster.clone(),
			config.log_dir.clone(),
			audience.clone(),
			buffer.clone(),
			gate.clone(),
		);
		let app = StateApp::new(definition, Arc::new(host))?;

		Ok(Arc::new(Self {
			id,
			config,
			link,
			audience,
			buffer,
			gate,
			app: tokio::sync::Mutex::new(app),
			tasks: Mutex::new(Vec::new()),
		}))
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn audience(&self) -> &Audience {
		&self.audience
	}

	pub fn gate(&self) -> &ChoiceGate {
		&self.gate
	}

	pub fn link(&self) -> &Arc<DeviceLink> {
		&self.link
	}

	/// The session's app. Holding the guard serializes transitions.
	pub fn app(&self) -> &tokio::sync::Mutex<StateApp> {
		&self.app
	}

	fn listener_key(&self) -> String {
		format!("{}{LISTENER_SUFFIX}", self.id)
	}

	/// Starts the app and spawns the device pump, the reconnect timer and
	/// the update flush timer.
	pub async fn start(self: &Arc<Self>) {
		self.app.lock().await.start().await;

		let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();

		let hub = Arc::downgrade(self);
		let pump = tokio::spawn(async move {
			while let Some(event) = rx.recv().await {
				let Some(hub) = hub.upgrade() else {
					break;
				};
				hub.on_link_event(event).await;
			}
		});

		let reconnect = self.spawn_reconnect(tx);
		let flush = self.spawn_flush();
		self.tasks.lock().extend([pump, reconnect, flush]);
		info!(target = "clicker.hub", session = %self.id, "session started");
	}

	/// Attaches to the device link now and then on every reconnect tick.
	/// The link only does work when the socket or the listener is missing.
	fn spawn_reconnect(self: &Arc<Self>, tx: UnboundedSender<LinkEvent>) -> JoinHandle<()> {
		let hub: Weak<Self> = Arc::downgrade(self);
		let key = self.listener_key();
		let period = self.config.device.reconnect_interval();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(link) = hub.upgrade().map(|hub| hub.link.clone()) else {
					break;
				};
				let attach = link.attach(&key, &tx).await;
				trace!(target = "clicker.hub", key = %key, ?attach, "device attach");
			}
		})
	}

	fn spawn_flush(self: &Arc<Self>) -> JoinHandle<()> {
		let hub = Arc::downgrade(self);
		let period = self.config.flush_interval();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				ticker.tick().await;
				let Some(hub) = hub.upgrade() else {
					break;
				};
				hub.flush();
			}
		})
	}

	/// Sends buffered participant changes to viewers as one update.
	pub fn flush(&self) -> usize {
		if self.buffer.is_empty() {
			return 0;
		}
		let participants = self.buffer.take();
		let count = participants.len();
		trace!(target = "clicker.hub", session = %self.id, count, "flushing participant updates");
		self.audience.broadcast(&ServerEvent::UpdateView {
			options: json!({ "participants": participants }),
		});
		count
	}

	/// Attaches a browser under `role`. Returns the assigned connection id,
	/// or `None` for roles the hub does not serve.
	pub async fn attach(&self, role: Role, name: Option<String>, tx: UnboundedSender<ServerEvent>) -> Option<String> {
		match role {
			Role::Viewer => Some(self.add_viewer(name, tx).await),
			Role::Controller => Some(self.set_controller(name, tx).await),
			Role::Unknown => None,
		}
	}

	/// Adds a viewer and replays the current view to the session.
	pub async fn add_viewer(&self, name: Option<String>, tx: UnboundedSender<ServerEvent>) -> String {
		let id = self.audience.add_viewer(name, tx);
		self.app.lock().await.rerender();
		id
	}

	/// Installs the newest controller. It learns the device state and the
	/// app position right away.
	pub async fn set_controller(&self, name: Option<String>, tx: UnboundedSender<ServerEvent>) -> String {
		let id = self.audience.set_controller(name, tx);
		if self.link.is_connected() {
			self.audience.to_controller(ServerEvent::ConnectParticipantServer(true));
			self.link.send(STATUS, &[]);
		}
		let status = self.app.lock().await.status();
		self.report_status(status);
		id
	}

	/// Removes a browser after its connection closed.
	pub fn detach(&self, role: Role, id: &str) {
		match role {
			Role::Viewer => {
				self.audience.remove_viewer(id);
			}
			Role::Controller => {
				self.audience.remove_controller(id);
			}
			Role::Unknown => {}
		}
	}

	/// Routes a browser frame from connection `id`.
	pub async fn handle_client(&self, role: Role, id: &str, event: ClientEvent) {
		match role {
			Role::Controller => self.handle_controller(id, event).await,
			Role::Viewer => self.handle_viewer(id, event),
			Role::Unknown => {}
		}
	}

	async fn handle_controller(&self, id: &str, event: ClientEvent) {
		if !self.audience.is_controller(id) {
			debug!(target = "clicker.hub", session = %self.id, controller = id, event = event.name(), "ignoring replaced controller");
			return;
		}

		match event {
			ClientEvent::Register(_) => {
				warn!(target = "clicker.hub", session = %self.id, controller = id, "already registered");
			}
			ClientEvent::SubmitChoice(entry) => {
				self.link.send(SUBMIT_CHOICE, &[json!({ "id": entry.id, "choice": entry.choice })]);
			}
			ClientEvent::EnableChoices => self.enable_choices(),
			ClientEvent::DisableChoices => self.disable_choices(),
			ClientEvent::Status => {
				self.link.send(STATUS, &[]);
			}
			ClientEvent::AppMessage(message) => match target_viewer(&message).map(str::to_owned) {
				Some(viewer) => {
					if !self.audience.to_viewer(&viewer, ServerEvent::AppMessage(message)) {
						debug!(target = "clicker.hub", session = %self.id, viewer = %viewer, "app message target is gone");
					}
				}
				None => {
					self.audience.broadcast(&ServerEvent::AppMessage(message));
				}
			},
			ClientEvent::AppNext => self.app_next().await,
			ClientEvent::AppPrev => self.app_prev().await,
			ClientEvent::AppConfigure(partial) => {
				let status = {
					let mut app = self.app.lock().await;
					app.configure(partial);
					app.status()
				};
				self.report_status(status);
			}
			ClientEvent::AppUpdate(data) => {
				self.app.lock().await.update(&data);
			}
		}
	}

	/// Viewer frames go to the controller, tagged with the viewer id.
	fn handle_viewer(&self, id: &str, event: ClientEvent) {
		if let ClientEvent::Register(_) = event {
			warn!(target = "clicker.hub", session = %self.id, viewer = id, "already registered");
			return;
		}
		let name = event.name();
		let data = serde_json::to_value(&event)
			.ok()
			.and_then(|mut frame| frame.get_mut("data").map(Value::take))
			.unwrap_or(Value::Null);
		let message = json!({ "viewer": id, "event": name, "data": data });
		if !self.audience.to_controller(ServerEvent::AppMessage(message)) {
			trace!(target = "clicker.hub", session = %self.id, viewer = id, event = name, "no controller for viewer message");
		}
	}

	pub fn enable_choices(&self) {
		self.link.send(ENABLE_CHOICES, &[]);
	}

	/// Discards incoming choices until the device confirms the disable.
	pub fn disable_choices(&self) {
		self.gate.request_disable();
		if !self.link.send(DISABLE_CHOICES, &[]) {
			self.gate.cancel_disable();
		}
	}

	pub async fn app_next(&self) {
		let status = {
			let mut app = self.app.lock().await;
			app.next().await;
			app.status()
		};
		self.report_status(status);
	}

	pub async fn app_prev(&self) {
		let status = {
			let mut app = self.app.lock().await;
			app.prev().await;
			app.status()
		};
		self.report_status(status);
	}

	fn report_status(&self, progress: Progress) {
		self.audience.to_controller(ServerEvent::AppState(AppStatus {
			current: progress.current.unwrap_or_default(),
			description: progress.description,
			has_next: progress.has_next,
			has_prev: progress.has_prev,
		}));
	}

	pub async fn on_link_event(&self, event: LinkEvent) {
		match event {
			LinkEvent::Connected => {
				info!(target = "clicker.hub", session = %self.id, "device connected");
				self.audience.to_controller(ServerEvent::ConnectParticipantServer(true));
			}
			LinkEvent::Disconnected => {
				info!(target = "clicker.hub", session = %self.id, "device disconnected");
				self.gate.reset();
				self.audience.to_controller(ServerEvent::ConnectParticipantServer(false));
			}
			LinkEvent::Device(DeviceEvent::Choices(entries)) => self.on_choices(entries).await,
			LinkEvent::Device(DeviceEvent::Command { name, token, data }) => {
				self.on_command(name.as_deref(), &token, data);
			}
			LinkEvent::Device(DeviceEvent::Error { name, token, message }) => {
				warn!(target = "clicker.hub", session = %self.id, command = ?name, token = ?token, error = %message, "device command failed");
				self.audience.to_controller(ServerEvent::CommandError(CommandFailure {
					command: name,
					message,
				}));
			}
		}
	}

	fn on_command(&self, name: Option<&str>, token: &str, data: Value) {
		let event = match name {
			Some(ENABLE_CHOICES) => {
				self.gate.enabled(&data);
				ServerEvent::EnableChoices(data)
			}
			Some(DISABLE_CHOICES) => {
				self.gate.disabled(&data);
				ServerEvent::DisableChoices(data)
			}
			Some(STATUS) => {
				self.gate.status(&data);
				ServerEvent::Status(data)
			}
			Some(PING) => return,
			_ => {
				debug!(target = "clicker.hub", session = %self.id, token, "unhandled device command");
				return;
			}
		};
		self.audience.to_controller(event);
	}

	async fn on_choices(&self, entries: Vec<ChoiceEntry>) {
		if !self.audience.has_controller() {
			debug!(target = "clicker.hub", session = %self.id, count = entries.len(), "no controller, dropping choices");
			return;
		}

		let (instructor, votes): (Vec<_>, Vec<_>) = if self.config.instructor_control {
			entries.into_iter().partition(|entry| entry.instructor)
		} else {
			(Vec::new(), entries)
		};

		// Only the first instructor press of a batch counts.
		if let Some(press) = instructor.first() {
			self.instructor_command(&press.choice).await;
		}

		if votes.is_empty() {
			return;
		}

		// A transition queued ahead of us on the lock makes this batch stale.
		let epoch = self.gate.epoch();
		let mut app = self.app.lock().await;
		if !self.gate.admits_since(epoch) {
			debug!(target = "clicker.hub", session = %self.id, count = votes.len(), "discarding choices");
			return;
		}

		let choices: Vec<Choice> = votes
			.iter()
			.map(|entry| Choice::new(entry.id.clone(), entry.choice.clone()))
			.collect();
		self.audience.to_controller(ServerEvent::ChoiceData { choices: votes });
		app.dispatch_choices(&choices);
	}

	async fn instructor_command(&self, choice: &str) {
		match choice {
			"A" => {
				if self.gate.accepting() {
					self.disable_choices();
				} else {
					self.enable_choices();
				}
			}
			"C" => self.app_next().await,
			"D" => self.app_prev().await,
			other => debug!(target = "clicker.hub", session = %self.id, choice = other, "unused instructor button"),
		}
	}
}

impl Drop for SessionHub {
	fn drop(&mut self) {
		for task in self.tasks.get_mut().drain(..) {
			task.abort();
		}
		self.link.remove_listener(&self.listener_key());
	}
}
