//! Browser connections attached to one session.

use clicker_protocol::{ClientInfo, Registered, Role, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Connection ids count up to this value, then start over at 1.
const ID_WRAP: u32 = 1000;

/// Outbound half of an attached browser.
#[derive(Debug, Clone)]
pub struct Client {
	pub id: String,
	pub name: Option<String>,
	tx: UnboundedSender<ServerEvent>,
}

impl Client {
	fn info(&self) -> ClientInfo {
		ClientInfo {
			id: self.id.clone(),
			name: self.name.clone(),
		}
	}

	/// `false` once the connection's writer is gone.
	fn send(&self, event: ServerEvent) -> bool {
		self.tx.send(event).is_ok()
	}
}

#[derive(Default)]
struct Clients {
	controller: Option<Client>,
	viewers: Vec<Client>,
	viewer_seq: u32,
	controller_seq: u32,
}

fn next_id(seq: &mut u32, prefix: &str) -> String {
	*seq = *seq % ID_WRAP + 1;
	format!("{prefix}{seq}")
}

/// The controller and viewers of a session.
///
/// Shared between the hub and the app host, so the app can broadcast views
/// without holding the hub itself.
#[derive(Default)]
pub struct Audience {
	session: String,
	clients: Mutex<Clients>,
}

impl Audience {
	pub fn new(session: impl Into<String>) -> Self {
		Self {
			session: session.into(),
			clients: Mutex::default(),
		}
	}

	/// Attaches a viewer and returns its id. The viewer is acknowledged and
	/// the controller, if any, is told about it.
	pub fn add_viewer(&self, name: Option<String>, tx: UnboundedSender<ServerEvent>) -> String {
		let mut clients = self.clients.lock();
		let id = next_id(&mut clients.viewer_seq, "viewer");
		let viewer = Client { id: id.clone(), name, tx };

		viewer.send(ServerEvent::Registered(Registered {
			role: Role::Viewer,
			id: id.clone(),
			name: viewer.name.clone(),
		}));
		if let Some(controller) = &clients.controller {
			controller.send(ServerEvent::ViewerConnect(viewer.info()));
		}

		info!(target = "clicker.hub", session = %self.session, viewer = %id, "viewer attached");
		clients.viewers.push(viewer);
		id
	}

	pub fn remove_viewer(&self, id: &str) -> bool {
		let mut clients = self.clients.lock();
		let Some(index) = clients.viewers.iter().position(|v| v.id == id) else {
			return false;
		};
		let viewer = clients.viewers.swap_remove(index);
		if let Some(controller) = &clients.controller {
			controller.send(ServerEvent::ViewerDisconnect(viewer.info()));
		}
		info!(target = "clicker.hub", session = %self.session, viewer = %id, "viewer detached");
		true
	}

	/// Installs a new controller, replacing the current one. Returns the new
	/// controller's id; it receives its acknowledgement and the viewer list.
	pub fn set_controller(&self, name: Option<String>, tx: UnboundedSender<ServerEvent>) -> String {
		let mut clients = self.clients.lock();
		let id = next_id(&mut clients.controller_seq, "controller");
		let controller = Client { id: id.clone(), name, tx };

		controller.send(ServerEvent::Registered(Registered {
			role: Role::Controller,
			id: id.clone(),
			name: controller.name.clone(),
		}));
		controller.send(ServerEvent::ViewerList {
			viewers: clients.viewers.iter().map(Client::info).collect(),
		});

		if let Some(previous) = clients.controller.replace(controller) {
			info!(target = "clicker.hub", session = %self.session, previous = %previous.id, controller = %id, "controller replaced");
		} else {
			info!(target = "clicker.hub", session = %self.session, controller = %id, "controller attached");
		}
		id
	}

	/// Detaches the controller only if `id` is still the active one.
	pub fn remove_controller(&self, id: &str) -> bool {
		let mut clients = self.clients.lock();
		if clients.controller.as_ref().is_some_and(|c| c.id == id) {
			clients.controller = None;
			info!(target = "clicker.hub", session = %self.session, controller = %id, "controller detached");
			true
		} else {
			false
		}
	}

	pub fn has_controller(&self) -> bool {
		self.clients.lock().controller.is_some()
	}

	pub fn is_controller(&self, id: &str) -> bool {
		self.clients.lock().controller.as_ref().is_some_and(|c| c.id == id)
	}

	/// Sends to the controller. Returns `false` when there is none.
	pub fn to_controller(&self, event: ServerEvent) -> bool {
		match &self.clients.lock().controller {
			Some(controller) => controller.send(event),
			None => false,
		}
	}

	/// Sends to every viewer, skipping connections that already closed.
	pub fn broadcast(&self, event: &ServerEvent) -> usize {
		let clients = self.clients.lock();
		let mut delivered = 0;
		for viewer in &clients.viewers {
			if viewer.send(event.clone()) {
				delivered += 1;
			} else {
				debug!(target = "clicker.hub", session = %self.session, viewer = %viewer.id, "skipping closed viewer");
			}
		}
		delivered
	}

	pub fn to_viewer(&self, id: &str, event: ServerEvent) -> bool {
		let clients = self.clients.lock();
		clients
			.viewers
			.iter()
			.find(|v| v.id == id)
			.is_some_and(|viewer| viewer.send(event))
	}

	pub fn viewer_count(&self) -> usize {
		self.clients.lock().viewers.len()
	}
}
