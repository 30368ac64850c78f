//! Session lookup for inbound browser connections.

use std::sync::Arc;

use clicker_device::DeviceLink;
use clicker_protocol::{Registration, Role, ServerEvent};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::apps::AppRegistry;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::hub::SessionHub;

/// A browser connection attached to a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
	pub id: String,
	pub role: Role,
}

/// Maps session ids to their hubs, creating hubs on first use.
pub struct ConnectionRegistry {
	hubs: DashMap<String, Arc<SessionHub>>,
	link: Arc<DeviceLink>,
	apps: AppRegistry,
	config: Arc<RelayConfig>,
}

impl ConnectionRegistry {
	pub fn new(config: Arc<RelayConfig>, link: Arc<DeviceLink>, apps: AppRegistry) -> Self {
		Self {
			hubs: DashMap::new(),
			link,
			apps,
			config,
		}
	}

	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	/// The hub for `session`, started on first use.
	pub async fn hub(&self, session: &str) -> Result<Arc<SessionHub>> {
		if let Some(hub) = self.hubs.get(session) {
			return Ok(hub.clone());
		}

		// Inserted before starting so concurrent registrations share one hub.
		// The entry guard is released before the hub runs.
		let hub = match self.hubs.entry(session.to_string()) {
			Entry::Occupied(existing) => return Ok(existing.get().clone()),
			Entry::Vacant(slot) => {
				let definition = self.apps.build(&self.config.app, &self.config.app_config)?;
				let hub = SessionHub::new(session, self.config.clone(), self.link.clone(), definition)?;
				slot.insert(hub).clone()
			}
		};
		info!(target = "clicker.hub", session, app = %self.config.app, "session created");
		hub.start().await;
		Ok(hub)
	}

	pub fn get(&self, session: &str) -> Option<Arc<SessionHub>> {
		self.hubs.get(session).map(|hub| hub.clone())
	}

	pub fn sessions(&self) -> Vec<String> {
		self.hubs.iter().map(|entry| entry.key().clone()).collect()
	}

	/// Attaches a registering browser to its session's hub.
	///
	/// Unknown roles are logged and left unattached.
	pub async fn register(
		&self,
		registration: Registration,
		tx: UnboundedSender<ServerEvent>,
	) -> Result<Option<(Arc<SessionHub>, Attachment)>> {
		let Registration { role, session_id, name } = registration;
		if role == Role::Unknown {
			warn!(target = "clicker.hub", session = %session_id, "ignoring registration with unknown type");
			return Ok(None);
		}

		let hub = self.hub(&session_id).await?;
		let attached = hub.attach(role, name, tx).await;
		Ok(attached.map(|id| (hub, Attachment { id, role })))
	}
}

#[cfg(test)]
mod tests {
	use std::io;

	use async_trait::async_trait;
	use clicker_device::{BoxedStream, CommandTable, Connector, LinkConfig};
	use clicker_protocol::Registered;
	use tokio::sync::mpsc;

	use super::*;

	struct Refusing;

	#[async_trait]
	impl Connector for Refusing {
		async fn connect(&self) -> io::Result<BoxedStream> {
			Err(io::Error::new(io::ErrorKind::ConnectionRefused, "offline"))
		}

		fn describe(&self) -> String {
			"offline".to_string()
		}
	}

	fn registry(app: &str) -> ConnectionRegistry {
		let config = RelayConfig {
			app: app.to_string(),
			..RelayConfig::default()
		};
		let link = DeviceLink::new(Arc::new(Refusing), CommandTable::clicker(), LinkConfig::default());
		ConnectionRegistry::new(Arc::new(config), link, AppRegistry::builtin())
	}

	fn registration(role: Role, session: &str) -> Registration {
		Registration {
			role,
			session_id: session.to_string(),
			name: None,
		}
	}

	#[tokio::test]
	async fn sessions_are_created_once_per_id() {
		let registry = registry("pd");
		let (tx, mut rx) = mpsc::unbounded_channel();

		let (hub, attachment) = registry
			.register(registration(Role::Viewer, "m1"), tx.clone())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(attachment.role, Role::Viewer);
		assert_eq!(
			rx.recv().await.unwrap(),
			ServerEvent::Registered(Registered {
				role: Role::Viewer,
				id: attachment.id.clone(),
				name: None,
			})
		);

		let (again, _) = registry
			.register(registration(Role::Controller, "m1"), tx)
			.await
			.unwrap()
			.unwrap();
		assert!(Arc::ptr_eq(&hub, &again));
		assert_eq!(registry.sessions(), vec!["m1".to_string()]);
	}

	#[tokio::test]
	async fn unknown_roles_stay_unattached() {
		let registry = registry("pd");
		let (tx, _rx) = mpsc::unbounded_channel();

		let attached = registry
			.register(registration(Role::Unknown, "m1"), tx)
			.await
			.unwrap();
		assert!(attached.is_none());
		assert!(registry.get("m1").is_none());
	}

	#[tokio::test]
	async fn unknown_apps_fail_registration() {
		let registry = registry("chess");
		let (tx, _rx) = mpsc::unbounded_channel();

		let err = registry
			.register(registration(Role::Viewer, "m1"), tx)
			.await
			.err()
			.expect("unknown app should fail");
		assert!(err.to_string().contains("chess"));
	}
}
