use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::routing::get;
use clicker_device::{CommandTable, DeviceLink, LinkConfig, TcpConnector};
use clicker_protocol::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::apps::AppRegistry;
use crate::config::RelayConfig;
use crate::hub::SessionHub;
use crate::registry::{Attachment, ConnectionRegistry};

type SharedRegistry = Arc<ConnectionRegistry>;

/// Connects the device link and serves browsers until the listener fails.
pub async fn serve(config: RelayConfig) -> Result<()> {
	let addr: SocketAddr = format!("{}:{}", config.host, config.port)
		.parse()
		.with_context(|| format!("Invalid host/port combination: {}:{}", config.host, config.port))?;

	let registry = Arc::new(build_registry(config));

	info!(target = "clicker.server", %addr, app = %registry.config().app, "starting clicker relay");

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind relay server to {addr}"))?;

	axum::serve(listener, router(registry).into_make_service())
		.await
		.context("Relay server error")
}

/// Registry over a TCP device link, with the health check running.
pub fn build_registry(config: RelayConfig) -> ConnectionRegistry {
	let device = &config.device;
	let link = DeviceLink::new(
		Arc::new(TcpConnector::new(device.host.clone(), device.port)),
		CommandTable::clicker(),
		LinkConfig {
			ping_interval: device.ping_interval(),
			..LinkConfig::default()
		},
	);
	// ends with the link
	link.spawn_health_check();
	ConnectionRegistry::new(Arc::new(config), link, AppRegistry::builtin())
}

pub fn router(registry: SharedRegistry) -> Router {
	Router::new()
		.route("/", get(|| async { "OK" }))
		.route(
			"/ws",
			get(
				|ws: WebSocketUpgrade, State(registry): State<SharedRegistry>| async move {
					ws.on_upgrade(|socket| handle_socket(socket, registry))
				},
			),
		)
		.with_state(registry)
}

async fn handle_socket(socket: WebSocket, registry: SharedRegistry) {
	debug!(target = "clicker.server", "browser connected");

	let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(event) = rx_stream.next().await {
			let text = match event.encode() {
				Ok(text) => text,
				Err(err) => {
					warn!(target = "clicker.server", error = %err, "cannot encode browser event");
					continue;
				}
			};
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	let mut attached: Option<(Arc<SessionHub>, Attachment)> = None;
	while let Some(msg) = ws_rx.next().await {
		let text = match msg {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				warn!(target = "clicker.server", error = %err, "browser websocket error");
				break;
			}
		};

		let event = match ClientEvent::decode(text.as_str()) {
			Ok(event) => event,
			Err(err) => {
				warn!(target = "clicker.server", error = %err, "ignoring malformed browser frame");
				continue;
			}
		};

		if let Some((hub, attachment)) = &attached {
			hub.handle_client(attachment.role, &attachment.id, event).await;
			continue;
		}

		match event {
			ClientEvent::Register(registration) => match registry.register(registration, tx.clone()).await {
				Ok(attachment) => attached = attachment,
				Err(err) => error!(target = "clicker.server", error = %err, "registration failed"),
			},
			other => {
				debug!(target = "clicker.server", event = other.name(), "ignoring frame before registration");
			}
		}
	}

	if let Some((hub, attachment)) = attached {
		hub.detach(attachment.role, &attachment.id);
		info!(target = "clicker.server", session = %hub.id(), id = %attachment.id, role = %attachment.role, "browser disconnected");
	}
	send_task.abort();
}
