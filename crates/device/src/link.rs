//! The shared connection to the aggregator.
//!
//! A [`DeviceLink`] owns at most one socket. Session hubs register keyed
//! listeners and receive [`LinkEvent`]s over unbounded channels; a hub that
//! re-attaches under the same key replaces its previous sender instead of
//! adding a second one, so no event is ever delivered twice.
//!
//! Socket failure is detected by the reader and writer tasks. Each failure is
//! handled exactly once: the writer is dropped, every listener is removed and
//! told [`LinkEvent::Disconnected`]. Listeners re-attach on their own retry
//! cadence through [`DeviceLink::attach`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::commands::{CommandTable, PING, STATUS};
use crate::connector::{BoxedStream, Connector};
use crate::decoder::{ChunkDecoder, DeviceEvent, group_frames};
use crate::error::Error;

/// Tunables for a [`DeviceLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
	/// Interval between health-check pings.
	pub ping_interval: Duration,
	/// Size of a single socket read.
	pub read_buffer: usize,
}

impl Default for LinkConfig {
	fn default() -> Self {
		Self {
			ping_interval: Duration::from_secs(5),
			read_buffer: 8 * 1024,
		}
	}
}

/// Notification delivered to link listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
	Connected,
	Disconnected,
	Device(DeviceEvent),
}

/// Result of [`DeviceLink::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
	/// A connection attempt was started; the listener hears the outcome.
	Started,
	/// Already connected; the listener was added and told so.
	Attached,
	/// Connected and the key was already listening.
	AlreadyAttached,
	/// Another attempt is in flight; the listener was added and waits for it.
	Pending,
}

#[derive(Default)]
struct LinkState {
	writer: Option<mpsc::UnboundedSender<String>>,
	connecting: bool,
	generation: u64,
	listeners: HashMap<String, mpsc::UnboundedSender<LinkEvent>>,
	tasks: Vec<JoinHandle<()>>,
}

impl LinkState {
	fn abort_tasks(&mut self) {
		for task in self.tasks.drain(..) {
			task.abort();
		}
	}
}

/// Connect-once handle to the aggregator, shared behind an [`Arc`].
pub struct DeviceLink {
	connector: Arc<dyn Connector>,
	commands: CommandTable,
	config: LinkConfig,
	state: Mutex<LinkState>,
}

impl DeviceLink {
	pub fn new(connector: Arc<dyn Connector>, commands: CommandTable, config: LinkConfig) -> Arc<Self> {
		Arc::new(Self {
			connector,
			commands,
			config,
			state: Mutex::new(LinkState::default()),
		})
	}

	pub fn commands(&self) -> &CommandTable {
		&self.commands
	}

	pub fn address(&self) -> String {
		self.connector.describe()
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().writer.is_some()
	}

	pub fn is_connecting(&self) -> bool {
		self.state.lock().connecting
	}

	/// Registers `tx` under `key`, replacing any previous sender for that key.
	pub fn add_listener(&self, key: impl Into<String>, tx: mpsc::UnboundedSender<LinkEvent>) {
		self.state.lock().listeners.insert(key.into(), tx);
	}

	pub fn remove_listener(&self, key: &str) -> bool {
		self.state.lock().listeners.remove(key).is_some()
	}

	pub fn is_listening(&self, key: &str) -> bool {
		self.state.lock().listeners.contains_key(key)
	}

	/// Opens the socket unless one is open or being opened.
	///
	/// Returns `true` when the link is connected afterwards. On success every
	/// listener receives [`LinkEvent::Connected`] and a status query is sent.
	/// On failure listeners receive [`LinkEvent::Disconnected`] and are reset.
	pub async fn connect(self: &Arc<Self>) -> bool {
		{
			let mut state = self.state.lock();
			if state.writer.is_some() {
				return true;
			}
			if state.connecting {
				debug!(target = "clicker.device", "connection attempt already in flight");
				return false;
			}
			state.connecting = true;
		}

		let addr = self.connector.describe();
		debug!(target = "clicker.device", addr = %addr, "connecting to device");

		let stream = match self.connector.connect().await {
			Ok(stream) => stream,
			Err(source) => {
				let err = Error::ConnectionFailed { addr, source };
				warn!(target = "clicker.device", error = %err, "device connection failed");
				let listeners = {
					let mut state = self.state.lock();
					state.connecting = false;
					std::mem::take(&mut state.listeners)
				};
				for tx in listeners.values() {
					let _ = tx.send(LinkEvent::Disconnected);
				}
				return false;
			}
		};

		let (reader, writer) = tokio::io::split(stream);
		let (tx, rx) = mpsc::unbounded_channel();
		{
			let mut state = self.state.lock();
			state.connecting = false;
			state.generation += 1;
			let generation = state.generation;
			state.abort_tasks();
			state.writer = Some(tx);
			state.tasks.push(tokio::spawn(read_loop(
				Arc::downgrade(self),
				reader,
				generation,
				self.config.read_buffer,
			)));
			state.tasks.push(tokio::spawn(write_loop(
				Arc::downgrade(self),
				writer,
				rx,
				generation,
			)));
		}

		info!(target = "clicker.device", addr = %addr, "connected to device");
		self.notify(LinkEvent::Connected);
		self.send(STATUS, &[]);
		true
	}

	/// Attaches a keyed listener, connecting first if needed.
	///
	/// This is the reconnect primitive: callers invoke it on a fixed cadence
	/// and it only does work when the listener or the socket is missing.
	pub async fn attach(self: &Arc<Self>, key: &str, tx: &mpsc::UnboundedSender<LinkEvent>) -> Attach {
		let (connected, connecting, listening) = {
			let mut state = self.state.lock();
			let listening = state.listeners.contains_key(key);
			if !listening {
				state.listeners.insert(key.to_string(), tx.clone());
			}
			(state.writer.is_some(), state.connecting, listening)
		};

		match (connected, connecting, listening) {
			(true, _, true) => Attach::AlreadyAttached,
			(true, _, false) => {
				debug!(target = "clicker.device", key, "listener attached to live link");
				let _ = tx.send(LinkEvent::Connected);
				self.send(STATUS, &[]);
				Attach::Attached
			}
			(false, true, _) => Attach::Pending,
			(false, false, _) => {
				self.connect().await;
				Attach::Started
			}
		}
	}

	/// Sends a named command. Returns `false` when it could not be queued.
	///
	/// Not being connected is an expected condition and only logged.
	pub fn send(&self, name: &str, args: &[Value]) -> bool {
		let command = match self.commands.resolve(name, args) {
			Ok(command) => command,
			Err(err) => {
				warn!(target = "clicker.device", error = %err, "cannot send device command");
				return false;
			}
		};
		let line = match command.to_line() {
			Ok(line) => line,
			Err(err) => {
				warn!(target = "clicker.device", command = name, error = %err, "cannot encode device command");
				return false;
			}
		};

		let state = self.state.lock();
		match &state.writer {
			Some(writer) => {
				trace!(target = "clicker.device", command = name, token = command.token(), "sending");
				writer.send(line).is_ok()
			}
			None => {
				warn!(target = "clicker.device", command = name, "{}", Error::NotConnected);
				false
			}
		}
	}

	pub fn ping(&self) -> bool {
		self.send(PING, &[])
	}

	/// Closes the socket and resets listeners, as for a socket failure.
	pub fn disconnect(&self) {
		let generation = self.state.lock().generation;
		self.fail(generation, "closed locally");
	}

	/// Spawns the periodic ping. The task ends when the link is dropped.
	pub fn spawn_health_check(self: &Arc<Self>) -> JoinHandle<()> {
		let link = Arc::downgrade(self);
		// interval() panics on a zero period
		let period = self.config.ping_interval.max(Duration::from_millis(1));
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let Some(link) = link.upgrade() else {
					break;
				};
				if link.is_connected() {
					link.ping();
				}
			}
		})
	}

	fn notify(&self, event: LinkEvent) {
		let mut state = self.state.lock();
		state
			.listeners
			.retain(|_, tx| tx.send(event.clone()).is_ok());
	}

	fn dispatch(&self, event: DeviceEvent) {
		self.notify(LinkEvent::Device(event));
	}

	/// Tears down connection `generation`. Later calls for the same
	/// generation are no-ops.
	fn fail(&self, generation: u64, reason: &str) {
		let listeners = {
			let mut state = self.state.lock();
			if state.generation != generation || state.writer.is_none() {
				return;
			}
			state.writer = None;
			state.abort_tasks();
			std::mem::take(&mut state.listeners)
		};

		warn!(target = "clicker.device", reason, listeners = listeners.len(), "device disconnected");
		for tx in listeners.values() {
			let _ = tx.send(LinkEvent::Disconnected);
		}
	}
}

impl Drop for DeviceLink {
	fn drop(&mut self) {
		self.state.get_mut().abort_tasks();
	}
}

async fn read_loop(link: Weak<DeviceLink>, mut reader: ReadHalf<BoxedStream>, generation: u64, buffer: usize) {
	let mut buf = vec![0u8; buffer.max(64)];
	let mut bytes = Vec::new();
	let mut decoder = ChunkDecoder::new();

	let reason = loop {
		let n = match reader.read(&mut buf).await {
			Ok(0) => break "closed by device".to_string(),
			Ok(n) => n,
			Err(err) => break err.to_string(),
		};
		let Some(link) = link.upgrade() else {
			return;
		};

		bytes.extend_from_slice(&buf[..n]);
		let valid = match std::str::from_utf8(&bytes) {
			Ok(_) => bytes.len(),
			Err(err) if err.error_len().is_none() => err.valid_up_to(),
			Err(_) => bytes.len(),
		};
		let text = String::from_utf8_lossy(&bytes[..valid]).into_owned();
		bytes.drain(..valid);

		trace!(target = "clicker.device", bytes = n, "read from device");
		for event in group_frames(decoder.feed(&text), &link.commands) {
			link.dispatch(event);
		}
	};

	if let Some(link) = link.upgrade() {
		link.fail(generation, &reason);
	}
}

async fn write_loop(
	link: Weak<DeviceLink>,
	mut writer: WriteHalf<BoxedStream>,
	mut rx: mpsc::UnboundedReceiver<String>,
	generation: u64,
) {
	while let Some(line) = rx.recv().await {
		let result = async {
			writer.write_all(line.as_bytes()).await?;
			writer.flush().await
		}
		.await;

		if let Err(err) = result {
			if let Some(link) = link.upgrade() {
				link.fail(generation, &err.to_string());
			}
			return;
		}
	}
	let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests;
