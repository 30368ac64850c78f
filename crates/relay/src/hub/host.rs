//! The session side of the state machine's [`Host`] seam.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clicker_flow::{FlowError, Host, Participant, Suppress};
use clicker_protocol::ServerEvent;
use serde_json::Value;
use tracing::{debug, info};

use super::audience::Audience;
use super::buffer::UpdateBuffer;
use super::gate::ChoiceGate;

/// Connects a running app to its session's viewers, update buffer and
/// voting flags.
pub struct HubHost {
	session: String,
	roster: Vec<Participant>,
	log_dir: Option<PathBuf>,
	audience: Arc<Audience>,
	buffer: Arc<UpdateBuffer>,
	gate: Arc<ChoiceGate>,
}

impl HubHost {
	pub fn new(
		session: impl Into<String>,
		roster: Vec<Participant>,
		log_dir: Option<PathBuf>,
		audience: Arc<Audience>,
		buffer: Arc<UpdateBuffer>,
		gate: Arc<ChoiceGate>,
	) -> Self {
		Self {
			session: session.into(),
			roster,
			log_dir,
			audience,
			buffer,
			gate,
		}
	}
}

fn millis_now() -> u128 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or_default()
}

#[async_trait]
impl Host for HubHost {
	async fn fetch_roster(&self) -> clicker_flow::Result<Vec<Participant>> {
		Ok(self.roster.clone())
	}

	async fn write_log(&self, app_id: &str, log: Value) -> clicker_flow::Result<()> {
		let Some(dir) = &self.log_dir else {
			info!(target = "clicker.hub", session = %self.session, app = app_id, log = %log, "exercise log");
			return Ok(());
		};

		let path = dir.join(format!("{app_id}-{}.json", millis_now()));
		let text = serde_json::to_string_pretty(&log).map_err(|err| FlowError::Host(err.to_string()))?;
		tokio::fs::create_dir_all(dir)
			.await
			.map_err(|err| FlowError::Host(format!("cannot create {}: {err}", dir.display())))?;
		tokio::fs::write(&path, text)
			.await
			.map_err(|err| FlowError::Host(format!("cannot write {}: {err}", path.display())))?;

		info!(target = "clicker.hub", session = %self.session, path = %path.display(), "exercise log written");
		Ok(())
	}

	fn load_view(&self, view: &str, options: Value) {
		debug!(target = "clicker.hub", session = %self.session, view, "load view");
		self.audience.broadcast(&ServerEvent::LoadView {
			view: view.to_string(),
			options,
		});
	}

	fn update_view(&self, options: Value) {
		self.audience.broadcast(&ServerEvent::UpdateView { options });
	}

	fn participants_changed(&self, batch: &[Participant]) {
		self.buffer.push(batch);
	}

	fn suppress_updates(&self, mode: Suppress) {
		self.buffer.set_mode(mode);
	}

	fn set_choices_ignored(&self, ignored: bool) {
		self.gate.set_transitioning(ignored);
	}
}
