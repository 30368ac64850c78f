use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::roster_message;
use crate::behavior::{Behavior, Context, Flow, Suppress, Topic};
use crate::error::Result;
use crate::message::StateMessage;
use crate::participant::{ChoiceReport, Participant};

/// Check-in: participants mark themselves present with any choice.
///
/// The roster is reloaded from the host on every entry. Whoever has not
/// made a choice by the time the controller moves on is removed.
pub struct Attendance {
	accept_new: bool,
	fetched: Option<Vec<Participant>>,
}

impl Attendance {
	pub fn new() -> Self {
		Self {
			accept_new: true,
			fetched: None,
		}
	}

	/// Whether unknown aliases may check in.
	pub fn accept_new(mut self, accept: bool) -> Self {
		self.accept_new = accept;
		self
	}

	fn render(&self, ctx: &Context<'_>) {
		let participants = ctx.roster().lock().to_json();
		ctx.render(
			"attendance",
			json!({ "participants": participants, "acceptNew": self.accept_new }),
		);
	}
}

impl Default for Attendance {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Behavior for Attendance {
	fn name(&self) -> &str {
		"attendance"
	}

	async fn on_entry(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Result<()> {
		let participants = ctx.host().fetch_roster().await?;
		debug!(target = "clicker.flow", count = participants.len(), "roster fetched");
		self.fetched = Some(participants);
		Ok(())
	}

	fn run(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		if let Some(participants) = self.fetched.take() {
			// the fresh roster goes out with the view below
			ctx.host().suppress_updates(Suppress::Once);
			ctx.roster().lock().replace(participants.into_iter().map(|mut p| {
				p.reset();
				p
			}));
		}
		if self.accept_new {
			ctx.subscribe(Topic::Choices);
		}
		self.render(ctx);
		Flow::Stay
	}

	fn on_choices(&mut self, ctx: &mut Context<'_>, _input: &StateMessage, report: &ChoiceReport) {
		if report.queued.is_empty() {
			return;
		}
		let added = ctx.roster().lock().add_new_participants();
		debug!(target = "clicker.flow", ?added, "new participants checked in");
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		let mut roster = ctx.roster().lock();
		roster.take_new_participants();
		let absent = roster.retain(|p| p.choice.is_some());
		info!(
			target = "clicker.flow",
			present = roster.len(),
			absent = absent.len(),
			"attendance taken"
		);
		drop(roster);
		Some(roster_message(ctx.roster()))
	}

	fn rerender(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) {
		self.render(ctx);
	}
}
