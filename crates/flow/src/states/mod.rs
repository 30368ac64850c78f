//! Reusable states for partner games.
//!
//! A typical game is `attendance -> botcheck -> partner -> phase -> results`,
//! where each phase repeats a round of `play -> score -> stats`. See
//! [`basic_game`], [`round`] and [`phase`].
//!
//! Team games swap pairing for [`Group`], which splits the roster into two
//! teams partnered across; see [`team_game`].

mod attendance;
mod play;
mod setup;
mod summary;
mod teams;

pub use attendance::Attendance;
pub use play::{Payoff, Play, Score};
pub use setup::{BotCheck, Bucket, Partner};
pub use summary::{Results, Stats};
pub use teams::{Group, TeamPartner, TeamPlay, TeamScore};

use serde_json::Value;

use crate::app::AppDefinition;
use crate::builder::{RepeatCount, StateSpec};
use crate::message::StateMessage;
use crate::participant::{Pairing, SharedRoster};

/// Key under which a phase hands its per-round outputs on.
pub const ROUND_OUTPUTS_KEY: &str = "roundOutputs";

/// One round: its children played in order.
pub fn round(children: Vec<StateSpec>) -> StateSpec {
	StateSpec::composite("round", children)
}

/// A phase of `count` rounds built by `template(index)`.
///
/// Each round's stats end up in the phase output under `roundOutputs`.
pub fn phase<F>(count: RepeatCount, template: F) -> StateSpec
where
	F: Fn(usize) -> StateSpec + Send + Sync + 'static,
{
	StateSpec::repeat("phase", count, template)
		.outputs_key(ROUND_OUTPUTS_KEY)
		.output(|message| message.get("stats").cloned().unwrap_or(Value::Null))
}

/// Check-in, bot top-up and pairing, followed by `states` keyed
/// `state-1`, `state-2`, ...
pub fn basic_game(
	id: impl Into<String>,
	version: impl Into<String>,
	pairing: Pairing,
	states: Vec<StateSpec>,
) -> AppDefinition {
	let mut app = AppDefinition::new(id, version)
		.state("attendance", StateSpec::leaf(Attendance::new()))
		.state("botcheck", StateSpec::leaf(BotCheck::new()))
		.state("partner", StateSpec::leaf(Partner::new(pairing)));
	for (i, spec) in states.into_iter().enumerate() {
		app = app.state(format!("state-{}", i + 1), spec);
	}
	app
}

/// Check-in, bot top-up and team forming, followed by `states` keyed
/// `state-1`, `state-2`, ...
pub fn team_game(id: impl Into<String>, version: impl Into<String>, states: Vec<StateSpec>) -> AppDefinition {
	let mut app = AppDefinition::new(id, version)
		.state("attendance", StateSpec::leaf(Attendance::new()))
		.state("botcheck", StateSpec::leaf(BotCheck::new()))
		.state("group", StateSpec::leaf(Group::new()));
	for (i, spec) in states.into_iter().enumerate() {
		app = app.state(format!("state-{}", i + 1), spec);
	}
	app
}

/// Fresh message carrying only the live roster.
fn roster_message(roster: &SharedRoster) -> StateMessage {
	StateMessage::with_roster(roster.clone())
}
