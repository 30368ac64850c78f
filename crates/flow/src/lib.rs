//! Hierarchical state machine for moderator-led classroom exercises.
//!
//! An exercise is a [`StateApp`]: a sequence of top-level states, some of
//! them composites (rounds) or repeating composites (phases), driven
//! forward and backward by a controller. States are plain [`Behavior`]
//! implementations; the machine owns them in an arena and handles entry,
//! exit, snapshot replay on rewind and auto-advance of non-view states.
//!
//! The app never talks to sockets. Views, roster persistence and logs go
//! through the [`Host`] seam, which the relay implements per session.

pub mod app;
pub mod behavior;
pub mod builder;
pub mod error;
pub mod machine;
pub mod message;
pub mod participant;
pub mod states;
pub mod teams;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{AppDefinition, Progress, StateApp};
pub use behavior::{Behavior, Context, Flow, Host, Suppress, Topic};
pub use builder::{OutputFn, RepeatCount, STATE_OUTPUTS_KEY, StateSpec};
pub use error::{ChoiceError, FlowError, Result};
pub use machine::{Machine, Outcome, StateId};
pub use message::{Snapshot, StateMessage};
pub use participant::{
	BOT_ALIAS, ChangeWatcher, Choice, ChoiceReport, Pairing, Participant, Roster, SharedRoster,
};
pub use teams::{SharedTeams, Team, Teams};
