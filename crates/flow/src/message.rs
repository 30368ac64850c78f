//! Values handed from one state to the next.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::participant::{Participant, SharedRoster};
use crate::teams::{SharedTeams, Teams};

/// Bag of named values passed between states.
///
/// The live roster and, in team games, the live teams travel by handle;
/// everything else is plain JSON.
/// Messages are treated as immutable: states derive new ones with
/// [`StateMessage::clone_with`].
#[derive(Clone, Default)]
pub struct StateMessage {
	roster: Option<SharedRoster>,
	teams: Option<SharedTeams>,
	values: Map<String, Value>,
}

impl std::fmt::Debug for StateMessage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StateMessage")
			.field("roster", &self.roster.as_ref().map(|r| r.lock().len()))
			.field("teams", &self.teams.as_ref().map(|t| t.lock().clone()))
			.field("values", &self.values)
			.finish()
	}
}

impl StateMessage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_roster(roster: SharedRoster) -> Self {
		Self {
			roster: Some(roster),
			teams: None,
			values: Map::new(),
		}
	}

	pub fn roster(&self) -> Option<&SharedRoster> {
		self.roster.as_ref()
	}

	pub fn teams(&self) -> Option<&SharedTeams> {
		self.teams.as_ref()
	}

	pub fn with_teams(mut self, teams: SharedTeams) -> Self {
		self.teams = Some(teams);
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	pub fn values(&self) -> &Map<String, Value> {
		&self.values
	}

	pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
		self.values.insert(key.into(), value);
		self
	}

	/// Shallow copy with `overrides` merged over the existing values.
	pub fn clone_with(&self, overrides: Map<String, Value>) -> Self {
		let mut next = self.clone();
		next.values.extend(overrides);
		next
	}

	/// Plain-data copy for later replay.
	pub fn snapshot(&self) -> Snapshot {
		Snapshot {
			participants: self.roster.as_ref().map(|r| r.lock().records()),
			teams: self.teams.as_ref().map(|t| t.lock().clone()),
			values: self.values.clone(),
		}
	}

	/// Content view used to compare messages regardless of handle identity.
	pub fn content(&self) -> (Option<Vec<Participant>>, Option<Teams>, &Map<String, Value>) {
		(
			self.roster.as_ref().map(|r| r.lock().records()),
			self.teams.as_ref().map(|t| t.lock().clone()),
			&self.values,
		)
	}
}

/// Serializable copy of a [`StateMessage`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub participants: Option<Vec<Participant>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub teams: Option<Teams>,
	#[serde(default)]
	pub values: Map<String, Value>,
}

impl Snapshot {
	/// Rebuilds a live message on top of `previous`.
	///
	/// The snapshot's values override `previous`'s. Participant records and
	/// team membership are restored into `previous`'s live roster and teams,
	/// so every state keeps sharing the same handles. Without a previous
	/// message there is nothing to attach to and `None` is returned.
	pub fn activate(&self, previous: Option<&StateMessage>) -> Option<StateMessage> {
		let previous = previous?;
		let mut message = previous.clone();
		message
			.values
			.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));

		if let (Some(records), Some(roster)) = (&self.participants, &message.roster) {
			roster.lock().restore(records);
		}
		if let (Some(saved), Some(teams)) = (&self.teams, &message.teams) {
			*teams.lock() = saved.clone();
		}
		Some(message)
	}
}
