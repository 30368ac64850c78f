//! Error types for the state machine.

use thiserror::Error;

/// Result type alias for state machine operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors raised while building or driving a state app.
#[derive(Debug, Error)]
pub enum FlowError {
	/// A composite or repeating state was declared without children.
	#[error("state '{0}' has no children")]
	EmptyComposite(String),

	/// Two top-level states share an id.
	#[error("duplicate state id: {0}")]
	DuplicateState(String),

	#[error("unknown state: {0}")]
	UnknownState(String),

	/// Repeat counts can only be changed on repeating states.
	#[error("state '{0}' does not repeat")]
	NotRepeating(String),

	/// An app definition has no states at all.
	#[error("app '{0}' defines no states")]
	NoStates(String),

	/// A participant failed model validation.
	#[error(transparent)]
	Choice(#[from] ChoiceError),

	/// The host collaborator failed (roster fetch, log write).
	#[error("host error: {0}")]
	Host(String),

	#[error("invalid config: {0}")]
	Config(#[from] serde_json::Error),
}

/// A participant mutation rejected at the model boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChoiceError {
	#[error("cannot have empty alias")]
	EmptyAlias,

	#[error("invalid choice {choice} for {alias}, valid choices are {}", valid.join(", "))]
	InvalidChoice {
		alias: String,
		choice: String,
		valid: Vec<String>,
	},

	#[error("unknown participant: {0}")]
	UnknownParticipant(String),
}
