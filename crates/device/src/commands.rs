//! Command registry for the aggregator.
//!
//! Commands are addressed by name (`enableChoices`, `status`, ...). Each name
//! resolves either to a literal protocol token, sent as `{"command": token}`,
//! or to a constructor that computes the full command from its arguments.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use clicker_protocol::DeviceCommand;
use serde_json::Value;

use crate::error::{Error, Result};

pub const ENABLE_CHOICES: &str = "enableChoices";
pub const DISABLE_CHOICES: &str = "disableChoices";
pub const PING: &str = "ping";
pub const STATUS: &str = "status";
pub const SUBMIT_CHOICE: &str = "submitChoice";

/// Builds a command from its call arguments.
pub type CommandBuilder = Arc<dyn Fn(&[Value]) -> DeviceCommand + Send + Sync>;

/// How a command name turns into bytes on the wire.
#[derive(Clone)]
pub enum CommandSpec {
	/// Literal protocol token.
	Token(String),
	/// Constructor evaluated per call.
	Build(CommandBuilder),
}

impl fmt::Debug for CommandSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CommandSpec::Token(token) => f.debug_tuple("Token").field(token).finish(),
			CommandSpec::Build(_) => f.write_str("Build(..)"),
		}
	}
}

/// Name to command resolution table.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
	specs: HashMap<String, CommandSpec>,
}

impl CommandTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// The command set understood by the clicker aggregator.
	pub fn clicker() -> Self {
		let mut table = Self::new();
		table.insert_token(ENABLE_CHOICES, "enable choices");
		table.insert_token(DISABLE_CHOICES, "disable choices");
		table.insert_token(PING, "ping");
		table.insert_token(STATUS, "status");
		table.insert_builder(SUBMIT_CHOICE, |args| DeviceCommand::Named {
			command: "choose".to_string(),
			arguments: args.first().cloned().into_iter().collect(),
		});
		table
	}

	pub fn insert_token(&mut self, name: impl Into<String>, token: impl Into<String>) {
		self.specs
			.insert(name.into(), CommandSpec::Token(token.into()));
	}

	pub fn insert_builder<F>(&mut self, name: impl Into<String>, build: F)
	where
		F: Fn(&[Value]) -> DeviceCommand + Send + Sync + 'static,
	{
		self.specs
			.insert(name.into(), CommandSpec::Build(Arc::new(build)));
	}

	pub fn contains(&self, name: &str) -> bool {
		self.specs.contains_key(name)
	}

	/// Resolves a command name and its arguments into a wire command.
	pub fn resolve(&self, name: &str, args: &[Value]) -> Result<DeviceCommand> {
		match self.specs.get(name) {
			Some(CommandSpec::Token(token)) => Ok(DeviceCommand::named(token.clone())),
			Some(CommandSpec::Build(build)) => Ok(build(args)),
			None => Err(Error::UnknownCommand(name.to_string())),
		}
	}

	/// Maps an echoed protocol token back to its command name.
	///
	/// Only literal tokens can be reversed; constructed commands have no
	/// fixed token.
	pub fn name_for_token(&self, token: &str) -> Option<&str> {
		self.specs.iter().find_map(|(name, spec)| match spec {
			CommandSpec::Token(t) if t == token => Some(name.as_str()),
			_ => None,
		})
	}
}
