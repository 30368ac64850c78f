use async_trait::async_trait;
use tracing::debug;

use crate::behavior::{Behavior, Context, Flow};
use crate::message::StateMessage;
use crate::participant::Pairing;

/// Makes the roster pairable: adds a bot when the count is odd.
///
/// Bots from an earlier pass are removed first, so running it again after
/// a rewind never stacks bots.
pub struct BotCheck {
	strategy: Option<String>,
}

impl BotCheck {
	pub fn new() -> Self {
		Self { strategy: None }
	}

	/// Fixed choice the bot always plays.
	pub fn strategy(mut self, choice: impl Into<String>) -> Self {
		self.strategy = Some(choice.into());
		self
	}
}

impl Default for BotCheck {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Behavior for BotCheck {
	fn name(&self) -> &str {
		"botcheck"
	}

	fn run(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		let removed = ctx.roster().lock().remove_bots();
		if !removed.is_empty() {
			debug!(target = "clicker.flow", count = removed.len(), "removed bots");
		}
		Flow::Advance
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		let mut roster = ctx.roster().lock();
		if roster.len() % 2 == 1 {
			let alias = roster.add_bot();
			if let Some(strategy) = &self.strategy {
				let strategy = strategy.clone();
				roster.update(&alias, |bot| bot.strategy = Some(strategy));
			}
			debug!(target = "clicker.flow", %alias, "added bot for odd roster");
		}
		None
	}
}

/// Pairs everyone on exit.
pub struct Partner {
	pairing: Pairing,
}

impl Partner {
	pub fn new(pairing: Pairing) -> Self {
		Self { pairing }
	}
}

#[async_trait]
impl Behavior for Partner {
	fn name(&self) -> &str {
		"partner"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		ctx.roster()
			.lock()
			.pair(self.pairing, None, &mut rand::rng());
		None
	}
}

/// Sorts participants into buckets by a numeric attribute.
///
/// In a team game only team members are bucketed.
pub struct Bucket {
	name: String,
	attribute: String,
	buckets: u32,
}

impl Bucket {
	pub fn new(attribute: impl Into<String>, buckets: u32) -> Self {
		let attribute = attribute.into();
		Self {
			name: format!("bucket:{attribute}"),
			attribute,
			buckets,
		}
	}
}

#[async_trait]
impl Behavior for Bucket {
	fn name(&self) -> &str {
		&self.name
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		let mut roster = ctx.roster().lock();
		match input.teams() {
			Some(teams) => {
				let members: Vec<String> = teams.lock().aliases().cloned().collect();
				roster.bucket_among(&self.attribute, self.buckets, &members);
			}
			None => roster.bucket(&self.attribute, self.buckets),
		}
		None
	}
}
