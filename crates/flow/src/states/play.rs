use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::roster_message;
use crate::behavior::{Behavior, Context, Flow, Suppress, Topic};
use crate::message::StateMessage;
use crate::participant::{ChoiceReport, Participant, Roster};

/// Choice a participant is given when they did not play.
const DEFAULT_CHOICE: &str = "A";

/// A voting round's view.
///
/// Entering resets every participant and restricts them to the round's
/// valid choices. Bots play immediately. Late joiners replace a bot when
/// there is one, otherwise they are paired among themselves.
pub struct Play {
	valid_choices: Vec<String>,
	default_choice: Option<String>,
	round: Option<usize>,
}

impl Play {
	pub fn new(valid_choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			valid_choices: valid_choices.into_iter().map(Into::into).collect(),
			default_choice: Some(DEFAULT_CHOICE.to_string()),
			round: None,
		}
	}

	/// 1-based round number shown in the view.
	pub fn round(mut self, round: usize) -> Self {
		self.round = Some(round);
		self
	}

	/// Choice filled in on exit for those who did not play; `None` leaves
	/// them without a choice.
	pub fn default_choice(mut self, choice: Option<String>) -> Self {
		self.default_choice = choice;
		self
	}

	fn options(&self, roster: &Roster) -> Value {
		json!({
			"participants": roster.to_json(),
			"round": self.round,
			"validChoices": self.valid_choices,
		})
	}

	fn render(&self, ctx: &Context<'_>) {
		let options = self.options(&ctx.roster().lock());
		ctx.render("play", options);
	}

	fn admit_newcomers(&self, roster: &mut Roster) {
		if !roster.has_new_participants() {
			return;
		}
		let mut unpaired = Vec::new();
		for mut newcomer in roster.take_new_participants() {
			newcomer.valid_choices = Some(self.valid_choices.clone());
			if newcomer.validate_choice(newcomer.choice.as_deref()).is_err() {
				newcomer.reset();
				newcomer.valid_choices = Some(self.valid_choices.clone());
			}
			let alias = newcomer.alias.clone();

			let bot = roster.first_bot().map(|b| (b.alias.clone(), b.partner.clone()));
			match bot {
				Some((bot, partner)) => {
					roster.remove(&bot);
					roster.insert(newcomer);
					if let Some(partner) = partner {
						roster.pair_up(&alias, &partner);
					}
					debug!(target = "clicker.flow", %alias, %bot, "newcomer replaced bot");
				}
				None => {
					roster.insert(newcomer);
					unpaired.push(alias);
				}
			}
		}

		for pair in unpaired.chunks(2) {
			match pair {
				[a, b] => roster.pair_up(a, b),
				[single] => {
					let bot = roster.add_bot();
					roster.update(&bot, |p| p.valid_choices = Some(self.valid_choices.clone()));
					roster.pair_up(single, &bot);
				}
				_ => {}
			}
		}
		roster.play_bots(&mut rand::rng());
	}
}

#[async_trait]
impl Behavior for Play {
	fn name(&self) -> &str {
		"play"
	}

	fn add_new_participants(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) {
		self.admit_newcomers(&mut ctx.roster().lock());
	}

	fn run(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		ctx.host().suppress_updates(Suppress::UntilResumed);
		{
			let mut roster = ctx.roster().lock();
			let valid = self.valid_choices.clone();
			roster.update_all(|p| {
				p.reset();
				p.valid_choices = Some(valid.clone());
			});
			roster.play_bots(&mut rand::rng());
		}
		ctx.subscribe(Topic::Choices);
		self.render(ctx);
		Flow::Stay
	}

	fn on_choices(&mut self, ctx: &mut Context<'_>, _input: &StateMessage, report: &ChoiceReport) {
		if !report.queued.is_empty() {
			self.admit_newcomers(&mut ctx.roster().lock());
		}
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		if let Some(default) = &self.default_choice {
			ctx.roster().lock().update_all(|p| {
				if p.choice.is_none() {
					p.choice = Some(default.clone());
				}
			});
		}
		let message = roster_message(ctx.roster());
		Some(match self.round {
			Some(round) => message.with("round", json!(round)),
			None => message,
		})
	}

	fn rerender(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) {
		self.render(ctx);
	}
}

/// Computes a participant's payoff from their own and their partner's
/// choice.
#[derive(Clone)]
pub enum Payoff {
	Fn(Arc<dyn Fn(&Participant, Option<&Participant>) -> f64 + Send + Sync>),
	/// Reads a matrix such as `{"AA": 3, "AB": 0}` from the live config,
	/// keyed by own choice followed by the partner's.
	ConfigMatrix(String),
}

/// Adds each participant's payoff to their score on exit.
///
/// The round payoff is also kept as the `payoff` attribute.
pub struct Score {
	payoff: Payoff,
}

impl Score {
	pub fn new<F>(payoff: F) -> Self
	where
		F: Fn(&Participant, Option<&Participant>) -> f64 + Send + Sync + 'static,
	{
		Self {
			payoff: Payoff::Fn(Arc::new(payoff)),
		}
	}

	/// Scores from the payoff matrix stored in config under `key`.
	pub fn from_config(key: impl Into<String>) -> Self {
		Self {
			payoff: Payoff::ConfigMatrix(key.into()),
		}
	}
}

impl Payoff {
	/// Payoff of `own` against `partner`; matrices are read from `config`.
	pub fn compute(&self, config: &Map<String, Value>, own: &Participant, partner: Option<&Participant>) -> f64 {
		match self {
			Payoff::Fn(f) => f(own, partner),
			Payoff::ConfigMatrix(key) => matrix_payoff(config.get(key), own, partner),
		}
	}

	/// Warns once per scoring pass when the configured matrix is missing.
	pub(super) fn check(&self, config: &Map<String, Value>) {
		if let Payoff::ConfigMatrix(key) = self {
			if !config.contains_key(key) {
				warn!(target = "clicker.flow", %key, "no payoff matrix configured");
			}
		}
	}
}

/// Adds each payoff to the participant's score and keeps it as `payoff`.
pub(super) fn add_payoffs(roster: &mut Roster, payoffs: &[(String, f64)]) {
	let changed: Vec<String> = payoffs.iter().map(|(alias, _)| alias.clone()).collect();
	for (alias, payoff) in payoffs {
		let payoff = *payoff;
		roster.update_quiet(alias, |p| {
			p.score = Some(p.score.unwrap_or(0.0) + payoff);
			p.extra.insert("payoff".into(), json!(payoff));
		});
	}
	roster.report(&changed);
}

fn matrix_payoff(matrix: Option<&Value>, own: &Participant, partner: Option<&Participant>) -> f64 {
	let (Some(own), Some(other)) = (
		own.choice.as_deref(),
		partner.and_then(|p| p.choice.as_deref()),
	) else {
		return 0.0;
	};
	matrix
		.and_then(|m| m.get(format!("{own}{other}")))
		.and_then(Value::as_f64)
		.unwrap_or(0.0)
}

#[async_trait]
impl Behavior for Score {
	fn name(&self) -> &str {
		"score"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Option<StateMessage> {
		self.payoff.check(ctx.config());
		let mut roster = ctx.roster().lock();
		let payoffs: Vec<(String, f64)> = roster
			.iter()
			.map(|p| {
				let payoff = self.payoff.compute(ctx.config(), p, roster.partner_of(&p.alias));
				(p.alias.clone(), payoff)
			})
			.collect();
		add_payoffs(&mut roster, &payoffs);
		None
	}
}
