use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::play::{Payoff, add_payoffs};
use crate::behavior::{Behavior, Context, Flow, Suppress, Topic};
use crate::message::StateMessage;
use crate::participant::{ChoiceReport, Participant, Roster};
use crate::teams::{SharedTeams, Team, Teams};

fn teams_of<'a>(input: &'a StateMessage, state: &str) -> Option<&'a SharedTeams> {
	let teams = input.teams();
	if teams.is_none() {
		warn!(target = "clicker.flow", state, "no teams in input");
	}
	teams
}

/// Team names and suffixes from the live config, as views expect them.
fn team_labels(config: &Map<String, Value>) -> Map<String, Value> {
	["group1Name", "group2Name", "group1NameSuffix", "group2NameSuffix"]
		.into_iter()
		.filter_map(|key| config.get(key).map(|v| (key.to_string(), v.clone())))
		.collect()
}

/// Forms two teams on exit and adds them to the output.
///
/// By default the members drawn together are partnered across the teams.
/// A message that already carries teams passes through unchanged.
pub struct Group {
	partner_up: bool,
}

impl Group {
	pub fn new() -> Self {
		Self { partner_up: true }
	}

	pub fn partner_up(mut self, partner_up: bool) -> Self {
		self.partner_up = partner_up;
		self
	}
}

impl Default for Group {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Behavior for Group {
	fn name(&self) -> &str {
		"group"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		if input.teams().is_some() {
			return None;
		}
		let mut roster = ctx.roster().lock();
		let everyone = roster.aliases();
		let teams = Teams::assign(&mut roster, &everyone, self.partner_up, &mut rand::rng());
		debug!(target = "clicker.flow", first = teams.members(Team::One).len(), second = teams.members(Team::Two).len(), "teams formed");
		drop(roster);
		Some(input.clone().with_teams(teams.shared()))
	}
}

/// Draws new cross-team partners on exit.
pub struct TeamPartner;

#[async_trait]
impl Behavior for TeamPartner {
	fn name(&self) -> &str {
		"partner"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		if let Some(teams) = teams_of(input, "partner") {
			let mut roster = ctx.roster().lock();
			teams.lock().partner(&mut roster, &mut rand::rng());
		}
		None
	}
}

/// A voting round's view for two teams.
///
/// Each team may have its own valid choices. Late joiners are put on a
/// team, replacing a bot when one is playing.
pub struct TeamPlay {
	choices: [Vec<String>; 2],
	default_choice: Option<String>,
	round: Option<usize>,
	with_bots: bool,
}

impl TeamPlay {
	/// Both teams choose from `valid_choices`.
	pub fn new(valid_choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
		let choices: Vec<String> = valid_choices.into_iter().map(Into::into).collect();
		Self {
			choices: [choices.clone(), choices],
			default_choice: Some("A".to_string()),
			round: None,
			with_bots: true,
		}
	}

	/// Valid choices for one team only.
	pub fn team_choices(mut self, team: Team, valid_choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.choices[team_index(team)] = valid_choices.into_iter().map(Into::into).collect();
		self
	}

	pub fn round(mut self, round: usize) -> Self {
		self.round = Some(round);
		self
	}

	pub fn default_choice(mut self, choice: Option<String>) -> Self {
		self.default_choice = choice;
		self
	}

	/// Whether an odd group of late joiners is evened out with a bot.
	pub fn with_bots(mut self, with_bots: bool) -> Self {
		self.with_bots = with_bots;
		self
	}

	fn choices_for(&self, team: Option<Team>) -> Option<Vec<String>> {
		team.map(|team| self.choices[team_index(team)].clone())
	}

	fn prepare(&self, participant: &mut Participant, team: Option<Team>) {
		participant.reset();
		participant.valid_choices = self.choices_for(team);
	}

	/// Like `prepare`, but a late joiner keeps a valid check-in choice.
	fn prepare_newcomer(&self, participant: &mut Participant, team: Option<Team>) {
		participant.valid_choices = self.choices_for(team);
		if participant.validate_choice(participant.choice.as_deref()).is_err() {
			self.prepare(participant, team);
		}
	}

	fn options(&self, ctx: &Context<'_>, teams: Option<&SharedTeams>) -> Value {
		let participants = ctx.roster().lock().to_json();
		let mut options = team_labels(ctx.config());
		options.insert("participants".into(), participants);
		options.insert(
			"teams".into(),
			teams.map_or(Value::Null, |t| t.lock().to_json()),
		);
		options.insert("round".into(), json!(self.round));
		options.insert(
			"validChoices".into(),
			json!({ "group1": self.choices[0], "group2": self.choices[1] }),
		);
		options.insert("config".into(), Value::Object(ctx.config().clone()));
		Value::Object(options)
	}

	fn render(&self, ctx: &Context<'_>, input: &StateMessage) {
		let options = self.options(ctx, input.teams());
		ctx.render("play", options);
	}

	fn admit_newcomers(&self, roster: &mut Roster, teams: &SharedTeams) {
		if !roster.has_new_participants() {
			return;
		}
		let newcomers = roster.take_new_participants();
		let mut teams = teams.lock();
		let joined = teams.admit(roster, newcomers, self.with_bots, &mut rand::rng());
		for alias in &joined {
			let team = teams.team_of(alias);
			roster.update(alias, |p| self.prepare_newcomer(p, team));
		}
		roster.play_bots(&mut rand::rng());
		debug!(target = "clicker.flow", ?joined, "late joiners placed on teams");
	}
}

fn team_index(team: Team) -> usize {
	match team {
		Team::One => 0,
		Team::Two => 1,
	}
}

#[async_trait]
impl Behavior for TeamPlay {
	fn name(&self) -> &str {
		"play"
	}

	fn add_new_participants(&mut self, ctx: &mut Context<'_>, input: &StateMessage) {
		if let Some(teams) = input.teams() {
			self.admit_newcomers(&mut ctx.roster().lock(), teams);
		}
	}

	fn run(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Flow {
		ctx.host().suppress_updates(Suppress::UntilResumed);
		{
			let teams = teams_of(input, "play").map(|t| t.lock().clone()).unwrap_or_default();
			let mut roster = ctx.roster().lock();
			roster.update_all(|p| {
				let team = teams.team_of(&p.alias);
				self.prepare(p, team);
			});
			roster.play_bots(&mut rand::rng());
		}
		ctx.subscribe(Topic::Choices);
		self.render(ctx, input);
		Flow::Stay
	}

	fn on_choices(&mut self, ctx: &mut Context<'_>, input: &StateMessage, report: &ChoiceReport) {
		if report.queued.is_empty() {
			return;
		}
		if let Some(teams) = input.teams() {
			self.admit_newcomers(&mut ctx.roster().lock(), teams);
		}
	}

	fn handle_configure(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) {
		let mut patch = team_labels(ctx.config());
		patch.insert("config".into(), Value::Object(ctx.config().clone()));
		ctx.host().update_view(Value::Object(patch));
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		let teams = input.teams().cloned();
		if let (Some(default), Some(teams)) = (&self.default_choice, &teams) {
			let members = teams.lock().clone();
			ctx.roster().lock().update_all(|p| {
				if p.choice.is_none() && members.contains(&p.alias) {
					p.choice = Some(default.clone());
				}
			});
		}
		let mut message = StateMessage::with_roster(ctx.roster().clone());
		if let Some(teams) = teams {
			message = message.with_teams(teams);
		}
		Some(match self.round {
			Some(round) => message.with("round", json!(round)),
			None => message,
		})
	}

	fn rerender(&mut self, ctx: &mut Context<'_>, input: &StateMessage) {
		self.render(ctx, input);
	}
}

/// Scores team members on exit, each team with its own payoff.
///
/// Participants outside the teams are not scored.
pub struct TeamScore {
	payoffs: [Payoff; 2],
}

impl TeamScore {
	/// Both teams are scored from the config matrix under `key`.
	pub fn from_config(key: impl Into<String>) -> Self {
		let payoff = Payoff::ConfigMatrix(key.into());
		Self {
			payoffs: [payoff.clone(), payoff],
		}
	}

	/// Scores one team with its own payoff.
	pub fn team(mut self, team: Team, payoff: Payoff) -> Self {
		self.payoffs[team_index(team)] = payoff;
		self
	}
}

#[async_trait]
impl Behavior for TeamScore {
	fn name(&self) -> &str {
		"score"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		let teams = teams_of(input, "score")?.lock().clone();
		let config = ctx.config();
		let mut roster = ctx.roster().lock();

		let mut payoffs = Vec::with_capacity(teams.len());
		for team in Team::ALL {
			let payoff = &self.payoffs[team_index(team)];
			payoff.check(config);
			for alias in teams.members(team) {
				if let Some(p) = roster.get(alias) {
					payoffs.push((alias.clone(), payoff.compute(config, p, roster.partner_of(alias))));
				}
			}
		}
		add_payoffs(&mut roster, &payoffs);
		None
	}
}
