use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{ROUND_OUTPUTS_KEY, roster_message};
use crate::behavior::{Behavior, Context, Flow};
use crate::message::StateMessage;
use crate::participant::{Participant, Roster};
use crate::teams::{Team, Teams};

/// Averages scores into the `stats` value of the output.
///
/// Grouped by an attribute, the output also holds one average per group
/// value: `{"average": 2.5, "groups": {"red": 3.0, "blue": 2.0}}`. By team
/// it reads `{"overall": {"average": ..}, "group1": {..}, "group2": {..}}`.
pub struct Stats {
	grouping: Grouping,
}

enum Grouping {
	Overall,
	Attribute(String),
	Teams,
}

impl Stats {
	pub fn new() -> Self {
		Self {
			grouping: Grouping::Overall,
		}
	}

	pub fn grouped(attribute: impl Into<String>) -> Self {
		Self {
			grouping: Grouping::Attribute(attribute.into()),
		}
	}

	/// Averages per team, taken from the input's teams.
	pub fn by_team() -> Self {
		Self {
			grouping: Grouping::Teams,
		}
	}
}

impl Default for Stats {
	fn default() -> Self {
		Self::new()
	}
}

fn average<'a>(participants: impl Iterator<Item = &'a Participant>) -> Value {
	let (sum, count) = participants.fold((0.0, 0usize), |(sum, count), p| {
		(sum + p.score.unwrap_or(0.0), count + 1)
	});
	if count == 0 {
		return Value::Null;
	}
	json!(sum / count as f64)
}

fn attribute_stats(roster: &Roster, attribute: &str) -> Map<String, Value> {
	let mut groups: BTreeMap<String, Vec<&Participant>> = BTreeMap::new();
	for p in roster.iter() {
		if let Some(key) = p.attribute_key(attribute) {
			groups.entry(key).or_default().push(p);
		}
	}
	let groups: Map<String, Value> = groups
		.into_iter()
		.map(|(key, members)| (key, average(members.into_iter())))
		.collect();

	let mut stats = Map::new();
	stats.insert("average".into(), average(roster.iter()));
	stats.insert("groups".into(), Value::Object(groups));
	stats
}

fn team_stats(roster: &Roster, teams: &Teams) -> Map<String, Value> {
	let mut stats = Map::new();
	stats.insert(
		"overall".into(),
		json!({ "average": average(teams.aliases().filter_map(|a| roster.get(a))) }),
	);
	for team in Team::ALL {
		let members = teams.members(team).iter().filter_map(|a| roster.get(a));
		stats.insert(team.key().into(), json!({ "average": average(members) }));
	}
	stats
}

#[async_trait]
impl Behavior for Stats {
	fn name(&self) -> &str {
		"stats"
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		let roster = ctx.roster().lock();
		let stats = match &self.grouping {
			Grouping::Overall => {
				let mut stats = Map::new();
				stats.insert("average".into(), average(roster.iter()));
				stats
			}
			Grouping::Attribute(attribute) => attribute_stats(&roster, attribute),
			Grouping::Teams => {
				let teams = input.teams().map(|t| t.lock().clone());
				if teams.is_none() {
					warn!(target = "clicker.flow", "team stats without teams");
				}
				team_stats(&roster, &teams.unwrap_or_default())
			}
		};
		drop(roster);

		Some(input.clone().with("stats", Value::Object(stats)))
	}
}

/// Final view: the roster with scores plus per-round outputs.
///
/// The results are added to the exercise log when shown. With
/// [`Results::write_log`] the log is written right away instead of when
/// the exercise ends.
pub struct Results {
	write_log: bool,
}

impl Results {
	pub fn new() -> Self {
		Self { write_log: false }
	}

	pub fn write_log(mut self, write: bool) -> Self {
		self.write_log = write;
		self
	}

	fn options(ctx: &Context<'_>, input: &StateMessage) -> Value {
		let mut options = json!({
			"participants": ctx.roster().lock().to_json(),
			"rounds": input.get(ROUND_OUTPUTS_KEY).cloned().unwrap_or(Value::Null),
			"config": ctx.config(),
		});
		if let (Some(teams), Value::Object(options)) = (input.teams(), &mut options) {
			options.insert("teams".into(), teams.lock().to_json());
			for key in ["group1Name", "group2Name", "group1NameSuffix", "group2NameSuffix"] {
				if let Some(value) = ctx.config_value(key) {
					options.insert(key.into(), value.clone());
				}
			}
		}
		options
	}
}

impl Default for Results {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Behavior for Results {
	fn name(&self) -> &str {
		"results"
	}

	fn run(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Flow {
		let options = Self::options(ctx, input);
		ctx.render("results", options.clone());

		let mut log = Map::new();
		log.insert("results".into(), options["participants"].clone());
		log.insert("rounds".into(), options["rounds"].clone());
		if let Some(teams) = options.get("teams") {
			log.insert("teams".into(), teams.clone());
		}
		ctx.log(log);
		if self.write_log {
			ctx.request_log_write();
		}
		info!(target = "clicker.flow", write = self.write_log, "results shown");
		Flow::Stay
	}

	fn on_exit(&mut self, ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		let message = roster_message(ctx.roster());
		Some(match input.teams() {
			Some(teams) => message.with_teams(teams.clone()),
			None => message,
		})
	}

	fn handle_configure(&mut self, ctx: &mut Context<'_>, input: &StateMessage) {
		self.rerender(ctx, input);
	}

	fn rerender(&mut self, ctx: &mut Context<'_>, input: &StateMessage) {
		let options = Self::options(ctx, input);
		ctx.render("results", options);
	}
}
