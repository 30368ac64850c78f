//! Named app builders sessions are assembled from.

use std::collections::BTreeMap;
use std::sync::Arc;

use clicker_flow::states::{
	Bucket, Play, Results, Score, Stats, TeamPartner, TeamPlay, TeamScore, basic_game, phase, round, team_game,
};
use clicker_flow::{AppDefinition, Pairing, RepeatCount, StateSpec};
use serde_json::{Map, Value, json};

use crate::error::{RelayError, Result};

/// Builds a fresh definition from the merged app config.
pub type AppBuilder = Arc<dyn Fn(&Map<String, Value>) -> AppDefinition + Send + Sync>;

struct Entry {
	defaults: Map<String, Value>,
	build: AppBuilder,
}

/// Registry of the apps a relay can start.
#[derive(Default)]
pub struct AppRegistry {
	apps: BTreeMap<String, Entry>,
}

impl AppRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry with the bundled games.
	pub fn builtin() -> Self {
		let mut registry = Self::new();
		registry.register(PRISONERS_DILEMMA, dilemma_defaults(), prisoners_dilemma);
		registry.register(TEAM_DILEMMA, team_defaults(), team_dilemma);
		registry
	}

	pub fn register<F>(&mut self, id: impl Into<String>, defaults: Map<String, Value>, build: F)
	where
		F: Fn(&Map<String, Value>) -> AppDefinition + Send + Sync + 'static,
	{
		self.apps.insert(
			id.into(),
			Entry {
				defaults,
				build: Arc::new(build),
			},
		);
	}

	pub fn ids(&self) -> impl Iterator<Item = &str> {
		self.apps.keys().map(String::as_str)
	}

	/// Assembles app `id` with `overrides` merged over its defaults.
	pub fn build(&self, id: &str, overrides: &Map<String, Value>) -> Result<AppDefinition> {
		let entry = self
			.apps
			.get(id)
			.ok_or_else(|| RelayError::UnknownApp(id.to_string()))?;
		let mut config = entry.defaults.clone();
		config.extend(overrides.clone());
		Ok((entry.build)(&config).config(config))
	}
}

pub const PRISONERS_DILEMMA: &str = "pd";
pub const TEAM_DILEMMA: &str = "teams";

fn dilemma_defaults() -> Map<String, Value> {
	let mut config = Map::new();
	config.insert("payoff".into(), json!({ "AA": 3, "AB": 0, "BA": 5, "BB": 1 }));
	config.insert("rounds".into(), json!({ "min": 3, "max": 6 }));
	config
}

fn team_defaults() -> Map<String, Value> {
	let mut config = dilemma_defaults();
	config.insert("rounds".into(), json!(3));
	config.insert("group1Name".into(), json!("Team"));
	config.insert("group2Name".into(), json!("Team"));
	config.insert("group1NameSuffix".into(), json!("A"));
	config.insert("group2NameSuffix".into(), json!("B"));
	config
}

/// `5` or `{"min": 3, "max": 6}`.
fn repeat_count(value: Option<&Value>) -> RepeatCount {
	match value {
		Some(Value::Number(n)) => RepeatCount::Fixed(n.as_u64().unwrap_or(1) as usize),
		Some(Value::Object(range)) => {
			let bound = |key: &str| range.get(key).and_then(Value::as_u64).unwrap_or(1) as usize;
			RepeatCount::Range {
				min: bound("min"),
				max: bound("max"),
			}
		}
		_ => RepeatCount::Fixed(1),
	}
}

/// Prisoner's dilemma: paired participants choose A (cooperate) or B
/// (defect) each round and are scored from the config's payoff matrix.
pub fn prisoners_dilemma(config: &Map<String, Value>) -> AppDefinition {
	let rounds = phase(repeat_count(config.get("rounds")), |i| {
		round(vec![
			StateSpec::leaf(Play::new(["A", "B"]).round(i + 1)),
			StateSpec::leaf(Score::from_config("payoff")),
			StateSpec::leaf(Stats::new()),
		])
	})
	.count_from("rounds");
	basic_game(
		PRISONERS_DILEMMA,
		"1.0",
		Pairing::Symmetric,
		vec![rounds, StateSpec::leaf(Results::new())],
	)
}

/// The dilemma played between two teams: every partner sits on the other
/// team and partners are redrawn each round. Scores are bucketed for the
/// results view.
pub fn team_dilemma(config: &Map<String, Value>) -> AppDefinition {
	let rounds = phase(repeat_count(config.get("rounds")), |i| {
		round(vec![
			StateSpec::leaf(TeamPartner),
			StateSpec::leaf(TeamPlay::new(["A", "B"]).round(i + 1)),
			StateSpec::leaf(TeamScore::from_config("payoff")),
			StateSpec::leaf(Stats::by_team()),
		])
	})
	.count_from("rounds");
	team_game(
		TEAM_DILEMMA,
		"1.0",
		vec![
			rounds,
			StateSpec::leaf(Bucket::new("score", 6)),
			StateSpec::leaf(Results::new()),
		],
	)
}
