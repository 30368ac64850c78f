//! Two teams drawn from the roster.
//!
//! [`Teams`] only holds aliases; the participants themselves stay in the
//! [`Roster`]. By default every member of the first team is partnered with
//! a member of the second, so partner links always cross teams.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::participant::{Participant, Roster};

/// Teams shared between the states of a team game and their messages.
pub type SharedTeams = Arc<Mutex<Teams>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
	#[serde(rename = "group1")]
	One,
	#[serde(rename = "group2")]
	Two,
}

impl Team {
	pub const ALL: [Team; 2] = [Team::One, Team::Two];

	/// Key used for this team in views, config and stats.
	pub fn key(self) -> &'static str {
		match self {
			Team::One => "group1",
			Team::Two => "group2",
		}
	}

	pub fn other(self) -> Team {
		match self {
			Team::One => Team::Two,
			Team::Two => Team::One,
		}
	}
}

/// Team membership by alias, in assignment order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teams {
	#[serde(default)]
	group1: Vec<String>,
	#[serde(default)]
	group2: Vec<String>,
}

impl Teams {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn shared(self) -> SharedTeams {
		Arc::new(Mutex::new(self))
	}

	/// Shuffles `aliases` into two teams of equal size.
	///
	/// With `partner_up`, the participants drawn together are partnered
	/// across the teams. With an odd count the last one drawn joins
	/// neither team.
	pub fn assign<R: Rng + ?Sized>(roster: &mut Roster, aliases: &[String], partner_up: bool, rng: &mut R) -> Self {
		let mut order: Vec<String> = aliases
			.iter()
			.filter(|a| roster.contains(a))
			.cloned()
			.collect();
		order.shuffle(rng);

		let mut teams = Self::new();
		if order.len() < 2 {
			debug!(target = "clicker.flow", count = order.len(), "less than two participants to form teams");
			return teams;
		}
		for pair in order.chunks_exact(2) {
			teams.group1.push(pair[0].clone());
			teams.group2.push(pair[1].clone());
			if partner_up {
				roster.pair_up(&pair[0], &pair[1]);
			}
		}
		if order.len() % 2 == 1 {
			if let Some(odd) = order.last() {
				debug!(target = "clicker.flow", alias = %odd, "odd participant left without team");
			}
		}
		teams
	}

	pub fn members(&self, team: Team) -> &[String] {
		match team {
			Team::One => &self.group1,
			Team::Two => &self.group2,
		}
	}

	fn members_mut(&mut self, team: Team) -> &mut Vec<String> {
		match team {
			Team::One => &mut self.group1,
			Team::Two => &mut self.group2,
		}
	}

	pub fn team_of(&self, alias: &str) -> Option<Team> {
		Team::ALL
			.into_iter()
			.find(|team| self.members(*team).iter().any(|a| a == alias))
	}

	pub fn contains(&self, alias: &str) -> bool {
		self.team_of(alias).is_some()
	}

	pub fn len(&self) -> usize {
		self.group1.len() + self.group2.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Every member, first team first.
	pub fn aliases(&self) -> impl Iterator<Item = &String> {
		self.group1.iter().chain(self.group2.iter())
	}

	pub fn insert(&mut self, team: Team, alias: impl Into<String>) {
		let alias = alias.into();
		self.remove(&alias);
		self.members_mut(team).push(alias);
	}

	/// Takes `alias` out of its team and returns that team.
	pub fn remove(&mut self, alias: &str) -> Option<Team> {
		let team = self.team_of(alias)?;
		self.members_mut(team).retain(|a| a != alias);
		Some(team)
	}

	/// Moves `alias` to the other team.
	pub fn switch(&mut self, alias: &str) {
		if let Some(team) = self.remove(alias) {
			self.members_mut(team.other()).push(alias.to_string());
		}
	}

	/// Appends the members of `other` to the matching teams.
	pub fn extend(&mut self, other: Teams) {
		self.group1.extend(other.group1);
		self.group2.extend(other.group2);
	}

	/// Drops members the roster no longer has.
	pub fn retain_members(&mut self, roster: &Roster) {
		self.group1.retain(|a| roster.contains(a));
		self.group2.retain(|a| roster.contains(a));
	}

	/// Draws new partners: each first-team member, in random order, is
	/// paired with the next second-team member. Members left over by
	/// unequal teams end up without a partner.
	pub fn partner<R: Rng + ?Sized>(&self, roster: &mut Roster, rng: &mut R) {
		let everyone: Vec<String> = self.aliases().cloned().collect();
		roster.unpair(&everyone);

		let mut first = self.group1.clone();
		first.shuffle(rng);
		for (a, b) in first.iter().zip(self.group2.iter()) {
			roster.pair_up(a, b);
		}
	}

	/// Adds late joiners to the roster and to the teams.
	///
	/// The newcomers form teams among themselves, with a bot to even them
	/// out when `with_bots` is set. If a bot is already playing, the new
	/// bot and the old one both leave and their partners are paired with
	/// each other, on opposite teams. Returns the aliases that joined.
	pub fn admit<R: Rng + ?Sized>(
		&mut self,
		roster: &mut Roster,
		newcomers: Vec<Participant>,
		with_bots: bool,
		rng: &mut R,
	) -> Vec<String> {
		if newcomers.is_empty() {
			return Vec::new();
		}
		let mut joined: Vec<String> = newcomers.iter().map(|p| p.alias.clone()).collect();
		let odd = joined.len() % 2 == 1;
		roster.extend(newcomers);

		let new_bot = (with_bots && odd).then(|| roster.add_bot());
		if let Some(bot) = &new_bot {
			joined.push(bot.clone());
		}
		let mut fresh = Teams::assign(roster, &joined, true, rng);

		let old_bot = roster
			.iter()
			.find(|p| p.bot && self.contains(&p.alias))
			.map(|p| p.alias.clone());
		if let (Some(new_bot), Some(old_bot)) = (new_bot, old_bot) {
			let old_partner = roster.get(&old_bot).and_then(|p| p.partner.clone());
			let new_partner = roster.get(&new_bot).and_then(|p| p.partner.clone());
			let old_bot_team = self.remove(&old_bot);
			fresh.remove(&new_bot);
			roster.remove(&old_bot);
			roster.remove(&new_bot);
			joined.retain(|a| *a != new_bot);

			if let (Some(old_partner), Some(new_partner)) = (old_partner, new_partner) {
				roster.pair_up(&old_partner, &new_partner);
				// the new partner takes the departed bot's side
				if let Some(team) = old_bot_team {
					if fresh.team_of(&new_partner) != Some(team) {
						fresh.switch(&new_partner);
					}
				}
			}
			debug!(target = "clicker.flow", bot = %old_bot, "late joiner replaced bot");
		}

		self.extend(fresh);
		joined
	}

	/// `{"group1": [...], "group2": [...]}`
	pub fn to_json(&self) -> Value {
		json!({ "group1": self.group1, "group2": self.group2 })
	}
}

#[cfg(test)]
mod tests {
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use super::*;

	fn roster(aliases: &[&str]) -> Roster {
		Roster::from_participants(aliases.iter().map(|a| Participant::new(*a)))
	}

	fn aliases(roster: &Roster) -> Vec<String> {
		roster.aliases()
	}

	fn assert_partners_cross_teams(roster: &Roster, teams: &Teams) {
		for alias in teams.aliases() {
			let p = roster.get(alias).unwrap();
			let Some(partner) = &p.partner else {
				continue;
			};
			assert_ne!(teams.team_of(alias), teams.team_of(partner), "{alias} and {partner} share a team");
			assert_eq!(roster.get(partner).unwrap().partner.as_deref(), Some(alias.as_str()));
		}
	}

	#[test]
	fn assignment_splits_evenly_and_partners_across() {
		let mut r = roster(&["a", "b", "c", "d", "e"]);
		let everyone = aliases(&r);
		let teams = Teams::assign(&mut r, &everyone, true, &mut StdRng::seed_from_u64(9));

		assert_eq!(teams.members(Team::One).len(), 2);
		assert_eq!(teams.members(Team::Two).len(), 2);
		let outside: Vec<_> = everyone.iter().filter(|a| !teams.contains(a)).collect();
		assert_eq!(outside.len(), 1);
		assert_eq!(r.get(outside[0]).unwrap().partner, None);
		assert_partners_cross_teams(&r, &teams);
	}

	#[test]
	fn assignment_without_partnering_leaves_links_alone() {
		let mut r = roster(&["a", "b"]);
		let everyone = aliases(&r);
		let teams = Teams::assign(&mut r, &everyone, false, &mut StdRng::seed_from_u64(1));
		assert_eq!(teams.len(), 2);
		assert!(r.iter().all(|p| p.partner.is_none()));
	}

	#[test]
	fn repartnering_keeps_partners_on_opposite_teams() {
		let mut r = roster(&["a", "b", "c", "d", "e", "f"]);
		let everyone = aliases(&r);
		let mut rng = StdRng::seed_from_u64(4);
		let teams = Teams::assign(&mut r, &everyone, true, &mut rng);
		for _ in 0..5 {
			teams.partner(&mut r, &mut rng);
			assert_partners_cross_teams(&r, &teams);
			assert!(r.iter().all(|p| p.partner.is_some()));
		}
	}

	#[test]
	fn switching_moves_a_member_across() {
		let mut teams = Teams::new();
		teams.insert(Team::One, "a");
		teams.insert(Team::Two, "b");
		teams.switch("a");
		assert_eq!(teams.members(Team::Two), ["b".to_string(), "a".to_string()]);
		assert_eq!(teams.remove("a"), Some(Team::Two));
		assert_eq!(teams.remove("a"), None);
	}

	#[test]
	fn odd_newcomer_replaces_the_playing_bot() {
		let mut r = roster(&["a", "b", "c"]);
		let bot = r.add_bot();
		let mut teams = Teams::new();
		teams.insert(Team::One, "a");
		teams.insert(Team::Two, "b");
		teams.insert(Team::One, "c");
		teams.insert(Team::Two, bot.clone());
		r.pair_up("a", "b");
		r.pair_up("c", &bot);

		let joined = teams.admit(&mut r, vec![Participant::new("z")], true, &mut StdRng::seed_from_u64(2));

		assert_eq!(joined, vec!["z".to_string()]);
		assert!(r.first_bot().is_none());
		assert_eq!(r.get("z").unwrap().partner.as_deref(), Some("c"));
		assert_eq!(teams.team_of("z"), Some(Team::Two));
		assert_partners_cross_teams(&r, &teams);
	}

	#[test]
	fn even_newcomers_form_their_own_pairs() {
		let mut r = roster(&["a", "b"]);
		let everyone = aliases(&r);
		let mut rng = StdRng::seed_from_u64(3);
		let mut teams = Teams::assign(&mut r, &everyone, true, &mut rng);

		let joined = teams.admit(&mut r, vec![Participant::new("y"), Participant::new("z")], true, &mut rng);

		assert_eq!(joined.len(), 2);
		assert_eq!(teams.len(), 4);
		assert!(r.first_bot().is_none());
		assert_eq!(r.get("y").unwrap().partner.as_deref(), Some("z"));
		assert_partners_cross_teams(&r, &teams);
	}

	#[test]
	fn teams_serialize_as_alias_lists() {
		let mut teams = Teams::new();
		teams.insert(Team::One, "a");
		teams.insert(Team::Two, "b");
		assert_eq!(teams.to_json(), json!({ "group1": ["a"], "group2": ["b"] }));
		assert_eq!(serde_json::to_value(&teams).unwrap(), teams.to_json());
	}
}
