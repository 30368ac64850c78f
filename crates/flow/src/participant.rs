//! Participants and the session roster.
//!
//! A [`Roster`] is the live, alias-keyed set of participants shared by every
//! state of an app. Partners are held by alias, never by reference, so the
//! roster owns every participant and a partner link is only a back-reference.
//!
//! Aliases reported by the device that the roster does not know yet are
//! queued rather than added; states decide when late joiners become visible
//! (see [`Roster::add_new_participants`]).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ChoiceError;

/// Roster shared between the app, its states and their messages.
pub type SharedRoster = Arc<Mutex<Roster>>;

/// Receives every batch of participant changes, in mutation order.
pub type ChangeWatcher = Arc<dyn Fn(&[Participant]) + Send + Sync>;

/// Base alias for generated bots.
pub const BOT_ALIAS: &str = "bot";

/// A single device holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
	pub alias: String,
	#[serde(default)]
	pub choice: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub score: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub partner: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub partner_backward: Option<String>,
	/// `None` accepts any choice.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub valid_choices: Option<Vec<String>>,
	#[serde(default)]
	pub played: bool,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub bot: bool,
	/// Fixed choice for a bot; random among valid choices when unset.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub strategy: Option<String>,
	/// App-specific attributes (bucket, group, ...).
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Participant {
	pub fn new(alias: impl Into<String>) -> Self {
		Self {
			alias: alias.into(),
			choice: None,
			score: None,
			partner: None,
			partner_backward: None,
			valid_choices: None,
			played: false,
			bot: false,
			strategy: None,
			extra: Map::new(),
		}
	}

	pub fn with_choice(mut self, choice: impl Into<String>) -> Self {
		self.choice = Some(choice.into());
		self
	}

	pub fn bot(alias: impl Into<String>) -> Self {
		Self {
			bot: true,
			..Self::new(alias)
		}
	}

	/// Clears choice related attributes. Alias, score and partners survive.
	pub fn reset(&mut self) {
		self.choice = None;
		self.played = false;
		self.valid_choices = None;
	}

	/// Checks a prospective choice against this participant's constraints.
	pub fn validate_choice(&self, choice: Option<&str>) -> Result<(), ChoiceError> {
		if self.alias.is_empty() {
			return Err(ChoiceError::EmptyAlias);
		}
		if let (Some(choice), Some(valid)) = (choice, &self.valid_choices) {
			if !valid.iter().any(|v| v == choice) {
				return Err(ChoiceError::InvalidChoice {
					alias: self.alias.clone(),
					choice: choice.to_string(),
					valid: valid.clone(),
				});
			}
		}
		Ok(())
	}

	/// Numeric attribute lookup used for bucketing and stats.
	pub fn number(&self, attribute: &str) -> Option<f64> {
		match attribute {
			"score" => self.score,
			other => self.extra.get(other).and_then(Value::as_f64),
		}
	}

	/// String form of an attribute, used as a grouping key.
	pub fn attribute_key(&self, attribute: &str) -> Option<String> {
		match attribute {
			"alias" => Some(self.alias.clone()),
			"choice" => self.choice.clone(),
			"bot" => Some(self.bot.to_string()),
			"score" => self.score.map(|s| s.to_string()),
			other => self.extra.get(other).map(|v| match v {
				Value::String(s) => s.clone(),
				v => v.to_string(),
			}),
		}
	}
}

/// One choice as reported for a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
	pub alias: String,
	pub choice: String,
}

impl Choice {
	pub fn new(alias: impl Into<String>, choice: impl Into<String>) -> Self {
		Self {
			alias: alias.into(),
			choice: choice.into(),
		}
	}
}

/// What happened to a batch of incoming choices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceReport {
	/// Aliases whose choice was applied.
	pub applied: Vec<String>,
	/// Unknown aliases queued as new participants.
	pub queued: Vec<String>,
	pub rejected: Vec<ChoiceError>,
}

impl ChoiceReport {
	pub fn is_empty(&self) -> bool {
		self.applied.is_empty() && self.queued.is_empty() && self.rejected.is_empty()
	}
}

/// Pairing strategy for [`Roster::pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pairing {
	/// Mutual pairs; with an odd count one participant stays unpaired.
	Symmetric,
	/// A ring: each participant's partner is the next one, and its
	/// `partner_backward` is the previous one.
	Asymmetric,
}

/// Alias-ordered participant set.
#[derive(Default)]
pub struct Roster {
	members: BTreeMap<String, Participant>,
	queued: Vec<Participant>,
	queued_aliases: HashSet<String>,
	validate_choices: bool,
	watcher: Option<ChangeWatcher>,
}

impl std::fmt::Debug for Roster {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Roster")
			.field("members", &self.members.len())
			.field("queued", &self.queued.len())
			.finish()
	}
}

impl Roster {
	pub fn new() -> Self {
		Self {
			validate_choices: true,
			..Self::default()
		}
	}

	pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
		let mut roster = Self::new();
		for p in participants {
			roster.members.insert(p.alias.clone(), p);
		}
		roster
	}

	pub fn shared(self) -> SharedRoster {
		Arc::new(Mutex::new(self))
	}

	pub fn set_watcher(&mut self, watcher: Option<ChangeWatcher>) {
		self.watcher = watcher;
	}

	pub fn set_validate_choices(&mut self, validate: bool) {
		self.validate_choices = validate;
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub fn contains(&self, alias: &str) -> bool {
		self.members.contains_key(alias)
	}

	pub fn get(&self, alias: &str) -> Option<&Participant> {
		self.members.get(alias)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Participant> {
		self.members.values()
	}

	pub fn aliases(&self) -> Vec<String> {
		self.members.keys().cloned().collect()
	}

	/// Partner of `alias`, if both exist.
	pub fn partner_of(&self, alias: &str) -> Option<&Participant> {
		let partner = self.members.get(alias)?.partner.as_deref()?;
		self.members.get(partner)
	}

	fn emit(&self, aliases: &[String]) {
		let Some(watcher) = &self.watcher else {
			return;
		};
		let batch: Vec<Participant> = aliases
			.iter()
			.filter_map(|a| self.members.get(a).cloned())
			.collect();
		if !batch.is_empty() {
			watcher(&batch);
		}
	}

	fn emit_all(&self) {
		if let Some(watcher) = &self.watcher {
			let batch: Vec<Participant> = self.members.values().cloned().collect();
			watcher(&batch);
		}
	}

	/// Applies `f` to one participant and reports the change.
	pub fn update<F>(&mut self, alias: &str, f: F) -> bool
	where
		F: FnOnce(&mut Participant),
	{
		let Some(p) = self.members.get_mut(alias) else {
			return false;
		};
		f(p);
		self.emit(&[alias.to_string()]);
		true
	}

	/// Applies `f` without reporting; see [`Roster::report`].
	pub fn update_quiet<F>(&mut self, alias: &str, f: F) -> bool
	where
		F: FnOnce(&mut Participant),
	{
		match self.members.get_mut(alias) {
			Some(p) => {
				f(p);
				true
			}
			None => false,
		}
	}

	/// Reports `aliases` as changed, in one batch.
	pub fn report(&self, aliases: &[String]) {
		self.emit(aliases);
	}

	/// Applies `f` to every participant and reports one batch.
	pub fn update_all<F>(&mut self, mut f: F)
	where
		F: FnMut(&mut Participant),
	{
		for p in self.members.values_mut() {
			f(p);
		}
		self.emit_all();
	}

	pub fn insert(&mut self, participant: Participant) {
		let alias = participant.alias.clone();
		self.queued_aliases.remove(&alias);
		self.members.insert(alias.clone(), participant);
		self.emit(&[alias]);
	}

	/// Removes a participant and clears partner links pointing at it. The
	/// unlinked partners are reported as changed.
	pub fn remove(&mut self, alias: &str) -> Option<Participant> {
		let removed = self.members.remove(alias)?;
		let unlinked = self.unlink(&[alias.to_string()]);
		self.emit(&unlinked);
		Some(removed)
	}

	/// Clears the partner links of `aliases` and every link pointing at
	/// them. Returns the members whose links changed.
	fn unlink(&mut self, aliases: &[String]) -> Vec<String> {
		let targets: HashSet<&str> = aliases.iter().map(String::as_str).collect();
		let mut changed = Vec::new();
		for p in self.members.values_mut() {
			let own = targets.contains(p.alias.as_str());
			let mut touched = false;
			if p.partner.as_deref().is_some_and(|a| own || targets.contains(a)) {
				p.partner = None;
				touched = true;
			}
			if p.partner_backward.as_deref().is_some_and(|a| own || targets.contains(a)) {
				p.partner_backward = None;
				touched = true;
			}
			if touched {
				changed.push(p.alias.clone());
			}
		}
		changed
	}

	/// Drops every partner link involving `aliases`.
	pub fn unpair(&mut self, aliases: &[String]) {
		let changed = self.unlink(aliases);
		self.emit(&changed);
	}

	/// Removes every participant failing `keep`; returns the removed ones.
	pub fn retain<F>(&mut self, mut keep: F) -> Vec<Participant>
	where
		F: FnMut(&Participant) -> bool,
	{
		let doomed: Vec<String> = self
			.members
			.values()
			.filter(|p| !keep(p))
			.map(|p| p.alias.clone())
			.collect();
		doomed.iter().filter_map(|a| self.remove(a)).collect()
	}

	/// Replaces the whole roster, e.g. after a fetch. Clears the queue.
	pub fn replace(&mut self, participants: impl IntoIterator<Item = Participant>) {
		self.members = participants
			.into_iter()
			.map(|p| (p.alias.clone(), p))
			.collect();
		self.queued.clear();
		self.queued_aliases.clear();
		self.emit_all();
	}

	/// Sets or clears a participant's choice, validating it first.
	pub fn set_choice(&mut self, alias: &str, choice: Option<String>) -> Result<(), ChoiceError> {
		let validate = self.validate_choices;
		let p = self
			.members
			.get_mut(alias)
			.ok_or_else(|| ChoiceError::UnknownParticipant(alias.to_string()))?;
		if validate {
			p.validate_choice(choice.as_deref())?;
		}
		p.played = choice.is_some();
		p.choice = choice;
		self.emit(&[alias.to_string()]);
		Ok(())
	}

	/// Applies device choices. Unknown aliases are queued once; choices for
	/// already queued aliases are ignored until they join.
	pub fn apply_choices(&mut self, choices: &[Choice]) -> ChoiceReport {
		let mut report = ChoiceReport::default();
		let mut changed = Vec::new();

		for c in choices {
			if let Some(p) = self.members.get_mut(&c.alias) {
				if self.validate_choices {
					if let Err(err) = p.validate_choice(Some(&c.choice)) {
						debug!(target = "clicker.flow", error = %err, "choice rejected");
						report.rejected.push(err);
						continue;
					}
				}
				p.choice = Some(c.choice.clone());
				p.played = true;
				report.applied.push(c.alias.clone());
				changed.push(c.alias.clone());
			} else if c.alias.is_empty() {
				report.rejected.push(ChoiceError::EmptyAlias);
			} else if self.queued_aliases.insert(c.alias.clone()) {
				self.queued
					.push(Participant::new(c.alias.clone()).with_choice(c.choice.clone()));
				report.queued.push(c.alias.clone());
			}
		}

		self.emit(&changed);
		report
	}

	pub fn has_new_participants(&self) -> bool {
		!self.queued.is_empty()
	}

	pub fn new_participant_count(&self) -> usize {
		self.queued.len()
	}

	/// Empties the queue without adding anyone.
	pub fn take_new_participants(&mut self) -> Vec<Participant> {
		self.queued_aliases.clear();
		std::mem::take(&mut self.queued)
	}

	/// Moves every queued participant into the roster.
	pub fn add_new_participants(&mut self) -> Vec<String> {
		let added: Vec<String> = self.queued.iter().map(|p| p.alias.clone()).collect();
		for p in self.take_new_participants() {
			self.members.insert(p.alias.clone(), p);
		}
		self.emit(&added);
		added
	}

	/// Adds a set of participants in one batch.
	pub fn extend(&mut self, participants: Vec<Participant>) {
		let aliases: Vec<String> = participants.iter().map(|p| p.alias.clone()).collect();
		for p in participants {
			self.queued_aliases.remove(&p.alias);
			self.members.insert(p.alias.clone(), p);
		}
		self.emit(&aliases);
	}

	/// Pairs `aliases` (or everyone) with a random shuffle.
	pub fn pair<R: Rng + ?Sized>(&mut self, mode: Pairing, aliases: Option<&[String]>, rng: &mut R) {
		let mut order: Vec<String> = match aliases {
			Some(aliases) => aliases
				.iter()
				.filter(|a| self.members.contains_key(*a))
				.cloned()
				.collect(),
			None => self.aliases(),
		};
		if order.len() < 2 {
			warn!(target = "clicker.flow", count = order.len(), "less than two participants to pair");
			return;
		}
		// outsiders that pointed into the set lose their link too
		let mut changed: Vec<String> = self
			.unlink(&order)
			.into_iter()
			.filter(|a| !order.contains(a))
			.collect();
		order.shuffle(rng);

		match mode {
			Pairing::Symmetric => {
				for pair in order.chunks_exact(2) {
					self.link(&pair[0], &pair[1]);
					self.link(&pair[1], &pair[0]);
				}
				if order.len() % 2 == 1 {
					if let Some(odd) = order.last() {
						debug!(target = "clicker.flow", alias = %odd, "odd participant left without partner");
					}
				}
			}
			Pairing::Asymmetric => {
				for (i, alias) in order.iter().enumerate() {
					let next = &order[(i + 1) % order.len()];
					self.link(alias, next);
					if let Some(p) = self.members.get_mut(next) {
						p.partner_backward = Some(alias.clone());
					}
				}
			}
		}
		changed.extend(order);
		self.emit(&changed);
	}

	fn link(&mut self, from: &str, to: &str) {
		if from == to {
			return;
		}
		if let Some(p) = self.members.get_mut(from) {
			p.partner = Some(to.to_string());
		}
	}

	/// Pairs two participants mutually. Their former partners are left
	/// unpaired.
	pub fn pair_up(&mut self, a: &str, b: &str) {
		let pair = [a.to_string(), b.to_string()];
		let mut changed: Vec<String> = self
			.unlink(&pair)
			.into_iter()
			.filter(|alias| !pair.contains(alias))
			.collect();
		self.link(a, b);
		self.link(b, a);
		changed.extend(pair);
		self.emit(&changed);
	}

	/// Adds a bot with a fresh alias and returns that alias.
	pub fn add_bot(&mut self) -> String {
		let alias = self.fresh_bot_alias();
		self.insert(Participant::bot(alias.clone()));
		alias
	}

	/// A bot alias not used by any member or queued participant.
	pub fn fresh_bot_alias(&self) -> String {
		let taken = |a: &str| self.members.contains_key(a) || self.queued_aliases.contains(a);
		if !taken(BOT_ALIAS) {
			return BOT_ALIAS.to_string();
		}
		(2..)
			.map(|n| format!("{BOT_ALIAS}{n}"))
			.find(|a| !taken(a))
			.unwrap_or_else(|| BOT_ALIAS.to_string())
	}

	pub fn remove_bots(&mut self) -> Vec<Participant> {
		self.retain(|p| !p.bot)
	}

	pub fn first_bot(&self) -> Option<&Participant> {
		self.members.values().find(|p| p.bot)
	}

	/// Lets every bot without a choice play.
	pub fn play_bots<R: Rng + ?Sized>(&mut self, rng: &mut R) {
		let mut played = Vec::new();
		for p in self.members.values_mut().filter(|p| p.bot && p.choice.is_none()) {
			if let Some(choice) = bot_choice(p, rng) {
				p.choice = Some(choice);
				p.played = true;
				played.push(p.alias.clone());
			}
		}
		self.emit(&played);
	}

	/// Assigns `bucket`, `bucketMin` and `bucketMax` from a numeric attribute.
	///
	/// Buckets span `[0, buckets]`; when every value is equal each
	/// participant lands in the middle bucket.
	pub fn bucket(&mut self, attribute: &str, buckets: u32) {
		let everyone = self.aliases();
		self.bucket_among(attribute, buckets, &everyone);
	}

	/// [`Roster::bucket`] over `aliases` only; the range comes from them too.
	pub fn bucket_among(&mut self, attribute: &str, buckets: u32, aliases: &[String]) {
		let values: Vec<f64> = aliases
			.iter()
			.filter_map(|a| self.members.get(a))
			.map(|p| p.number(attribute).unwrap_or(0.0))
			.collect();
		let min = values.iter().copied().fold(f64::INFINITY, f64::min);
		let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

		let mut changed = Vec::with_capacity(values.len());
		for alias in aliases {
			let Some(p) = self.members.get_mut(alias) else {
				continue;
			};
			let value = p.number(attribute).unwrap_or(0.0);
			let ratio = (value - min) / (max - min);
			let bucket = if ratio.is_finite() {
				(ratio * f64::from(buckets)).floor() as i64
			} else {
				i64::from(buckets / 2)
			};
			p.extra.insert("bucket".into(), bucket.into());
			p.extra.insert("bucketMin".into(), json_number(min));
			p.extra.insert("bucketMax".into(), json_number(max));
			changed.push(alias.clone());
		}
		self.emit(&changed);
	}

	/// Plain data copy of every member, alias ordered.
	pub fn records(&self) -> Vec<Participant> {
		self.members.values().cloned().collect()
	}

	pub fn to_json(&self) -> Value {
		serde_json::to_value(self.records()).unwrap_or(Value::Null)
	}

	/// Makes the roster's content equal to `records`.
	///
	/// Members not in `records` are removed and the rest are overwritten.
	/// The queue is left alone.
	pub fn restore(&mut self, records: &[Participant]) {
		self.members = records
			.iter()
			.map(|p| (p.alias.clone(), p.clone()))
			.collect();
		for alias in self.members.keys() {
			self.queued_aliases.remove(alias);
		}
		let members = &self.members;
		self.queued.retain(|p| !members.contains_key(&p.alias));
		self.emit_all();
	}
}

fn bot_choice<R: Rng + ?Sized>(bot: &Participant, rng: &mut R) -> Option<String> {
	if let Some(fixed) = &bot.strategy {
		return Some(fixed.clone());
	}
	bot.valid_choices.as_ref()?.choose(rng).cloned()
}

fn json_number(n: f64) -> Value {
	serde_json::Number::from_f64(n)
		.map(Value::Number)
		.unwrap_or(Value::Null)
}
