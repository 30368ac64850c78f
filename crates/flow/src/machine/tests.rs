use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, json};

use super::*;
use crate::builder::RepeatCount;
use crate::participant::{Participant, Roster};
use crate::testing::{RecordingHost, Scripted, journal};

type Journal = Arc<Mutex<Vec<String>>>;

fn build(states: Vec<(&str, StateSpec)>) -> (Machine, Arc<RecordingHost>) {
	let host = RecordingHost::with_seed(Vec::new());
	let roster = Roster::from_participants([Participant::new("a"), Participant::new("b")]).shared();
	let states = states.into_iter().map(|(k, s)| (k.to_string(), s)).collect();
	let machine = Machine::build(
		states,
		host.clone(),
		roster,
		Map::new(),
		&mut StdRng::seed_from_u64(0),
	)
	.unwrap();
	(machine, host)
}

fn input(machine: &Machine) -> StateMessage {
	StateMessage::with_roster(machine.shared.roster.clone())
}

fn leaf_name(machine: &Machine) -> String {
	machine
		.active_leaf()
		.map(|id| machine.name(id).to_string())
		.unwrap_or_default()
}

fn view(name: &str, j: &Journal) -> StateSpec {
	StateSpec::leaf(Scripted::view(name, j))
}

fn pass(name: &str, j: &Journal) -> StateSpec {
	StateSpec::leaf(Scripted::pass(name, j))
}

async fn start(machine: &mut Machine) -> Outcome {
	let first = machine.top_level()[0].1;
	let message = input(machine);
	machine.enter(first, Some(message), None).await
}

#[tokio::test]
async fn pass_through_states_advance_and_retreat() {
	let j = journal();
	let (mut m, _host) = build(vec![
		("a", view("a", &j)),
		("b", pass("b", &j)),
		("c", view("c", &j)),
	]);
	let a = m.find("a").unwrap();
	let c = m.find("c").unwrap();

	assert_eq!(start(&mut m).await, Outcome::Settled(a));
	assert_eq!(m.next(a).await, Outcome::Settled(c));
	assert_eq!(m.active(), Some(c));
	assert_eq!(
		*j.lock(),
		vec!["enter:a", "exit:a", "enter:b", "exit:b", "enter:c"]
	);

	j.lock().clear();
	assert_eq!(m.prev(c).await, Outcome::Settled(a));
	// leaving backward never runs exit hooks
	assert_eq!(*j.lock(), vec!["enter:b", "enter:a"]);
}

#[tokio::test]
async fn refused_validation_keeps_the_state() {
	let j = journal();
	let gate = Scripted::view("a", &j);
	let allow = gate.allow_next.clone();
	let (mut m, _host) = build(vec![("a", StateSpec::leaf(gate)), ("b", view("b", &j))]);
	let a = m.find("a").unwrap();
	start(&mut m).await;

	allow.store(false, Ordering::SeqCst);
	assert_eq!(m.next(a).await, Outcome::Blocked);
	assert_eq!(m.active(), Some(a));

	allow.store(true, Ordering::SeqCst);
	let b = m.find("b").unwrap();
	assert_eq!(m.next(a).await, Outcome::Settled(b));
}

#[tokio::test]
async fn last_state_reports_edge() {
	let j = journal();
	let (mut m, _host) = build(vec![("a", view("a", &j))]);
	let a = m.find("a").unwrap();
	start(&mut m).await;

	assert_eq!(m.next(a).await, Outcome::Edge);
	assert_eq!(m.prev(a).await, Outcome::Edge);
	assert_eq!(m.active(), Some(a));
	assert!(!m.has_next(a));
	assert!(!m.has_prev(a));
}

#[tokio::test]
async fn repeated_rounds_leave_exactly_after_the_last_round() {
	for rounds in 1..=4 {
		let j = journal();
		let (mut m, _host) = build(vec![
			(
				"phase",
				StateSpec::repeat("phase", RepeatCount::Fixed(rounds), {
					let j = j.clone();
					move |_| view("round", &j)
				}),
			),
			("after", view("after", &j)),
		]);
		let phase = m.find("phase").unwrap();
		let after = m.find("after").unwrap();
		start(&mut m).await;

		for step in 1..rounds {
			assert_eq!(m.next(phase).await, Outcome::Settled(phase), "step {step} of {rounds}");
			assert_eq!(leaf_name(&m), format!("round {}", step + 1));
		}
		assert_eq!(m.next(phase).await, Outcome::Settled(after));
		assert_eq!(m.active(), Some(after));

		let entered_after = j.lock().iter().filter(|e| *e == "enter:after").count();
		assert_eq!(entered_after, 1);
	}
}

#[tokio::test]
async fn composite_whose_last_child_passes_moves_on() {
	let j = journal();
	let (mut m, _host) = build(vec![
		(
			"group",
			StateSpec::composite("group", vec![view("a", &j), pass("b", &j)]),
		),
		("after", view("after", &j)),
	]);
	let group = m.find("group").unwrap();
	let after = m.find("after").unwrap();

	assert_eq!(start(&mut m).await, Outcome::Settled(group));
	assert_eq!(leaf_name(&m), "a");
	assert_eq!(m.next(group).await, Outcome::Settled(after));

	// retreating into the group skips the pass-through child
	assert_eq!(m.prev(after).await, Outcome::Settled(group));
	assert_eq!(leaf_name(&m), "a");
}

fn rounds_phase(j: &Journal, rounds: usize) -> StateSpec {
	let j = j.clone();
	StateSpec::repeat("phase", RepeatCount::Fixed(rounds), move |i| {
		StateSpec::composite("round", vec![view("play", &j), pass("score", &j)])
			.output(move |_| json!(i + 1))
	})
	.outputs_key("roundOutputs")
	.output(|m| m.get("last").cloned().unwrap_or_default())
}

#[tokio::test]
async fn outputs_are_recorded_and_truncated_on_reentry() {
	let j = journal();
	let (mut m, _host) = build(vec![("phase", rounds_phase(&j, 3)), ("end", view("end", &j))]);
	let phase = m.find("phase").unwrap();
	start(&mut m).await;

	m.next(phase).await;
	m.next(phase).await;
	assert_eq!(leaf_name(&m), "play");
	assert_eq!(m.describe(phase), "phase[3/3] round 3[1/2] play");
	assert_eq!(m.outputs(phase), &[json!("score"), json!("score")]);

	assert_eq!(m.prev(phase).await, Outcome::Settled(phase));
	assert_eq!(m.describe(phase), "phase[2/3] round 2[1/2] play");
	assert_eq!(m.outputs(phase).len(), 1);

	m.next(phase).await;
	m.next(phase).await;
	let end = m.find("end").unwrap();
	assert_eq!(m.active(), Some(end));
	let handed = m.input(end).unwrap();
	assert_eq!(handed.get("roundOutputs"), Some(&json!(["score", "score", "score"])));
}

#[tokio::test]
async fn score_exits_once_per_round() {
	let j = journal();
	let (mut m, _host) = build(vec![("phase", rounds_phase(&j, 2)), ("end", view("end", &j))]);
	let phase = m.find("phase").unwrap();
	start(&mut m).await;
	m.next(phase).await;
	m.next(phase).await;

	let exits = j.lock().iter().filter(|e| *e == "exit:score").count();
	assert_eq!(exits, 2);
}

#[tokio::test]
async fn prev_replays_the_input_snapshot() {
	let j = journal();
	let (mut m, _host) = build(vec![("a", view("a", &j)), ("b", view("b", &j))]);
	let a = m.find("a").unwrap();
	let b = m.find("b").unwrap();
	start(&mut m).await;

	let roster = m.shared.roster.clone();
	roster.lock().set_choice("a", Some("A".into())).unwrap();
	m.next(a).await;

	roster.lock().set_choice("a", Some("B".into())).unwrap();
	roster.lock().insert(Participant::new("late"));
	assert_eq!(m.prev(b).await, Outcome::Settled(a));

	let live = roster.lock();
	assert_eq!(live.get("a").unwrap().choice, None);
	assert!(!live.contains("late"));
}

#[tokio::test]
async fn failing_entry_hook_still_runs_the_body() {
	let j = journal();
	let (mut m, host) = build(vec![("a", StateSpec::leaf(Scripted::view("a", &j).failing_entry()))]);
	let a = m.find("a").unwrap();
	assert_eq!(start(&mut m).await, Outcome::Settled(a));
	assert_eq!(host.last_view().as_deref(), Some("a"));
}

#[tokio::test]
async fn subscriptions_end_when_the_state_is_left() {
	let j = journal();
	let (mut m, _host) = build(vec![
		("a", StateSpec::leaf(Scripted::view("a", &j).subscribing())),
		("b", view("b", &j)),
	]);
	let a = m.find("a").unwrap();
	start(&mut m).await;
	assert!(m.is_subscribed(a, Topic::Choices));

	let report = ChoiceReport {
		applied: vec!["a".into()],
		..Default::default()
	};
	m.dispatch_choices(&report);
	assert!(j.lock().contains(&"choices:a:1".to_string()));

	m.next(a).await;
	assert!(!m.is_subscribed(a, Topic::Choices));

	let b = m.find("b").unwrap();
	m.prev(b).await;
	assert!(m.is_subscribed(a, Topic::Choices));
}

#[tokio::test]
async fn entry_brackets_buffered_updates() {
	let j = journal();
	let (mut m, host) = build(vec![("a", pass("a", &j)), ("b", view("b", &j))]);
	start(&mut m).await;

	let modes = host.suppress.lock().clone();
	assert_eq!(modes.first(), Some(&Suppress::UntilResumed));
	assert_eq!(modes.last(), Some(&Suppress::Off));
}

#[tokio::test]
async fn nested_composites_navigate_both_ways() {
	let j = journal();
	let inner = StateSpec::composite("inner", vec![view("x", &j), view("y", &j)]);
	let outer = StateSpec::composite("outer", vec![view("w", &j), inner]);
	let (mut m, _host) = build(vec![("outer", outer), ("end", view("end", &j))]);
	let outer = m.find("outer").unwrap();
	start(&mut m).await;

	let mut seen = vec![leaf_name(&m)];
	while m.next(outer).await == Outcome::Settled(outer) {
		seen.push(leaf_name(&m));
	}
	assert_eq!(seen, vec!["w", "x", "y"]);
	assert_eq!(m.active(), m.find("end"));

	let end = m.find("end").unwrap();
	m.prev(end).await;
	assert_eq!(leaf_name(&m), "y");
	assert!(m.is_last_deep(outer));
	m.prev(outer).await;
	m.prev(outer).await;
	assert_eq!(leaf_name(&m), "w");
	assert!(m.is_first_deep(outer));
	assert_eq!(m.prev(outer).await, Outcome::Edge);
}

#[test]
fn duplicate_keys_and_empty_composites_are_rejected() {
	let j = journal();
	let host = RecordingHost::with_seed(Vec::new());
	let roster = Roster::new().shared();
	let dup = Machine::build(
		vec![("a".into(), view("a", &j)), ("a".into(), view("b", &j))],
		host.clone(),
		roster.clone(),
		Map::new(),
		&mut StdRng::seed_from_u64(0),
	);
	assert!(matches!(dup, Err(FlowError::DuplicateState(k)) if k == "a"));

	let empty = Machine::build(
		vec![("g".into(), StateSpec::composite("g", Vec::new()))],
		host,
		roster,
		Map::new(),
		&mut StdRng::seed_from_u64(0),
	);
	assert!(matches!(empty, Err(FlowError::EmptyComposite(_))));
}

fn repeat_of_views(j: &Journal, rounds: usize) -> StateSpec {
	let j = j.clone();
	StateSpec::repeat("phase", RepeatCount::Fixed(rounds), move |_| view("round", &j))
}

fn phase_names(m: &Machine, phase: StateId) -> Vec<String> {
	m.children(phase).iter().map(|id| m.name(*id).to_string()).collect()
}

#[tokio::test]
async fn growing_repeats_appends_linked_instances() {
	let j = journal();
	let (mut m, _host) = build(vec![("phase", repeat_of_views(&j, 2)), ("after", view("after", &j))]);
	let phase = m.find("phase").unwrap();
	start(&mut m).await;

	assert_eq!(m.set_repeats(phase, 4).unwrap(), 4);
	assert_eq!(phase_names(&m, phase), vec!["round 1", "round 2", "round 3", "round 4"]);

	let mut seen = vec![leaf_name(&m)];
	while m.next(phase).await == Outcome::Settled(phase) {
		seen.push(leaf_name(&m));
	}
	assert_eq!(seen, vec!["round 1", "round 2", "round 3", "round 4"]);
	assert_eq!(m.active(), m.find("after"));
}

#[tokio::test]
async fn shrinking_repeats_pulls_the_cursor_back() {
	let j = journal();
	let (mut m, _host) = build(vec![("phase", repeat_of_views(&j, 4)), ("after", view("after", &j))]);
	let phase = m.find("phase").unwrap();
	start(&mut m).await;
	m.next(phase).await;
	m.next(phase).await;
	assert_eq!(leaf_name(&m), "round 3");

	assert_eq!(m.set_repeats(phase, 2).unwrap(), 2);
	assert_eq!(phase_names(&m, phase), vec!["round 1", "round 2"]);
	assert_eq!(m.describe(phase), "phase[2/2] round 2");
	assert!(m.is_last_deep(phase));
	assert_eq!(m.outputs(phase).len(), 2);

	assert_eq!(m.next(phase).await, Outcome::Settled(m.find("after").unwrap()));
	// zero is clamped to one instance
	assert_eq!(m.set_repeats(phase, 0).unwrap(), 1);
}

#[test]
fn only_repeats_change_their_count() {
	let j = journal();
	let (mut m, _host) = build(vec![
		("group", StateSpec::composite("group", vec![view("a", &j)])),
		("leaf", view("b", &j)),
	]);
	let group = m.find("group").unwrap();
	let leaf = m.find("leaf").unwrap();
	assert!(matches!(m.set_repeats(group, 2), Err(FlowError::NotRepeating(n)) if n == "group"));
	assert!(matches!(m.set_repeats(leaf, 2), Err(FlowError::NotRepeating(_))));
}

#[test]
fn configured_counts_drive_repeats() {
	let j = journal();
	let mut config = Map::new();
	config.insert("rounds".into(), json!(3));
	let mut m = Machine::build(
		vec![("phase".into(), repeat_of_views(&j, 1).count_from("rounds"))],
		RecordingHost::with_seed(Vec::new()),
		Roster::new().shared(),
		config,
		&mut StdRng::seed_from_u64(0),
	)
	.unwrap();
	let phase = m.find("phase").unwrap();
	assert_eq!(m.children(phase).len(), 3);

	m.shared.config.insert("rounds".into(), json!(5));
	m.handle_configure();
	assert_eq!(m.children(phase).len(), 5);

	// ranges and other non-numbers leave the count alone
	m.shared.config.insert("rounds".into(), json!({ "min": 1, "max": 2 }));
	m.handle_configure();
	assert_eq!(m.children(phase).len(), 5);
}
