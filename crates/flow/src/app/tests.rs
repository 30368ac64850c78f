use std::sync::atomic::Ordering;

use serde_json::json;

use super::*;
use crate::testing::{RecordingHost, Scripted, journal};

fn views(names: &[&str], j: &std::sync::Arc<parking_lot::Mutex<Vec<String>>>) -> AppDefinition {
	names.iter().fold(AppDefinition::new("test", "2.1"), |app, name| {
		app.state(*name, StateSpec::leaf(Scripted::view(name, j)))
	})
}

fn app(definition: AppDefinition) -> (StateApp, Arc<RecordingHost>) {
	let host = RecordingHost::with_seed(Vec::new());
	let app = StateApp::new(definition, host.clone()).unwrap();
	(app, host)
}

#[tokio::test]
async fn navigation_reports_whether_it_moved() {
	let j = journal();
	let (mut app, _host) = app(views(&["one", "two"], &j));

	assert!(app.start().await.is_some());
	assert!(app.prev().await.is_none());
	assert_eq!(app.next().await, app.machine().find("two"));
	assert!(app.next().await.is_none());
	assert_eq!(app.current_name(), Some("two"));
}

#[tokio::test]
async fn status_describes_the_current_state() {
	let j = journal();
	let (mut app, _host) = app(views(&["one", "two"], &j));
	assert_eq!(app.status().current, None);

	app.start().await;
	assert_eq!(
		app.status(),
		Progress {
			current: Some("one".into()),
			description: "one".into(),
			has_next: true,
			has_prev: false,
		}
	);
	let json = serde_json::to_value(app.status()).unwrap();
	assert_eq!(json["hasNext"], true);
}

#[tokio::test]
async fn log_is_written_once_the_last_state_is_reached() {
	let j = journal();
	let (mut app, host) = app(views(&["one", "two"], &j));
	app.start().await;

	let mut data = Map::new();
	data.insert("note".into(), json!("kept"));
	app.add_log_data(data);
	app.next().await;

	let logs = host.logs.lock().clone();
	assert_eq!(logs.len(), 1);
	assert_eq!(logs[0].0, "test");
	assert_eq!(logs[0].1["version"], "2.1");
	assert_eq!(logs[0].1["note"], "kept");
	assert!(logs[0].1["config"].is_object());

	// retreating to the first state forgets the log
	app.prev().await;
	assert!(app.log_data().is_none());
}

#[tokio::test]
async fn log_at_end_can_be_disabled() {
	let j = journal();
	let (mut app, host) = app(views(&["one", "two"], &j).write_log_at_end(false));
	app.start().await;
	app.next().await;
	assert!(host.logs.lock().is_empty());
}

#[tokio::test]
async fn blocked_transition_does_not_move() {
	let j = journal();
	let gate = Scripted::view("one", &j);
	let allow = gate.allow_next.clone();
	let definition = AppDefinition::new("test", "1")
		.state("one", StateSpec::leaf(gate))
		.state("two", StateSpec::leaf(Scripted::view("two", &j)));
	let (mut app, _host) = app(definition);
	app.start().await;

	allow.store(false, Ordering::SeqCst);
	assert!(app.next().await.is_none());
	assert_eq!(app.current_name(), Some("one"));
}

#[tokio::test]
async fn hooks_reach_the_active_state() {
	let j = journal();
	let (mut app, host) = app(views(&["one", "two"], &j));
	app.start().await;
	j.lock().clear();

	app.rerender();
	app.update(&json!({"highlight": "a"}));
	app.configure(Map::new());
	assert_eq!(
		*j.lock(),
		vec![
			"rerender:one".to_string(),
			r#"update:one:{"highlight":"a"}"#.to_string(),
			"configure:one".to_string(),
		]
	);
	assert_eq!(host.last_view().as_deref(), Some("one"));
}

#[tokio::test]
async fn load_state_jumps_between_top_level_states() {
	let j = journal();
	let (mut app, _host) = app(views(&["one", "two", "three"], &j));
	app.start().await;

	assert!(app.load_state("three", None).await);
	assert_eq!(app.current_name(), Some("three"));
	assert!(app.load_state("one", None).await);
	assert_eq!(app.current_name(), Some("one"));
}

#[test]
fn an_app_needs_states() {
	let host = RecordingHost::with_seed(Vec::new());
	let err = StateApp::new(AppDefinition::new("empty", "1"), host).err().unwrap();
	assert!(matches!(err, FlowError::NoStates(id) if id == "empty"));
}

#[test]
fn roster_changes_reach_the_host() {
	let j = journal();
	let (app, host) = app(views(&["one"], &j));
	app.roster().lock().insert(Participant::new("a"));
	assert_eq!(*host.changes.lock(), vec![vec!["a".to_string()]]);
}
