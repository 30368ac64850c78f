//! Building an app from outside the crate with a custom state.

use std::sync::Arc;

use async_trait::async_trait;
use clicker_flow::states::{Attendance, Results};
use clicker_flow::{
	AppDefinition, Behavior, Choice, Context, Flow, Host, Participant, StateApp, StateMessage,
	StateSpec, Suppress, Topic,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

#[derive(Default)]
struct Screen {
	views: Mutex<Vec<String>>,
	logs: Mutex<Vec<Value>>,
}

#[async_trait]
impl Host for Screen {
	async fn fetch_roster(&self) -> clicker_flow::Result<Vec<Participant>> {
		Ok(vec![Participant::new("ann"), Participant::new("bob")])
	}

	async fn write_log(&self, _app_id: &str, log: Value) -> clicker_flow::Result<()> {
		self.logs.lock().push(log);
		Ok(())
	}

	fn load_view(&self, view: &str, _options: Value) {
		self.views.lock().push(view.to_string());
	}

	fn update_view(&self, _options: Value) {}

	fn participants_changed(&self, _batch: &[Participant]) {}

	fn suppress_updates(&self, _mode: Suppress) {}

	fn set_choices_ignored(&self, _ignored: bool) {}
}

/// Counts how many choices arrived while it was shown.
#[derive(Default)]
struct Poll {
	received: usize,
}

#[async_trait]
impl Behavior for Poll {
	fn name(&self) -> &str {
		"poll"
	}

	fn run(&mut self, ctx: &mut Context<'_>, _input: &StateMessage) -> Flow {
		ctx.subscribe(Topic::Choices);
		ctx.render("poll", json!({}));
		Flow::Stay
	}

	fn on_choices(&mut self, _ctx: &mut Context<'_>, _input: &StateMessage, report: &clicker_flow::ChoiceReport) {
		self.received += report.applied.len();
	}

	fn on_exit(&mut self, _ctx: &mut Context<'_>, input: &StateMessage) -> Option<StateMessage> {
		Some(input.clone().with("received", json!(self.received)))
	}
}

#[tokio::test]
async fn custom_state_plugs_into_an_app() {
	let screen = Arc::new(Screen::default());
	let definition = AppDefinition::new("poll", "1")
		.state("attendance", StateSpec::leaf(Attendance::new()))
		.state("poll", StateSpec::leaf(Poll::default()))
		.state("results", StateSpec::leaf(Results::new()));
	let mut app = StateApp::new(definition, screen.clone()).expect("valid app");

	app.start().await;
	app.dispatch_choices(&[Choice::new("ann", "A"), Choice::new("bob", "B")]);
	app.next().await;
	app.dispatch_choices(&[Choice::new("ann", "C")]);
	app.next().await;

	assert_eq!(*screen.views.lock(), vec!["attendance", "poll", "results"]);
	let results = app.current().expect("on results");
	let input = app.machine().input(results).expect("results entered");
	assert_eq!(input.get("received"), Some(&json!(1)));
	assert_eq!(screen.logs.lock().len(), 1);
	assert_eq!(app.roster().lock().get("ann").and_then(|p| p.choice.clone()).as_deref(), Some("C"));
}
