//! Declarative state trees, expanded once into the machine's arena.

use std::sync::Arc;

use rand::Rng;
use serde_json::Value;

use crate::behavior::Behavior;
use crate::message::StateMessage;

/// Computes what a composite records for a child on forward exit.
pub type OutputFn = Arc<dyn Fn(&StateMessage) -> Value + Send + Sync>;

/// Produces the `index`-th instance of a repeated state.
pub type Template = Arc<dyn Fn(usize) -> StateSpec + Send + Sync>;

/// Default key under which a composite hands its child outputs on.
pub const STATE_OUTPUTS_KEY: &str = "stateOutputs";

/// How many instances a repeating state expands into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
	Fixed(usize),
	/// `floor(min + random * (max - min))`.
	Range { min: usize, max: usize },
}

impl RepeatCount {
	/// Resolves the count; never less than one.
	pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
		let count = match *self {
			RepeatCount::Fixed(n) => n,
			RepeatCount::Range { min, max } if max > min => {
				let r: f64 = rng.random();
				(min as f64 + r * (max - min) as f64).floor() as usize
			}
			RepeatCount::Range { min, .. } => min,
		};
		count.max(1)
	}
}

pub(crate) enum SpecKind {
	Leaf(Box<dyn Behavior>),
	Composite(Vec<StateSpec>),
	Repeat { count: RepeatCount, template: Template },
}

/// One state in an app definition.
pub struct StateSpec {
	pub(crate) name: Option<String>,
	pub(crate) kind: SpecKind,
	pub(crate) outputs_key: Option<String>,
	pub(crate) output: Option<OutputFn>,
	pub(crate) count_key: Option<String>,
}

impl StateSpec {
	pub fn leaf(behavior: impl Behavior + 'static) -> Self {
		Self {
			name: None,
			kind: SpecKind::Leaf(Box::new(behavior)),
			outputs_key: None,
			output: None,
			count_key: None,
		}
	}

	/// Plays through `children` in order, then leaves.
	pub fn composite(name: impl Into<String>, children: Vec<StateSpec>) -> Self {
		Self {
			name: Some(name.into()),
			kind: SpecKind::Composite(children),
			outputs_key: None,
			output: None,
			count_key: None,
		}
	}

	/// Expands `template` into `count` children when the machine is built.
	///
	/// Instance names get a 1-based suffix, e.g. `round 1`.
	pub fn repeat<F>(name: impl Into<String>, count: RepeatCount, template: F) -> Self
	where
		F: Fn(usize) -> StateSpec + Send + Sync + 'static,
	{
		Self {
			name: Some(name.into()),
			kind: SpecKind::Repeat {
				count,
				template: Arc::new(template),
			},
			outputs_key: None,
			output: None,
			count_key: None,
		}
	}

	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Key for the child output array; composites only.
	pub fn outputs_key(mut self, key: impl Into<String>) -> Self {
		self.outputs_key = Some(key.into());
		self
	}

	/// What to record for each child on exit; composites only.
	pub fn output<F>(mut self, f: F) -> Self
	where
		F: Fn(&StateMessage) -> Value + Send + Sync + 'static,
	{
		self.output = Some(Arc::new(f));
		self
	}

	/// Follows the repeat count set under `key` in the app's config, both
	/// when the machine is built and on every reconfigure; repeats only.
	pub fn count_from(mut self, key: impl Into<String>) -> Self {
		self.count_key = Some(key.into());
		self
	}

	/// The `index`-th instance of a repeat, named with a 1-based suffix.
	pub(crate) fn instance(template: &Template, index: usize) -> StateSpec {
		let child = template(index);
		let base = child.resolved_name();
		child.named(format!("{base} {}", index + 1))
	}

	pub(crate) fn resolved_name(&self) -> String {
		match (&self.name, &self.kind) {
			(Some(name), _) => name.clone(),
			(None, SpecKind::Leaf(behavior)) => behavior.name().to_string(),
			(None, _) => "state".to_string(),
		}
	}
}
