//! Arena of states with index links, and the transition algorithms.
//!
//! Every state, including each expanded repeat instance, is a node in one
//! vector. Sibling `next`/`prev` links and parent indices are fixed when
//! the machine is built. Only [`Machine::set_repeats`] rewires them, at the
//! tail of a repeating state; instances it drops stay in the arena
//! unreachable.
//!
//! A transition returns an [`Outcome`]:
//!
//! - `Settled(id)`: the sibling-level state the transition ended on
//! - `Blocked`: a validation hook refused, nothing moved
//! - `Edge`: the state has no neighbor in that direction, so an enclosing
//!   composite decides whether to leave itself

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::behavior::{Behavior, Context, Flow, Host, Shared, Suppress, Topic};
use crate::builder::{OutputFn, STATE_OUTPUTS_KEY, SpecKind, StateSpec, Template};
use crate::error::{FlowError, Result};
use crate::message::{Snapshot, StateMessage};
use crate::participant::{ChoiceReport, SharedRoster};

/// Index of a state in the machine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
	pub fn index(self) -> usize {
		self.0
	}
}

/// Result of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Settled(StateId),
	Blocked,
	Edge,
}

impl Outcome {
	pub fn settled(self) -> Option<StateId> {
		match self {
			Outcome::Settled(id) => Some(id),
			_ => None,
		}
	}
}

struct Composite {
	children: Vec<StateId>,
	cursor: Option<usize>,
	outputs: Vec<Value>,
	outputs_key: String,
	output: Option<OutputFn>,
	/// Set on repeats; new instances come from here.
	template: Option<Template>,
	count_key: Option<String>,
}

enum NodeKind {
	Leaf(Box<dyn Behavior>),
	Composite(Composite),
}

struct Node {
	name: String,
	parent: Option<StateId>,
	index: usize,
	next: Option<StateId>,
	prev: Option<StateId>,
	input: Option<StateMessage>,
	snapshot: Option<Snapshot>,
	subscriptions: Vec<Topic>,
	kind: NodeKind,
}

/// The wired state tree of one app.
pub struct Machine {
	nodes: Vec<Node>,
	top: Vec<(String, StateId)>,
	active: Option<StateId>,
	pub(crate) shared: Shared,
}

impl Machine {
	/// Expands `states` into the arena and links siblings.
	pub fn build<R: Rng + ?Sized>(
		states: Vec<(String, StateSpec)>,
		host: Arc<dyn Host>,
		roster: SharedRoster,
		config: Map<String, Value>,
		rng: &mut R,
	) -> Result<Self> {
		let mut nodes = Vec::new();
		let mut top: Vec<(String, StateId)> = Vec::with_capacity(states.len());

		for (index, (key, spec)) in states.into_iter().enumerate() {
			if top.iter().any(|(k, _)| *k == key) {
				return Err(FlowError::DuplicateState(key));
			}
			let id = add_node(&mut nodes, spec, None, index, rng)?;
			top.push((key, id));
		}
		let ids: Vec<StateId> = top.iter().map(|(_, id)| *id).collect();
		link_siblings(&mut nodes, &ids);

		let mut machine = Self {
			nodes,
			top,
			active: None,
			shared: Shared {
				host,
				roster,
				config,
				log: None,
				write_requested: false,
			},
		};
		machine.sync_repeats();
		Ok(machine)
	}

	/// Grows or shrinks the repeating state `id` to `count` instances
	/// (at least one) and returns the new count.
	///
	/// Shrinking drops the trailing instances and their recorded outputs.
	/// If the cursor was on a dropped instance it moves to the new last
	/// one. Growing appends instances built by the repeat's template.
	pub fn set_repeats(&mut self, id: StateId, count: usize) -> Result<usize> {
		let count = count.max(1);
		let (template, children) = match &self.nodes[id.0].kind {
			NodeKind::Composite(Composite {
				template: Some(template),
				children,
				..
			}) => (template.clone(), children.clone()),
			_ => return Err(FlowError::NotRepeating(self.nodes[id.0].name.clone())),
		};
		let current = children.len();

		if count < current {
			let last = children[count - 1];
			self.nodes[last.0].next = None;
			if let NodeKind::Composite(c) = &mut self.nodes[id.0].kind {
				c.children.truncate(count);
				c.outputs.truncate(count);
				if let Some(cursor) = c.cursor.as_mut() {
					*cursor = (*cursor).min(count - 1);
				}
			}
		} else if count > current {
			let mut rng = rand::rng();
			let mut added = Vec::with_capacity(count - current);
			for i in current..count {
				let spec = StateSpec::instance(&template, i);
				added.push(add_node(&mut self.nodes, spec, Some(id), i, &mut rng)?);
			}
			let mut tail: Vec<StateId> = children.last().copied().into_iter().collect();
			tail.extend(&added);
			link_siblings(&mut self.nodes, &tail);
			if let NodeKind::Composite(c) = &mut self.nodes[id.0].kind {
				c.children.extend(added);
			}
		}
		if count != current {
			debug!(target = "clicker.flow", state = %self.nodes[id.0].name, from = current, to = count, "repeats changed");
		}
		Ok(count)
	}

	/// Applies config-driven repeat counts; non-numeric values are ignored.
	pub(crate) fn sync_repeats(&mut self) {
		let targets: Vec<(StateId, usize)> = self
			.nodes
			.iter()
			.enumerate()
			.filter_map(|(i, node)| match &node.kind {
				NodeKind::Composite(Composite {
					count_key: Some(key),
					..
				}) => {
					let count = self.shared.config.get(key).and_then(Value::as_u64)?;
					Some((StateId(i), usize::try_from(count).ok()?))
				}
				_ => None,
			})
			.collect();
		for (id, count) in targets {
			if let Err(error) = self.set_repeats(id, count) {
				warn!(target = "clicker.flow", %error, "cannot apply repeat count");
			}
		}
	}

	pub fn top_level(&self) -> &[(String, StateId)] {
		&self.top
	}

	pub fn find(&self, key: &str) -> Option<StateId> {
		self.top.iter().find(|(k, _)| k == key).map(|(_, id)| *id)
	}

	/// Top-level key first, then the first state with that name.
	pub fn lookup(&self, key: &str) -> Option<StateId> {
		self.find(key).or_else(|| {
			self.nodes
				.iter()
				.position(|node| node.name == key)
				.map(StateId)
		})
	}

	/// Top-level state most recently entered.
	pub fn active(&self) -> Option<StateId> {
		self.active
	}

	pub fn name(&self, id: StateId) -> &str {
		&self.nodes[id.0].name
	}

	pub fn parent(&self, id: StateId) -> Option<StateId> {
		self.nodes[id.0].parent
	}

	pub fn next_of(&self, id: StateId) -> Option<StateId> {
		self.nodes[id.0].next
	}

	pub fn prev_of(&self, id: StateId) -> Option<StateId> {
		self.nodes[id.0].prev
	}

	pub fn children(&self, id: StateId) -> &[StateId] {
		match &self.nodes[id.0].kind {
			NodeKind::Composite(c) => &c.children,
			NodeKind::Leaf(_) => &[],
		}
	}

	/// Child the composite is currently on.
	pub fn current_child(&self, id: StateId) -> Option<StateId> {
		match &self.nodes[id.0].kind {
			NodeKind::Composite(c) => c.cursor.map(|i| c.children[i]),
			NodeKind::Leaf(_) => None,
		}
	}

	/// Outputs recorded so far by a composite, indexed by child position.
	pub fn outputs(&self, id: StateId) -> &[Value] {
		match &self.nodes[id.0].kind {
			NodeKind::Composite(c) => &c.outputs,
			NodeKind::Leaf(_) => &[],
		}
	}

	pub fn input(&self, id: StateId) -> Option<&StateMessage> {
		self.nodes[id.0].input.as_ref()
	}

	pub fn snapshot(&self, id: StateId) -> Option<&Snapshot> {
		self.nodes[id.0].snapshot.as_ref()
	}

	pub fn is_subscribed(&self, id: StateId, topic: Topic) -> bool {
		self.nodes[id.0].subscriptions.contains(&topic)
	}

	/// Active states from the top level down to the innermost leaf.
	pub fn active_chain(&self) -> Vec<StateId> {
		let mut chain = Vec::new();
		let mut cursor = self.active;
		while let Some(id) = cursor {
			chain.push(id);
			cursor = self.current_child(id);
		}
		chain
	}

	fn is_composite(&self, id: StateId) -> bool {
		matches!(self.nodes[id.0].kind, NodeKind::Composite(_))
	}

	/// On the last child, recursively through nested composites.
	pub fn is_last_deep(&self, id: StateId) -> bool {
		match &self.nodes[id.0].kind {
			NodeKind::Leaf(_) => true,
			NodeKind::Composite(c) => match c.cursor {
				Some(i) if i + 1 == c.children.len() => self.is_last_deep(c.children[i]),
				_ => false,
			},
		}
	}

	/// On the first child, recursively through nested composites.
	pub fn is_first_deep(&self, id: StateId) -> bool {
		match &self.nodes[id.0].kind {
			NodeKind::Leaf(_) => true,
			NodeKind::Composite(c) => match c.cursor {
				Some(0) => self.is_first_deep(c.children[0]),
				_ => false,
			},
		}
	}

	pub fn has_next(&self, id: StateId) -> bool {
		if self.is_composite(id) && !self.is_last_deep(id) {
			return true;
		}
		self.nodes[id.0].next.is_some()
	}

	pub fn has_prev(&self, id: StateId) -> bool {
		if self.is_composite(id) && !self.is_first_deep(id) {
			return true;
		}
		self.nodes[id.0].prev.is_some()
	}

	/// `phase[2/5] round 2[1/3] play`
	pub fn describe(&self, id: StateId) -> String {
		let node = &self.nodes[id.0];
		match &node.kind {
			NodeKind::Leaf(_) => node.name.clone(),
			NodeKind::Composite(c) => match c.cursor {
				Some(i) => format!(
					"{}[{}/{}] {}",
					node.name,
					i + 1,
					c.children.len(),
					self.describe(c.children[i])
				),
				None => node.name.clone(),
			},
		}
	}

	pub fn next_string(&self, id: StateId) -> String {
		let next = self.nodes[id.0].next.map_or("#", |n| self.name(n));
		format!("{} -> {}", self.describe(id), next)
	}

	pub fn prev_string(&self, id: StateId) -> String {
		let prev = self.nodes[id.0].prev.map_or("#", |p| self.name(p));
		format!("{} <- {}", prev, self.describe(id))
	}

	/// Enters `id` with `input`, coming from `from`.
	///
	/// When no input is supplied the state replays its last snapshot on top
	/// of its previous input. A body that advances moves on with `next`,
	/// unless the state was entered from its own `next`, in which case it
	/// keeps retreating with `prev`.
	pub async fn enter(&mut self, id: StateId, input: Option<StateMessage>, from: Option<StateId>) -> Outcome {
		let backward = from.is_some() && from == self.nodes[id.0].next;
		self.enter_inner(id, input, backward).await
	}

	pub async fn next(&mut self, id: StateId) -> Outcome {
		self.next_inner(id).await
	}

	pub async fn prev(&mut self, id: StateId) -> Outcome {
		self.prev_inner(id).await
	}

	fn enter_inner(&mut self, id: StateId, input: Option<StateMessage>, backward: bool) -> BoxFuture<'_, Outcome> {
		async move {
			let host = self.shared.host.clone();
			host.suppress_updates(Suppress::UntilResumed);

			let input = self.resolve_input(id, input);
			self.mark_entered(id);
			debug!(target = "clicker.flow", state = %self.nodes[id.0].name, backward, "enter");

			let Node {
				kind,
				subscriptions,
				name,
				..
			} = &mut self.nodes[id.0];
			let NodeKind::Leaf(behavior) = kind else {
				host.suppress_updates(Suppress::Off);
				return self.run_composite(id, input, backward).await;
			};

			let mut ctx = Context {
				shared: &mut self.shared,
				subscriptions,
				name: name.as_str(),
			};
			if let Err(err) = behavior.on_entry(&mut ctx, &input).await {
				warn!(target = "clicker.flow", state = %ctx.name, error = %err, "entry hook failed");
			}
			host.suppress_updates(Suppress::Off);

			behavior.add_new_participants(&mut ctx, &input);
			let flow = behavior.run(&mut ctx, &input);

			match flow {
				Flow::Stay => Outcome::Settled(id),
				Flow::Advance => {
					let outcome = if backward {
						self.prev_inner(id).await
					} else {
						self.next_inner(id).await
					};
					match outcome {
						Outcome::Blocked => Outcome::Settled(id),
						other => other,
					}
				}
			}
		}
		.boxed()
	}

	fn resolve_input(&mut self, id: StateId, input: Option<StateMessage>) -> StateMessage {
		let node = &mut self.nodes[id.0];
		match input {
			Some(message) => {
				node.snapshot = Some(message.snapshot());
				node.input = Some(message.clone());
				message
			}
			None => {
				let replayed = node
					.snapshot
					.as_ref()
					.and_then(|s| s.activate(node.input.as_ref()));
				if let Some(message) = &replayed {
					node.input = Some(message.clone());
				}
				replayed
					.or_else(|| node.input.clone())
					.unwrap_or_default()
			}
		}
	}

	/// Entry signal: moves the parent's cursor here and drops outputs
	/// recorded at or after this position.
	fn mark_entered(&mut self, id: StateId) {
		let (parent, index) = (self.nodes[id.0].parent, self.nodes[id.0].index);
		match parent {
			None => self.active = Some(id),
			Some(parent) => {
				if let NodeKind::Composite(c) = &mut self.nodes[parent.0].kind {
					c.cursor = Some(index);
					c.outputs.truncate(index);
				}
			}
		}
	}

	async fn run_composite(&mut self, id: StateId, input: StateMessage, backward: bool) -> Outcome {
		let (child, child_input) = match &mut self.nodes[id.0].kind {
			NodeKind::Composite(c) => {
				let cursor = *c.cursor.get_or_insert(0);
				(c.children[cursor], (cursor == 0).then_some(input))
			}
			NodeKind::Leaf(_) => return Outcome::Settled(id),
		};

		match self.enter_inner(child, child_input, backward).await {
			// the child ran past our boundary while auto-advancing
			Outcome::Edge if backward => self.base_prev(id).await,
			Outcome::Edge => self.base_next(id).await,
			_ => Outcome::Settled(id),
		}
	}

	fn next_inner(&mut self, id: StateId) -> BoxFuture<'_, Outcome> {
		async move {
			let child = match self.current_child(id) {
				Some(child) if !self.is_last_deep(id) => child,
				_ => return self.base_next(id).await,
			};
			match self.next_inner(child).await {
				Outcome::Edge => self.base_next(id).await,
				Outcome::Blocked => Outcome::Blocked,
				Outcome::Settled(_) => Outcome::Settled(id),
			}
		}
		.boxed()
	}

	fn prev_inner(&mut self, id: StateId) -> BoxFuture<'_, Outcome> {
		async move {
			let child = match self.current_child(id) {
				Some(child) if !self.is_first_deep(id) => child,
				_ => return self.base_prev(id).await,
			};
			match self.prev_inner(child).await {
				Outcome::Edge => self.base_prev(id).await,
				Outcome::Blocked => Outcome::Blocked,
				Outcome::Settled(_) => Outcome::Settled(id),
			}
		}
		.boxed()
	}

	async fn base_next(&mut self, id: StateId) -> Outcome {
		if !self.validate(id, true) {
			debug!(target = "clicker.flow", state = %self.nodes[id.0].name, "next blocked");
			return Outcome::Blocked;
		}
		let Some(next) = self.nodes[id.0].next else {
			return Outcome::Edge;
		};
		let output = self.exit(id);
		self.enter_inner(next, Some(output), false).await
	}

	async fn base_prev(&mut self, id: StateId) -> Outcome {
		if !self.validate(id, false) {
			debug!(target = "clicker.flow", state = %self.nodes[id.0].name, "prev blocked");
			return Outcome::Blocked;
		}
		let Some(prev) = self.nodes[id.0].prev else {
			return Outcome::Edge;
		};
		self.release(id);
		self.enter_inner(prev, None, true).await
	}

	fn validate(&self, id: StateId, forward: bool) -> bool {
		let node = &self.nodes[id.0];
		let NodeKind::Leaf(behavior) = &node.kind else {
			return true;
		};
		let empty = StateMessage::default();
		let input = node.input.as_ref().unwrap_or(&empty);
		if forward {
			behavior.validate_next(input)
		} else {
			behavior.validate_prev(input)
		}
	}

	/// Forward exit: runs the exit hook, records the output in the parent
	/// and releases subscriptions. Composites exit their current child first.
	pub fn exit(&mut self, id: StateId) -> StateMessage {
		let host = self.shared.host.clone();
		host.suppress_updates(Suppress::UntilResumed);

		let input = self.nodes[id.0].input.clone().unwrap_or_default();
		let child = match &self.nodes[id.0].kind {
			NodeKind::Composite(c) => Some(c.cursor.map(|i| c.children[i])),
			NodeKind::Leaf(_) => None,
		};

		let output = match child {
			None => self
				.with_leaf(id, |behavior, ctx| behavior.on_exit(ctx, &input))
				.flatten()
				.unwrap_or(input),
			Some(child) => {
				let child_output = match child {
					Some(child) => self.exit(child),
					None => input,
				};
				let (key, outputs) = match &self.nodes[id.0].kind {
					NodeKind::Composite(c) => (c.outputs_key.clone(), c.outputs.clone()),
					NodeKind::Leaf(_) => (STATE_OUTPUTS_KEY.to_string(), Vec::new()),
				};
				let mut overrides = Map::new();
				overrides.insert(key, Value::Array(outputs));
				child_output.clone_with(overrides)
			}
		};

		self.record_output(id, &output);
		host.suppress_updates(Suppress::Off);
		self.nodes[id.0].subscriptions.clear();
		trace!(target = "clicker.flow", state = %self.nodes[id.0].name, "exit");
		output
	}

	fn record_output(&mut self, id: StateId, output: &StateMessage) {
		let (Some(parent), index) = (self.nodes[id.0].parent, self.nodes[id.0].index) else {
			return;
		};
		if let NodeKind::Composite(c) = &mut self.nodes[parent.0].kind {
			let value = c.output.as_ref().map_or(Value::Null, |f| f(output));
			if c.outputs.len() <= index {
				c.outputs.resize(index + 1, Value::Null);
			}
			c.outputs[index] = value;
		}
	}

	/// Backward leave: drops subscriptions along the active sub-chain
	/// without running exit hooks.
	fn release(&mut self, id: StateId) {
		let mut cursor = Some(id);
		while let Some(id) = cursor {
			self.nodes[id.0].subscriptions.clear();
			cursor = self.current_child(id);
		}
	}

	fn with_leaf<R>(
		&mut self,
		id: StateId,
		f: impl FnOnce(&mut Box<dyn Behavior>, &mut Context<'_>) -> R,
	) -> Option<R> {
		let Node {
			kind,
			subscriptions,
			name,
			..
		} = &mut self.nodes[id.0];
		let NodeKind::Leaf(behavior) = kind else {
			return None;
		};
		let mut ctx = Context {
			shared: &mut self.shared,
			subscriptions,
			name: name.as_str(),
		};
		Some(f(behavior, &mut ctx))
	}

	fn input_or_default(&self, id: StateId) -> StateMessage {
		self.nodes[id.0].input.clone().unwrap_or_default()
	}

	/// Innermost active leaf.
	pub fn active_leaf(&self) -> Option<StateId> {
		self.active_chain().last().copied()
	}

	pub(crate) fn handle_configure(&mut self) {
		self.sync_repeats();
		for id in self.active_chain() {
			let input = self.input_or_default(id);
			self.with_leaf(id, |behavior, ctx| behavior.handle_configure(ctx, &input));
		}
	}

	pub(crate) fn rerender(&mut self) {
		if let Some(id) = self.active_leaf() {
			let input = self.input_or_default(id);
			self.with_leaf(id, |behavior, ctx| behavior.rerender(ctx, &input));
		}
	}

	pub(crate) fn update(&mut self, data: &Value) {
		if let Some(id) = self.active_leaf() {
			let input = self.input_or_default(id);
			self.with_leaf(id, |behavior, ctx| behavior.update(ctx, &input, data));
		}
	}

	/// Hands a choice report to every active state subscribed to choices.
	pub(crate) fn dispatch_choices(&mut self, report: &ChoiceReport) {
		for id in self.active_chain() {
			if !self.is_subscribed(id, Topic::Choices) {
				continue;
			}
			let input = self.input_or_default(id);
			self.with_leaf(id, |behavior, ctx| behavior.on_choices(ctx, &input, report));
		}
	}
}

fn add_node<R: Rng + ?Sized>(
	nodes: &mut Vec<Node>,
	spec: StateSpec,
	parent: Option<StateId>,
	index: usize,
	rng: &mut R,
) -> Result<StateId> {
	let name = spec.resolved_name();
	let id = StateId(nodes.len());
	let outputs_key = spec
		.outputs_key
		.clone()
		.unwrap_or_else(|| STATE_OUTPUTS_KEY.to_string());

	let (children_specs, template) = match spec.kind {
		SpecKind::Leaf(behavior) => {
			nodes.push(Node::new(name, parent, index, NodeKind::Leaf(behavior)));
			return Ok(id);
		}
		SpecKind::Composite(children) => (children, None),
		SpecKind::Repeat { count, template } => {
			let count = count.resolve(rng);
			let children = (0..count)
				.map(|i| StateSpec::instance(&template, i))
				.collect();
			(children, Some(template))
		}
	};
	if children_specs.is_empty() {
		return Err(FlowError::EmptyComposite(name));
	}

	nodes.push(Node::new(
		name,
		parent,
		index,
		NodeKind::Composite(Composite {
			children: Vec::new(),
			cursor: None,
			outputs: Vec::new(),
			outputs_key,
			output: spec.output,
			count_key: template.as_ref().and(spec.count_key),
			template,
		}),
	));

	let mut children = Vec::with_capacity(children_specs.len());
	for (i, child) in children_specs.into_iter().enumerate() {
		children.push(add_node(nodes, child, Some(id), i, rng)?);
	}
	link_siblings(nodes, &children);
	if let NodeKind::Composite(c) = &mut nodes[id.0].kind {
		c.children = children;
	}
	Ok(id)
}

fn link_siblings(nodes: &mut [Node], ids: &[StateId]) {
	for pair in ids.windows(2) {
		nodes[pair[0].0].next = Some(pair[1]);
		nodes[pair[1].0].prev = Some(pair[0]);
	}
}

impl Node {
	fn new(name: String, parent: Option<StateId>, index: usize, kind: NodeKind) -> Self {
		Self {
			name,
			parent,
			index,
			next: None,
			prev: None,
			input: None,
			snapshot: None,
			subscriptions: Vec::new(),
			kind,
		}
	}
}

#[cfg(test)]
mod tests;
