//! Coalescing buffer for participant updates.
//!
//! Changes are keyed by alias so a participant changed many times between
//! two flushes is sent once, in its latest form. The state machine can
//! suppress buffering around its own bulk updates; see [`Suppress`].

use std::collections::HashMap;

use clicker_flow::{Participant, Suppress};
use parking_lot::Mutex;

struct BufferState {
	order: Vec<String>,
	latest: HashMap<String, Participant>,
	mode: Suppress,
}

pub struct UpdateBuffer {
	state: Mutex<BufferState>,
}

impl UpdateBuffer {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(BufferState {
				order: Vec::new(),
				latest: HashMap::new(),
				mode: Suppress::Off,
			}),
		}
	}

	pub fn push(&self, batch: &[Participant]) {
		let mut state = self.state.lock();
		match state.mode {
			Suppress::UntilResumed => return,
			Suppress::Once => {
				state.mode = Suppress::Off;
				return;
			}
			Suppress::Off => {}
		}
		for participant in batch {
			let alias = participant.alias.clone();
			if state.latest.insert(alias.clone(), participant.clone()).is_none() {
				state.order.push(alias);
			}
		}
	}

	pub fn set_mode(&self, mode: Suppress) {
		self.state.lock().mode = mode;
	}

	pub fn mode(&self) -> Suppress {
		self.state.lock().mode
	}

	pub fn len(&self) -> usize {
		self.state.lock().order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drains pending changes in first-change order.
	pub fn take(&self) -> Vec<Participant> {
		let mut state = self.state.lock();
		let order = std::mem::take(&mut state.order);
		let mut latest = std::mem::take(&mut state.latest);
		order
			.into_iter()
			.filter_map(|alias| latest.remove(&alias))
			.collect()
	}
}

impl Default for UpdateBuffer {
	fn default() -> Self {
		Self::new()
	}
}
