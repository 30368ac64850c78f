//! Flags deciding whether inbound device choices are acted upon.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;

/// Voting state of a session.
///
/// Choices are discarded while the app is switching states and between a
/// disable request and the device confirming it. A batch that was admitted
/// under one [`epoch`](ChoiceGate::epoch) is stale once a transition has
/// started since.
#[derive(Debug, Default)]
pub struct ChoiceGate {
	transitioning: AtomicBool,
	epoch: AtomicU64,
	disabling: AtomicBool,
	accepting: AtomicBool,
}

impl ChoiceGate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_transitioning(&self, transitioning: bool) {
		if transitioning {
			self.epoch.fetch_add(1, Ordering::SeqCst);
		}
		self.transitioning.store(transitioning, Ordering::SeqCst);
	}

	/// Number of transitions started so far.
	pub fn epoch(&self) -> u64 {
		self.epoch.load(Ordering::SeqCst)
	}

	/// Whether a batch seen at `epoch` may still be applied.
	pub fn admits_since(&self, epoch: u64) -> bool {
		self.admits_choices() && self.epoch() == epoch
	}

	/// Starts discarding choices until the device acknowledges the disable.
	pub fn request_disable(&self) {
		self.disabling.store(true, Ordering::SeqCst);
	}

	/// The disable request never reached the device.
	pub fn cancel_disable(&self) {
		self.disabling.store(false, Ordering::SeqCst);
	}

	pub fn admits_choices(&self) -> bool {
		!self.transitioning.load(Ordering::SeqCst) && !self.disabling.load(Ordering::SeqCst)
	}

	/// Whether the device last reported voting as open.
	pub fn accepting(&self) -> bool {
		self.accepting.load(Ordering::SeqCst)
	}

	/// `enableChoices` acknowledgement; `data` is `true` on success.
	pub fn enabled(&self, data: &Value) {
		if let Some(ok) = data.as_bool() {
			self.accepting.store(ok, Ordering::SeqCst);
		}
	}

	/// `disableChoices` acknowledgement; `data` is `true` on success.
	pub fn disabled(&self, data: &Value) {
		if let Some(ok) = data.as_bool() {
			self.accepting.store(!ok, Ordering::SeqCst);
		}
		self.disabling.store(false, Ordering::SeqCst);
	}

	/// `status` report, `{"acceptingChoices": bool, ...}`.
	pub fn status(&self, data: &Value) {
		if let Some(accepting) = data.get("acceptingChoices").and_then(Value::as_bool) {
			self.accepting.store(accepting, Ordering::SeqCst);
		}
	}

	/// The device went away; nothing is being accepted any more.
	pub fn reset(&self) {
		self.accepting.store(false, Ordering::SeqCst);
		self.disabling.store(false, Ordering::SeqCst);
	}
}
