//! Decoding of aggregator reads.
//!
//! A single socket read can carry several JSON objects back to back
//! (`{...}{...}` or `{...}\n{...}`), and an object can be split across two
//! reads. [`ChunkDecoder`] streams complete objects out of the byte flow and
//! keeps an incomplete tail for the next read. [`group_frames`] then collapses
//! all choice batches of one read into a single [`DeviceEvent::Choices`] so
//! listeners see one update instead of many.

use clicker_protocol::{ChoiceEntry, DeviceFrame};
use serde_json::Value;
use tracing::warn;

use crate::commands::CommandTable;

/// A decoded aggregator message, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
	/// Participant choices, merged across one read.
	Choices(Vec<ChoiceEntry>),
	/// Command acknowledgement.
	Command {
		/// Command name, if the echoed token is in the command table.
		name: Option<String>,
		/// Token as echoed by the aggregator.
		token: String,
		data: Value,
	},
	/// Command failure.
	Error {
		name: Option<String>,
		token: Option<String>,
		message: Value,
	},
}

/// Incremental JSON object splitter.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
	pending: String,
}

impl ChunkDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// True when an incomplete object is waiting for more bytes.
	pub fn has_pending(&self) -> bool {
		!self.pending.trim().is_empty()
	}

	pub fn clear(&mut self) {
		self.pending.clear();
	}

	/// Appends `chunk` and returns every complete JSON value now available.
	///
	/// Syntax errors drop the rest of the buffered input with a warning; values
	/// decoded before the error are still returned.
	pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
		self.pending.push_str(chunk);
		let buffer = std::mem::take(&mut self.pending);

		let mut values = Vec::new();
		let mut stream = serde_json::Deserializer::from_str(&buffer).into_iter::<Value>();
		loop {
			match stream.next() {
				Some(Ok(value)) => values.push(value),
				Some(Err(err)) if err.is_eof() => {
					self.pending = buffer[stream.byte_offset()..].to_string();
					break;
				}
				Some(Err(err)) => {
					warn!(
						target = "clicker.device",
						error = %err,
						dropped = buffer.len() - stream.byte_offset(),
						"invalid JSON received from device"
					);
					break;
				}
				None => break,
			}
		}
		values
	}
}

/// Converts raw values into events, merging every choice batch into the first.
///
/// Event kinds keep the order in which they first appear in the read; within
/// a kind, original order is kept. Objects that are not device frames are
/// dropped with a warning.
pub fn group_frames(values: Vec<Value>, commands: &CommandTable) -> Vec<DeviceEvent> {
	let mut groups: Vec<(&'static str, Vec<DeviceEvent>)> = Vec::new();

	for value in values {
		let frame = match DeviceFrame::from_value(value) {
			Ok(frame) => frame,
			Err(err) => {
				warn!(target = "clicker.device", error = %err, "ignoring device frame");
				continue;
			}
		};

		let kind = frame.kind();
		let idx = match groups.iter().position(|(k, _)| *k == kind) {
			Some(idx) => idx,
			None => {
				groups.push((kind, Vec::new()));
				groups.len() - 1
			}
		};
		let group = &mut groups[idx].1;

		match frame {
			DeviceFrame::Choices { data } => match group.first_mut() {
				Some(DeviceEvent::Choices(merged)) => merged.extend(data),
				_ => group.push(DeviceEvent::Choices(data)),
			},
			DeviceFrame::Command { command, data } => group.push(DeviceEvent::Command {
				name: commands.name_for_token(&command).map(str::to_owned),
				token: command,
				data,
			}),
			DeviceFrame::Error { command, error } => group.push(DeviceEvent::Error {
				name: command
					.as_deref()
					.and_then(|token| commands.name_for_token(token))
					.map(str::to_owned),
				token: command,
				message: error,
			}),
		}
	}

	groups.into_iter().flat_map(|(_, events)| events).collect()
}

/// Parses one self-contained read.
///
/// Unlike [`ChunkDecoder::feed`], an incomplete trailing object is discarded
/// with a warning since no further bytes will complete it.
pub fn parse_chunk(raw: &str, commands: &CommandTable) -> Vec<DeviceEvent> {
	let mut decoder = ChunkDecoder::new();
	let values = decoder.feed(raw);
	if decoder.has_pending() {
		warn!(target = "clicker.device", "discarding truncated device frame");
	}
	group_frames(values, commands)
}
