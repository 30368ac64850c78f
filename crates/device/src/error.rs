//! Error types for the device link.

use thiserror::Error;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the aggregator.
#[derive(Debug, Error)]
pub enum Error {
	/// No live socket to the aggregator.
	#[error("device not connected")]
	NotConnected,

	/// The command name is not in the command table.
	#[error("unknown device command: {0}")]
	UnknownCommand(String),

	/// Opening the socket failed.
	#[error("failed to connect to device at {addr}: {source}")]
	ConnectionFailed {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	/// I/O error on an open socket.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Frame could not be encoded or decoded.
	#[error(transparent)]
	Protocol(#[from] clicker_protocol::ProtocolError),
}
