use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Failures decoding or encoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
	/// The payload was not valid JSON or did not match any known frame shape.
	#[error("malformed frame: {0}")]
	Malformed(#[from] serde_json::Error),

	/// A frame decoded as JSON but carried a `type`/`event` we do not know.
	#[error("unknown frame kind: {0}")]
	UnknownKind(String),
}
