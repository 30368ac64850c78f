use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
	#[error("failed to read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid config: {0}")]
	InvalidConfig(String),

	#[error("unknown app: {0}")]
	UnknownApp(String),

	#[error(transparent)]
	Flow(#[from] clicker_flow::FlowError),

	#[error(transparent)]
	Protocol(#[from] clicker_protocol::ProtocolError),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
