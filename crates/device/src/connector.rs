//! Socket factory used by [`DeviceLink`](crate::DeviceLink).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream to the aggregator.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn DeviceStream>;

/// Opens a fresh stream to the aggregator.
///
/// The link calls this at most once per connection attempt; tests substitute
/// in-memory duplex pipes.
#[async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self) -> std::io::Result<BoxedStream>;

	/// Address used in log lines and errors.
	fn describe(&self) -> String;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
	host: String,
	port: u16,
}

impl TcpConnector {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
		}
	}
}

#[async_trait]
impl Connector for TcpConnector {
	async fn connect(&self) -> std::io::Result<BoxedStream> {
		let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
		stream.set_nodelay(true)?;
		Ok(Box::new(stream))
	}

	fn describe(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}
