//! Classroom clicker relay.
//!
//! Joins the external device aggregator, controller browsers and viewer
//! browsers. Each session id gets its own [`SessionHub`] running one
//! exercise app; all hubs share a single [`DeviceLink`](clicker_device::DeviceLink).
//!
//! ```text
//!   browsers ──ws──► server ──► ConnectionRegistry ──► SessionHub ──► StateApp
//!                                                          ▲
//!   aggregator ──tcp──► DeviceLink ──── keyed listener ────┘
//! ```

pub mod apps;
pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod registry;
pub mod server;

pub use apps::AppRegistry;
pub use config::{DeviceConfig, RelayConfig};
pub use error::{RelayError, Result};
pub use hub::SessionHub;
pub use registry::{Attachment, ConnectionRegistry};
