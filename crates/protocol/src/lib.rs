//! Wire types for the clicker relay.
//!
//! Two protocols meet in the relay:
//!
//! - **Device protocol** ([`device`]): JSON objects exchanged with the external
//!   choice aggregator over a plain TCP socket. Inbound frames may arrive
//!   concatenated in a single read; outbound commands are one JSON document
//!   per line.
//! - **Browser protocol** ([`browser`]): `{"event": name, "data": payload}`
//!   frames exchanged with controller and viewer browsers over websockets.
//!
//! Types in this crate are pure data. Connection handling lives in
//! `clicker-device` and `clicker-relay`.

pub mod browser;
pub mod device;
pub mod error;

pub use browser::*;
pub use device::*;
pub use error::{ProtocolError, Result};
