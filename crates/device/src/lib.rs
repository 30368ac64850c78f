//! Device link - the single outbound connection to the choice aggregator.
//!
//! This crate owns everything between the relay and the external device
//! server:
//!
//! - **Commands**: a registry mapping command names to protocol tokens or
//!   constructor functions, resolved once when the link is built
//! - **Decoding**: concatenation-tolerant parsing of aggregator reads into
//!   [`DeviceEvent`]s, with consecutive choice batches merged
//! - **Link**: connect-once semantics, keyed listeners so reconnecting
//!   handlers never receive duplicates, health-check pings and failure
//!   detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ session hub  │   │ session hub  │   one listener key per hub
//! └──────┬───────┘   └──────┬───────┘
//!        │ LinkEvent        │
//! ┌──────▼──────────────────▼───────┐
//! │           DeviceLink            │   shared, at most one socket
//! │  ┌──────────┐   ┌────────────┐  │
//! │  │ decoder  │   │ commands   │  │
//! │  └──────────┘   └────────────┘  │
//! └───────────────┬─────────────────┘
//!                 │ TCP (Connector)
//!          ┌──────▼──────┐
//!          │ aggregator  │
//!          └─────────────┘
//! ```

pub mod commands;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod link;

pub use commands::{CommandSpec, CommandTable};
pub use connector::{BoxedStream, Connector, DeviceStream, TcpConnector};
pub use decoder::{ChunkDecoder, DeviceEvent, group_frames, parse_chunk};
pub use error::{Error, Result};
pub use link::{Attach, DeviceLink, LinkConfig, LinkEvent};
