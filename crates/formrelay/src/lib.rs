//! `formrelay` - form intake over HTTP, relayed over UDP into a document store
//!
//! The pipeline has three stages that never call back into each other:
//! the [`intake`] endpoint turns each POST body into one datagram, the
//! [`relay`] listener receives and decodes datagrams, and [`persistence`]
//! parses them into [`Record`]s stamped with the server time.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod logging;
pub mod persistence;
pub mod relay;
pub mod storage;
pub mod submission;

pub use config::Config;
pub use error::{Error, Result};
pub use intake::IntakeServer;
pub use logging::init_logging;
pub use persistence::Persistence;
pub use relay::{Delivery, RelayClient, RelayListener};
pub use storage::{Storage, StorageStats};
pub use submission::Record;
