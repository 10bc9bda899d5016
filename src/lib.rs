//! Session layer for the Cast v2 protocol.
//!
//! A [`Platform`] owns one connection to a receiver device, keeps it alive with
//! heartbeats and follows the device's running applications. [`Application`]s are
//! launched through it and driven through their controllers.

#[macro_use]
mod util;
pub use util::named;

pub mod application;
pub mod cast;
pub mod channel;
pub mod codec;
pub mod config;
pub mod controller;
pub mod controllers;
pub mod error;
pub mod message;
pub mod payload;
pub mod platform;
pub mod request;
pub mod sender;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_util;

pub use application::{AppKind, AppPhase, AppStatusEvent, Application};
pub use config::Config;
pub use error::{classify, CastError, Error, Result};
pub use platform::{Platform, PlatformEvent};
pub use sender::Sender;
pub use transport::{Transport, TransportHandle};
