//! Core library for the STEM Careers Programme interaction tracker.
//!
//! The modules follow the path of an event from the page to the sinks:
//! - [`page`] routes DOM events to the client and the observers.
//! - [`observers`] decides when scroll-depth and time-on-page events are due.
//! - [`client`] stamps events with session and page identity and dispatches them.
//! - [`workers`] delivers events to the asynchronous sinks in order.
//! - [`sinks`] holds the console, local log, metrics and document store sinks.
//! - [`backend`] connects the hosted backend with bounded retry.
//! - [`config`], [`session`] and [`clock`] supply settings, identity and time.
//! - [`contact`] validates the contact form and words the outcome notice.
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`errors`] keeps the central error catalogue with human friendly metadata.
//! - [`logging`] writes structured diagnostics to the event log table.

pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod contact;
pub mod db;
pub mod errors;
pub mod events;
pub mod logging;
pub mod observers;
pub mod page;
pub mod session;
pub mod sinks;
pub mod workers;

pub use backend::{BackendConnection, BackendConnector, BackendStatus, HttpBackendConnector};
pub use client::TrackingClient;
pub use errors::TrackingError;
pub use events::{Event, EventKind, PageLocation};
pub use page::{DomEvent, PageSession, Reaction, ScriptStep};
