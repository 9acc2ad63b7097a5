//! Block exchange for fsg.
//!
//! [`Session`]s carry framed protocol messages to one peer each.
//! [`SessionManager`] owns them and fans want-lists out to every open
//! session. [`BlockExchange`] drives fetches: it wants the root, expands the
//! DAG as blocks arrive, re-queries providers for entries that stay
//! unresolved, and reassembles the content once nothing is missing.
//!
//! Sessions and fetches never call each other directly. Arrivals flow
//! through the shared block store, the global [`WantList`] and a broadcast
//! channel of arrived CIDs.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod session;
pub mod wantlist;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::ExchangeConfig;
pub use engine::{BlockExchange, FetchReport, FetchState};
pub use error::{ExchangeError, ExchangeResult};
pub use manager::{Connection, Dialer, SessionManager};
pub use session::{Direction, Session, SessionHandler};
pub use wantlist::WantList;
