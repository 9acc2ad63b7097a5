//! An fsg node: one process joining the overlay.
//!
//! [`Node::spawn`] opens an ephemeral [`Repo`], binds a TCP listener and
//! wires the DHT router, session manager and exchange engine together.
//! Call [`runtime::initialize`] once at process start before spawning
//! nodes.

pub mod config;
pub mod error;
pub mod net;
pub mod node;
pub mod repo;
pub mod runtime;

pub use config::{ExperimentalFeatures, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use net::{SessionDht, TcpDialer};
pub use node::{Node, PublishReport, ShutdownHandle};
pub use repo::Repo;
