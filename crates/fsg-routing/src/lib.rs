//! Content routing for fsg.
//!
//! A small Kademlia-style DHT: peers and content are placed in one 256-bit
//! XOR keyspace, each node keeps up to `k` peers per distance bucket, and a
//! lookup repeatedly asks the `α` closest unqueried peers for closer peers
//! or for provider records until no closer peers turn up.
//!
//! The router is transport agnostic. Requests go through [`DhtTransport`];
//! the node crate implements it over peer sessions.
//!
//! Provider records are advisory. An empty lookup result only means nothing
//! was found within the lookup's budget.

pub mod error;
pub mod key;
pub mod providers;
pub mod router;
pub mod table;

pub use error::{RoutingError, RoutingResult};
pub use key::Key;
pub use providers::{ProviderRecord, ProviderStore};
pub use router::{
    ContentRouting, DhtRouter, DhtTransport, ProviderStream, RouterConfig, RoutingMode, ALPHA, K,
};
pub use table::RoutingTable;
