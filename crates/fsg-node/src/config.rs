use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use fsg_dag::DagConfig;
use fsg_exchange::ExchangeConfig;
use fsg_routing::{RouterConfig, RoutingMode};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Experimental feature toggles.
///
/// These are recognized and persisted in the repo config so that a config
/// written by a newer node still loads. None of them changes behaviour yet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentalFeatures {
    pub filestore: bool,
    pub urlstore: bool,
    pub p2p_stream_mounting: bool,
    pub p2p_http_proxy: bool,
}

impl ExperimentalFeatures {
    /// Everything on, as selected by `--experimental`.
    pub fn all() -> Self {
        Self {
            filestore: true,
            urlstore: true,
            p2p_stream_mounting: true,
            p2p_http_proxy: true,
        }
    }

    pub fn enabled(&self) -> Vec<&'static str> {
        [
            ("filestore", self.filestore),
            ("urlstore", self.urlstore),
            ("p2p_stream_mounting", self.p2p_stream_mounting),
            ("p2p_http_proxy", self.p2p_http_proxy),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }
}

/// Everything needed to construct a node. Passed by value into
/// [`Node::spawn`](crate::Node::spawn) and never changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the session listener binds to.
    pub listen: SocketAddr,
    /// Address advertised to peers. Defaults to the bound address, with an
    /// unspecified IP replaced by loopback.
    pub announce: Option<SocketAddr>,
    /// Peers contacted at startup.
    pub bootstrap: Vec<SocketAddr>,
    /// Upper bound on closing all sessions at shutdown.
    pub shutdown_grace_ms: u64,
    pub experimental: ExperimentalFeatures,
    pub dag: DagConfig,
    pub router: RouterConfig,
    pub exchange: ExchangeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4001)),
            announce: None,
            bootstrap: Vec::new(),
            shutdown_grace_ms: 2_000,
            experimental: ExperimentalFeatures::default(),
            dag: DagConfig::default(),
            router: RouterConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn dht_server(&self) -> bool {
        self.router.mode == RoutingMode::Server
    }

    pub fn validate(&self) -> NodeResult<()> {
        self.dag.validate()?;
        if self.router.k == 0 || self.router.alpha == 0 {
            return Err(NodeError::Config("router k and alpha must be positive".into()));
        }
        if self.router.provider_ttl_secs == 0 {
            return Err(NodeError::Config("router.provider_ttl_secs must be positive".into()));
        }
        if self.exchange.root_lookup_attempts == 0 {
            return Err(NodeError::Config(
                "exchange.root_lookup_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml(text: &str) -> NodeResult<Self> {
        toml::from_str(text).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> NodeResult<String> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> NodeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| NodeError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> NodeResult<()> {
        std::fs::write(path, self.to_toml()?).map_err(|e| NodeError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.dag.chunk_size, 256 * 1024);
        assert_eq!(config.router.k, 20);
        assert_eq!(config.router.alpha, 3);
        assert_eq!(config.router.provider_ttl_secs, 86_400);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
        assert!(config.dht_server());
        assert!(config.experimental.enabled().is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = NodeConfig::default();
        config.bootstrap = vec!["10.0.0.1:4001".parse().unwrap()];
        config.router.mode = RoutingMode::Client;
        config.experimental = ExperimentalFeatures::all();
        let text = config.to_toml().unwrap();
        assert!(text.contains("mode = \"client\""));
        assert_eq!(NodeConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = NodeConfig::from_toml(
            "listen = \"127.0.0.1:0\"\n[experimental]\nurlstore = true\n",
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:0".parse().unwrap());
        assert_eq!(config.experimental.enabled(), vec!["urlstore"]);
        assert_eq!(config.exchange, ExchangeConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = NodeConfig::default();
        config.dag.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.exchange.root_lookup_attempts = 0;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));

        let mut config = NodeConfig::default();
        config.router.provider_ttl_secs = 0;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = NodeConfig::default();
        config.save(&path).unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap(), config);
    }
}
