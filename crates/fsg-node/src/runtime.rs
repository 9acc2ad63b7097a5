//! Process-wide runtime state.
//!
//! [`initialize`] runs exactly once per process, at startup, before any
//! node is spawned. Later calls return the same state. Spawning a node
//! without it fails instead of initializing lazily.

use std::sync::OnceLock;
use std::time::SystemTime;

use fsg_crypto::ContentHasher;
use fsg_protocol::PROTOCOL_VERSION;
use fsg_store::Block;

use crate::error::{NodeError, NodeResult};

/// Set once, after the self-test passes. Its presence is the ready flag.
static RUNTIME: OnceLock<RuntimeInfo> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct RuntimeInfo {
    pub version: &'static str,
    pub protocol_version: u32,
    pub started_at: SystemTime,
}

/// Initialize process-wide state. Idempotent and safe to race: a failed
/// self-test leaves the runtime uninitialized, and concurrent callers all
/// get the same state.
pub fn initialize() -> NodeResult<&'static RuntimeInfo> {
    if let Some(info) = RUNTIME.get() {
        return Ok(info);
    }
    self_test()?;
    let mut first = false;
    let info = RUNTIME.get_or_init(|| {
        first = true;
        RuntimeInfo {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
            started_at: SystemTime::now(),
        }
    });
    if first {
        tracing::info!(version = info.version, protocol = info.protocol_version, "fsg runtime initialized");
    }
    Ok(info)
}

pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

/// The initialized runtime, or an error if [`initialize`] was never called.
pub fn ensure_initialized() -> NodeResult<&'static RuntimeInfo> {
    match RUNTIME.get() {
        Some(info) => Ok(info),
        None => Err(NodeError::Runtime(
            "runtime::initialize must be called at process start".into(),
        )),
    }
}

/// Check that content addressing behaves before any block is trusted.
fn self_test() -> NodeResult<()> {
    let sample = b"fsg runtime self-test";
    let block = Block::new(sample.to_vec());
    if !block.verify() || *block.cid() != ContentHasher::BLOCK.cid(sample) {
        return Err(NodeError::Runtime("block hashing self-test failed".into()));
    }
    if ContentHasher::BLOCK.digest(sample) == ContentHasher::DHT_KEY.digest(sample) {
        return Err(NodeError::Runtime("hash domains are not separated".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let first = initialize().unwrap();
        let second = initialize().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(is_initialized());
        assert_eq!(ensure_initialized().unwrap().protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn concurrent_initialize_agrees() {
        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(initialize)).collect();
        let infos: Vec<&'static RuntimeInfo> =
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert!(infos.windows(2).all(|w| std::ptr::eq(w[0], w[1])));
        assert!(is_initialized());
        assert!(std::ptr::eq(ensure_initialized().unwrap(), infos[0]));
    }

    #[test]
    fn self_test_passes() {
        self_test().unwrap();
    }
}
