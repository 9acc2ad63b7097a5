//! Hashing primitives for fsg.
//!
//! Provides domain-separated BLAKE3 hashing. Block identifiers and DHT keys
//! are hashed under different domains so a block digest never collides with
//! a routing key derived from it.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::ContentHasher;
