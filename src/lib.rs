//! RNG Sanity Checking Library
//!
//! Checks caller-submitted byte strings that are claimed to be the
//! output of a random source. Two independent engines produce the
//! verdict:
//!
//! ```text
//! submission → sanity battery → uniqueness store → "true" / "false"
//!                  (pure)         (persistent)
//! ```
//!
//! The **sanity battery** catches catastrophic generator failure:
//! repeated bytes, counters mistaken for randomness, stuck bit lines.
//! The **uniqueness store** catches something subtler: two machines
//! that booted with the same starting entropy and are replaying each
//! other's "random" streams. Every 16-byte window of a submission is
//! obfuscated with a process secret (so an adversary cannot target
//! buckets), indexed by prefix, and matched against everything seen
//! before.
//!
//! # Design Principles
//!
//! - **Catastrophe-only testing**: the battery holds a ~1-in-2^60
//!   false positive budget and makes no attempt to detect subtle bias
//!   (that is what NIST SP 800-22, DieHarder and TestU01 are for)
//! - **Probabilistic uniqueness**: matching is a birthday-bound check
//!   over 128-bit fingerprints, best-effort by construction
//! - **No cryptographic claims**: a passing verdict never certifies
//!   the submitted bytes as safe key material
//!
//! # Example
//!
//! ```
//! use rng_sanity::{
//!     sanity::SanityTester,
//!     store::{MemoryBackend, StoreConfig, UniquenessStore},
//! };
//! use std::sync::Arc;
//!
//! let bytes = [
//!     0xe4, 0x7d, 0x25, 0x3e, 0x45, 0xcc, 0xfa, 0x65,
//!     0xf4, 0x44, 0x93, 0x67, 0x7a, 0xaf, 0x56, 0xae,
//! ];
//!
//! // Cheap, pure tests first: no storage is touched on failure.
//! let tester = SanityTester::default();
//! assert!(tester.looks_random(&bytes).is_ok());
//!
//! // Then the cross-submission uniqueness check.
//! let store = UniquenessStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default());
//! let outcome = store.check_and_record(&bytes, "", "").unwrap();
//! assert!(outcome.is_unique());
//!
//! // The same bytes a second time are no longer unique.
//! let outcome = store.check_and_record(&bytes, "", "").unwrap();
//! assert!(!outcome.is_unique());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod sanity;
pub mod secret;
pub mod service;
pub mod store;

// Re-export commonly used types at crate root
pub use config::{ConfigError, FileConfig, ServerConfig};
pub use sanity::{FailureReason, SanityConfig, SanityTester};
pub use secret::SecretKeyManager;
pub use service::{Orchestrator, Submission, SubmissionOutcome};
pub use store::{CheckOutcome, MemoryBackend, RedbBackend, StoreConfig, UniquenessStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
