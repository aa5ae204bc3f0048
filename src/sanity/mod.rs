//! Statistical sanity tests for submitted byte strings.
//!
//! These tests are written for roughly a 1-in-2^60 overall false
//! positive rate. They catch catastrophic failures of software or
//! hardware random sources (counters in the output, repeated bytes,
//! stuck bit lines), NOT subtle statistical bias. Detecting bias is
//! the job of the dedicated suites (NIST SP 800-22, DieHarder,
//! TestU01); a stream that passes here can still be a terrible random
//! source.
//!
//! Every test is a deterministic pure function over the buffer. The
//! battery runs in a fixed order and stops at the first failure.

mod bitplane;
mod counting;
mod decimal;
mod runs;

use serde::{Deserialize, Serialize};

/// Which sub-test rejected a submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// A long run of identical bytes (circular).
    #[error("repeated bytes")]
    RepeatedBytes,

    /// The buffer decodes as an incrementing integer sequence.
    #[error("counting pattern ({width}-byte integers)")]
    Counting {
        /// Integer width of the detected counter, in bytes.
        width: usize,
    },

    /// Every nibble is a decimal digit.
    #[error("decimal digits submitted as hex")]
    DecimalDigits,

    /// One bit position is constant (or cycling) across the buffer.
    #[error("bit {bit} stuck")]
    StuckBit {
        /// The stuck bit position, 0 = least significant.
        bit: u8,
    },
}

impl FailureReason {
    /// Short stable token for usage counters and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RepeatedBytes => "Repeated",
            Self::Counting { .. } => "Counting",
            Self::DecimalDigits => "DecimalHex",
            Self::StuckBit { .. } => "BitStuck",
        }
    }
}

/// Configuration for the sanity battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanityConfig {
    /// Run the decimal-digit test.
    ///
    /// Off by default: decimal output mistaken for hex is rare enough
    /// that deployments opt in rather than pay the extra scan.
    pub decimal_hex: bool,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self { decimal_hex: false }
    }
}

/// Battery of catastrophic-failure detectors.
///
/// Stateless and side-effect-free; one instance can be shared across
/// any number of submissions.
#[derive(Debug, Clone, Default)]
pub struct SanityTester {
    config: SanityConfig,
}

impl SanityTester {
    /// Creates a tester with the given configuration.
    pub fn new(config: SanityConfig) -> Self {
        Self { config }
    }

    /// Runs the battery over `b`.
    ///
    /// Returns `Ok(())` if the buffer passes every test, otherwise the
    /// reason from the first test that rejected it.
    pub fn looks_random(&self, b: &[u8]) -> Result<(), FailureReason> {
        if runs::repeated(b) {
            return Err(FailureReason::RepeatedBytes);
        }
        if let Some(width) = counting::counting(b) {
            return Err(FailureReason::Counting { width });
        }
        if self.config.decimal_hex && decimal::all_decimal_nibbles(b) {
            return Err(FailureReason::DecimalDigits);
        }
        if let Some(bit) = bitplane::stuck_bit(b) {
            return Err(FailureReason::StuckBit { bit });
        }
        Ok(())
    }
}
