//! Request orchestration.
//!
//! Thin glue between the HTTP surface and the two engines: decode the
//! submission, run the sanity battery (fail fast, no storage access),
//! then the uniqueness check, and render the boolean verdict. Failure
//! notifications and usage counting go through trait seams so the
//! core never knows how either is delivered.

mod http;
mod ratelimit;
mod usage;

pub use http::{serve, AppState, ServerError};
pub use ratelimit::{ip_key, MemoryRateLimiter, RateLimitError, RateLimiter};
pub use usage::{NullUsage, PersistentUsage, UsageRecorder};

use crate::sanity::{FailureReason, SanityTester};
use crate::store::{CheckOutcome, StoreError, UniquenessStore};
use std::sync::Arc;
use thiserror::Error;

/// Minimum decoded submission length.
///
/// Anything shorter cannot hold one fingerprint window and gives the
/// battery too little evidence to stay under its false-positive rate.
pub const MIN_SUBMISSION_BYTES: usize = 16;

/// Longest caller tag carried on a stored fingerprint.
pub const MAX_TAG_CHARS: usize = 64;

/// Errors surfaced to the submitting client.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The payload is not valid hex.
    #[error("invalid hex")]
    InvalidHex,

    /// The payload decodes to fewer than [`MIN_SUBMISSION_BYTES`] bytes.
    #[error("must provide {MIN_SUBMISSION_BYTES} or more bytes")]
    PayloadTooShort,

    /// The check itself failed; no verdict was produced.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verdict on one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Passed the battery and was never seen before.
    Passed,
    /// Rejected by the sanity battery.
    FailedSanity(FailureReason),
    /// Passed the battery but matched stored material.
    NotUnique {
        /// Index of the first matching 16-byte window.
        window: usize,
    },
}

impl SubmissionOutcome {
    /// The response body literal.
    pub fn as_body(&self) -> &'static str {
        match self {
            Self::Passed => "true",
            _ => "false",
        }
    }

    /// The usage counter label for this outcome.
    pub fn usage_label(&self) -> String {
        match self {
            Self::Passed => "Success".to_owned(),
            Self::FailedSanity(reason) => format!("Fail_{}", reason.label()),
            Self::NotUnique { .. } => "Fail_Nonunique".to_owned(),
        }
    }
}

/// Notification sink for sanity failures and collisions.
///
/// Delivery (email, webhook, ...) is a deployment concern; the
/// default implementation just logs.
pub trait Notifier: Send + Sync {
    /// Tells `user_id` that `matched` failed a check for `reason`.
    fn notify(&self, user_id: &str, tag: &str, matched: &[u8], reason: &str);
}

/// Notifier that reports through the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: &str, tag: &str, matched: &[u8], reason: &str) {
        tracing::info!(
            user_id,
            tag,
            matched = %hex::encode(matched),
            reason,
            "notifying caller of check failure"
        );
    }
}

/// One decoded submission with its caller context.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Hex-encoded payload.
    pub payload_hex: String,
    /// Caller id, empty for anonymous submissions.
    pub user_id: String,
    /// Caller tag identifying the submitting machine or stream.
    pub tag: String,
}

/// Runs submissions through the battery and the uniqueness store.
pub struct Orchestrator {
    tester: SanityTester,
    store: UniquenessStore,
    usage: Arc<dyn UsageRecorder>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Wires an orchestrator from its collaborators.
    pub fn new(
        tester: SanityTester,
        store: UniquenessStore,
        usage: Arc<dyn UsageRecorder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tester,
            store,
            usage,
            notifier,
        }
    }

    /// Checks one submission and records the outcome.
    ///
    /// Sanity failures and non-uniqueness are verdicts, not errors;
    /// only input and storage problems surface as `Err`, and those
    /// abort the check with no verdict at all.
    pub fn submit(&self, submission: &Submission) -> Result<SubmissionOutcome, ServiceError> {
        let bytes = hex::decode(&submission.payload_hex).map_err(|_| ServiceError::InvalidHex)?;
        if bytes.len() < MIN_SUBMISSION_BYTES {
            return Err(ServiceError::PayloadTooShort);
        }

        let user_id = submission.user_id.as_str();
        // Over-long tags are dropped, not truncated.
        let tag = if submission.tag.len() > MAX_TAG_CHARS {
            ""
        } else {
            submission.tag.as_str()
        };

        let outcome = match self.tester.looks_random(&bytes) {
            Err(reason) => {
                if !user_id.is_empty() {
                    self.notifier
                        .notify(user_id, tag, &bytes, &reason.to_string());
                }
                SubmissionOutcome::FailedSanity(reason)
            }
            Ok(()) => match self.store.check_and_record(&bytes, user_id, tag)? {
                CheckOutcome::Unique => SubmissionOutcome::Passed,
                CheckOutcome::Duplicate { entry, window } => {
                    let matched = &bytes[window..window + crate::store::CHUNK_BYTES];
                    if !user_id.is_empty() {
                        self.notifier.notify(user_id, tag, matched, "Non Unique");
                    }
                    // The original sighting's owner learns someone else
                    // produced their bytes.
                    if !entry.user_id.is_empty() && entry.user_id != user_id {
                        self.notifier
                            .notify(&entry.user_id, &entry.tag, matched, "Non Unique");
                    }
                    SubmissionOutcome::NotUnique { window }
                }
            },
        };

        self.usage.record(&outcome.usage_label(), 1);
        tracing::debug!(
            outcome = %outcome.as_body(),
            label = %outcome.usage_label(),
            "submission checked"
        );
        Ok(outcome)
    }
}
