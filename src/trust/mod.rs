//! Whole-chain trust evaluation through the platform's own facilities.
//!
//! The evaluator never returns an error: failures of the evaluation machinery
//! itself are encoded as a classification plus a non-zero status code, so the
//! policy step always sees the full picture and can still overrule it (a
//! pinning policy may accept a chain the platform cannot judge).

use std::fmt;

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "tvos")))]
mod others;

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "tvos")))]
pub use others::TrustEvaluator;

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos"))]
mod apple;

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos"))]
pub use apple::TrustEvaluator;

/// Status codes reported alongside a [`TrustClassification`].
///
/// On Apple platforms the evaluation reports the operating system's own
/// `OSStatus` values; these constants mirror the Security framework error
/// domain so the other backend speaks the same vocabulary and policies can
/// match on one set of codes everywhere.
pub mod status {
    /// Evaluation completed with no error (`errSecSuccess`).
    pub const OK: i32 = 0;
    /// The evaluator was handed unusable input (`errSecParam`).
    pub const PARAM: i32 = -50;
    /// A certificate in the chain is not in a recognized format
    /// (`errSecUnknownFormat`).
    pub const UNKNOWN_FORMAT: i32 = -25257;
    /// The trust machinery itself was unavailable (`errSecNotAvailable`).
    pub const NOT_AVAILABLE: i32 = -25291;
    /// No path from the chain to a trusted anchor could be constructed
    /// (`errSecCreateChainFailed`).
    pub const CREATE_CHAIN_FAILED: i32 = -25318;
    /// The leaf certificate does not match the requested hostname
    /// (`errSecHostNameMismatch`).
    pub const HOST_NAME_MISMATCH: i32 = -67602;
    /// A certificate in the chain is outside its validity period
    /// (`errSecCertificateExpired`).
    pub const CERT_EXPIRED: i32 = -67818;
    /// A certificate in the chain has been revoked
    /// (`errSecCertificateRevoked`).
    pub const CERT_REVOKED: i32 = -67820;
    /// The chain is otherwise not trusted (`errSecNotTrusted`).
    pub const NOT_TRUSTED: i32 = -67843;
}

/// The platform's judgment of an assembled certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustClassification {
    /// The chain is trusted with no explicit user setting involved. This is
    /// the usual positive outcome.
    Unspecified,
    /// The user explicitly chose to trust this chain.
    Proceed,
    /// The chain failed evaluation for a reason the user could override,
    /// such as an unknown issuer or an expired certificate.
    RecoverableFailure,
    /// The chain failed evaluation in a way no setting can override.
    FatalFailure,
    /// The chain is explicitly distrusted for this use.
    Deny,
    /// The evaluation itself could not produce a judgment.
    OtherError,
}

impl TrustClassification {
    /// Whether the default acceptance policy treats this classification as
    /// trusted.
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Proceed | Self::Unspecified)
    }
}

impl fmt::Display for TrustClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspecified => "unspecified",
            Self::Proceed => "proceed",
            Self::RecoverableFailure => "recoverable trust failure",
            Self::FatalFailure => "fatal trust failure",
            Self::Deny => "deny",
            Self::OtherError => "other error",
        })
    }
}

/// The outcome of one platform trust evaluation.
///
/// The status code and the classification are orthogonal: the evaluation
/// call can succeed while judging the chain untrusted, and it can fail for
/// reasons that say nothing about the chain. Both are surfaced to the policy
/// step, never collapsed into a single boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustEvaluation {
    status: i32,
    classification: TrustClassification,
}

impl TrustEvaluation {
    /// Builds an evaluation outcome. Mostly useful for exercising a
    /// [`DecisionPolicy`][crate::DecisionPolicy] in tests.
    pub fn new(status: i32, classification: TrustClassification) -> Self {
        Self {
            status,
            classification,
        }
    }

    /// The platform's status code for the evaluation call itself.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// The platform's judgment of the chain.
    pub fn classification(&self) -> TrustClassification {
        self.classification
    }
}
