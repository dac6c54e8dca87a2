//! Reduction of the two verification verdicts into one decision.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::chain::{CertificateEntry, Preverify};
use crate::trust::TrustEvaluation;

/// The final verdict returned to the handshake library for a verification
/// step.
///
/// Once `Stop` has been returned for a session, the transport layer is
/// expected to abort the handshake immediately; no further certificates of
/// that session are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Decision {
    /// Abort the handshake now.
    Stop = 0,
    /// Continue with this handshake step.
    Continue = 1,
}

impl Decision {
    /// The C-int form OpenSSL-style libraries expect back from their verify
    /// callbacks (`0` = stop, `1` = continue).
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// An application-supplied decision capability.
///
/// When configured on a session, the policy alone determines the verdict:
/// it sees the handshake library's preverify verdict, the platform's trust
/// evaluation, and the full accumulated chain, and the bridge performs no
/// additional gating on its answer. This is what enables certificate pinning
/// and custom CA policies that overrule platform defaults.
///
/// The policy is invoked at most once per session, synchronously, on the
/// execution context driving the handshake — the handshake library blocks on
/// the returned verdict.
pub trait DecisionPolicy: Send + Sync {
    /// Decides the fate of the handshake.
    fn decide(
        &self,
        preverify: Preverify,
        trust: &TrustEvaluation,
        chain: &[CertificateEntry],
    ) -> Decision;
}

/// The policy applied when no application policy is configured: accept the
/// chain iff the handshake library accepted every certificate *and* the
/// platform classified the chain as trusted.
///
/// This is never a weaker gate than the handshake library's own default
/// behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl DecisionPolicy for DefaultPolicy {
    fn decide(
        &self,
        preverify: Preverify,
        trust: &TrustEvaluation,
        _chain: &[CertificateEntry],
    ) -> Decision {
        if preverify == Preverify::Ok && trust.classification().is_trusted() {
            Decision::Continue
        } else {
            Decision::Stop
        }
    }
}

/// Combines the preverify verdict, the trust evaluation, and the chain into
/// the single decision surfaced to the handshake library.
///
/// A panicking policy is contained and mapped to [`Decision::Stop`]; a
/// failing policy must never default to acceptance.
pub(crate) fn reduce(
    preverify: Preverify,
    trust: &TrustEvaluation,
    chain: &[CertificateEntry],
    policy: Option<&dyn DecisionPolicy>,
) -> Decision {
    let Some(policy) = policy else {
        return DefaultPolicy.decide(preverify, trust, chain);
    };

    match catch_unwind(AssertUnwindSafe(|| policy.decide(preverify, trust, chain))) {
        Ok(decision) => decision,
        Err(_) => {
            log::error!("decision policy panicked; rejecting the chain");
            Decision::Stop
        }
    }
}
