//! Per-handshake verification state.

use std::sync::Arc;

use crate::chain::{self, AccumulatorOutcome, CertificateEntry, Preverify};
use crate::policy::{self, Decision, DecisionPolicy};
use crate::trust::TrustEvaluator;

// Accumulating -> Evaluated on the terminal certificate, Evaluated ->
// Decided after reduction. No path leads back to Accumulating.
#[derive(Debug, Clone, Copy)]
enum SessionState {
    Accumulating,
    Evaluated,
    Decided(Decision),
}

/// The verification state of one TLS handshake attempt.
///
/// A session is created when a handshake begins, owned exclusively by that
/// handshake's context, and dropped when the handshake concludes — it is
/// never shared between connections or reused for a second handshake.
/// Concurrent handshakes each hold their own session and interfere with
/// nothing but the process-wide state managed by
/// [`global_init`][crate::global_init].
///
/// The session is the handshake context handle: register a closure with the
/// handshake library's verification hook that forwards each certificate into
/// [`verify_cert`][Self::verify_cert] and hands the returned [`Decision`]
/// back to the library.
pub struct VerificationSession {
    hostname: String,
    chain: Vec<CertificateEntry>,
    preverify: Preverify,
    policy: Option<Arc<dyn DecisionPolicy>>,
    evaluator: TrustEvaluator,
    state: SessionState,
}

impl VerificationSession {
    /// Creates a session for a handshake addressed to `hostname`, which the
    /// platform policy will require the server certificate to match.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            chain: Vec::new(),
            preverify: Preverify::Ok,
            policy: None,
            evaluator: TrustEvaluator::new(),
            state: SessionState::Accumulating,
        }
    }

    /// Creates a session whose verdict is decided by `policy` alone.
    pub fn with_policy(hostname: impl Into<String>, policy: Arc<dyn DecisionPolicy>) -> Self {
        let mut session = Self::new(hostname);
        session.policy = Some(policy);
        session
    }

    /// Creates a session whose trust evaluation anchors only on the given
    /// root CA certificate.
    #[cfg(any(test, feature = "dbg"))]
    pub(crate) fn new_with_fake_root(hostname: impl Into<String>, root: &[u8]) -> Self {
        let mut session = Self::new(hostname);
        session.evaluator = TrustEvaluator::new_with_fake_root(root);
        session
    }

    /// Configures the decision policy. Replaces any previously set policy;
    /// has no effect on a session that has already decided.
    pub fn set_policy(&mut self, policy: Arc<dyn DecisionPolicy>) {
        self.policy = Some(policy);
    }

    /// The hostname this handshake is addressed to.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The chain accumulated so far, in callback order (leaf at index 0).
    pub fn chain(&self) -> &[CertificateEntry] {
        &self.chain
    }

    /// The per-certificate entry point driven by the handshake library.
    ///
    /// Invoked once per certificate in bottom-up order with the library's
    /// own `preverify` verdict for it and the library's count of
    /// certificates still to come in this pass (`0` marks the last one).
    /// The certificate bytes are copied; the library may free its buffer as
    /// soon as this returns.
    ///
    /// Intermediate invocations return [`Decision::Continue`]. The terminal
    /// invocation triggers the single platform trust evaluation, reduces all
    /// verdicts through the configured policy (or the default one), and
    /// returns the session's final decision. The transport layer must abort
    /// the handshake on [`Decision::Stop`]; if it calls again anyway, the
    /// recorded decision is returned unchanged and nothing is re-evaluated.
    pub fn verify_cert(&mut self, cert_der: &[u8], preverify: Preverify, remaining: usize) -> Decision {
        if let SessionState::Decided(decision) = self.state {
            log::warn!(
                "verify callback for {} invoked after the session was decided",
                self.hostname
            );
            return decision;
        }

        // The reduced verdict is Ok only if every invocation reported Ok;
        // each entry keeps its own verdict for policy inspection.
        if preverify == Preverify::Failed {
            self.preverify = Preverify::Failed;
        }

        match chain::accumulate(&mut self.chain, cert_der, preverify, remaining) {
            AccumulatorOutcome::NeedMore => Decision::Continue,
            AccumulatorOutcome::ChainComplete => {
                let trust = self.evaluator.evaluate(&self.chain, &self.hostname);
                self.state = SessionState::Evaluated;

                let decision =
                    policy::reduce(self.preverify, &trust, &self.chain, self.policy.as_deref());
                self.state = SessionState::Decided(decision);

                if decision == Decision::Stop {
                    log::error!("certificate verification failed for host {}", self.hostname);
                }
                decision
            }
        }
    }
}
