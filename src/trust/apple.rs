use core_foundation::base::TCFType;
use security_framework::certificate::SecCertificate;
use security_framework::policy::SecPolicy;
use security_framework::secure_transport::SslProtocolSide;
use security_framework::trust::SecTrust;
use security_framework_sys::trust::{
    kSecTrustResultDeny, kSecTrustResultFatalTrustFailure, kSecTrustResultProceed,
    kSecTrustResultRecoverableTrustFailure, kSecTrustResultUnspecified, SecTrustGetTrustResult,
    SecTrustResultType,
};

use super::{status, TrustClassification, TrustEvaluation};
use crate::chain::CertificateEntry;

/// Trust evaluation through the Security framework's `SecTrust` facility.
pub struct TrustEvaluator {
    /// Testing only: the root CA certificate to trust.
    #[cfg(any(test, feature = "dbg"))]
    test_only_root_ca_override: Option<Vec<u8>>,
}

impl TrustEvaluator {
    /// Creates an evaluator that judges chains against the system and user
    /// trust settings, exactly as the operating system would for any TLS
    /// server.
    pub fn new() -> Self {
        Self {
            #[cfg(any(test, feature = "dbg"))]
            test_only_root_ca_override: None,
        }
    }

    /// Creates a test-only evaluator which trusts nothing but the given root
    /// CA certificate.
    #[cfg(any(test, feature = "dbg"))]
    pub(crate) fn new_with_fake_root(root: &[u8]) -> Self {
        Self {
            test_only_root_ca_override: Some(root.into()),
        }
    }

    /// Evaluates the accumulated chain (leaf first) against the system trust
    /// settings and the given hostname.
    ///
    /// One synchronous call per session; failures of the evaluation
    /// machinery are reported as [`TrustClassification::OtherError`] with a
    /// descriptive status code, never retried and never treated as success.
    pub fn evaluate(&self, chain: &[CertificateEntry], hostname: &str) -> TrustEvaluation {
        if chain.is_empty() {
            return TrustEvaluation::new(status::PARAM, TrustClassification::OtherError);
        }

        if chain.iter().any(|entry| !entry.is_parsed()) {
            log::error!("chain for {hostname} contains unparseable certificates");
            return TrustEvaluation::new(status::UNKNOWN_FORMAT, TrustClassification::OtherError);
        }

        // The certificate under evaluation must come first in the array, and
        // accumulation order already places the leaf there.
        //
        // Ref: https://developer.apple.com/documentation/security/1401555-sectrustcreatewithcertificates
        let certificates = match chain
            .iter()
            .map(|entry| SecCertificate::from_der(entry.der().as_ref()))
            .collect::<Result<Vec<SecCertificate>, _>>()
        {
            Ok(certificates) => certificates,
            Err(e) => {
                log::error!("certificate in chain for {hostname} was rejected: {e}");
                return TrustEvaluation::new(
                    status::UNKNOWN_FORMAT,
                    TrustClassification::OtherError,
                );
            }
        };

        // A policy suitable for verifying TLS server chains: the protocol
        // side is `server` for a client verifying a server, and the hostname
        // is required to match what the leaf certificate reports.
        //
        // Ref: https://developer.apple.com/documentation/security/1392592-secpolicycreatessl
        let policy = SecPolicy::create_ssl(SslProtocolSide::SERVER, Some(hostname));

        #[cfg_attr(not(any(test, feature = "dbg")), allow(unused_mut))]
        let mut trust = match SecTrust::create_with_certificates(&certificates, &[policy]) {
            Ok(trust) => trust,
            Err(e) => {
                log::error!("failed to create trust evaluation context: {e}");
                return TrustEvaluation::new(e.code(), TrustClassification::OtherError);
            }
        };

        // When testing, anchor on the fake root and ignore anything present
        // on the system.
        #[cfg(any(test, feature = "dbg"))]
        if let Some(test_root) = &self.test_only_root_ca_override {
            // If these panicked, it would be a programmer bug in the tests.
            let test_root = SecCertificate::from_der(test_root).expect("failed to parse test root");

            trust
                .set_anchor_certificates(&[test_root])
                .expect("failed to set anchors");

            // `SecTrustSetAnchorCertificatesOnly` must be called after
            // setting custom anchors; it disables trusting any anchor other
            // than the ones passed in above.
            trust
                .set_trust_anchor_certificates_only(true)
                .expect("failed to tell trust to only use provided anchors");
        }

        let status = match trust.evaluate_with_error() {
            Ok(()) => status::OK,
            Err(e) => {
                // This only contains information from the system or other
                // public bits of the TLS handshake, so it can't leak anything.
                log::error!("failed to verify TLS certificate: {e}");
                e.code().try_into().unwrap_or(status::NOT_TRUSTED)
            }
        };

        TrustEvaluation::new(status, trust_result(&trust))
    }
}

impl Default for TrustEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// The detailed result type is only reachable through the raw API after an
// `SecTrustEvaluateWithError` call.
#[allow(non_upper_case_globals)]
fn trust_result(trust: &SecTrust) -> TrustClassification {
    let mut result: SecTrustResultType = 0;
    // SAFETY: `trust` outlives the call and `result` is a plain out-parameter
    // written before the function returns.
    let status = unsafe { SecTrustGetTrustResult(trust.as_concrete_TypeRef(), &mut result) };
    if status != 0 {
        return TrustClassification::OtherError;
    }

    match result {
        kSecTrustResultProceed => TrustClassification::Proceed,
        kSecTrustResultUnspecified => TrustClassification::Unspecified,
        kSecTrustResultDeny => TrustClassification::Deny,
        kSecTrustResultRecoverableTrustFailure => TrustClassification::RecoverableFailure,
        kSecTrustResultFatalTrustFailure => TrustClassification::FatalFailure,
        _ => TrustClassification::OtherError,
    }
}
