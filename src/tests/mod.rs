//! End-to-end handshake verification scenarios, driven the way a transport
//! layer drives the bridge: one `verify_cert` call per certificate,
//! bottom-up, with the library's terminal signal on the last one.

use std::sync::{Arc, Mutex};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};

use crate::chain::{self, CertificateEntry};
use crate::trust::{status, TrustClassification, TrustEvaluation, TrustEvaluator};
use crate::{
    global_cleanup, global_init, Decision, DecisionPolicy, LifecycleError, Preverify,
    VerificationSession,
};

/// A freshly issued three-certificate chain, DER encoded, leaf first.
pub(crate) struct TestChain {
    pub(crate) leaf: Vec<u8>,
    pub(crate) intermediate: Vec<u8>,
    pub(crate) root: Vec<u8>,
}

/// Issues root -> intermediate -> leaf, with the leaf valid for `host`.
pub(crate) fn issue_chain(host: &str) -> TestChain {
    let root_key = KeyPair::generate().unwrap();
    let mut root_params = CertificateParams::new(Vec::new()).unwrap();
    root_params
        .distinguished_name
        .push(DnType::CommonName, "ftps-platform-trust test root");
    root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let root = root_params.self_signed(&root_key).unwrap();

    let intermediate_key = KeyPair::generate().unwrap();
    let mut intermediate_params = CertificateParams::new(Vec::new()).unwrap();
    intermediate_params
        .distinguished_name
        .push(DnType::CommonName, "ftps-platform-trust test intermediate");
    intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    intermediate_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let intermediate = intermediate_params
        .signed_by(&intermediate_key, &root, &root_key)
        .unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = CertificateParams::new(vec![host.to_owned()]).unwrap();
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let leaf = leaf_params
        .signed_by(&leaf_key, &intermediate, &intermediate_key)
        .unwrap();

    TestChain {
        leaf: leaf.der().as_ref().to_vec(),
        intermediate: intermediate.der().as_ref().to_vec(),
        root: root.der().as_ref().to_vec(),
    }
}

/// Makes sure the process-wide state is usable, regardless of which test
/// gets there first.
pub(crate) fn ensure_global_state() {
    let _ = global_init();
}

struct Always(Decision);

impl DecisionPolicy for Always {
    fn decide(
        &self,
        _preverify: Preverify,
        _trust: &TrustEvaluation,
        _chain: &[CertificateEntry],
    ) -> Decision {
        self.0
    }
}

/// Records what the bridge hands to the policy, then returns a fixed
/// verdict.
struct Recording {
    verdict: Decision,
    seen: Mutex<Option<(Preverify, i32, TrustClassification, usize)>>,
}

impl Recording {
    fn new(verdict: Decision) -> Self {
        Self {
            verdict,
            seen: Mutex::new(None),
        }
    }
}

impl DecisionPolicy for Recording {
    fn decide(
        &self,
        preverify: Preverify,
        trust: &TrustEvaluation,
        chain: &[CertificateEntry],
    ) -> Decision {
        *self.seen.lock().unwrap() = Some((
            preverify,
            trust.status(),
            trust.classification(),
            chain.len(),
        ));
        self.verdict
    }
}

#[test]
fn full_chain_accepted_without_policy() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let mut session = VerificationSession::new_with_fake_root("storage.example.com", &generated.root);
    assert_eq!(
        session.verify_cert(&generated.leaf, Preverify::Ok, 2),
        Decision::Continue
    );
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Ok, 1),
        Decision::Continue
    );
    assert_eq!(
        session.verify_cert(&generated.root, Preverify::Ok, 0),
        Decision::Continue
    );

    assert_eq!(session.chain().len(), 3);
    assert_eq!(session.chain()[0].der().as_ref(), generated.leaf.as_slice());
}

#[test]
fn hostname_mismatch_is_rejected() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let mut session = VerificationSession::new_with_fake_root("files.example.net", &generated.root);
    assert_eq!(
        session.verify_cert(&generated.leaf, Preverify::Ok, 1),
        Decision::Continue
    );
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Ok, 0),
        Decision::Stop
    );
}

#[test]
fn preverify_failure_is_rejected() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let mut session = VerificationSession::new_with_fake_root("storage.example.com", &generated.root);
    session.verify_cert(&generated.leaf, Preverify::Ok, 1);
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Failed, 0),
        Decision::Stop
    );
}

#[test]
fn pinning_policy_overrides_rejection() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    // Wrong hostname *and* a failed preverify verdict: the configured
    // policy's answer still stands alone.
    let mut session = VerificationSession::new_with_fake_root("files.example.net", &generated.root);
    session.set_policy(Arc::new(Always(Decision::Continue)));

    session.verify_cert(&generated.leaf, Preverify::Failed, 1);
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Failed, 0),
        Decision::Continue
    );
}

#[test]
fn policy_override_can_reject_a_trusted_chain() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let policy = Arc::new(Recording::new(Decision::Stop));
    let mut session = VerificationSession::new_with_fake_root("storage.example.com", &generated.root);
    session.set_policy(Arc::clone(&policy) as Arc<dyn DecisionPolicy>);

    session.verify_cert(&generated.leaf, Preverify::Ok, 1);
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Ok, 0),
        Decision::Stop
    );

    let (preverify, status, classification, chain_len) = policy.seen.lock().unwrap().unwrap();
    assert_eq!(preverify, Preverify::Ok);
    assert_eq!(status, status::OK);
    assert!(classification.is_trusted());
    assert_eq!(chain_len, 2);
}

#[test]
fn malformed_leaf_is_rejected() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let mut session = VerificationSession::new_with_fake_root("storage.example.com", &generated.root);
    assert_eq!(
        session.verify_cert(b"these bytes are not a certificate", Preverify::Ok, 0),
        Decision::Stop
    );
    assert!(!session.chain()[0].is_parsed());
}

#[test]
fn malformed_chain_reports_unknown_format_to_the_policy() {
    ensure_global_state();

    let policy = Arc::new(Recording::new(Decision::Stop));
    let mut session = VerificationSession::new("storage.example.com");
    session.set_policy(Arc::clone(&policy) as Arc<dyn DecisionPolicy>);

    session.verify_cert(b"these bytes are not a certificate", Preverify::Ok, 0);

    let (_, status, classification, chain_len) = policy.seen.lock().unwrap().unwrap();
    assert_eq!(status, status::UNKNOWN_FORMAT);
    assert_eq!(classification, TrustClassification::OtherError);
    assert_eq!(chain_len, 1);
}

#[test]
fn decided_session_stays_decided() {
    ensure_global_state();
    let generated = issue_chain("storage.example.com");

    let mut session = VerificationSession::new_with_fake_root("files.example.net", &generated.root);
    session.verify_cert(&generated.leaf, Preverify::Ok, 1);
    assert_eq!(
        session.verify_cert(&generated.intermediate, Preverify::Ok, 0),
        Decision::Stop
    );

    // The transport was expected to abort; if it calls again anyway the
    // recorded decision comes back and nothing is accumulated or re-run.
    assert_eq!(
        session.verify_cert(&generated.root, Preverify::Ok, 0),
        Decision::Stop
    );
    assert_eq!(session.chain().len(), 2);
}

#[test]
fn empty_chain_evaluates_to_other_error() {
    let evaluation = TrustEvaluator::new().evaluate(&[], "storage.example.com");
    assert_eq!(evaluation.status(), status::PARAM);
    assert_eq!(evaluation.classification(), TrustClassification::OtherError);
}

#[test]
fn unparseable_entry_short_circuits_evaluation() {
    let mut entries = Vec::new();
    chain::accumulate(&mut entries, b"garbage", Preverify::Ok, 0);

    let evaluation = TrustEvaluator::new().evaluate(&entries, "storage.example.com");
    assert_eq!(evaluation.status(), status::UNKNOWN_FORMAT);
    assert_eq!(evaluation.classification(), TrustClassification::OtherError);
}

#[test]
fn lifecycle_misuse_is_reported() {
    // Whichever test initialized the process first, a second init without an
    // intervening cleanup is always an error.
    let _ = global_init();
    assert_eq!(global_init(), Err(LifecycleError::AlreadyInitialized));

    assert_eq!(global_cleanup(), Ok(()));
    assert_eq!(global_cleanup(), Err(LifecycleError::NotInitialized));

    // One init/cleanup pair per process lifetime.
    assert_eq!(global_init(), Err(LifecycleError::AlreadyInitialized));
}
