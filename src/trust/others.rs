use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, Error as TlsError};

use super::{status, TrustClassification, TrustEvaluation};
use crate::chain::CertificateEntry;

/// Trust evaluation backed by WebPKI over the system root store, used on
/// platforms without a native whole-chain trust service of the required
/// shape.
pub struct TrustEvaluator {
    // We use a `OnceCell` so we only need to try loading system roots once
    // per evaluator; a fresh evaluator per session picks up on root-store
    // changes made since.
    inner: OnceCell<Arc<WebPkiServerVerifier>>,

    crypto_provider: OnceCell<Arc<CryptoProvider>>,

    /// Testing only: the root CA certificate to trust.
    #[cfg(any(test, feature = "dbg"))]
    test_only_root_ca_override: Option<Vec<u8>>,
}

impl TrustEvaluator {
    /// Creates an evaluator that trusts the root certificates provided by
    /// the operating system, falling back to the bundled WebPKI roots when
    /// the system store yields nothing usable.
    pub fn new() -> Self {
        Self {
            inner: OnceCell::new(),
            crypto_provider: OnceCell::new(),
            #[cfg(any(test, feature = "dbg"))]
            test_only_root_ca_override: None,
        }
    }

    /// Creates a test-only evaluator which trusts nothing but the given root
    /// CA certificate.
    #[cfg(any(test, feature = "dbg"))]
    pub(crate) fn new_with_fake_root(root: &[u8]) -> Self {
        Self {
            inner: OnceCell::new(),
            crypto_provider: OnceCell::new(),
            test_only_root_ca_override: Some(root.into()),
        }
    }

    /// Chainable setter to configure the [`CryptoProvider`] for this
    /// evaluator.
    ///
    /// This will be used instead of the rustls process-default provider,
    /// even if one has been installed.
    pub fn with_provider(mut self, crypto_provider: Arc<CryptoProvider>) -> Self {
        self.set_provider(crypto_provider);
        self
    }

    /// Configures the [`CryptoProvider`] for this evaluator.
    ///
    /// This will be used instead of the rustls process-default provider,
    /// even if one has been installed.
    pub fn set_provider(&mut self, crypto_provider: Arc<CryptoProvider>) {
        self.crypto_provider = crypto_provider.into();
    }

    fn get_provider(&self) -> Result<&Arc<CryptoProvider>, TlsError> {
        self.crypto_provider.get_or_try_init(|| {
            CryptoProvider::get_default().cloned().ok_or_else(|| {
                TlsError::General("no process-default CryptoProvider is installed".into())
            })
        })
    }

    fn get_or_init_verifier(&self) -> Result<&Arc<WebPkiServerVerifier>, TlsError> {
        self.inner.get_or_try_init(|| self.init_verifier())
    }

    // Attempt to load the CA root certificates present on the system,
    // falling back to the bundled WebPKI roots on error.
    fn init_verifier(&self) -> Result<Arc<WebPkiServerVerifier>, TlsError> {
        let mut root_store = rustls::RootCertStore::empty();

        // For testing only: load the fake root cert, instead of system roots.
        #[cfg(any(test, feature = "dbg"))]
        if let Some(test_root) = &self.test_only_root_ca_override {
            let (added, ignored) =
                root_store.add_parsable_certificates([CertificateDer::from(test_root.as_slice())]);
            if (added != 1) || (ignored != 0) {
                panic!("failed to insert fake, test-only root trust anchor");
            }
            return self.build_verifier(root_store);
        }

        let result = rustls_native_certs::load_native_certs();
        for error in result.errors {
            log::warn!("error loading system root certificate: {error}");
        }

        let (added, ignored) = root_store.add_parsable_certificates(result.certs);
        if ignored != 0 {
            log::warn!("{ignored} system root certificates were ignored due to errors");
        }

        if root_store.is_empty() {
            log::warn!("no usable system root certificates; using the bundled WebPKI roots");
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            log::debug!("loaded {added} root certificates from the system");
        }

        self.build_verifier(root_store)
    }

    fn build_verifier(
        &self,
        root_store: rustls::RootCertStore,
    ) -> Result<Arc<WebPkiServerVerifier>, TlsError> {
        WebPkiServerVerifier::builder_with_provider(
            root_store.into(),
            Arc::clone(self.get_provider()?),
        )
        .build()
        .map_err(|e| TlsError::General(e.to_string()))
    }

    /// Evaluates the accumulated chain (leaf first) against the system trust
    /// anchors and the given hostname.
    ///
    /// One synchronous call per session; failures of the evaluation
    /// machinery are reported as [`TrustClassification::OtherError`] with a
    /// descriptive status code, never retried and never treated as success.
    pub fn evaluate(&self, chain: &[CertificateEntry], hostname: &str) -> TrustEvaluation {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return TrustEvaluation::new(status::PARAM, TrustClassification::OtherError);
        };

        if chain.iter().any(|entry| !entry.is_parsed()) {
            log::error!("chain for {hostname} contains unparseable certificates");
            return TrustEvaluation::new(status::UNKNOWN_FORMAT, TrustClassification::OtherError);
        }

        let server_name = match ServerName::try_from(hostname.to_owned()) {
            Ok(name) => name,
            Err(_) => {
                log::error!("cannot evaluate trust for unsupported host name {hostname:?}");
                return TrustEvaluation::new(status::PARAM, TrustClassification::OtherError);
            }
        };

        let verifier = match self.get_or_init_verifier() {
            Ok(verifier) => verifier,
            Err(e) => {
                log::error!("trust evaluation unavailable: {e}");
                return TrustEvaluation::new(status::NOT_AVAILABLE, TrustClassification::OtherError);
            }
        };

        let intermediates: Vec<CertificateDer<'_>> = intermediates
            .iter()
            .map(|entry| entry.der().clone())
            .collect();

        match verifier.verify_server_cert(
            end_entity.der(),
            &intermediates,
            &server_name,
            &[],
            UnixTime::now(),
        ) {
            Ok(_) => TrustEvaluation::new(status::OK, TrustClassification::Unspecified),
            Err(e) => {
                // This only contains information from the system or other
                // public bits of the TLS handshake, so it can't leak anything.
                log::error!("failed to verify TLS certificate: {e}");
                classify(&e)
            }
        }
    }
}

impl Default for TrustEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(error: &TlsError) -> TrustEvaluation {
    use TrustClassification::*;

    let (status, classification) = match error {
        TlsError::InvalidCertificate(err) => match err {
            CertificateError::NotValidForName
            | CertificateError::NotValidForNameContext { .. } => {
                (status::HOST_NAME_MISMATCH, Deny)
            }
            CertificateError::UnknownIssuer => (status::CREATE_CHAIN_FAILED, RecoverableFailure),
            CertificateError::Expired | CertificateError::NotValidYet => {
                (status::CERT_EXPIRED, RecoverableFailure)
            }
            CertificateError::Revoked => (status::CERT_REVOKED, FatalFailure),
            CertificateError::BadEncoding => (status::UNKNOWN_FORMAT, OtherError),
            _ => (status::NOT_TRUSTED, RecoverableFailure),
        },
        _ => (status::NOT_AVAILABLE, OtherError),
    };

    TrustEvaluation::new(status, classification)
}
