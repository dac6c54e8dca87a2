//! Accumulation of per-certificate verify callbacks into an owned chain.
//!
//! The handshake library surrenders one certificate per callback invocation,
//! bottom-up (leaf first, root last), and may free its buffer the moment the
//! callback returns. Everything kept for the later whole-chain trust
//! evaluation is therefore copied here.

use rustls::pki_types::CertificateDer;

/// The handshake library's own per-certificate verdict, produced by its
/// built-in verification step and forwarded through the bridge untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Preverify {
    /// The library's built-in verification rejected this certificate.
    Failed = 0,
    /// The library's built-in verification accepted this certificate.
    Ok = 1,
}

impl Preverify {
    /// Converts the C-int form OpenSSL-style libraries hand to their verify
    /// callbacks (`0` = failed, non-zero = ok).
    pub fn from_raw(raw: i32) -> Self {
        if raw == 0 {
            Self::Failed
        } else {
            Self::Ok
        }
    }
}

/// Whether the accumulated chain is ready for trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccumulatorOutcome {
    /// More callback invocations are expected in this pass.
    NeedMore,
    /// The terminal certificate of the pass was just accumulated.
    ChainComplete,
}

/// One certificate as seen by the verify callback: its owned DER bytes, the
/// verdict the handshake library supplied with it, and whether the bytes
/// form a structurally valid X.509 certificate.
///
/// Entries are immutable once accumulated. Unparseable bytes are kept — a
/// malformed certificate is itself a trust-relevant fact the decision policy
/// must get to see, not something to drop silently.
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    der: CertificateDer<'static>,
    preverify: Preverify,
    parsed: bool,
}

impl CertificateEntry {
    /// The certificate's DER encoding.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// The handshake library's verdict for this certificate.
    pub fn preverify(&self) -> Preverify {
        self.preverify
    }

    /// Whether the bytes parsed as an X.509 certificate.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }
}

/// Appends the next certificate of the pass to the session chain.
///
/// `remaining` is the handshake library's own terminal signal: the number of
/// certificates still to come in this pass, with `0` marking the last one.
/// The chain is append-only and keeps the caller's invocation order, so index
/// 0 is always the leaf.
pub(crate) fn accumulate(
    chain: &mut Vec<CertificateEntry>,
    der: &[u8],
    preverify: Preverify,
    remaining: usize,
) -> AccumulatorOutcome {
    log_certificate(der);

    let parsed = x509_parser::parse_x509_certificate(der).is_ok();
    if !parsed {
        log::warn!(
            "certificate at depth {} could not be parsed; keeping it for policy evaluation",
            chain.len()
        );
    }

    chain.push(CertificateEntry {
        der: CertificateDer::from(der.to_vec()),
        preverify,
        parsed,
    });

    if remaining == 0 {
        AccumulatorOutcome::ChainComplete
    } else {
        AccumulatorOutcome::NeedMore
    }
}

// Log each certificate crossing the bridge so that we can try and find what
// may be wrong with it if we need to debug a user's situation.
fn log_certificate(_der: &[u8]) {
    #[cfg(feature = "cert-logging")]
    {
        use base64::Engine;
        log::debug!(
            "accumulating certificate: {}",
            base64::engine::general_purpose::STANDARD.encode(_der)
        );
    }
}
