//! Process-wide TLS state.
//!
//! The underlying cryptographic machinery keeps global state (the rustls
//! process-default [`CryptoProvider`]), and the handshake library contract
//! requires one initialization before any connection and one cleanup after
//! the last one. Both halves are explicit calls rather than hidden static
//! initialization: the ordering is caller-visible and safety-critical, so the
//! owning application must be able to see and sequence it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

use rustls::crypto::CryptoProvider;

const UNINITIALIZED: u8 = 0;
const ACTIVE: u8 = 1;
const SHUTDOWN: u8 = 2;

static LIFECYCLE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static PROVIDER_INIT: Once = Once::new();

#[cfg(not(any(feature = "aws-lc-rs", feature = "ring")))]
compile_error!("either the `aws-lc-rs` or `ring` feature must be enabled");

/// A misuse of the process-wide lifecycle pair.
///
/// Both variants are programming errors in the owning application, not
/// conditions to recover from at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// [`global_init`] was called while the process state was already
    /// initialized, or after [`global_cleanup`]. Only one init/cleanup pair
    /// is permitted per process lifetime.
    AlreadyInitialized,
    /// [`global_cleanup`] was called without a preceding [`global_init`].
    NotInitialized,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => {
                f.write_str("process-wide TLS state was already initialized")
            }
            Self::NotInitialized => f.write_str("process-wide TLS state is not initialized"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Initializes the process-wide TLS state.
///
/// Must be called exactly once, before the first [`VerificationSession`] is
/// created and before any handshake begins. Sequencing this around all TLS
/// activity is the caller's responsibility; the bridge does not synchronize
/// it against in-flight handshakes.
///
/// Installs the crate's feature-selected [`CryptoProvider`] as the rustls
/// process default unless some other component already installed one, in
/// which case that provider is accepted as-is.
///
/// [`VerificationSession`]: crate::VerificationSession
pub fn global_init() -> Result<(), LifecycleError> {
    // Even a call that loses the race below must not return before the
    // provider is in place; callers treat any return as "TLS is usable".
    PROVIDER_INIT.call_once(|| {
        if CryptoProvider::get_default().is_none() {
            // Losing an install race to another component is acceptable; the
            // provider that won is equivalent for our purposes.
            let _ = default_provider().install_default();
        }
    });

    if LIFECYCLE
        .compare_exchange(UNINITIALIZED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(LifecycleError::AlreadyInitialized);
    }

    log::debug!("process-wide TLS state initialized");
    Ok(())
}

/// Releases the process-wide TLS state.
///
/// Must be called exactly once, after every handshake session has concluded
/// and no further TLS activity will occur in this process. As with
/// [`global_init`], the ordering is the caller's responsibility.
pub fn global_cleanup() -> Result<(), LifecycleError> {
    match LIFECYCLE.compare_exchange(ACTIVE, SHUTDOWN, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => {
            log::debug!("process-wide TLS state released");
            Ok(())
        }
        Err(_) => Err(LifecycleError::NotInitialized),
    }
}

#[cfg(feature = "aws-lc-rs")]
fn default_provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

#[cfg(all(feature = "ring", not(feature = "aws-lc-rs")))]
fn default_provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}
