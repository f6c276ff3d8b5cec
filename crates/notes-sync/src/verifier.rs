//! OwnershipVerifier: challenge/response check that the connected key controls an identity.
//!
//! Verification works as follows:
//!
//! 1. Build a challenge embedding the identity, a fresh timestamp and a nonce
//! 2. Ask the signing capability to sign it (the user may decline)
//! 3. Recover the signer address from the signature
//! 4. If the signer is the identity itself, grant (owner shortcut)
//! 5. Otherwise look for a registered controller matching the signer whose
//!    permission bitset includes SIGN
//!
//! A grant is cached for the lifetime of the verifier. Concurrent callers share
//! one in-flight attempt so the user is never prompted twice at once.

use crate::address::Address;
use crate::ledger::{PermissionRegistry, Permissions};
use crate::signer::{SignError, Signer};

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Why verification did not grant access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The user declined (or the wallet failed) to sign the challenge
    SignatureRejected,
    /// The signature did not verify
    SignatureInvalid,
    /// The signer is neither the identity nor a controller with SIGN
    InsufficientPermission,
    /// Controller permissions could not be read from the ledger
    LookupFailed(String),
}

impl Display for DenialReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::SignatureRejected => f.write_str("signature-rejected"),
            DenialReason::SignatureInvalid => f.write_str("signature-invalid"),
            DenialReason::InsufficientPermission => f.write_str("insufficient-permission"),
            DenialReason::LookupFailed(msg) => write!(f, "permission-lookup-failed: {}", msg),
        }
    }
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Granted,
    Denied(DenialReason),
}

impl VerificationResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, VerificationResult::Granted)
    }

    pub fn denied_reason(&self) -> Option<&DenialReason> {
        match self {
            VerificationResult::Granted => None,
            VerificationResult::Denied(reason) => Some(reason),
        }
    }
}

type PendingVerification = Shared<BoxFuture<'static, VerificationResult>>;

enum State {
    Unverified,
    InFlight {
        generation: u64,
        attempt: PendingVerification,
    },
    Granted,
}

/// Verifies, and caches, that the configured signer may act for one identity.
pub struct OwnershipVerifier {
    identity: Address,
    signer: Arc<dyn Signer>,
    registry: Arc<dyn PermissionRegistry>,
    state: Mutex<State>,
    /// Bumped on reset so a stale in-flight attempt cannot grant
    generation: Mutex<u64>,
}

impl OwnershipVerifier {
    pub fn new(
        identity: Address,
        signer: Arc<dyn Signer>,
        registry: Arc<dyn PermissionRegistry>,
    ) -> Self {
        Self {
            identity,
            signer,
            registry,
            state: Mutex::new(State::Unverified),
            generation: Mutex::new(0),
        }
    }

    pub fn identity(&self) -> &Address {
        &self.identity
    }

    /// Whether a grant is currently cached.
    pub fn is_verified(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            State::Granted
        )
    }

    /// Drop any cached grant (identity disconnected or changed).
    pub fn reset(&self) {
        *self.generation.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = State::Unverified;
        debug!("Verification reset for {}", self.identity.fmt_short());
    }

    /// Verify ownership, reusing a cached grant or an attempt already in flight.
    pub async fn verify(&self) -> VerificationResult {
        let (generation, attempt) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &*state {
                State::Granted => return VerificationResult::Granted,
                State::InFlight {
                    generation,
                    attempt,
                } => {
                    debug!("Joining in-flight verification for {}", self.identity.fmt_short());
                    (*generation, attempt.clone())
                }
                State::Unverified => {
                    let generation = *self.generation.lock().unwrap_or_else(|e| e.into_inner());
                    let attempt = run_challenge(
                        self.identity,
                        Arc::clone(&self.signer),
                        Arc::clone(&self.registry),
                    )
                    .boxed()
                    .shared();
                    *state = State::InFlight {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let result = attempt.await;

        let current = *self.generation.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let still_ours = matches!(&*state, State::InFlight { generation: g, .. } if *g == generation);
        if still_ours && generation == current {
            *state = if result.is_granted() {
                State::Granted
            } else {
                State::Unverified
            };
        }

        result
    }
}

/// Challenge text signed by the identity's key.
pub fn challenge_message(identity: &Address, issued_at_ms: u64, nonce: u64) -> String {
    format!(
        "Verify ownership of notes profile\nIdentity: {}\nIssued at: {}\nNonce: {:016x}",
        identity, issued_at_ms, nonce
    )
}

async fn run_challenge(
    identity: Address,
    signer: Arc<dyn Signer>,
    registry: Arc<dyn PermissionRegistry>,
) -> VerificationResult {
    let message = challenge_message(&identity, crate::document::now_millis(), rand::random());

    let signed = match signer.sign(&identity, message.as_bytes()).await {
        Ok(signed) => signed,
        Err(SignError::Declined) => {
            info!("Signature request declined for {}", identity.fmt_short());
            return VerificationResult::Denied(DenialReason::SignatureRejected);
        }
        Err(e) => {
            warn!("Signing failed for {}: {}", identity.fmt_short(), e);
            return VerificationResult::Denied(DenialReason::SignatureRejected);
        }
    };

    let recovered = match signed.recover_signer(message.as_bytes()) {
        Ok(address) => address,
        Err(e) => {
            warn!("Challenge signature invalid for {}: {}", identity.fmt_short(), e);
            return VerificationResult::Denied(DenialReason::SignatureInvalid);
        }
    };

    if recovered == identity {
        info!("Verified {} as owner", identity.fmt_short());
        return VerificationResult::Granted;
    }

    let controllers = match registry.controllers(&identity).await {
        Ok(controllers) => controllers,
        Err(e) => return VerificationResult::Denied(DenialReason::LookupFailed(e.to_string())),
    };

    for controller in controllers.iter().filter(|c| **c == recovered) {
        let raw = match registry.permissions(&identity, controller).await {
            Ok(raw) => raw,
            Err(e) => return VerificationResult::Denied(DenialReason::LookupFailed(e.to_string())),
        };
        match raw.as_deref().map(Permissions::decode) {
            Some(Some(permissions)) if permissions.contains(Permissions::SIGN) => {
                info!(
                    "Verified {} as controller of {}",
                    recovered.fmt_short(),
                    identity.fmt_short()
                );
                return VerificationResult::Granted;
            }
            Some(None) => warn!("Undecodable permissions for controller {}", controller),
            _ => {}
        }
    }

    info!(
        "Signer {} lacks SIGN permission on {}",
        recovered.fmt_short(),
        identity.fmt_short()
    );
    VerificationResult::Denied(DenialReason::InsufficientPermission)
}
