//! Ed25519 signature verification.
//!
//! The server never holds or uses a signing key — it only verifies. Every
//! write endpoint requires the caller to have already signed the canonical
//! form of their payload (see [`crate::codec`]) with the private key
//! matching the `pubkey` field in the payload.

use crate::domain::{PubKey, Signature};
use ed25519_dalek::{Verifier, VerifyingKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    MalformedPubkey,
    MalformedSignature,
    SignatureMismatch,
}

impl VerifyFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyFailure::MalformedPubkey => "pubkey is not a well-formed ed25519 key",
            VerifyFailure::MalformedSignature => "signature is not a well-formed ed25519 signature",
            VerifyFailure::SignatureMismatch => "signature does not verify against the signed payload",
        }
    }
}

/// Verify that `signature` over `signable_bytes` was produced by `pubkey`.
///
/// This is the only place signature verification happens; every caller
/// (registration, attestations, revocations, disputes, ownership actions,
/// integrity baselines/checks, taxonomy mutations) funnels through here
/// with their own canonical payload.
pub fn verify(signable_bytes: &[u8], signature: &Signature, pubkey: &PubKey) -> Result<(), VerifyFailure> {
    let key_bytes = pubkey.to_bytes().map_err(|_| VerifyFailure::MalformedPubkey)?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyFailure::MalformedPubkey)?;

    let sig_bytes = signature.to_bytes().map_err(|_| VerifyFailure::MalformedSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(signable_bytes, &sig)
        .map_err(|_| VerifyFailure::SignatureMismatch)
}

/// Verify a signature over an arbitrary serializable payload, canonicalizing
/// it first. Convenience wrapper around [`verify`] for the common case.
pub fn verify_payload<T: serde::Serialize>(
    payload: &T,
    signature: &Signature,
    pubkey: &PubKey,
) -> Result<(), VerifyFailure> {
    let bytes = crate::codec::canonical(payload).map_err(|_| VerifyFailure::MalformedSignature)?;
    verify(&bytes, signature, pubkey)
}

#[cfg(test)]
pub mod test_support {
    //! Signing helpers used only by tests to build valid fixtures. The
    //! server itself never signs anything.
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    pub fn generate_keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    pub fn pubkey_of(signing_key: &SigningKey) -> PubKey {
        PubKey::parse(&format!("ed25519:{}", hex::encode(signing_key.verifying_key().to_bytes()))).unwrap()
    }

    pub fn sign_bytes(signing_key: &SigningKey, bytes: &[u8]) -> Signature {
        let sig = signing_key.sign(bytes);
        Signature::parse(&format!("ed25519:{}", hex::encode(sig.to_bytes()))).unwrap()
    }

    pub fn sign_payload<T: serde::Serialize>(signing_key: &SigningKey, payload: &T) -> Signature {
        let bytes = crate::codec::canonical(payload).unwrap();
        sign_bytes(signing_key, &bytes)
    }
}
