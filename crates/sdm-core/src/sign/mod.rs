//! Goal-event signing and verification.
//!
//! Goal events travel over an external bus between the planner, the
//! dispatcher, and isolated workers. To prevent tampering in transit, the
//! emitting side signs the canonical serialization of every event with
//! RSA-SHA512 and receivers verify against an ordered set of public keys.
//! The embedded platform verification key is always part of that set.

mod canonical;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};
use thiserror::Error;

pub use canonical::canonical_form;

use crate::goal::SdmGoalEvent;

/// The published platform verification key.
///
/// Receivers accept goal events signed by the platform itself in addition
/// to any workspace-configured keys.
pub const PLATFORM_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAlWL1QI6cX5dQJQ/FnDOK
cPSq2cgWeOLkapjQWaGF8YQWVN73Wt1z9m8U7C8ffRT2rSK8mo40hz4w71kyXU34
T8A6fc43ctNTBGoRRPp6buJyN3BN/wCdIcdvQ5JdCQGfPxcPpPWI8TrPSjogMxp0
SoYDOA4fsXKt4ATYbNO2QunAIflIDbC7s0wgD54IjTQAWBoxvWax4pb4x2cmqU4/
V8HDRgJJHMUAWaJyQWQAWDoEiNQS2yUGSnT9BWlkSEVfaItOLkuMq1ucFe1Kj2E5
r5rZr8S4H/HA3nl7Vs7opLZca9qRLgEBiaHdX5RtGfDUS/M2vAMb+LcjdbtZ3MaD
NwIDAQAB
-----END PUBLIC KEY-----
";

/// Errors raised while loading key material or producing signatures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// A private key PEM failed to parse.
    #[error("invalid signing key: {0}")]
    InvalidSigningKey(#[from] rsa::pkcs8::Error),

    /// A public key PEM failed to parse.
    #[error("invalid verification key: {0}")]
    InvalidVerificationKey(#[from] rsa::pkcs8::spki::Error),

    /// The RSA signing operation failed.
    #[error("signing failed: {0}")]
    Signing(#[from] rsa::Error),
}

/// Why a received goal event was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// Signing is enabled but the event carries no signature.
    #[error("signature was missing")]
    MissingSignature,

    /// No configured verification key accepts the signature.
    #[error("signature was invalid")]
    InvalidSignature,
}

impl VerificationFailure {
    /// Renders the goal description used when rejecting the event.
    #[must_use]
    pub fn rejection_description(&self) -> String {
        format!("Rejected because {self}")
    }
}

/// Signs outbound goal events with the registration's private key.
pub struct GoalSigner {
    key: RsaPrivateKey,
}

impl GoalSigner {
    /// Loads a signer from a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::InvalidSigningKey` when the PEM does not
    /// parse.
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        Ok(Self {
            key: RsaPrivateKey::from_pkcs8_pem(pem)?,
        })
    }

    /// Computes the base64 signature over the canonical form of `goal`.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::Signing` when the RSA operation fails.
    pub fn sign(&self, goal: &SdmGoalEvent) -> Result<String, SigningError> {
        let digest = Sha512::digest(canonical_form(goal).as_bytes());
        let signature = self.key.sign(Pkcs1v15Sign::new::<Sha512>(), &digest)?;
        Ok(BASE64.encode(signature))
    }

    /// Signs `goal` in place, storing the signature on the event.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::Signing` when the RSA operation fails.
    pub fn attach(&self, goal: &mut SdmGoalEvent) -> Result<(), SigningError> {
        goal.signature = Some(self.sign(goal)?);
        Ok(())
    }
}

/// Verifies inbound goal events against an ordered set of public keys.
pub struct GoalVerifier {
    keys: Vec<RsaPublicKey>,
}

impl GoalVerifier {
    /// Builds a verifier from workspace-configured PEM public keys.
    ///
    /// The embedded [`PLATFORM_PUBLIC_KEY`] is appended after the
    /// configured keys.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::InvalidVerificationKey` when a PEM does not
    /// parse.
    pub fn from_pems<I, S>(pems: I) -> Result<Self, SigningError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = Vec::new();
        for pem in pems {
            keys.push(RsaPublicKey::from_public_key_pem(pem.as_ref())?);
        }
        keys.push(RsaPublicKey::from_public_key_pem(PLATFORM_PUBLIC_KEY)?);
        Ok(Self { keys })
    }

    /// Verifies the signature on `goal`.
    ///
    /// Keys are tried in configuration order; the first key that accepts
    /// the signature wins.
    ///
    /// # Errors
    ///
    /// - `VerificationFailure::MissingSignature` when the event carries no
    ///   signature.
    /// - `VerificationFailure::InvalidSignature` when no key accepts it.
    pub fn verify(&self, goal: &SdmGoalEvent) -> Result<(), VerificationFailure> {
        let Some(signature) = goal.signature.as_deref() else {
            return Err(VerificationFailure::MissingSignature);
        };
        let Ok(raw) = BASE64.decode(signature) else {
            return Err(VerificationFailure::InvalidSignature);
        };

        let digest = Sha512::digest(canonical_form(goal).as_bytes());
        for key in &self.keys {
            if key
                .verify(Pkcs1v15Sign::new::<Sha512>(), &digest, &raw)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(VerificationFailure::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::{Fulfillment, Goal, GoalState, Provenance, SdmGoalEvent};
    use crate::push::test_support::sample_push;

    const SIGNING_KEY: &str = include_str!("../../tests/fixtures/signing-key.pem");
    const VERIFICATION_KEY: &str = include_str!("../../tests/fixtures/signing-key.pub.pem");

    fn sample_event() -> SdmGoalEvent {
        let goal = Goal::builder("build", "0-code")
            .description("Building")
            .build();
        SdmGoalEvent::from_template(
            &goal,
            &sample_push(),
            "set-1",
            GoalState::Requested,
            Fulfillment::sdm("builder"),
            Provenance {
                registration: "my-sdm".to_string(),
                version: "0.4.2".to_string(),
                name: "plan-on-push".to_string(),
                ts: 1_000,
                user_id: None,
                channel_id: None,
                correlation_id: None,
            },
            1_000,
        )
    }

    #[test]
    fn sign_verify_round_trip() {
        let signer = GoalSigner::from_pem(SIGNING_KEY).unwrap();
        let verifier = GoalVerifier::from_pems([VERIFICATION_KEY]).unwrap();

        let mut goal = sample_event();
        signer.attach(&mut goal).unwrap();

        assert!(goal.signature.is_some());
        verifier.verify(&goal).unwrap();
    }

    #[test]
    fn tampered_event_is_rejected() {
        let signer = GoalSigner::from_pem(SIGNING_KEY).unwrap();
        let verifier = GoalVerifier::from_pems([VERIFICATION_KEY]).unwrap();

        let mut goal = sample_event();
        signer.attach(&mut goal).unwrap();
        goal.sha = "0000000000000000000000000000000000000000".to_string();

        assert_eq!(
            verifier.verify(&goal),
            Err(VerificationFailure::InvalidSignature)
        );
    }

    #[test]
    fn missing_signature_is_rejected() {
        let verifier = GoalVerifier::from_pems([VERIFICATION_KEY]).unwrap();
        let goal = sample_event();
        assert_eq!(
            verifier.verify(&goal),
            Err(VerificationFailure::MissingSignature)
        );
    }

    #[test]
    fn garbled_signature_is_invalid_not_a_panic() {
        let verifier = GoalVerifier::from_pems([VERIFICATION_KEY]).unwrap();
        let mut goal = sample_event();
        goal.signature = Some("not base64 at all %%%".to_string());
        assert_eq!(
            verifier.verify(&goal),
            Err(VerificationFailure::InvalidSignature)
        );
    }

    #[test]
    fn verifier_without_workspace_keys_rejects_workspace_signatures() {
        // Only the platform key remains configured.
        let signer = GoalSigner::from_pem(SIGNING_KEY).unwrap();
        let verifier = GoalVerifier::from_pems(Vec::<String>::new()).unwrap();

        let mut goal = sample_event();
        signer.attach(&mut goal).unwrap();

        assert_eq!(
            verifier.verify(&goal),
            Err(VerificationFailure::InvalidSignature)
        );
    }

    #[test]
    fn rejection_description_names_the_reason() {
        assert_eq!(
            VerificationFailure::MissingSignature.rejection_description(),
            "Rejected because signature was missing"
        );
        assert_eq!(
            VerificationFailure::InvalidSignature.rejection_description(),
            "Rejected because signature was invalid"
        );
    }
}
