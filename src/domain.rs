//! Core document types for the Kredo protocol.
//!
//! All documents are designed to be:
//! - Serializable via serde_json
//! - Canonicalized via the codec in [`crate::codec`]
//! - Signed/verified with Ed25519 via [`crate::signature`]
//! - Immutable once accepted (revisions create new rows, never mutate old ones)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Identity primitives ─────────────────────────────────────────────────────

/// An `ed25519:<64 hex chars>` public key, always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(String);

/// An `ed25519:<128 hex chars>` signature, always lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("pubkey must start with 'ed25519:'")]
    MissingPrefix,
    #[error("pubkey must be 64 lowercase hex characters after the prefix")]
    BadPubkeyHex,
    #[error("signature must be 128 lowercase hex characters after the prefix")]
    BadSignatureHex,
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

impl PubKey {
    pub fn parse(raw: &str) -> Result<Self, KeyFormatError> {
        let hex = raw.strip_prefix("ed25519:").ok_or(KeyFormatError::MissingPrefix)?;
        if hex.len() != 64 || !is_lower_hex(hex) {
            return Err(KeyFormatError::BadPubkeyHex);
        }
        Ok(PubKey(raw.to_string()))
    }

    /// The 64-hex-char body, without the `ed25519:` prefix.
    pub fn hex(&self) -> &str {
        &self.0[8..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], KeyFormatError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(self.hex(), &mut out).map_err(|_| KeyFormatError::BadPubkeyHex)?;
        Ok(out)
    }
}

impl Signature {
    pub fn parse(raw: &str) -> Result<Self, KeyFormatError> {
        let hex = raw.strip_prefix("ed25519:").ok_or(KeyFormatError::MissingPrefix)?;
        if hex.len() != 128 || !is_lower_hex(hex) {
            return Err(KeyFormatError::BadSignatureHex);
        }
        Ok(Signature(raw.to_string()))
    }

    pub fn hex(&self) -> &str {
        &self.0[8..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; 64], KeyFormatError> {
        let mut out = [0u8; 64];
        hex::decode_to_slice(self.hex(), &mut out).map_err(|_| KeyFormatError::BadSignatureHex)?;
        Ok(out)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PubKey {
    type Err = KeyFormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PubKey::parse(s)
    }
}

impl FromStr for Signature {
    type Err = KeyFormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

impl Serialize for PubKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        PubKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Signature::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ─── Identity record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    Agent,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub pubkey: PubKey,
    pub name: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub first_seen: String,
    pub last_seen: String,
}

// ─── Attestation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttestationType {
    SkillAttestation,
    IntellectualContribution,
    CommunityContribution,
    BehavioralWarning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectRef {
    pub pubkey: PubKey,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttestorRef {
    pub pubkey: PubKey,
    pub name: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub domain: String,
    pub specific: String,
    pub proficiency: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Evidence {
    pub context: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_date: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvidenceScore {
    pub specificity: f64,
    pub verifiability: f64,
    pub relevance: f64,
    pub recency: f64,
    pub composite: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attestation {
    pub id: uuid::Uuid,
    pub kredo: String,
    #[serde(rename = "type")]
    pub attestation_type: AttestationType,
    pub subject: SubjectRef,
    pub attestor: AttestorRef,
    pub skill: Skill,
    pub evidence: Evidence,
    pub issued: String,
    pub expires: String,
    pub signature: Signature,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_score: Option<EvidenceScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoker_pubkey: Option<PubKey>,
}

impl Attestation {
    /// The fields that are part of the signable view: everything the attestor
    /// signed, excluding `signature` and server-derived fields.
    pub fn signable_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "kredo": self.kredo,
            "type": self.attestation_type,
            "subject": self.subject,
            "attestor": self.attestor,
            "skill": self.skill,
            "evidence": self.evidence,
            "issued": self.issued,
            "expires": self.expires,
        })
    }
}

// ─── Revocation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revoker {
    pub pubkey: PubKey,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revocation {
    pub id: uuid::Uuid,
    pub attestation_id: uuid::Uuid,
    pub revoker: Revoker,
    pub reason: String,
    pub issued: String,
    pub signature: Signature,
}

impl Revocation {
    pub fn signable_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "attestation_id": self.attestation_id,
            "revoker": self.revoker,
            "reason": self.reason,
            "issued": self.issued,
        })
    }
}

// ─── Dispute ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disputor {
    pub pubkey: PubKey,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispute {
    pub id: uuid::Uuid,
    pub warning_id: uuid::Uuid,
    pub disputor: Disputor,
    pub response: String,
    pub issued: String,
    pub signature: Signature,
}

impl Dispute {
    pub fn signable_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "warning_id": self.warning_id,
            "disputor": self.disputor,
            "response": self.response,
            "issued": self.issued,
        })
    }
}

// ─── Ownership claim ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipState {
    Pending,
    Active,
    Revoked,
    PendingExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnershipClaim {
    pub claim_id: String,
    pub agent_pubkey: PubKey,
    pub human_pubkey: PubKey,
    pub claim_signature: Signature,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_signature: Option<Signature>,
    pub claimed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoker: Option<PubKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    pub state: OwnershipState,
}

/// Signable payload for `ownership_claim` (spec §6.1).
pub fn ownership_claim_payload(claim_id: &str, agent_pubkey: &PubKey, human_pubkey: &PubKey) -> serde_json::Value {
    serde_json::json!({
        "action": "ownership_claim",
        "claim_id": claim_id,
        "agent_pubkey": agent_pubkey,
        "human_pubkey": human_pubkey,
    })
}

/// Signable payload for `ownership_confirm` (spec §6.1).
pub fn ownership_confirm_payload(claim_id: &str, agent_pubkey: &PubKey, human_pubkey: &PubKey) -> serde_json::Value {
    serde_json::json!({
        "action": "ownership_confirm",
        "claim_id": claim_id,
        "agent_pubkey": agent_pubkey,
        "human_pubkey": human_pubkey,
    })
}

/// Signable payload for `ownership_revoke` (spec §6.1).
pub fn ownership_revoke_payload(
    claim_id: &str,
    agent_pubkey: &PubKey,
    human_pubkey: &PubKey,
    revoker_pubkey: &PubKey,
    reason: &str,
) -> serde_json::Value {
    serde_json::json!({
        "action": "ownership_revoke",
        "claim_id": claim_id,
        "agent_pubkey": agent_pubkey,
        "human_pubkey": human_pubkey,
        "revoker_pubkey": revoker_pubkey,
        "reason": reason,
    })
}

// ─── Integrity baseline / check ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHash {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Active,
    Superseded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityBaseline {
    pub baseline_id: String,
    pub agent_pubkey: PubKey,
    pub owner_pubkey: PubKey,
    pub file_hashes: Vec<FileHash>,
    pub owner_signature: Signature,
    pub set_at: String,
    pub status: BaselineStatus,
}

/// Signable payload for `integrity_set_baseline` (spec §6.1).
pub fn integrity_set_baseline_payload(
    baseline_id: &str,
    agent_pubkey: &PubKey,
    owner_pubkey: &PubKey,
    file_hashes: &[FileHash],
) -> serde_json::Value {
    serde_json::json!({
        "action": "integrity_set_baseline",
        "baseline_id": baseline_id,
        "agent_pubkey": agent_pubkey,
        "owner_pubkey": owner_pubkey,
        "file_hashes": file_hashes,
    })
}

/// Signable payload for `integrity_check` (spec §6.1).
pub fn integrity_check_payload(agent_pubkey: &PubKey, file_hashes: &[FileHash]) -> serde_json::Value {
    serde_json::json!({
        "action": "integrity_check",
        "agent_pubkey": agent_pubkey,
        "file_hashes": file_hashes,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntegrityDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityResult {
    pub status: TrafficLight,
    pub diff: IntegrityDiff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityCheck {
    pub check_id: String,
    pub agent_pubkey: PubKey,
    pub file_hashes: Vec<FileHash>,
    pub agent_signature: Signature,
    pub checked_at: String,
    pub result: IntegrityResult,
}

// ─── Audit event ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub timestamp: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_pubkey: Option<PubKey>,
    pub source_ip: String,
    pub source_ip_hash: String,
    pub user_agent: String,
    pub details_json: serde_json::Value,
}

// ─── Taxonomy ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxonomySkill {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxonomyDomain {
    pub id: String,
    pub label: String,
    pub skills: Vec<TaxonomySkill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_requires_prefix_and_length() {
        assert!(PubKey::parse(&format!("ed25519:{}", "a".repeat(64))).is_ok());
        assert_eq!(PubKey::parse(&"a".repeat(64)), Err(KeyFormatError::MissingPrefix));
        assert_eq!(
            PubKey::parse(&format!("ed25519:{}", "a".repeat(63))),
            Err(KeyFormatError::BadPubkeyHex)
        );
        assert_eq!(
            PubKey::parse(&format!("ed25519:{}", "A".repeat(64))),
            Err(KeyFormatError::BadPubkeyHex)
        );
    }

    #[test]
    fn signature_requires_prefix_and_length() {
        assert!(Signature::parse(&format!("ed25519:{}", "b".repeat(128))).is_ok());
        assert_eq!(
            Signature::parse(&format!("ed25519:{}", "b".repeat(127))),
            Err(KeyFormatError::BadSignatureHex)
        );
    }

    #[test]
    fn pubkey_roundtrips_through_json() {
        let pk = PubKey::parse(&format!("ed25519:{}", "c".repeat(64))).unwrap();
        let json = serde_json::to_string(&pk).unwrap();
        let back: PubKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}
