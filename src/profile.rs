//! Profile assembly: joins an identity's stored documents with a trust
//! analysis into the `GET /agents/{pubkey}/profile` DTO.
//!
//! The assembler never touches raw SQL directly — it only calls `Store` and
//! `TrustEngine` methods, keeping persistence and scoring decisions out of
//! the presentation layer.

use crate::domain::{AttestationType, IdentityType, PubKey};
use crate::error::KredoError;
use crate::store::Store;
use crate::trust::{Accountability, Integrity, RingFlag, SkillAggregate, TrustAnalysis, TrustEngine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct AttestationCounts {
    pub total: usize,
    pub by_agents: usize,
    pub by_humans: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarningView {
    pub id: uuid::Uuid,
    pub category: String,
    pub attestor: PubKey,
    pub issued: String,
    pub is_revoked: bool,
    pub dispute_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustNetworkEntry {
    pub pubkey: PubKey,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub attestation_count_for_subject: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustAnalysisView {
    pub reputation_score: f64,
    pub ring_flags: Vec<RingFlag>,
    pub per_attestation: Vec<crate::trust::PerAttestationWeight>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub pubkey: PubKey,
    pub name: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub registered: String,
    pub last_seen: String,
    pub attestation_count: AttestationCounts,
    pub evidence_quality_avg: f64,
    pub skills: Vec<SkillAggregate>,
    pub warnings: Vec<WarningView>,
    pub trust_network: Vec<TrustNetworkEntry>,
    pub trust_analysis: TrustAnalysisView,
    pub accountability: Accountability,
    pub integrity: Integrity,
    pub deployability_multiplier: f64,
    pub deployability_score: f64,
}

pub struct ProfileAssembler {
    store: Arc<Store>,
    trust: Arc<TrustEngine>,
}

impl ProfileAssembler {
    pub fn new(store: Arc<Store>, trust: Arc<TrustEngine>) -> Self {
        ProfileAssembler { store, trust }
    }

    pub fn assemble(&self, pubkey: &PubKey) -> Result<Profile, KredoError> {
        let identity = self
            .store
            .get_identity(pubkey)?
            .ok_or_else(|| KredoError::NotFound(format!("identity {pubkey} not found")))?;

        let received = self.store.list_attestations_for_subject(pubkey, None, 200)?;
        let live: Vec<_> = received.items.iter().filter(|a| a.revoked_at.is_none()).collect();

        let by_agents = live.iter().filter(|a| a.attestor.identity_type == IdentityType::Agent).count();
        let by_humans = live.iter().filter(|a| a.attestor.identity_type == IdentityType::Human).count();
        let attestation_count = AttestationCounts { total: live.len(), by_agents, by_humans };

        let evidence_quality_avg = if live.is_empty() {
            0.0
        } else {
            live.iter().filter_map(|a| a.evidence_score.map(|s| s.composite)).sum::<f64>() / live.len() as f64
        };

        let warnings_raw: Vec<_> = received.items.iter().filter(|a| a.attestation_type == AttestationType::BehavioralWarning).collect();
        let mut warnings = Vec::new();
        for w in &warnings_raw {
            let disputes = self.store.list_disputes_for_warning(&w.id)?;
            warnings.push(WarningView {
                id: w.id,
                category: w.skill.specific.clone(),
                attestor: w.attestor.pubkey.clone(),
                issued: w.issued.clone(),
                is_revoked: w.revoked_at.is_some(),
                dispute_count: disputes.len(),
            });
        }

        let mut by_attestor: HashMap<PubKey, (IdentityType, usize)> = HashMap::new();
        for a in &live {
            let entry = by_attestor.entry(a.attestor.pubkey.clone()).or_insert((a.attestor.identity_type, 0));
            entry.1 += 1;
        }
        let mut trust_network: Vec<TrustNetworkEntry> = by_attestor
            .into_iter()
            .map(|(pubkey, (identity_type, count))| TrustNetworkEntry { pubkey, identity_type, attestation_count_for_subject: count })
            .collect();
        trust_network.sort_by(|a, b| b.attestation_count_for_subject.cmp(&a.attestation_count_for_subject));

        let TrustAnalysis { reputation_score, ring_flags, per_attestation, accountability, integrity, deployability_multiplier, deployability_score, skills, .. } =
            self.trust.analyze(pubkey, chrono::Utc::now())?;

        Ok(Profile {
            pubkey: identity.pubkey,
            name: identity.name,
            identity_type: identity.identity_type,
            registered: identity.first_seen,
            last_seen: identity.last_seen,
            attestation_count,
            evidence_quality_avg,
            skills,
            warnings,
            trust_network,
            trust_analysis: TrustAnalysisView { reputation_score, ring_flags, per_attestation },
            accountability,
            integrity,
            deployability_multiplier,
            deployability_score,
        })
    }
}
