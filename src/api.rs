//! The full Kredo HTTP surface.
//!
//! Every handler returns `Result<impl IntoResponse, KredoError>` and funnels
//! through `KredoError`'s single `IntoResponse` impl, so no endpoint can
//! accidentally answer `200` with an embedded error field. Every write
//! handler appends exactly one audit row, success or failure, before
//! returning — mirroring the transparency-log-on-every-issuance pattern
//! this codebase already uses, generalized to also cover rejections.

use crate::domain::*;
use crate::error::{KredoError, KredoResult};
use crate::evidence;
use crate::signature::verify_payload;
use crate::store::AttestationFilter;
use crate::taxonomy::is_valid_identifier;
use crate::trust::TrustAnalysis;
use crate::AppState;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/register/update", post(register_update))
        .route("/agents", get(list_agents))
        .route("/agents/{pubkey}", get(get_agent))
        .route("/agents/{pubkey}/profile", get(get_profile))
        .route("/attestations", post(create_attestation))
        .route("/attestations/{id}", get(get_attestation))
        .route("/verify", post(verify_signature))
        .route("/search", get(search))
        .route("/trust/who-attested/{pubkey}", get(who_attested))
        .route("/trust/attested-by/{pubkey}", get(attested_by))
        .route("/trust/analysis/{pubkey}", get(trust_analysis))
        .route("/trust/rings", get(trust_rings))
        .route("/trust/network-health", get(network_health))
        .route("/revoke", post(revoke_attestation))
        .route("/dispute", post(create_dispute))
        .route("/ownership/claim", post(ownership_claim))
        .route("/ownership/confirm", post(ownership_confirm))
        .route("/ownership/revoke", post(ownership_revoke))
        .route("/ownership/agent/{pubkey}", get(ownership_for_agent))
        .route("/integrity/baseline/set", post(integrity_set_baseline))
        .route("/integrity/check", post(integrity_check))
        .route("/integrity/status/{pubkey}", get(integrity_status))
        .route("/taxonomy", get(list_taxonomy))
        .route("/taxonomy/{domain}", get(get_taxonomy_domain))
        .route("/taxonomy/domains", post(create_taxonomy_domain))
        .route("/taxonomy/domains/{domain}", delete(delete_taxonomy_domain))
        .route("/taxonomy/{domain}/skills", post(create_taxonomy_skill))
        .route("/taxonomy/{domain}/skills/{skill}", delete(delete_taxonomy_skill))
        .route("/risk/source-anomalies", get(source_anomalies))
        .with_state(state)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn rate_limit(state: &AppState, class: &str, key: &str) -> KredoResult<()> {
    state
        .rate_limiter
        .check(class, key)
        .map_err(|e| KredoError::RateLimited { retry_after_seconds: e.retry_after_seconds })
}

fn parse_pubkey(raw: &str) -> KredoResult<PubKey> {
    PubKey::parse(raw).map_err(KredoError::from)
}

// ─── Health ────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

// ─── Registration ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    pubkey: String,
    name: String,
    #[serde(rename = "type")]
    identity_type: IdentityType,
}

/// Unsigned: rate-limited by source IP (not pubkey, which anyone could claim
/// to be anyone), and never overwrites an existing registration — see
/// `Store::register_identity_unsigned`.
async fn register(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> KredoResult<impl IntoResponse> {
    rate_limit(&state, "register", &addr.ip().to_string())?;
    let pubkey = parse_pubkey(&req.pubkey)?;
    let now = now_rfc3339();
    match state.store.register_identity_unsigned(&pubkey, &req.name, req.identity_type, &now) {
        Ok(identity) => {
            state.store.audit(&now, "register", AuditOutcome::Success, Some(&pubkey), serde_json::json!({}))?;
            Ok((axum::http::StatusCode::CREATED, Json(identity)))
        }
        Err(crate::store::StoreError::Conflict(_)) => {
            state.store.audit(&now, "register", AuditOutcome::Failure, Some(&pubkey), serde_json::json!({"reason": "already_registered"}))?;
            Err(KredoError::Conflict(format!("identity {pubkey} is already registered")))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterUpdateRequest {
    pubkey: String,
    name: String,
    signature: String,
}

async fn register_update(State(state): State<Arc<AppState>>, Json(req): Json<RegisterUpdateRequest>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&req.pubkey)?;
    let signature = Signature::parse(&req.signature)?;
    rate_limit(&state, "write", pubkey.as_str())?;

    let existing = state.store.get_identity(&pubkey)?.ok_or_else(|| KredoError::NotFound(format!("identity {pubkey} not found")))?;
    let payload = serde_json::json!({"action": "register_update", "pubkey": pubkey, "name": req.name, "type": existing.identity_type});
    verify_payload(&payload, &signature, &pubkey)?;

    let now = now_rfc3339();
    let identity = state.store.register_identity_signed(&pubkey, &req.name, existing.identity_type, &now)?;
    state.store.audit(&now, "register_update", AuditOutcome::Success, Some(&pubkey), serde_json::json!({}))?;
    Ok(Json(identity))
}

// ─── Agents ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    limit: Option<i64>,
}

async fn list_agents(State(state): State<Arc<AppState>>, Query(q): Query<SearchQuery>) -> KredoResult<impl IntoResponse> {
    let results = state.store.search_identities(q.q.as_deref().unwrap_or(""), q.limit.unwrap_or(50))?;
    Ok(Json(results))
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let identity = state.store.get_identity(&pubkey)?.ok_or_else(|| KredoError::NotFound(format!("identity {pubkey} not found")))?;
    Ok(Json(identity))
}

async fn get_profile(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let profile = state.profiles.assemble(&pubkey)?;
    Ok(Json(profile))
}

// ─── Attestations ────────────────────────────────────────────────────────────

async fn create_attestation(State(state): State<Arc<AppState>>, Json(mut attestation): Json<Attestation>) -> KredoResult<impl IntoResponse> {
    rate_limit(&state, "write", attestation.attestor.pubkey.as_str())?;
    let now = now_rfc3339();

    if let Err(e) = verify_payload(&attestation.signable_fields(), &attestation.signature, &attestation.attestor.pubkey) {
        state.store.audit(&now, "attestation.create", AuditOutcome::Failure, Some(&attestation.attestor.pubkey), serde_json::json!({"reason": "signature_invalid"}))?;
        return Err(e.into());
    }

    if !state.taxonomy.is_known_skill(&attestation.skill.domain, &attestation.skill.specific) {
        state.store.audit(&now, "attestation.create", AuditOutcome::Failure, Some(&attestation.attestor.pubkey), serde_json::json!({"reason": "unknown_skill"}))?;
        return Err(KredoError::ValidationError(format!("unknown skill {}/{}", attestation.skill.domain, attestation.skill.specific)));
    }

    let scored = evidence::score(&attestation.evidence, &attestation.skill, chrono::Utc::now());
    if attestation.attestation_type == AttestationType::BehavioralWarning && scored.composite < evidence::BEHAVIORAL_WARNING_MIN_COMPOSITE {
        state.store.audit(&now, "attestation.create", AuditOutcome::Failure, Some(&attestation.attestor.pubkey), serde_json::json!({"reason": "evidence_insufficient"}))?;
        return Err(KredoError::EvidenceInsufficient(format!(
            "behavioral_warning evidence composite {:.2} is below the minimum {:.2}",
            scored.composite,
            evidence::BEHAVIORAL_WARNING_MIN_COMPOSITE
        )));
    }
    attestation.evidence_score = Some(scored);
    attestation.revoked_at = None;
    attestation.revoker_pubkey = None;

    state.store.insert_attestation(&attestation, &now)?;
    Ok((axum::http::StatusCode::CREATED, Json(attestation)))
}

async fn get_attestation(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> KredoResult<impl IntoResponse> {
    let attestation = state.store.get_attestation(&id)?.ok_or_else(|| KredoError::NotFound(format!("attestation {id} not found")))?;
    Ok(Json(attestation))
}

// ─── Ad hoc verification ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    payload: serde_json::Value,
    signature: String,
    pubkey: String,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn verify_signature(Json(req): Json<VerifyRequest>) -> impl IntoResponse {
    let result = (|| -> Result<(), String> {
        let pubkey = PubKey::parse(&req.pubkey).map_err(|e| e.to_string())?;
        let signature = Signature::parse(&req.signature).map_err(|e| e.to_string())?;
        verify_payload(&req.payload, &signature, &pubkey).map_err(|e| e.reason().to_string())
    })();

    match result {
        Ok(()) => Json(VerifyResponse { ok: true, reason: None }),
        Err(reason) => Json(VerifyResponse { ok: false, reason: Some(reason) }),
    }
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AttestationSearchQuery {
    subject: Option<String>,
    attestor: Option<String>,
    domain: Option<String>,
    skill: Option<String>,
    #[serde(rename = "type")]
    attestation_type: Option<AttestationType>,
    min_proficiency: Option<u8>,
    #[serde(default)]
    include_revoked: bool,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn search(State(state): State<Arc<AppState>>, Query(q): Query<AttestationSearchQuery>) -> KredoResult<impl IntoResponse> {
    let filter = AttestationFilter {
        subject: q.subject.as_deref().map(parse_pubkey).transpose()?,
        attestor: q.attestor.as_deref().map(parse_pubkey).transpose()?,
        domain: q.domain,
        skill: q.skill,
        attestation_type: q.attestation_type,
        min_proficiency: q.min_proficiency,
        include_revoked: q.include_revoked,
    };
    let page = state.store.search_attestations(&filter, q.limit.unwrap_or(20), q.offset.unwrap_or(0))?;
    Ok(Json(page))
}

// ─── Trust ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
}

async fn who_attested(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>, Query(q): Query<PageQuery>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let page = state.store.list_attestations_for_subject(&pubkey, None, q.limit.unwrap_or(50))?;
    Ok(Json(page.items))
}

async fn attested_by(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>, Query(q): Query<PageQuery>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let page = state.store.list_attestations_for_attestor(&pubkey, None, q.limit.unwrap_or(50))?;
    Ok(Json(page.items))
}

async fn trust_analysis(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let analysis: TrustAnalysis = state.trust.analyze(&pubkey, chrono::Utc::now())?;
    Ok(Json(analysis))
}

async fn trust_rings(State(state): State<Arc<AppState>>) -> KredoResult<impl IntoResponse> {
    Ok(Json(state.trust.rings()?))
}

#[derive(Debug, Serialize)]
struct NetworkHealthResponse {
    identity_count: i64,
    attestation_count: usize,
    mutual_pair_count: usize,
    ring_count: usize,
    average_reputation: f64,
}

async fn network_health(State(state): State<Arc<AppState>>) -> KredoResult<impl IntoResponse> {
    let h = state.trust.network_health()?;
    Ok(Json(NetworkHealthResponse {
        identity_count: h.identity_count,
        attestation_count: h.attestation_count,
        mutual_pair_count: h.mutual_pair_count,
        ring_count: h.ring_count,
        average_reputation: h.average_reputation,
    }))
}

// ─── Revocation & dispute ────────────────────────────────────────────────────

async fn revoke_attestation(State(state): State<Arc<AppState>>, Json(revocation): Json<Revocation>) -> KredoResult<impl IntoResponse> {
    rate_limit(&state, "write", revocation.revoker.pubkey.as_str())?;
    let now = now_rfc3339();
    verify_payload(&revocation.signable_fields(), &revocation.signature, &revocation.revoker.pubkey)?;

    let attestation = state
        .store
        .get_attestation(&revocation.attestation_id)?
        .ok_or_else(|| KredoError::NotFound(format!("attestation {} not found", revocation.attestation_id)))?;
    if revocation.revoker.pubkey != attestation.attestor.pubkey {
        state.store.audit(&now, "attestation.revoke", AuditOutcome::Failure, Some(&revocation.revoker.pubkey), serde_json::json!({"reason": "not_original_attestor"}))?;
        return Err(KredoError::PermissionError("only the original attestor may revoke an attestation".into()));
    }

    state.store.revoke_attestation(&revocation, &now)?;
    Ok(Json(revocation))
}

async fn create_dispute(State(state): State<Arc<AppState>>, Json(dispute): Json<Dispute>) -> KredoResult<impl IntoResponse> {
    rate_limit(&state, "write", dispute.disputor.pubkey.as_str())?;
    let now = now_rfc3339();
    verify_payload(&dispute.signable_fields(), &dispute.signature, &dispute.disputor.pubkey)?;

    let warning = state
        .store
        .get_attestation(&dispute.warning_id)?
        .ok_or_else(|| KredoError::NotFound(format!("attestation {} not found", dispute.warning_id)))?;
    if dispute.disputor.pubkey != warning.subject.pubkey {
        state.store.audit(&now, "dispute.create", AuditOutcome::Failure, Some(&dispute.disputor.pubkey), serde_json::json!({"reason": "not_warning_subject"}))?;
        return Err(KredoError::PermissionError("only the warned subject may dispute a behavioral_warning".into()));
    }

    state.store.insert_dispute(&dispute, &now)?;
    Ok((axum::http::StatusCode::CREATED, Json(dispute)))
}

// ─── Ownership ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OwnershipClaimRequest {
    claim_id: String,
    agent_pubkey: String,
    human_pubkey: String,
    claim_signature: String,
}

async fn ownership_claim(State(state): State<Arc<AppState>>, Json(req): Json<OwnershipClaimRequest>) -> KredoResult<impl IntoResponse> {
    let agent_pubkey = parse_pubkey(&req.agent_pubkey)?;
    let human_pubkey = parse_pubkey(&req.human_pubkey)?;
    let claim_signature = Signature::parse(&req.claim_signature)?;
    rate_limit(&state, "ownership", agent_pubkey.as_str())?;

    let payload = ownership_claim_payload(&req.claim_id, &agent_pubkey, &human_pubkey);
    verify_payload(&payload, &claim_signature, &agent_pubkey)?;

    let now = now_rfc3339();
    let claim = OwnershipClaim {
        claim_id: req.claim_id,
        agent_pubkey,
        human_pubkey,
        claim_signature,
        confirm_signature: None,
        claimed_at: now,
        confirmed_at: None,
        revoked_at: None,
        revoker: None,
        revoke_reason: None,
        state: OwnershipState::Pending,
    };
    state.store.insert_ownership_claim(&claim)?;
    Ok((axum::http::StatusCode::CREATED, Json(claim)))
}

#[derive(Debug, Deserialize)]
struct OwnershipConfirmRequest {
    claim_id: String,
    confirm_signature: String,
}

async fn ownership_confirm(State(state): State<Arc<AppState>>, Json(req): Json<OwnershipConfirmRequest>) -> KredoResult<impl IntoResponse> {
    let confirm_signature = Signature::parse(&req.confirm_signature)?;
    let claim = state.store.get_ownership_claim(&req.claim_id)?.ok_or_else(|| KredoError::NotFound(format!("ownership claim {} not found", req.claim_id)))?;

    let payload = ownership_confirm_payload(&req.claim_id, &claim.agent_pubkey, &claim.human_pubkey);
    verify_payload(&payload, &confirm_signature, &claim.human_pubkey)?;

    let now = now_rfc3339();
    let confirmed = state.store.confirm_ownership_claim(&req.claim_id, &confirm_signature, &now)?;
    Ok(Json(confirmed))
}

#[derive(Debug, Deserialize)]
struct OwnershipRevokeRequest {
    claim_id: String,
    revoker_pubkey: String,
    reason: String,
    signature: String,
}

async fn ownership_revoke(State(state): State<Arc<AppState>>, Json(req): Json<OwnershipRevokeRequest>) -> KredoResult<impl IntoResponse> {
    let revoker = parse_pubkey(&req.revoker_pubkey)?;
    let signature = Signature::parse(&req.signature)?;
    let claim = state.store.get_ownership_claim(&req.claim_id)?.ok_or_else(|| KredoError::NotFound(format!("ownership claim {} not found", req.claim_id)))?;

    if revoker != claim.agent_pubkey && revoker != claim.human_pubkey {
        return Err(KredoError::PermissionError("only the agent or the claiming human may revoke ownership".into()));
    }
    let payload = ownership_revoke_payload(&req.claim_id, &claim.agent_pubkey, &claim.human_pubkey, &revoker, &req.reason);
    verify_payload(&payload, &signature, &revoker)?;

    let now = now_rfc3339();
    let revoked = state.store.revoke_ownership_claim(&req.claim_id, &revoker, &req.reason, &now)?;
    Ok(Json(revoked))
}

async fn ownership_for_agent(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    Ok(Json(state.store.list_ownership_claims_for_agent(&pubkey)?))
}

// ─── Integrity ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IntegrityBaselineRequest {
    baseline_id: String,
    agent_pubkey: String,
    owner_pubkey: String,
    file_hashes: Vec<FileHash>,
    owner_signature: String,
}

async fn integrity_set_baseline(State(state): State<Arc<AppState>>, Json(req): Json<IntegrityBaselineRequest>) -> KredoResult<impl IntoResponse> {
    let agent_pubkey = parse_pubkey(&req.agent_pubkey)?;
    let owner_pubkey = parse_pubkey(&req.owner_pubkey)?;
    let owner_signature = Signature::parse(&req.owner_signature)?;
    rate_limit(&state, "integrity", agent_pubkey.as_str())?;

    let active_claim = state
        .store
        .list_ownership_claims_for_agent(&agent_pubkey)?
        .into_iter()
        .find(|c| c.state == OwnershipState::Active && c.human_pubkey == owner_pubkey);
    if active_claim.is_none() {
        return Err(KredoError::PermissionError(format!("{owner_pubkey} does not hold an active ownership claim on {agent_pubkey}")));
    }

    let payload = integrity_set_baseline_payload(&req.baseline_id, &agent_pubkey, &owner_pubkey, &req.file_hashes);
    verify_payload(&payload, &owner_signature, &owner_pubkey)?;

    let baseline = IntegrityBaseline {
        baseline_id: req.baseline_id,
        agent_pubkey,
        owner_pubkey,
        file_hashes: req.file_hashes,
        owner_signature,
        set_at: now_rfc3339(),
        status: BaselineStatus::Active,
    };
    state.store.set_integrity_baseline(&baseline)?;
    Ok((axum::http::StatusCode::CREATED, Json(baseline)))
}

#[derive(Debug, Deserialize)]
struct IntegrityCheckRequest {
    agent_pubkey: String,
    file_hashes: Vec<FileHash>,
    agent_signature: String,
}

const INTEGRITY_RED_THRESHOLD: usize = 1;

async fn integrity_check(State(state): State<Arc<AppState>>, Json(req): Json<IntegrityCheckRequest>) -> KredoResult<impl IntoResponse> {
    let agent_pubkey = parse_pubkey(&req.agent_pubkey)?;
    let agent_signature = Signature::parse(&req.agent_signature)?;
    rate_limit(&state, "integrity", agent_pubkey.as_str())?;

    let payload = integrity_check_payload(&agent_pubkey, &req.file_hashes);
    verify_payload(&payload, &agent_signature, &agent_pubkey)?;

    let baseline = state.store.get_active_baseline(&agent_pubkey)?.ok_or_else(|| KredoError::NotFound(format!("no active integrity baseline for {agent_pubkey}")))?;

    let mut baseline_map: std::collections::HashMap<&str, &str> = baseline.file_hashes.iter().map(|f| (f.path.as_str(), f.sha256.as_str())).collect();
    let mut added = Vec::new();
    let mut changed = Vec::new();
    for f in &req.file_hashes {
        match baseline_map.remove(f.path.as_str()) {
            Some(expected) if expected == f.sha256 => {}
            Some(_) => changed.push(f.path.clone()),
            None => added.push(f.path.clone()),
        }
    }
    let removed: Vec<String> = baseline_map.keys().map(|s| s.to_string()).collect();

    let changed_or_removed = changed.len() + removed.len();
    let status = if changed_or_removed >= INTEGRITY_RED_THRESHOLD {
        TrafficLight::Red
    } else if !added.is_empty() {
        TrafficLight::Yellow
    } else {
        TrafficLight::Green
    };

    let check = IntegrityCheck {
        check_id: uuid::Uuid::new_v4().to_string(),
        agent_pubkey,
        file_hashes: req.file_hashes,
        agent_signature,
        checked_at: now_rfc3339(),
        result: IntegrityResult { status, diff: IntegrityDiff { added, removed, changed } },
    };
    state.store.record_integrity_check(&check)?;
    Ok(Json(check))
}

async fn integrity_status(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&pubkey)?;
    let checks = state.store.list_integrity_checks(&pubkey, 1)?;
    match checks.into_iter().next() {
        Some(check) => Ok(Json(check.result)),
        None => Err(KredoError::NotFound(format!("no integrity checks recorded for {pubkey}"))),
    }
}

// ─── Taxonomy ────────────────────────────────────────────────────────────────

async fn list_taxonomy(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json((*state.taxonomy.snapshot()).clone())
}

async fn get_taxonomy_domain(State(state): State<Arc<AppState>>, Path(domain): Path<String>) -> KredoResult<impl IntoResponse> {
    if !is_valid_identifier(&domain) {
        return Err(KredoError::ValidationError("domain id must match ^[a-z0-9]+(-[a-z0-9]+)*$".into()));
    }
    state.taxonomy.domain(&domain).map(Json).ok_or_else(|| KredoError::NotFound(format!("taxonomy domain {domain} not found")))
}

#[derive(Debug, Deserialize)]
struct CreateTaxonomyDomainRequest {
    domain_id: String,
    label: String,
    pubkey: String,
    signature: String,
}

async fn create_taxonomy_domain(State(state): State<Arc<AppState>>, Json(req): Json<CreateTaxonomyDomainRequest>) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&req.pubkey)?;
    let signature = Signature::parse(&req.signature)?;
    rate_limit(&state, "taxonomy", pubkey.as_str())?;

    let payload = serde_json::json!({"action": "create_domain", "domain_id": req.domain_id, "label": req.label, "pubkey": pubkey});
    verify_payload(&payload, &signature, &pubkey)?;

    state.taxonomy.add_domain(&req.domain_id, &req.label)?;
    let now = now_rfc3339();
    state.store.audit(&now, "taxonomy.create_domain", AuditOutcome::Success, Some(&pubkey), serde_json::json!({"domain_id": req.domain_id}))?;
    Ok(axum::http::StatusCode::CREATED)
}

async fn delete_taxonomy_domain(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
    Query(q): Query<SignedDeleteQuery>,
) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&q.pubkey)?;
    let signature = Signature::parse(&q.signature)?;
    rate_limit(&state, "taxonomy", pubkey.as_str())?;

    let payload = serde_json::json!({"action": "delete_domain", "domain_id": domain, "pubkey": pubkey});
    verify_payload(&payload, &signature, &pubkey)?;

    state.taxonomy.remove_domain(&domain)?;
    let now = now_rfc3339();
    state.store.audit(&now, "taxonomy.delete_domain", AuditOutcome::Success, Some(&pubkey), serde_json::json!({"domain_id": domain}))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateTaxonomySkillRequest {
    skill_id: String,
    label: String,
    pubkey: String,
    signature: String,
}

async fn create_taxonomy_skill(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
    Json(req): Json<CreateTaxonomySkillRequest>,
) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&req.pubkey)?;
    let signature = Signature::parse(&req.signature)?;
    rate_limit(&state, "taxonomy", pubkey.as_str())?;

    let payload = serde_json::json!({"action": "create_skill", "domain_id": domain, "skill_id": req.skill_id, "label": req.label, "pubkey": pubkey});
    verify_payload(&payload, &signature, &pubkey)?;

    state.taxonomy.add_skill(&domain, &req.skill_id, &req.label)?;
    let now = now_rfc3339();
    state.store.audit(&now, "taxonomy.create_skill", AuditOutcome::Success, Some(&pubkey), serde_json::json!({"domain_id": domain, "skill_id": req.skill_id}))?;
    Ok(axum::http::StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct SignedDeleteQuery {
    pubkey: String,
    signature: String,
}

async fn delete_taxonomy_skill(
    State(state): State<Arc<AppState>>,
    Path((domain, skill)): Path<(String, String)>,
    Query(q): Query<SignedDeleteQuery>,
) -> KredoResult<impl IntoResponse> {
    let pubkey = parse_pubkey(&q.pubkey)?;
    let signature = Signature::parse(&q.signature)?;
    rate_limit(&state, "taxonomy", pubkey.as_str())?;

    let payload = serde_json::json!({"action": "delete_skill", "domain_id": domain, "skill_id": skill, "pubkey": pubkey});
    verify_payload(&payload, &signature, &pubkey)?;

    state.taxonomy.remove_skill(&domain, &skill)?;
    let now = now_rfc3339();
    state.store.audit(&now, "taxonomy.delete_skill", AuditOutcome::Success, Some(&pubkey), serde_json::json!({"domain_id": domain, "skill_id": skill}))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ─── Risk ────────────────────────────────────────────────────────────────────

const ANOMALY_FAILURE_THRESHOLD: usize = 5;

#[derive(Debug, Serialize)]
struct SourceAnomaly {
    actor_pubkey: Option<PubKey>,
    failure_count: usize,
}

async fn source_anomalies(State(state): State<Arc<AppState>>) -> KredoResult<impl IntoResponse> {
    let events = state.store.list_audit(None, 200)?;
    let mut by_actor: std::collections::HashMap<Option<PubKey>, usize> = std::collections::HashMap::new();
    for e in events.into_iter().filter(|e| e.outcome == AuditOutcome::Failure) {
        *by_actor.entry(e.actor_pubkey).or_insert(0) += 1;
    }
    let anomalies: Vec<SourceAnomaly> = by_actor
        .into_iter()
        .filter(|(_, count)| *count >= ANOMALY_FAILURE_THRESHOLD)
        .map(|(actor_pubkey, failure_count)| SourceAnomaly { actor_pubkey, failure_count })
        .collect();
    Ok(Json(anomalies))
}
