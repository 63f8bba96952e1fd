//! End-to-end HTTP tests driving the full router in-process against a
//! tempfile-backed sqlite database.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use ed25519_dalek::{Signer, SigningKey};
use http::{Request, StatusCode};
use kredo_server::codec::canonical;
use kredo_server::config::ServerConfig;
use kredo_server::domain::{
    integrity_check_payload, integrity_set_baseline_payload, ownership_claim_payload,
    ownership_confirm_payload, PubKey, Signature,
};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

fn keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

fn pubkey_of(k: &SigningKey) -> PubKey {
    PubKey::parse(&format!("ed25519:{}", hex::encode(k.verifying_key().to_bytes()))).unwrap()
}

fn sign_payload<T: Serialize>(k: &SigningKey, payload: &T) -> Signature {
    let bytes = canonical(payload).unwrap();
    let sig = k.sign(&bytes);
    Signature::parse(&format!("ed25519:{}", hex::encode(sig.to_bytes()))).unwrap()
}

fn test_app(rate_limits_json: &str) -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kredo.db").to_string_lossy().into_owned();
    let config = ServerConfig {
        db_path,
        bind_addr: "127.0.0.1:0".into(),
        cors_allow_origins: String::new(),
        trust_cache_ttl_seconds: 300,
        rate_limits_json: rate_limits_json.to_string(),
        max_body_bytes: 1 << 20,
    };
    let state = kredo_server::build_state(&config).unwrap();
    let router = kredo_server::build_router(state, &config);
    (router, dir)
}

/// Every call carries a fixed fake peer address in its `ConnectInfo`
/// extension, mirroring what `into_make_service_with_connect_info` would
/// attach for a real connection — the unsigned `/register` rate limit is
/// keyed by it.
async fn call_from(router: &Router, method: &str, uri: &str, body: Option<Value>, peer: &str) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call_from(router, method, uri, body, "127.0.0.1:9000").await
}

/// The real per-class rate limits (1 request / 60s) are part of the §4.9
/// contract, not something tests should route around by varying keys — but
/// several lifecycle tests legitimately issue more than one write under the
/// same class and key (e.g. set a baseline then check it). Those tests
/// loosen the ceiling instead of asserting on rate-limiting they aren't
/// exercising.
const GENEROUS_LIMITS: &str = r#"{"register":{"window_seconds":60,"max_requests":100},"write":{"window_seconds":60,"max_requests":100},"ownership":{"window_seconds":60,"max_requests":100},"integrity":{"window_seconds":60,"max_requests":100},"taxonomy":{"window_seconds":60,"max_requests":100}}"#;

fn attestation_body(
    subject: &PubKey,
    attestor_key: &SigningKey,
    attestor: &PubKey,
    attestation_type: &str,
    domain: &str,
    specific: &str,
    context: &str,
    outcome: &str,
) -> Value {
    let id = uuid::Uuid::new_v4();
    let signable = json!({
        "id": id,
        "kredo": "1.0",
        "type": attestation_type,
        "subject": {"pubkey": subject, "name": "subject"},
        "attestor": {"pubkey": attestor, "name": "attestor", "type": "agent"},
        "skill": {"domain": domain, "specific": specific, "proficiency": 4},
        "evidence": {
            "context": context,
            "artifacts": ["https://example.com/pr/1"],
            "outcome": outcome,
            "interaction_date": chrono::Utc::now().to_rfc3339(),
        },
        "issued": chrono::Utc::now().to_rfc3339(),
        "expires": (chrono::Utc::now() + chrono::Duration::days(365)).to_rfc3339(),
    });
    let signature = sign_payload(attestor_key, &signable);
    let mut body = signable;
    body["signature"] = json!(signature.as_str());
    body
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (router, _dir) = test_app("");
    let (status, body) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_and_fetch_identity() {
    let (router, _dir) = test_app("");
    let key = keypair();
    let pubkey = pubkey_of(&key);
    let (status, _) = call(&router, "POST", "/register", Some(json!({"pubkey": pubkey, "name": "agent-one", "type": "agent"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&router, "GET", &format!("/agents/{pubkey}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "agent-one");
}

#[tokio::test]
async fn unsigned_reregistration_does_not_overwrite_name() {
    let (router, _dir) = test_app(GENEROUS_LIMITS);
    let key = keypair();
    let pubkey = pubkey_of(&key);
    let (status, _) = call(&router, "POST", "/register", Some(json!({"pubkey": pubkey, "name": "original", "type": "agent"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = call(&router, "POST", "/register", Some(json!({"pubkey": pubkey, "name": "hijacked", "type": "agent"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");

    let (_, body) = call(&router, "GET", &format!("/agents/{pubkey}"), None).await;
    assert_eq!(body["name"], "original");
}

#[tokio::test]
async fn attestation_lifecycle_profile_and_revoke() {
    let (router, _dir) = test_app(GENEROUS_LIMITS);
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject_key = keypair();
    let subject = pubkey_of(&subject_key);

    let body = attestation_body(
        &subject,
        &attestor_key,
        &attestor,
        "skill_attestation",
        "code",
        "rust",
        "Paired with them for a week reviewing a large async rust refactor in detail.",
        "The refactor merged cleanly and the rust code review caught two real bugs.",
    );
    let (status, created) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let attestation_id = created["id"].as_str().unwrap().to_string();

    let (status, profile) = call(&router, "GET", &format!("/agents/{subject}/profile"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["attestation_count"]["total"], 1);
    assert!(profile["trust_analysis"]["reputation_score"].as_f64().unwrap() > 0.0);

    let revocation_id = uuid::Uuid::new_v4();
    let attestation_uuid = uuid::Uuid::parse_str(&attestation_id).unwrap();
    let signable = json!({
        "id": revocation_id,
        "attestation_id": attestation_uuid,
        "revoker": {"pubkey": attestor, "name": "attestor"},
        "reason": "issued in error",
        "issued": chrono::Utc::now().to_rfc3339(),
    });
    let signature = sign_payload(&attestor_key, &signable);
    let mut revoke_body = signable;
    revoke_body["signature"] = json!(signature.as_str());

    let (status, _) = call(&router, "POST", "/revoke", Some(revoke_body)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, profile_after) = call(&router, "GET", &format!("/agents/{subject}/profile"), None).await;
    assert_eq!(profile_after["attestation_count"]["total"], 0);
}

#[tokio::test]
async fn only_the_original_attestor_may_revoke() {
    let (router, _dir) = test_app("");
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject_key = keypair();
    let subject = pubkey_of(&subject_key);

    let body = attestation_body(&subject, &attestor_key, &attestor, "skill_attestation", "code", "rust", "Paired reviewing a rust refactor over several sessions.", "The rust refactor shipped and held up in production.");
    let (status, created) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let signable = json!({
        "id": uuid::Uuid::new_v4(),
        "attestation_id": uuid::Uuid::parse_str(created["id"].as_str().unwrap()).unwrap(),
        "revoker": {"pubkey": subject, "name": "subject"},
        "reason": "i don't like it",
        "issued": chrono::Utc::now().to_rfc3339(),
    });
    let signature = sign_payload(&subject_key, &signable);
    let mut revoke_body = signable;
    revoke_body["signature"] = json!(signature.as_str());

    let (status, err) = call(&router, "POST", "/revoke", Some(revoke_body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "permission_error");
}

#[tokio::test]
async fn duplicate_attestation_is_rejected_with_conflict() {
    let (router, _dir) = test_app(GENEROUS_LIMITS);
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject = pubkey_of(&keypair());

    let body = attestation_body(&subject, &attestor_key, &attestor, "skill_attestation", "code", "rust", "Reviewed a substantial rust pull request end to end.", "The rust changes merged without issue.");
    let (status, _) = call(&router, "POST", "/attestations", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let (router, _dir) = test_app("");
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject = pubkey_of(&keypair());

    let mut body = attestation_body(&subject, &attestor_key, &attestor, "skill_attestation", "code", "rust", "Reviewed a substantial rust pull request end to end.", "The rust changes merged without issue.");
    body["skill"]["proficiency"] = json!(5);

    let (status, err) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "signature_invalid");
}

#[tokio::test]
async fn unknown_skill_is_rejected() {
    let (router, _dir) = test_app("");
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject = pubkey_of(&keypair());

    let body = attestation_body(&subject, &attestor_key, &attestor, "skill_attestation", "code", "cobol-mainframe-wizardry", "Watched them write some cobol.", "It ran.");
    let (status, err) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "validation_error");
}

#[tokio::test]
async fn behavioral_warning_requires_strong_evidence() {
    let (router, _dir) = test_app("");
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject = pubkey_of(&keypair());

    let body = attestation_body(&subject, &attestor_key, &attestor, "behavioral_warning", "conduct", "harassment", "bad vibes", "none");
    let (status, err) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "evidence_insufficient");
}

#[tokio::test]
async fn mutual_attestation_triangle_is_flagged_as_a_clique_ring() {
    let (router, _dir) = test_app("");
    let keys: Vec<SigningKey> = (0..3).map(|_| keypair()).collect();
    let pubkeys: Vec<PubKey> = keys.iter().map(pubkey_of).collect();

    for i in 0..3 {
        let j = (i + 1) % 3;
        let body = attestation_body(&pubkeys[j], &keys[i], &pubkeys[i], "skill_attestation", "code", "rust", "Worked closely together reviewing each other's rust modules.", "Both sides shipped working rust code.");
        let (status, _) = call(&router, "POST", "/attestations", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, rings) = call(&router, "GET", "/trust/rings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rings.as_array().unwrap().len(), 1);
    assert_eq!(rings[0]["ring_type"], "clique");
    assert_eq!(rings[0]["members"].as_array().unwrap().len(), 3);

    let (status, health) = call(&router, "GET", "/trust/network-health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["ring_count"], 1);
}

#[tokio::test]
async fn ownership_claim_confirm_and_integrity_flow() {
    let (router, _dir) = test_app(GENEROUS_LIMITS);
    let agent_key = keypair();
    let agent = pubkey_of(&agent_key);
    let human_key = keypair();
    let human = pubkey_of(&human_key);
    let claim_id = "claim-1".to_string();

    let claim_payload = ownership_claim_payload(&claim_id, &agent, &human);
    let claim_signature = sign_payload(&agent_key, &claim_payload);
    let (status, _) = call(
        &router,
        "POST",
        "/ownership/claim",
        Some(json!({
            "claim_id": claim_id,
            "agent_pubkey": agent,
            "human_pubkey": human,
            "claim_signature": claim_signature.as_str(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let confirm_payload = ownership_confirm_payload(&claim_id, &agent, &human);
    let confirm_signature = sign_payload(&human_key, &confirm_payload);
    let (status, confirmed) = call(
        &router,
        "POST",
        "/ownership/confirm",
        Some(json!({"claim_id": claim_id, "confirm_signature": confirm_signature.as_str()})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["state"], "active");

    let file_hashes = json!([{"path": "agent.py", "sha256": "a".repeat(64)}]);
    let baseline_payload = integrity_set_baseline_payload(
        "baseline-1",
        &agent,
        &human,
        &serde_json::from_value::<Vec<_>>(file_hashes.clone()).unwrap(),
    );
    let baseline_signature = sign_payload(&human_key, &baseline_payload);
    let (status, _) = call(
        &router,
        "POST",
        "/integrity/baseline/set",
        Some(json!({
            "baseline_id": "baseline-1",
            "agent_pubkey": agent,
            "owner_pubkey": human,
            "file_hashes": file_hashes,
            "owner_signature": baseline_signature.as_str(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let changed_hashes = json!([{"path": "agent.py", "sha256": "b".repeat(64)}]);
    let check_payload = integrity_check_payload(&agent, &serde_json::from_value::<Vec<_>>(changed_hashes.clone()).unwrap());
    let check_signature = sign_payload(&agent_key, &check_payload);
    let (status, check) = call(
        &router,
        "POST",
        "/integrity/check",
        Some(json!({
            "agent_pubkey": agent,
            "file_hashes": changed_hashes,
            "agent_signature": check_signature.as_str(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["result"]["status"], "red");

    let (status, status_body) = call(&router, "GET", &format!("/integrity/status/{agent}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_body["status"], "red");

    let (_, profile) = call(&router, "GET", &format!("/agents/{agent}/profile"), None).await;
    assert_eq!(profile["accountability"]["tier"], "human-linked");
    assert_eq!(profile["integrity"]["traffic_light"], "red");
    assert_eq!(profile["deployability_multiplier"], 0.0);
}

#[tokio::test]
async fn integrity_baseline_requires_an_active_owner() {
    let (router, _dir) = test_app("");
    let agent_key = keypair();
    let agent = pubkey_of(&agent_key);
    let stranger_key = keypair();
    let stranger = pubkey_of(&stranger_key);

    let file_hashes = json!([{"path": "agent.py", "sha256": "a".repeat(64)}]);
    let baseline_payload = integrity_set_baseline_payload(
        "baseline-1",
        &agent,
        &stranger,
        &serde_json::from_value::<Vec<_>>(file_hashes.clone()).unwrap(),
    );
    let baseline_signature = sign_payload(&stranger_key, &baseline_payload);
    let (status, err) = call(
        &router,
        "POST",
        "/integrity/baseline/set",
        Some(json!({
            "baseline_id": "baseline-1",
            "agent_pubkey": agent,
            "owner_pubkey": stranger,
            "file_hashes": file_hashes,
            "owner_signature": baseline_signature.as_str(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "permission_error");
}

#[tokio::test]
async fn taxonomy_endpoints_serve_seeded_domains() {
    let (router, _dir) = test_app("");
    let (status, domains) = call(&router, "GET", "/taxonomy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(domains.as_array().unwrap().len(), 7);
    let total_skills: usize = domains.as_array().unwrap().iter().map(|d| d["skills"].as_array().unwrap().len()).sum();
    assert_eq!(total_skills, 54);

    let (status, code) = call(&router, "GET", "/taxonomy/code", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(code["skills"].as_array().unwrap().iter().any(|s| s["id"] == "rust"));

    let (status, _) = call(&router, "GET", "/taxonomy/not-a-domain", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_filters_by_domain_and_skill_at_the_store_layer() {
    let (router, _dir) = test_app("");
    let attestor_key = keypair();
    let attestor = pubkey_of(&attestor_key);
    let subject = pubkey_of(&keypair());

    let body = attestation_body(&subject, &attestor_key, &attestor, "skill_attestation", "code", "rust", "Reviewed a substantial rust pull request end to end.", "The rust changes merged without issue.");
    let (status, _) = call(&router, "POST", "/attestations", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, results) = call(&router, "GET", &format!("/search?subject={subject}&domain=code&skill=rust"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["items"].as_array().unwrap().len(), 1);

    let (status, empty) = call(&router, "GET", &format!("/search?subject={subject}&domain=code&skill=python"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn register_rate_limit_is_keyed_by_source_ip_not_pubkey() {
    let (router, _dir) = test_app("");
    let a = pubkey_of(&keypair());
    let b = pubkey_of(&keypair());

    let (status, _) = call_from(&router, "POST", "/register", Some(json!({"pubkey": a, "name": "one", "type": "agent"})), "10.0.0.1:1").await;
    assert_eq!(status, StatusCode::CREATED);

    // Same source IP, different pubkey: still rate-limited because the
    // unsigned endpoint is keyed by source IP.
    let (status, err) = call_from(&router, "POST", "/register", Some(json!({"pubkey": b, "name": "two", "type": "agent"})), "10.0.0.1:1").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(err["error"], "rate_limited");

    // Different source IP: unaffected.
    let (status, _) = call_from(&router, "POST", "/register", Some(json!({"pubkey": b, "name": "two", "type": "agent"})), "10.0.0.2:1").await;
    assert_eq!(status, StatusCode::CREATED);
}
