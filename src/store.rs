//! SQLite-backed persistence for every Kredo document type.
//!
//! A single `Mutex<Connection>` serializes all writes, mirroring the
//! unpooled-connection approach the rest of this codebase uses — Kredo's
//! write volume does not justify a connection pool, and a single mutex
//! keeps the uniqueness-check-then-insert-then-audit sequence trivially
//! atomic without needing `BEGIN IMMEDIATE` gymnastics across connections.

use crate::domain::*;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

type InvalidationHook = Box<dyn Fn(&[PubKey]) + Send + Sync>;

pub struct Store {
    db: Mutex<Connection>,
    invalidation_hooks: RwLock<Vec<InvalidationHook>>,
}

/// A page of results plus whether more rows exist beyond it.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Filters for [`Store::search_attestations`], all pushed into the `WHERE`
/// clause at the store layer — no in-memory scan of the full table.
#[derive(Debug, Default)]
pub struct AttestationFilter {
    pub subject: Option<PubKey>,
    pub attestor: Option<PubKey>,
    pub domain: Option<String>,
    pub skill: Option<String>,
    pub attestation_type: Option<AttestationType>,
    pub min_proficiency: Option<u8>,
    pub include_revoked: bool,
}

const MAX_PAGE_SIZE: i64 = 200;
const MAX_WRITE_RETRIES: u32 = 3;

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Store {
            db: Mutex::new(conn),
            invalidation_hooks: RwLock::new(Vec::new()),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            db: Mutex::new(conn),
            invalidation_hooks: RwLock::new(Vec::new()),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Register a callback invoked with the set of pubkeys whose reputation
    /// may have changed after a write. The trust engine uses this to evict
    /// its cache instead of polling.
    pub fn on_write(&self, hook: InvalidationHook) {
        self.invalidation_hooks.write().push(hook);
    }

    fn notify(&self, affected: &[PubKey]) {
        for hook in self.invalidation_hooks.read().iter() {
            hook(affected);
        }
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS identities (
                pubkey TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attestations (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                subject_pubkey TEXT NOT NULL,
                attestor_pubkey TEXT NOT NULL,
                skill_domain TEXT NOT NULL,
                skill_specific TEXT NOT NULL,
                skill_proficiency INTEGER NOT NULL DEFAULT 1,
                issued TEXT NOT NULL,
                expires TEXT NOT NULL,
                revoked_at TEXT,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attestations_subject ON attestations(subject_pubkey, issued DESC, id);
            CREATE INDEX IF NOT EXISTS idx_attestations_attestor ON attestations(attestor_pubkey, issued DESC, id);
            CREATE INDEX IF NOT EXISTS idx_attestations_skill ON attestations(skill_domain, skill_specific);

            CREATE TABLE IF NOT EXISTS revocations (
                id TEXT PRIMARY KEY,
                attestation_id TEXT NOT NULL,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_revocations_attestation ON revocations(attestation_id);

            CREATE TABLE IF NOT EXISTS disputes (
                id TEXT PRIMARY KEY,
                warning_id TEXT NOT NULL,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_disputes_warning ON disputes(warning_id);

            CREATE TABLE IF NOT EXISTS ownership_claims (
                claim_id TEXT PRIMARY KEY,
                agent_pubkey TEXT NOT NULL,
                human_pubkey TEXT NOT NULL,
                state TEXT NOT NULL,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ownership_agent ON ownership_claims(agent_pubkey);
            CREATE INDEX IF NOT EXISTS idx_ownership_human ON ownership_claims(human_pubkey);

            CREATE TABLE IF NOT EXISTS integrity_baselines (
                baseline_id TEXT PRIMARY KEY,
                agent_pubkey TEXT NOT NULL,
                status TEXT NOT NULL,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_baselines_agent ON integrity_baselines(agent_pubkey, status);

            CREATE TABLE IF NOT EXISTS integrity_checks (
                check_id TEXT PRIMARY KEY,
                agent_pubkey TEXT NOT NULL,
                checked_at TEXT NOT NULL,
                document_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checks_agent ON integrity_checks(agent_pubkey, checked_at DESC);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL,
                actor_pubkey TEXT,
                details_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor_pubkey);
            CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log(id DESC);

            CREATE TABLE IF NOT EXISTS taxonomy_domains (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS taxonomy_skills (
                id TEXT PRIMARY KEY,
                domain_id TEXT NOT NULL REFERENCES taxonomy_domains(id),
                label TEXT NOT NULL
            );

            INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
            ",
        )?;

        // Version 2: `skill_proficiency` lets /search filter by
        // min_proficiency at the store layer. New databases already have the
        // column from the CREATE TABLE above; this guards databases created
        // before it existed.
        let has_column: bool = db
            .prepare("SELECT 1 FROM pragma_table_info('attestations') WHERE name = 'skill_proficiency'")?
            .exists([])?;
        if !has_column {
            db.execute_batch("ALTER TABLE attestations ADD COLUMN skill_proficiency INTEGER NOT NULL DEFAULT 1;")?;
        }
        db.execute("INSERT OR IGNORE INTO schema_migrations (version) VALUES (2)", [])?;
        Ok(())
    }

    /// Run `f` against a locked connection, retrying a bounded number of
    /// times on `SQLITE_BUSY`/`SQLITE_LOCKED` before giving up.
    fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            let db = self.db.lock();
            match f(&db) {
                Ok(v) => return Ok(v),
                Err(StoreError::Database(msg)) if attempt < MAX_WRITE_RETRIES && msg.contains("locked") => {
                    drop(db);
                    attempt += 1;
                    std::thread::sleep(std::time::Duration::from_millis(10 * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ─── Identities ────────────────────────────────────────────────────────

    /// Unsigned registration: anyone may announce a pubkey exists, but an
    /// existing registration's `name`/`type` must never be overwritten by an
    /// unsigned call. If the pubkey is already registered, this returns a
    /// `Conflict` carrying the existing, unchanged record rather than
    /// updating it.
    pub fn register_identity_unsigned(&self, pubkey: &PubKey, name: &str, identity_type: IdentityType, now: &str) -> Result<Identity, StoreError> {
        self.with_retry(|db| {
            let existing = db
                .query_row(
                    "SELECT pubkey, name, type, first_seen, last_seen FROM identities WHERE pubkey = ?1",
                    params![pubkey.as_str()],
                    row_to_identity,
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::Conflict(format!("identity {pubkey} is already registered")));
            }
            db.execute(
                "INSERT INTO identities (pubkey, name, type, first_seen, last_seen) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![pubkey.as_str(), name, serde_json::to_value(identity_type)?.as_str(), now],
            )?;
            Ok(Identity { pubkey: pubkey.clone(), name: name.to_string(), identity_type, first_seen: now.to_string(), last_seen: now.to_string() })
        })
    }

    /// Signed registration update: the caller already verified a signature
    /// authorizing this exact `name`/`type` change, so overwriting is safe.
    pub fn register_identity_signed(&self, pubkey: &PubKey, name: &str, identity_type: IdentityType, now: &str) -> Result<Identity, StoreError> {
        self.with_retry(|db| {
            let existing: Option<String> = db
                .query_row("SELECT first_seen FROM identities WHERE pubkey = ?1", params![pubkey.as_str()], |r| r.get(0))
                .optional()?;
            let first_seen = existing.unwrap_or_else(|| now.to_string());
            db.execute(
                "INSERT INTO identities (pubkey, name, type, first_seen, last_seen) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(pubkey) DO UPDATE SET name = ?2, type = ?3, last_seen = ?5",
                params![pubkey.as_str(), name, serde_json::to_value(identity_type)?.as_str(), first_seen, now],
            )?;
            Ok(Identity {
                pubkey: pubkey.clone(),
                name: name.to_string(),
                identity_type,
                first_seen,
                last_seen: now.to_string(),
            })
        })
    }

    pub fn get_identity(&self, pubkey: &PubKey) -> Result<Option<Identity>, StoreError> {
        let db = self.db.lock();
        db.query_row(
            "SELECT pubkey, name, type, first_seen, last_seen FROM identities WHERE pubkey = ?1",
            params![pubkey.as_str()],
            row_to_identity,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn search_identities(&self, query: &str, limit: i64) -> Result<Vec<Identity>, StoreError> {
        let db = self.db.lock();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = db.prepare(
            "SELECT pubkey, name, type, first_seen, last_seen FROM identities
             WHERE name LIKE ?1 ESCAPE '\\' OR pubkey LIKE ?1 ESCAPE '\\'
             ORDER BY last_seen DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pattern, limit], row_to_identity)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Touch (or lazily create) the identity rows an attestation references,
    /// so every pubkey ever mentioned shows up in `/agents`.
    fn touch_identity(db: &Connection, pubkey: &PubKey, name: &str, identity_type: IdentityType, now: &str) -> Result<(), StoreError> {
        db.execute(
            "INSERT INTO identities (pubkey, name, type, first_seen, last_seen) VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(pubkey) DO UPDATE SET last_seen = ?4",
            params![pubkey.as_str(), name, serde_json::to_value(identity_type)?.as_str(), now],
        )?;
        Ok(())
    }

    // ─── Attestations ──────────────────────────────────────────────────────

    pub fn insert_attestation(&self, attestation: &Attestation, now: &str) -> Result<(), StoreError> {
        let doc_json = serde_json::to_string(attestation)?;
        self.with_retry(|db| {
            let exists: Option<i64> = db
                .query_row("SELECT 1 FROM attestations WHERE id = ?1", params![attestation.id.to_string()], |r| r.get(0))
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Conflict(format!("attestation {} already exists", attestation.id)));
            }
            db.execute(
                "INSERT INTO attestations (id, type, subject_pubkey, attestor_pubkey, skill_domain, skill_specific, skill_proficiency, issued, expires, revoked_at, document_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10)",
                params![
                    attestation.id.to_string(),
                    serde_json::to_value(attestation.attestation_type)?.as_str(),
                    attestation.subject.pubkey.as_str(),
                    attestation.attestor.pubkey.as_str(),
                    attestation.skill.domain,
                    attestation.skill.specific,
                    attestation.skill.proficiency,
                    attestation.issued,
                    attestation.expires,
                    doc_json,
                ],
            )?;
            Self::touch_identity(db, &attestation.subject.pubkey, &attestation.subject.name, IdentityType::Agent, now)?;
            Self::touch_identity(db, &attestation.attestor.pubkey, &attestation.attestor.name, attestation.attestor.identity_type, now)?;
            Self::write_audit(db, now, "attestation.create", AuditOutcome::Success, Some(&attestation.attestor.pubkey), serde_json::json!({"attestation_id": attestation.id}))?;
            Ok(())
        })?;
        self.notify(&[attestation.subject.pubkey.clone(), attestation.attestor.pubkey.clone()]);
        Ok(())
    }

    pub fn get_attestation(&self, id: &uuid::Uuid) -> Result<Option<Attestation>, StoreError> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row("SELECT document_json FROM attestations WHERE id = ?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        Ok(match json {
            Some(j) => Some(serde_json::from_str(&j)?),
            None => None,
        })
    }

    pub fn revoke_attestation(&self, revocation: &Revocation, now: &str) -> Result<(), StoreError> {
        let affected = self.with_retry(|db| {
            let doc_json: Option<String> = db
                .query_row("SELECT document_json FROM attestations WHERE id = ?1", params![revocation.attestation_id.to_string()], |r| r.get(0))
                .optional()?;
            let Some(doc_json) = doc_json else {
                return Err(StoreError::NotFound(format!("attestation {} not found", revocation.attestation_id)));
            };
            let mut attestation: Attestation = serde_json::from_str(&doc_json)?;
            if attestation.revoked_at.is_some() {
                return Err(StoreError::Conflict(format!("attestation {} already revoked", revocation.attestation_id)));
            }
            attestation.revoked_at = Some(now.to_string());
            attestation.revoker_pubkey = Some(revocation.revoker.pubkey.clone());
            let updated_json = serde_json::to_string(&attestation)?;

            db.execute(
                "UPDATE attestations SET revoked_at = ?1, document_json = ?2 WHERE id = ?3",
                params![now, updated_json, revocation.attestation_id.to_string()],
            )?;
            db.execute(
                "INSERT INTO revocations (id, attestation_id, document_json) VALUES (?1, ?2, ?3)",
                params![revocation.id.to_string(), revocation.attestation_id.to_string(), serde_json::to_string(revocation)?],
            )?;
            Self::write_audit(db, now, "attestation.revoke", AuditOutcome::Success, Some(&revocation.revoker.pubkey), serde_json::json!({"attestation_id": revocation.attestation_id}))?;
            Ok([attestation.subject.pubkey, attestation.attestor.pubkey])
        })?;
        self.notify(&affected);
        Ok(())
    }

    pub fn list_attestations_for_subject(&self, pubkey: &PubKey, before: Option<(&str, &str)>, limit: i64) -> Result<Page<Attestation>, StoreError> {
        self.list_attestations_by_column("subject_pubkey", pubkey, before, limit)
    }

    pub fn list_attestations_for_attestor(&self, pubkey: &PubKey, before: Option<(&str, &str)>, limit: i64) -> Result<Page<Attestation>, StoreError> {
        self.list_attestations_by_column("attestor_pubkey", pubkey, before, limit)
    }

    fn list_attestations_by_column(&self, column: &str, pubkey: &PubKey, before: Option<(&str, &str)>, limit: i64) -> Result<Page<Attestation>, StoreError> {
        let db = self.db.lock();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let sql = format!(
            "SELECT document_json, issued, id FROM attestations
             WHERE {column} = ?1 AND (?2 IS NULL OR (issued, id) < (?2, ?3))
             ORDER BY issued DESC, id ASC LIMIT ?4"
        );
        let mut stmt = db.prepare(&sql)?;
        let (cursor_issued, cursor_id) = before.map(|(a, b)| (Some(a), Some(b))).unwrap_or((None, None));
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![pubkey.as_str(), cursor_issued, cursor_id, limit + 1], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        let has_more = rows.len() as i64 > limit;
        let items = rows
            .into_iter()
            .take(limit as usize)
            .filter_map(|(j, _, _)| serde_json::from_str(&j).ok())
            .collect();
        Ok(Page { items, has_more })
    }

    /// All attestations among a set of pubkeys — used by the trust engine's
    /// ring/mutual-pair detection, which needs the induced subgraph rather
    /// than a per-pubkey page.
    pub fn list_attestations_among(&self, pubkeys: &[PubKey]) -> Result<Vec<Attestation>, StoreError> {
        if pubkeys.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock();
        let placeholders = pubkeys.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT document_json FROM attestations WHERE subject_pubkey IN ({placeholders}) AND attestor_pubkey IN ({placeholders})"
        );
        let mut stmt = db.prepare(&sql)?;
        let values: Vec<&str> = pubkeys.iter().chain(pubkeys.iter()).map(|p| p.as_str()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).filter_map(|j| serde_json::from_str(&j).ok()).collect())
    }

    /// Every non-revoked attestation in the system. Used by the trust engine
    /// to build the network-wide mutual-attestation graph; not paginated
    /// since ring/network-health analysis needs the whole graph at once.
    pub fn list_all_active_attestations(&self) -> Result<Vec<Attestation>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT document_json FROM attestations WHERE revoked_at IS NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).filter_map(|j| serde_json::from_str(&j).ok()).collect())
    }

    /// `/search`'s filtered, paginated query. Every predicate is folded into
    /// the `WHERE` clause so the table is never scanned in memory.
    pub fn search_attestations(&self, filter: &AttestationFilter, limit: i64, offset: i64) -> Result<Page<Attestation>, StoreError> {
        let db = self.db.lock();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);

        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(subject) = &filter.subject {
            clauses.push("subject_pubkey = ?");
            values.push(Box::new(subject.as_str().to_string()));
        }
        if let Some(attestor) = &filter.attestor {
            clauses.push("attestor_pubkey = ?");
            values.push(Box::new(attestor.as_str().to_string()));
        }
        if let Some(domain) = &filter.domain {
            clauses.push("skill_domain = ?");
            values.push(Box::new(domain.clone()));
        }
        if let Some(skill) = &filter.skill {
            clauses.push("skill_specific = ?");
            values.push(Box::new(skill.clone()));
        }
        if let Some(attestation_type) = &filter.attestation_type {
            clauses.push("type = ?");
            values.push(Box::new(serde_json::to_value(attestation_type)?.as_str().unwrap_or_default().to_string()));
        }
        if let Some(min_proficiency) = filter.min_proficiency {
            clauses.push("skill_proficiency >= ?");
            values.push(Box::new(min_proficiency as i64));
        }
        if !filter.include_revoked {
            clauses.push("revoked_at IS NULL");
        }

        let where_sql = if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!("SELECT document_json FROM attestations {where_sql} ORDER BY issued DESC, id ASC LIMIT ? OFFSET ?");

        values.push(Box::new(limit + 1));
        values.push(Box::new(offset));

        let mut stmt = db.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows: Vec<String> = stmt.query_map(params.as_slice(), |r| r.get(0))?.filter_map(|r| r.ok()).collect();

        let has_more = rows.len() as i64 > limit;
        let items = rows.into_iter().take(limit as usize).filter_map(|j| serde_json::from_str(&j).ok()).collect();
        Ok(Page { items, has_more })
    }

    pub fn count_identities(&self) -> Result<i64, StoreError> {
        let db = self.db.lock();
        Ok(db.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?)
    }

    // ─── Disputes ──────────────────────────────────────────────────────────

    pub fn insert_dispute(&self, dispute: &Dispute, now: &str) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let warning_json: Option<String> = db
                .query_row("SELECT document_json FROM attestations WHERE id = ?1", params![dispute.warning_id.to_string()], |r| r.get(0))
                .optional()?;
            let Some(warning_json) = warning_json else {
                return Err(StoreError::NotFound(format!("attestation {} not found", dispute.warning_id)));
            };
            let warning: Attestation = serde_json::from_str(&warning_json)?;
            if warning.attestation_type != AttestationType::BehavioralWarning {
                return Err(StoreError::Conflict("disputes may only target behavioral_warning attestations".into()));
            }
            db.execute(
                "INSERT INTO disputes (id, warning_id, document_json) VALUES (?1, ?2, ?3)",
                params![dispute.id.to_string(), dispute.warning_id.to_string(), serde_json::to_string(dispute)?],
            )?;
            Self::write_audit(db, now, "dispute.create", AuditOutcome::Success, Some(&dispute.disputor.pubkey), serde_json::json!({"warning_id": dispute.warning_id}))?;
            Ok(())
        })
    }

    pub fn list_disputes_for_warning(&self, warning_id: &uuid::Uuid) -> Result<Vec<Dispute>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT document_json FROM disputes WHERE warning_id = ?1")?;
        let rows = stmt.query_map(params![warning_id.to_string()], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).filter_map(|j| serde_json::from_str(&j).ok()).collect())
    }

    // ─── Ownership claims ──────────────────────────────────────────────────

    pub fn insert_ownership_claim(&self, claim: &OwnershipClaim) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let active: Option<i64> = db
                .query_row(
                    "SELECT 1 FROM ownership_claims WHERE agent_pubkey = ?1 AND state = 'active'",
                    params![claim.agent_pubkey.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            if active.is_some() {
                return Err(StoreError::Conflict(format!("agent {} already has an active ownership claim", claim.agent_pubkey)));
            }
            db.execute(
                "INSERT INTO ownership_claims (claim_id, agent_pubkey, human_pubkey, state, document_json) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![claim.claim_id, claim.agent_pubkey.as_str(), claim.human_pubkey.as_str(), "pending", serde_json::to_string(claim)?],
            )?;
            Ok(())
        })
    }

    pub fn get_ownership_claim(&self, claim_id: &str) -> Result<Option<OwnershipClaim>, StoreError> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row("SELECT document_json FROM ownership_claims WHERE claim_id = ?1", params![claim_id], |r| r.get(0))
            .optional()?;
        Ok(match json {
            Some(j) => Some(serde_json::from_str(&j)?),
            None => None,
        })
    }

    pub fn confirm_ownership_claim(&self, claim_id: &str, confirm_signature: &Signature, now: &str) -> Result<OwnershipClaim, StoreError> {
        self.with_retry(|db| {
            let json: Option<String> = db
                .query_row("SELECT document_json FROM ownership_claims WHERE claim_id = ?1", params![claim_id], |r| r.get(0))
                .optional()?;
            let Some(json) = json else {
                return Err(StoreError::NotFound(format!("ownership claim {claim_id} not found")));
            };
            let mut claim: OwnershipClaim = serde_json::from_str(&json)?;
            if claim.state != OwnershipState::Pending {
                return Err(StoreError::Conflict(format!("ownership claim {claim_id} is not pending")));
            }
            claim.confirm_signature = Some(confirm_signature.clone());
            claim.confirmed_at = Some(now.to_string());
            claim.state = OwnershipState::Active;
            db.execute(
                "UPDATE ownership_claims SET state = 'active', document_json = ?1 WHERE claim_id = ?2",
                params![serde_json::to_string(&claim)?, claim_id],
            )?;
            Ok(claim)
        })
    }

    pub fn revoke_ownership_claim(&self, claim_id: &str, revoker: &PubKey, reason: &str, now: &str) -> Result<OwnershipClaim, StoreError> {
        self.with_retry(|db| {
            let json: Option<String> = db
                .query_row("SELECT document_json FROM ownership_claims WHERE claim_id = ?1", params![claim_id], |r| r.get(0))
                .optional()?;
            let Some(json) = json else {
                return Err(StoreError::NotFound(format!("ownership claim {claim_id} not found")));
            };
            let mut claim: OwnershipClaim = serde_json::from_str(&json)?;
            if claim.state == OwnershipState::Revoked {
                return Err(StoreError::Conflict(format!("ownership claim {claim_id} already revoked")));
            }
            claim.state = OwnershipState::Revoked;
            claim.revoked_at = Some(now.to_string());
            claim.revoker = Some(revoker.clone());
            claim.revoke_reason = Some(reason.to_string());
            db.execute(
                "UPDATE ownership_claims SET state = 'revoked', document_json = ?1 WHERE claim_id = ?2",
                params![serde_json::to_string(&claim)?, claim_id],
            )?;
            Ok(claim)
        })
    }

    pub fn list_ownership_claims_for_agent(&self, agent_pubkey: &PubKey) -> Result<Vec<OwnershipClaim>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT document_json FROM ownership_claims WHERE agent_pubkey = ?1")?;
        let rows = stmt.query_map(params![agent_pubkey.as_str()], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).filter_map(|j| serde_json::from_str(&j).ok()).collect())
    }

    // ─── Integrity baselines / checks ──────────────────────────────────────

    pub fn set_integrity_baseline(&self, baseline: &IntegrityBaseline) -> Result<(), StoreError> {
        self.with_retry(|db| {
            db.execute(
                "UPDATE integrity_baselines SET status = 'superseded' WHERE agent_pubkey = ?1 AND status = 'active'",
                params![baseline.agent_pubkey.as_str()],
            )?;
            db.execute(
                "INSERT INTO integrity_baselines (baseline_id, agent_pubkey, status, document_json) VALUES (?1, ?2, 'active', ?3)",
                params![baseline.baseline_id, baseline.agent_pubkey.as_str(), serde_json::to_string(baseline)?],
            )?;
            Ok(())
        })
    }

    pub fn get_active_baseline(&self, agent_pubkey: &PubKey) -> Result<Option<IntegrityBaseline>, StoreError> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT document_json FROM integrity_baselines WHERE agent_pubkey = ?1 AND status = 'active'",
                params![agent_pubkey.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(j) => Some(serde_json::from_str(&j)?),
            None => None,
        })
    }

    pub fn record_integrity_check(&self, check: &IntegrityCheck) -> Result<(), StoreError> {
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO integrity_checks (check_id, agent_pubkey, checked_at, document_json) VALUES (?1, ?2, ?3, ?4)",
                params![check.check_id, check.agent_pubkey.as_str(), check.checked_at, serde_json::to_string(check)?],
            )?;
            Ok(())
        })
    }

    pub fn list_integrity_checks(&self, agent_pubkey: &PubKey, limit: i64) -> Result<Vec<IntegrityCheck>, StoreError> {
        let db = self.db.lock();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut stmt = db.prepare("SELECT document_json FROM integrity_checks WHERE agent_pubkey = ?1 ORDER BY checked_at DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![agent_pubkey.as_str(), limit], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).filter_map(|j| serde_json::from_str(&j).ok()).collect())
    }

    // ─── Audit log ─────────────────────────────────────────────────────────

    fn write_audit(db: &Connection, now: &str, action: &str, outcome: AuditOutcome, actor: Option<&PubKey>, details: serde_json::Value) -> Result<(), StoreError> {
        db.execute(
            "INSERT INTO audit_log (timestamp, action, outcome, actor_pubkey, details_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![now, action, serde_json::to_value(outcome)?.as_str(), actor.map(|p| p.as_str()), details.to_string()],
        )?;
        Ok(())
    }

    /// Public audit entry point for handlers that don't otherwise touch the
    /// store in the same transaction (e.g. rejected requests).
    pub fn audit(&self, now: &str, action: &str, outcome: AuditOutcome, actor: Option<&PubKey>, details: serde_json::Value) -> Result<(), StoreError> {
        let db = self.db.lock();
        Self::write_audit(&db, now, action, outcome, actor, details)
    }

    pub fn list_audit(&self, actor: Option<&PubKey>, limit: i64) -> Result<Vec<AuditEvent>, StoreError> {
        let db = self.db.lock();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut stmt = db.prepare(
            "SELECT timestamp, action, outcome, actor_pubkey, details_json FROM audit_log
             WHERE ?1 IS NULL OR actor_pubkey = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![actor.map(|p| p.as_str()), limit], |row| {
            let actor_str: Option<String> = row.get(3)?;
            let details_str: String = row.get(4)?;
            Ok(AuditEvent {
                timestamp: row.get(0)?,
                action: row.get(1)?,
                outcome: match row.get::<_, String>(2)?.as_str() {
                    "success" => AuditOutcome::Success,
                    _ => AuditOutcome::Failure,
                },
                actor_pubkey: actor_str.and_then(|s| PubKey::parse(&s).ok()),
                source_ip: String::new(),
                source_ip_hash: String::new(),
                user_agent: String::new(),
                details_json: serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Taxonomy ──────────────────────────────────────────────────────────

    pub fn seed_taxonomy_if_empty(&self, domains: &[TaxonomyDomain]) -> Result<(), StoreError> {
        let db = self.db.lock();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM taxonomy_domains", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }
        for domain in domains {
            db.execute("INSERT INTO taxonomy_domains (id, label) VALUES (?1, ?2)", params![domain.id, domain.label])?;
            for skill in &domain.skills {
                db.execute(
                    "INSERT INTO taxonomy_skills (id, domain_id, label) VALUES (?1, ?2, ?3)",
                    params![skill.id, domain.id, skill.label],
                )?;
            }
        }
        Ok(())
    }

    pub fn list_taxonomy(&self) -> Result<Vec<TaxonomyDomain>, StoreError> {
        let db = self.db.lock();
        let mut domain_stmt = db.prepare("SELECT id, label FROM taxonomy_domains ORDER BY id")?;
        let domains: Vec<(String, String)> = domain_stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        let mut out = Vec::new();
        for (id, label) in domains {
            let mut skill_stmt = db.prepare("SELECT id, label FROM taxonomy_skills WHERE domain_id = ?1 ORDER BY id")?;
            let skills = skill_stmt
                .query_map(params![id], |r| Ok(TaxonomySkill { id: r.get(0)?, label: r.get(1)? }))?
                .filter_map(|r| r.ok())
                .collect();
            out.push(TaxonomyDomain { id, label, skills });
        }
        Ok(out)
    }

    pub fn add_taxonomy_skill(&self, domain_id: &str, skill: &TaxonomySkill) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let domain_exists: Option<i64> = db.query_row("SELECT 1 FROM taxonomy_domains WHERE id = ?1", params![domain_id], |r| r.get(0)).optional()?;
            if domain_exists.is_none() {
                return Err(StoreError::NotFound(format!("taxonomy domain {domain_id} not found")));
            }
            db.execute(
                "INSERT INTO taxonomy_skills (id, domain_id, label) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET label = ?3",
                params![skill.id, domain_id, skill.label],
            )?;
            Ok(())
        })
    }

    pub fn add_taxonomy_domain(&self, domain_id: &str, label: &str) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let exists: Option<i64> = db.query_row("SELECT 1 FROM taxonomy_domains WHERE id = ?1", params![domain_id], |r| r.get(0)).optional()?;
            if exists.is_some() {
                return Err(StoreError::Conflict(format!("taxonomy domain {domain_id} already exists")));
            }
            db.execute("INSERT INTO taxonomy_domains (id, label) VALUES (?1, ?2)", params![domain_id, label])?;
            Ok(())
        })
    }

    pub fn remove_taxonomy_skill(&self, domain_id: &str, skill_id: &str) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let removed = db.execute("DELETE FROM taxonomy_skills WHERE id = ?1 AND domain_id = ?2", params![skill_id, domain_id])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("skill {skill_id} not found in domain {domain_id}")));
            }
            Ok(())
        })
    }

    /// Child skills must go first: `taxonomy_skills.domain_id` references
    /// `taxonomy_domains(id)` with no `ON DELETE CASCADE`.
    pub fn remove_taxonomy_domain(&self, domain_id: &str) -> Result<(), StoreError> {
        self.with_retry(|db| {
            let exists: Option<i64> = db.query_row("SELECT 1 FROM taxonomy_domains WHERE id = ?1", params![domain_id], |r| r.get(0)).optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("taxonomy domain {domain_id} not found")));
            }
            db.execute("DELETE FROM taxonomy_skills WHERE domain_id = ?1", params![domain_id])?;
            db.execute("DELETE FROM taxonomy_domains WHERE id = ?1", params![domain_id])?;
            Ok(())
        })
    }
}

fn row_to_identity(row: &rusqlite::Row) -> rusqlite::Result<Identity> {
    let pubkey_str: String = row.get(0)?;
    let type_str: String = row.get(2)?;
    Ok(Identity {
        pubkey: PubKey::parse(&pubkey_str).unwrap_or_else(|_| PubKey::parse(&format!("ed25519:{}", "0".repeat(64))).unwrap()),
        name: row.get(1)?,
        identity_type: if type_str == "human" { IdentityType::Human } else { IdentityType::Agent },
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
    })
}

pub type SharedStore = Arc<Store>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::test_support::*;

    fn sample_attestation(subject: &PubKey, attestor: &PubKey, attestor_key: &ed25519_dalek::SigningKey) -> Attestation {
        let mut a = Attestation {
            id: uuid::Uuid::new_v4(),
            kredo: "1.0".into(),
            attestation_type: AttestationType::SkillAttestation,
            subject: SubjectRef { pubkey: subject.clone(), name: "subject".into() },
            attestor: AttestorRef { pubkey: attestor.clone(), name: "attestor".into(), identity_type: IdentityType::Agent },
            skill: Skill { domain: "code".into(), specific: "rust".into(), proficiency: 4 },
            evidence: Evidence { context: "reviewed a PR".into(), artifacts: vec![], outcome: "merged".into(), interaction_date: None },
            issued: "2026-01-01T00:00:00Z".into(),
            expires: "2027-01-01T00:00:00Z".into(),
            signature: Signature::parse(&format!("ed25519:{}", "0".repeat(128))).unwrap(),
            evidence_score: None,
            revoked_at: None,
            revoker_pubkey: None,
        };
        let sig = sign_payload(attestor_key, &a.signable_fields());
        a.signature = sig;
        a
    }

    #[test]
    fn insert_and_fetch_attestation_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let attestor_key = generate_keypair();
        let subject_key = generate_keypair();
        let attestor = pubkey_of(&attestor_key);
        let subject = pubkey_of(&subject_key);
        let a = sample_attestation(&subject, &attestor, &attestor_key);
        store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap();

        let fetched = store.get_attestation(&a.id).unwrap().unwrap();
        assert_eq!(fetched.id, a.id);
        assert_eq!(fetched.subject.pubkey, subject);
    }

    #[test]
    fn duplicate_attestation_id_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let attestor_key = generate_keypair();
        let subject_key = generate_keypair();
        let a = sample_attestation(&pubkey_of(&subject_key), &pubkey_of(&attestor_key), &attestor_key);
        store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap();
        let err = store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn revoking_twice_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let attestor_key = generate_keypair();
        let subject_key = generate_keypair();
        let attestor = pubkey_of(&attestor_key);
        let a = sample_attestation(&pubkey_of(&subject_key), &attestor, &attestor_key);
        store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap();

        let revocation = Revocation {
            id: uuid::Uuid::new_v4(),
            attestation_id: a.id,
            revoker: Revoker { pubkey: attestor.clone(), name: "attestor".into() },
            reason: "mistaken".into(),
            issued: "2026-01-02T00:00:00Z".into(),
            signature: sign_payload(&attestor_key, &serde_json::json!({})),
        };
        store.revoke_attestation(&revocation, "2026-01-02T00:00:00Z").unwrap();
        let err = store.revoke_attestation(&revocation, "2026-01-02T00:00:00Z").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn pagination_respects_limit_and_has_more() {
        let store = Store::open_in_memory().unwrap();
        let subject_key = generate_keypair();
        let subject = pubkey_of(&subject_key);
        for i in 0..5 {
            let attestor_key = generate_keypair();
            let mut a = sample_attestation(&subject, &pubkey_of(&attestor_key), &attestor_key);
            a.issued = format!("2026-01-0{}T00:00:00Z", i + 1);
            let resigned = sign_payload(&attestor_key, &a.signable_fields());
            a.signature = resigned;
            store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap();
        }
        let page = store.list_attestations_for_subject(&subject, None, 2).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn invalidation_hook_fires_on_insert() {
        let store = Store::open_in_memory().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        store.on_write(Box::new(move |keys| seen2.lock().extend_from_slice(keys)));

        let attestor_key = generate_keypair();
        let subject_key = generate_keypair();
        let a = sample_attestation(&pubkey_of(&subject_key), &pubkey_of(&attestor_key), &attestor_key);
        store.insert_attestation(&a, "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(seen.lock().len(), 2);
    }
}
