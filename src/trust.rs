//! Reputation scoring and ring detection.
//!
//! A subject's reputation is a depth-3 recursive function of who attested
//! to them and how reputable *those* attestors are, decayed by evidence
//! quality, attestation age, and a ring discount. Results are cached for a
//! short TTL keyed by pubkey (and one global slot for network-wide views),
//! invalidated by the store whenever a write touches an attestation.
//!
//! Grounded on the same `Mutex`-guarded-`HashMap` counter shape used for
//! per-peer rate windows elsewhere in this codebase, generalized here from
//! a counter to a cache entry with its own TTL check.

use crate::domain::{Attestation, OwnershipState, PubKey, TrafficLight};
use crate::store::Store;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_DEPTH: u8 = 3;
const AGE_HALF_LIFE_DAYS: f64 = 180.0;

/// `attestor_rep = floor + (1 - floor) × R(attestor, depth-1)` — a fresh
/// attestor with zero reputation still carries some weight.
const ATTESTOR_REP_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RingType {
    MutualPair,
    Clique,
}

#[derive(Debug, Clone, Serialize)]
pub struct RingFlag {
    pub ring_type: RingType,
    pub members: Vec<PubKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerAttestationWeight {
    pub attestation_id: uuid::Uuid,
    pub attestor: PubKey,
    pub weight: f64,
    pub ring_discount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillAggregate {
    pub domain: String,
    pub specific: String,
    pub avg_proficiency: f64,
    pub weighted_avg_proficiency: f64,
    pub attestation_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountabilityTier {
    HumanLinked,
    Unlinked,
}

#[derive(Debug, Clone, Serialize)]
pub struct Accountability {
    pub tier: AccountabilityTier,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<PubKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Integrity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_light: Option<TrafficLight>,
    pub status_label: String,
    pub recommended_action: String,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustAnalysis {
    pub pubkey: PubKey,
    pub reputation_score: f64,
    pub attestation_count: usize,
    pub in_ring: bool,
    pub skills: Vec<SkillAggregate>,
    pub ring_flags: Vec<RingFlag>,
    pub per_attestation: Vec<PerAttestationWeight>,
    pub accountability: Accountability,
    pub integrity: Integrity,
    pub deployability_multiplier: f64,
    pub deployability_score: f64,
}

#[derive(Debug, Clone)]
pub struct NetworkHealth {
    pub identity_count: i64,
    pub attestation_count: usize,
    pub mutual_pair_count: usize,
    pub ring_count: usize,
    pub average_reputation: f64,
}

/// The network-wide ring structure, computed once per TTL window and reused
/// both for `/trust/rings` and for per-attestation `ring_discount` lookups —
/// a discount depends on the whole graph, not just the two endpoints.
#[derive(Debug, Clone, Default)]
struct RingData {
    cliques: Vec<Vec<PubKey>>,
    mutual_pairs: Vec<(PubKey, PubKey)>,
}

impl RingData {
    /// 0.3 if the pair sits inside any clique of size ≥ 3 (absorbs the pair
    /// even if it would also register as a mutual pair — property 9:
    /// completing a triangle over an existing mutual pair reflags every edge
    /// as `clique`, never leaving a separate `mutual_pair` entry behind).
    /// 0.5 if it's a bare mutual pair. 1.0 otherwise.
    fn discount(&self, a: &PubKey, b: &PubKey) -> f64 {
        if self.cliques.iter().any(|c| c.contains(a) && c.contains(b)) {
            return 0.3;
        }
        if self.mutual_pairs.iter().any(|(x, y)| (x == a && y == b) || (x == b && y == a)) {
            return 0.5;
        }
        1.0
    }

    /// Flags reported to callers: cliques, plus mutual pairs not already
    /// absorbed into a clique.
    fn flags(&self) -> Vec<RingFlag> {
        let mut out: Vec<RingFlag> = self.cliques.iter().map(|c| RingFlag { ring_type: RingType::Clique, members: c.clone() }).collect();
        for (a, b) in &self.mutual_pairs {
            if self.cliques.iter().any(|c| c.contains(a) && c.contains(b)) {
                continue;
            }
            out.push(RingFlag { ring_type: RingType::MutualPair, members: vec![a.clone(), b.clone()] });
        }
        out
    }
}

struct CacheEntry<T> {
    value: T,
    cached_at: Instant,
}

pub struct TrustEngine {
    store: Arc<Store>,
    ttl: Duration,
    per_pubkey: RwLock<HashMap<PubKey, CacheEntry<TrustAnalysis>>>,
    network: RwLock<Option<CacheEntry<(NetworkHealth, RingData)>>>,
}

impl TrustEngine {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Arc<Self> {
        Arc::new(TrustEngine { store, ttl, per_pubkey: RwLock::new(HashMap::new()), network: RwLock::new(None) })
    }

    /// Register this engine's invalidation with the store. Call once at
    /// startup after both are constructed.
    pub fn register_invalidation(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.store.on_write(Box::new(move |pubkeys| {
            if let Some(engine) = weak.upgrade() {
                engine.invalidate(pubkeys);
            }
        }));
    }

    fn invalidate(&self, pubkeys: &[PubKey]) {
        let mut cache = self.per_pubkey.write();
        for pk in pubkeys {
            cache.remove(pk);
        }
        *self.network.write() = None;
    }

    pub fn analyze(&self, pubkey: &PubKey, now: chrono::DateTime<chrono::Utc>) -> Result<TrustAnalysis, crate::store::StoreError> {
        if let Some(entry) = self.per_pubkey.read().get(pubkey)
            && entry.cached_at.elapsed() < self.ttl
        {
            return Ok(entry.value.clone());
        }

        let (_, ring_data) = self.network_snapshot()?;
        let page = self.store.list_attestations_for_subject(pubkey, None, 200)?;
        let live: Vec<&Attestation> = page.items.iter().filter(|a| is_live(a, now)).collect();

        // Mirrors reputation_of's own loop (same shared visited-set
        // semantics) so the displayed per-attestation weights are exactly
        // the terms summed into reputation_score, not a separately derived
        // approximation.
        let mut visited = HashSet::new();
        visited.insert(pubkey.clone());
        let mut sum_w = 0.0;
        let mut per_attestation = Vec::new();
        let mut skill_sums: HashMap<(String, String), (f64, f64, f64, usize)> = HashMap::new(); // (sum proficiency, sum p*w, sum w, count)
        for a in &live {
            let discount = ring_data.discount(&a.attestor.pubkey, &a.subject.pubkey);
            let (reputation_weight, quality_weight) = self.attestation_weights(a, MAX_DEPTH, &mut visited, now, &ring_data, discount)?;
            sum_w += reputation_weight;
            per_attestation.push(PerAttestationWeight { attestation_id: a.id, attestor: a.attestor.pubkey.clone(), weight: reputation_weight, ring_discount: discount });

            let key = (a.skill.domain.clone(), a.skill.specific.clone());
            let entry = skill_sums.entry(key).or_insert((0.0, 0.0, 0.0, 0));
            let p = a.skill.proficiency as f64;
            entry.0 += p;
            entry.1 += p * quality_weight;
            entry.2 += quality_weight;
            entry.3 += 1;
        }
        visited.remove(pubkey);
        let reputation_score = 1.0 - (-sum_w).exp();

        let mut skills: Vec<SkillAggregate> = skill_sums
            .into_iter()
            .map(|((domain, specific), (sum_p, sum_pw, sum_w, count))| SkillAggregate {
                domain,
                specific,
                avg_proficiency: sum_p / count as f64,
                weighted_avg_proficiency: if sum_w > 0.0 { sum_pw / sum_w } else { sum_p / count as f64 },
                attestation_count: count,
            })
            .collect();
        skills.sort_by(|a, b| (a.domain.as_str(), a.specific.as_str()).cmp(&(b.domain.as_str(), b.specific.as_str())));

        let ring_flags: Vec<RingFlag> = ring_data.flags().into_iter().filter(|f| f.members.contains(pubkey)).collect();
        let in_ring = !ring_flags.is_empty();

        let accountability = self.accountability_of(pubkey)?;
        let integrity = self.integrity_of(pubkey)?;
        let deployability_multiplier = accountability.multiplier * integrity.multiplier;
        let deployability_score = reputation_score * deployability_multiplier;

        let analysis = TrustAnalysis {
            pubkey: pubkey.clone(),
            reputation_score,
            attestation_count: live.len(),
            in_ring,
            skills,
            ring_flags,
            per_attestation,
            accountability,
            integrity,
            deployability_multiplier,
            deployability_score,
        };
        self.per_pubkey.write().insert(pubkey.clone(), CacheEntry { value: analysis.clone(), cached_at: Instant::now() });
        Ok(analysis)
    }

    /// `R(p, 0) = 0`; `R(p, d>0) = 1 - exp(-Σw)` over `p`'s non-revoked,
    /// non-expired attestations, where each `w` folds in the recursive
    /// reputation of that attestation's own attestor at `depth-1`. A
    /// visited-set breaks cycles by treating a revisited pubkey as 0 rather
    /// than recursing forever.
    fn reputation_of(
        &self,
        pubkey: &PubKey,
        depth: u8,
        visited: &mut HashSet<PubKey>,
        now: chrono::DateTime<chrono::Utc>,
        ring_data: &RingData,
    ) -> Result<f64, crate::store::StoreError> {
        if depth == 0 {
            return Ok(0.0);
        }
        if !visited.insert(pubkey.clone()) {
            return Ok(0.0);
        }
        let page = self.store.list_attestations_for_subject(pubkey, None, 200)?;
        let mut sum_w = 0.0;
        for attestation in &page.items {
            if !is_live(attestation, now) {
                continue;
            }
            let discount = ring_data.discount(&attestation.attestor.pubkey, &attestation.subject.pubkey);
            let (reputation_weight, _) = self.attestation_weights(attestation, depth, visited, now, ring_data, discount)?;
            sum_w += reputation_weight;
        }
        visited.remove(pubkey);
        Ok(1.0 - (-sum_w).exp())
    }

    /// Returns `(reputation_weight, quality_weight)`: `quality_weight` is
    /// `evidence.composite × decay × attestor_rep × ring_discount` — the
    /// per-attestation confidence, independent of the proficiency value it
    /// is being used to weight, which is what `weighted_avg_proficiency`
    /// weights by. `reputation_weight` folds in proficiency (normalized to
    /// [0,1]) on top, per the `w = proficiency × composite × decay ×
    /// attestor_rep × ring_discount` formula used for `R`.
    fn attestation_weights(
        &self,
        attestation: &Attestation,
        depth: u8,
        visited: &mut HashSet<PubKey>,
        now: chrono::DateTime<chrono::Utc>,
        ring_data: &RingData,
        ring_discount: f64,
    ) -> Result<(f64, f64), crate::store::StoreError> {
        let evidence_weight = attestation.evidence_score.map(|s| s.composite).unwrap_or(0.5);
        let decay = age_decay(&attestation.issued, now);
        let attestor_rep = self.reputation_of(&attestation.attestor.pubkey, depth - 1, visited, now, ring_data)?;
        let attestor_weight = ATTESTOR_REP_FLOOR + (1.0 - ATTESTOR_REP_FLOOR) * attestor_rep;

        let quality_weight = evidence_weight * decay * attestor_weight * ring_discount;
        let proficiency_normalized = attestation.skill.proficiency as f64 / 5.0;
        Ok((proficiency_normalized * quality_weight, quality_weight))
    }

    fn accountability_of(&self, pubkey: &PubKey) -> Result<Accountability, crate::store::StoreError> {
        let owner = self
            .store
            .list_ownership_claims_for_agent(pubkey)?
            .into_iter()
            .find(|c| c.state == OwnershipState::Active)
            .map(|c| c.human_pubkey);
        Ok(match owner {
            Some(owner) => Accountability { tier: AccountabilityTier::HumanLinked, multiplier: 1.0, owner: Some(owner) },
            None => Accountability { tier: AccountabilityTier::Unlinked, multiplier: 0.6, owner: None },
        })
    }

    fn integrity_of(&self, pubkey: &PubKey) -> Result<Integrity, crate::store::StoreError> {
        let latest = self.store.list_integrity_checks(pubkey, 1)?.into_iter().next();
        Ok(match latest {
            Some(check) => integrity_for(check.result.status),
            None => Integrity { traffic_light: None, status_label: "no_checks_recorded".into(), recommended_action: "safe_to_run".into(), multiplier: 1.0 },
        })
    }

    pub fn network_health(&self) -> Result<NetworkHealth, crate::store::StoreError> {
        Ok(self.network_snapshot()?.0)
    }

    pub fn rings(&self) -> Result<Vec<RingFlag>, crate::store::StoreError> {
        Ok(self.network_snapshot()?.1.flags())
    }

    fn network_snapshot(&self) -> Result<(NetworkHealth, RingData), crate::store::StoreError> {
        if let Some(entry) = self.network.read().as_ref()
            && entry.cached_at.elapsed() < self.ttl
        {
            return Ok(entry.value.clone());
        }

        let now = chrono::Utc::now();
        let attestations = self.store.list_all_active_attestations()?;
        let live: Vec<&Attestation> = attestations.iter().filter(|a| is_live(a, now)).collect();
        let graph = mutual_graph(&live);
        let mutual_pairs: Vec<(PubKey, PubKey)> = {
            let mut seen = HashSet::new();
            let mut pairs = Vec::new();
            for (a, neighbors) in &graph {
                for b in neighbors {
                    let key = if a < b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
                    if seen.insert(key.clone()) {
                        pairs.push(key);
                    }
                }
            }
            pairs
        };
        let cliques = bron_kerbosch_cliques(&graph);
        let ring_data = RingData { cliques, mutual_pairs };

        let identity_count = self.store.count_identities()?;
        let subjects: HashSet<PubKey> = live.iter().map(|a| a.subject.pubkey.clone()).collect();
        let mut reputations = Vec::new();
        for s in &subjects {
            let mut visited = HashSet::new();
            reputations.push(self.reputation_of(s, MAX_DEPTH, &mut visited, now, &ring_data)?);
        }
        let average_reputation = if reputations.is_empty() { 0.0 } else { reputations.iter().sum::<f64>() / reputations.len() as f64 };

        let health = NetworkHealth {
            identity_count,
            attestation_count: live.len(),
            mutual_pair_count: ring_data.mutual_pairs.len(),
            ring_count: ring_data.flags().len(),
            average_reputation,
        };

        let value = (health, ring_data);
        *self.network.write() = Some(CacheEntry { value: value.clone(), cached_at: Instant::now() });
        Ok(value)
    }
}

fn integrity_for(status: TrafficLight) -> Integrity {
    match status {
        TrafficLight::Green => Integrity { traffic_light: Some(status), status_label: "green".into(), recommended_action: "safe_to_run".into(), multiplier: 1.0 },
        TrafficLight::Yellow => Integrity { traffic_light: Some(status), status_label: "yellow".into(), recommended_action: "owner_review_required".into(), multiplier: 0.5 },
        TrafficLight::Red => Integrity { traffic_light: Some(status), status_label: "red".into(), recommended_action: "block_run".into(), multiplier: 0.0 },
    }
}

fn is_live(attestation: &Attestation, now: chrono::DateTime<chrono::Utc>) -> bool {
    if attestation.revoked_at.is_some() {
        return false;
    }
    match chrono::DateTime::parse_from_rfc3339(&attestation.expires) {
        Ok(expires) => expires.with_timezone(&chrono::Utc) > now,
        Err(_) => false,
    }
}

/// Exponential decay of an ISO-8601 timestamp's contribution weight with a
/// 180-day half-life. Malformed timestamps decay to zero rather than
/// panicking or silently contributing full weight.
fn age_decay(issued: &str, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let Ok(dt) = chrono::DateTime::parse_from_rfc3339(issued) else {
        return 0.0;
    };
    let age_days = (now - dt.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0;
    if age_days < 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days / AGE_HALF_LIFE_DAYS).clamp(0.0, 1.0)
}

/// Build the undirected graph of pubkey pairs that have attested to each
/// other (mutual edges only — a one-way attestation is not a ring signal).
fn mutual_graph(attestations: &[&Attestation]) -> HashMap<PubKey, HashSet<PubKey>> {
    let mut directed: HashSet<(PubKey, PubKey)> = HashSet::new();
    for a in attestations {
        directed.insert((a.attestor.pubkey.clone(), a.subject.pubkey.clone()));
    }
    let mut graph: HashMap<PubKey, HashSet<PubKey>> = HashMap::new();
    for (from, to) in &directed {
        if directed.contains(&(to.clone(), from.clone())) {
            graph.entry(from.clone()).or_default().insert(to.clone());
            graph.entry(to.clone()).or_default().insert(from.clone());
        }
    }
    graph
}

/// Bron–Kerbosch with pivoting over the mutual-attestation graph, returning
/// maximal cliques of size ≥ 3 (the ring-flag threshold).
fn bron_kerbosch_cliques(graph: &HashMap<PubKey, HashSet<PubKey>>) -> Vec<Vec<PubKey>> {
    let mut cliques = Vec::new();
    let all: HashSet<PubKey> = graph.keys().cloned().collect();
    bron_kerbosch(graph, HashSet::new(), all, HashSet::new(), &mut cliques);
    cliques.retain(|c| c.len() >= 3);
    cliques
}

fn bron_kerbosch(
    graph: &HashMap<PubKey, HashSet<PubKey>>,
    r: HashSet<PubKey>,
    mut p: HashSet<PubKey>,
    mut x: HashSet<PubKey>,
    out: &mut Vec<Vec<PubKey>>,
) {
    if p.is_empty() && x.is_empty() {
        if !r.is_empty() {
            let mut clique: Vec<PubKey> = r.into_iter().collect();
            clique.sort();
            out.push(clique);
        }
        return;
    }

    let empty = HashSet::new();
    let pivot = p.iter().chain(x.iter()).max_by_key(|v| graph.get(*v).unwrap_or(&empty).len()).cloned();
    let pivot_neighbors = pivot.as_ref().and_then(|v| graph.get(v)).cloned().unwrap_or_default();
    let candidates: Vec<PubKey> = p.difference(&pivot_neighbors).cloned().collect();

    for v in candidates {
        let neighbors = graph.get(&v).cloned().unwrap_or_default();
        let mut r2 = r.clone();
        r2.insert(v.clone());
        let p2 = p.intersection(&neighbors).cloned().collect();
        let x2 = x.intersection(&neighbors).cloned().collect();
        bron_kerbosch(graph, r2, p2, x2, out);
        p.remove(&v);
        x.insert(v);
    }
}
