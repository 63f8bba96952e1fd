//! The skill taxonomy: a small fixed set of domains, each holding a handful
//! of named skills. Seeded once into the store, then served from an
//! in-memory snapshot that is swapped (copy-on-write) on any accepted
//! mutation, the same cache-invalidation-on-write shape the trust engine
//! uses for its reputation cache, at a much smaller scale.

use crate::domain::{TaxonomyDomain, TaxonomySkill};
use crate::error::KredoError;
use crate::store::Store;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

pub fn is_valid_identifier(id: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(id)
}

fn domain(id: &str, label: &str, skills: &[(&str, &str)]) -> TaxonomyDomain {
    TaxonomyDomain {
        id: id.to_string(),
        label: label.to_string(),
        skills: skills.iter().map(|(sid, slabel)| TaxonomySkill { id: sid.to_string(), label: slabel.to_string() }).collect(),
    }
}

/// Seed taxonomy: 7 domains, each with a handful of representative skills.
pub fn seed_domains() -> Vec<TaxonomyDomain> {
    vec![
        domain(
            "code",
            "Software Engineering",
            &[
                ("rust", "Rust"),
                ("python", "Python"),
                ("typescript", "TypeScript"),
                ("go", "Go"),
                ("code-review", "Code Review"),
                ("systems-design", "Systems Design"),
                ("debugging", "Debugging"),
                ("testing", "Testing"),
                ("devops", "DevOps"),
                ("rust-async", "Async Rust"),
            ],
        ),
        domain(
            "research",
            "Research",
            &[
                ("literature-review", "Literature Review"),
                ("experiment-design", "Experiment Design"),
                ("data-analysis", "Data Analysis"),
                ("technical-writing", "Technical Writing"),
                ("peer-review", "Peer Review"),
                ("reproducibility", "Reproducibility"),
                ("statistics", "Statistics"),
                ("grant-writing", "Grant Writing"),
            ],
        ),
        domain(
            "design",
            "Design",
            &[
                ("ui-design", "UI Design"),
                ("ux-research", "UX Research"),
                ("visual-design", "Visual Design"),
                ("prototyping", "Prototyping"),
                ("accessibility", "Accessibility"),
                ("interaction-design", "Interaction Design"),
                ("design-systems", "Design Systems"),
            ],
        ),
        domain(
            "operations",
            "Operations",
            &[
                ("project-management", "Project Management"),
                ("incident-response", "Incident Response"),
                ("scheduling", "Scheduling"),
                ("vendor-management", "Vendor Management"),
                ("process-design", "Process Design"),
                ("capacity-planning", "Capacity Planning"),
                ("on-call", "On-Call Response"),
            ],
        ),
        domain(
            "communication",
            "Communication",
            &[
                ("mediation", "Mediation"),
                ("public-speaking", "Public Speaking"),
                ("documentation", "Documentation"),
                ("translation", "Translation"),
                ("community-moderation", "Community Moderation"),
                ("technical-support", "Technical Support"),
                ("facilitation", "Facilitation"),
            ],
        ),
        domain(
            "finance",
            "Finance",
            &[
                ("bookkeeping", "Bookkeeping"),
                ("budgeting", "Budgeting"),
                ("auditing", "Auditing"),
                ("tokenomics", "Tokenomics"),
                ("fraud-detection", "Fraud Detection"),
                ("treasury-management", "Treasury Management"),
                ("grant-accounting", "Grant Accounting"),
            ],
        ),
        domain(
            "conduct",
            "Conduct",
            &[
                ("harassment", "Harassment"),
                ("fraud", "Fraud"),
                ("plagiarism", "Plagiarism"),
                ("spam", "Spam"),
                ("impersonation", "Impersonation"),
                ("data-misuse", "Data Misuse"),
                ("collusion", "Collusion"),
                ("sybil-behavior", "Sybil Behavior"),
            ],
        ),
    ]
}

pub struct TaxonomyRegistry {
    store: Arc<Store>,
    snapshot: RwLock<Arc<Vec<TaxonomyDomain>>>,
}

impl TaxonomyRegistry {
    pub fn bootstrap(store: Arc<Store>) -> Result<Arc<Self>, crate::store::StoreError> {
        store.seed_taxonomy_if_empty(&seed_domains())?;
        let initial = store.list_taxonomy()?;
        Ok(Arc::new(TaxonomyRegistry { store, snapshot: RwLock::new(Arc::new(initial)) }))
    }

    pub fn snapshot(&self) -> Arc<Vec<TaxonomyDomain>> {
        self.snapshot.read().clone()
    }

    pub fn domain(&self, domain_id: &str) -> Option<TaxonomyDomain> {
        self.snapshot().iter().find(|d| d.id == domain_id).cloned()
    }

    pub fn add_skill(&self, domain_id: &str, skill_id: &str, label: &str) -> Result<(), KredoError> {
        if !is_valid_identifier(domain_id) || !is_valid_identifier(skill_id) {
            return Err(KredoError::ValidationError("taxonomy identifiers must match ^[a-z0-9]+(-[a-z0-9]+)*$".into()));
        }
        self.store.add_taxonomy_skill(domain_id, &TaxonomySkill { id: skill_id.to_string(), label: label.to_string() })?;
        let refreshed = self.store.list_taxonomy()?;
        *self.snapshot.write() = Arc::new(refreshed);
        Ok(())
    }

    pub fn add_domain(&self, domain_id: &str, label: &str) -> Result<(), KredoError> {
        if !is_valid_identifier(domain_id) {
            return Err(KredoError::ValidationError("taxonomy identifiers must match ^[a-z0-9]+(-[a-z0-9]+)*$".into()));
        }
        self.store.add_taxonomy_domain(domain_id, label)?;
        let refreshed = self.store.list_taxonomy()?;
        *self.snapshot.write() = Arc::new(refreshed);
        Ok(())
    }

    pub fn remove_skill(&self, domain_id: &str, skill_id: &str) -> Result<(), KredoError> {
        self.store.remove_taxonomy_skill(domain_id, skill_id)?;
        let refreshed = self.store.list_taxonomy()?;
        *self.snapshot.write() = Arc::new(refreshed);
        Ok(())
    }

    pub fn remove_domain(&self, domain_id: &str) -> Result<(), KredoError> {
        self.store.remove_taxonomy_domain(domain_id)?;
        let refreshed = self.store.list_taxonomy()?;
        *self.snapshot.write() = Arc::new(refreshed);
        Ok(())
    }

    pub fn is_known_skill(&self, domain_id: &str, skill_id: &str) -> bool {
        self.domain(domain_id).map(|d| d.skills.iter().any(|s| s.id == skill_id)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_identifiers_are_all_valid() {
        for d in seed_domains() {
            assert!(is_valid_identifier(&d.id), "bad domain id {}", d.id);
            for s in d.skills {
                assert!(is_valid_identifier(&s.id), "bad skill id {}", s.id);
            }
        }
    }

    #[test]
    fn seed_has_seven_domains() {
        assert_eq!(seed_domains().len(), 7);
    }

    #[test]
    fn seed_has_fifty_four_skills() {
        let total: usize = seed_domains().iter().map(|d| d.skills.len()).sum();
        assert_eq!(total, 54);
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reg1 = TaxonomyRegistry::bootstrap(store.clone()).unwrap();
        let count1 = reg1.snapshot().len();
        let reg2 = TaxonomyRegistry::bootstrap(store).unwrap();
        assert_eq!(reg2.snapshot().len(), count1);
    }

    #[test]
    fn adding_a_skill_updates_the_snapshot() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reg = TaxonomyRegistry::bootstrap(store).unwrap();
        reg.add_skill("code", "zig", "Zig").unwrap();
        assert!(reg.is_known_skill("code", "zig"));
    }

    #[test]
    fn rejects_malformed_identifiers() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reg = TaxonomyRegistry::bootstrap(store).unwrap();
        assert!(reg.add_skill("code", "Not_Valid", "x").is_err());
    }
}
