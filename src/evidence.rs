//! Evidence scoring heuristics.
//!
//! Pure functions over an [`Evidence`] record plus the [`Skill`] it backs.
//! Nothing here touches the store or the network — scoring is reused both
//! at attestation accept time and by any future re-scoring pass.

use crate::domain::{Evidence, EvidenceScore, Skill};
use regex::Regex;
use std::sync::LazyLock;

/// Artifact patterns that count as independently checkable evidence: URLs
/// and common hash/identifier shapes, mirroring the kind of pattern-scan the
/// router already does over free text elsewhere in this codebase.
static ARTIFACT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(https?://|urn:|sha256:|git\+|doi:)").unwrap()
});

const RECENCY_HALF_LIFE_DAYS: f64 = 180.0;

/// Specificity: rewards evidence whose context is long enough to contain a
/// real claim, saturating so padding past a few sentences doesn't help.
pub fn specificity(evidence: &Evidence) -> f64 {
    let len = evidence.context.trim().chars().count() as f64;
    (len / 280.0).min(1.0)
}

/// Verifiability: fraction of artifacts that look like independently
/// checkable references (URL, hash, DOI, URN), floored at zero artifacts.
pub fn verifiability(evidence: &Evidence) -> f64 {
    if evidence.artifacts.is_empty() {
        return 0.0;
    }
    let matching = evidence.artifacts.iter().filter(|a| ARTIFACT_PATTERN.is_match(a)).count();
    matching as f64 / evidence.artifacts.len() as f64
}

/// Relevance: does the evidence's own text actually mention the skill being
/// attested? Cross-checks both the domain and the specific skill token
/// (hyphen-split, so `code-review` matches on either half).
pub fn relevance(evidence: &Evidence, skill: &Skill) -> f64 {
    let haystack = format!("{} {}", evidence.context, evidence.outcome).to_lowercase();
    let domain_hit = haystack.contains(&skill.domain.to_lowercase());
    let specific_tokens: Vec<&str> = skill.specific.split('-').collect();
    let specific_hit = specific_tokens.iter().any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()));

    match (domain_hit, specific_hit) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.6,
        (false, false) => 0.2,
    }
}

/// Recency: exponential decay from the evidence's own interaction date (not
/// the attestation's issue date) with a 180-day half-life. Evidence without
/// a dated interaction gets a neutral 0.5 rather than being penalized for
/// omitting an optional field.
pub fn recency(evidence: &Evidence, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let Some(ref interaction_date) = evidence.interaction_date else {
        return 0.5;
    };
    let Ok(dt) = chrono::DateTime::parse_from_rfc3339(interaction_date) else {
        return 0.5;
    };
    let age_days = (now - dt.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0;
    if age_days < 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
}

/// Weighted composite: specificity and relevance matter most (evidence that
/// is vague or off-topic is worth little no matter how "verifiable" its
/// artifacts are), verifiability next, recency least.
pub fn composite(specificity: f64, verifiability: f64, relevance: f64, recency: f64) -> f64 {
    0.3 * specificity + 0.25 * verifiability + 0.3 * relevance + 0.15 * recency
}

pub fn score(evidence: &Evidence, skill: &Skill, now: chrono::DateTime<chrono::Utc>) -> EvidenceScore {
    let s = specificity(evidence);
    let v = verifiability(evidence);
    let r = relevance(evidence, skill);
    let rec = recency(evidence, now);
    EvidenceScore {
        specificity: s,
        verifiability: v,
        relevance: r,
        recency: rec,
        composite: composite(s, v, r, rec),
    }
}

/// Threshold a `behavioral_warning` attestation's evidence must clear to be
/// accepted at all.
pub const BEHAVIORAL_WARNING_MIN_COMPOSITE: f64 = 0.4;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn skill() -> Skill {
        Skill { domain: "code".into(), specific: "rust-async".into(), proficiency: 4 }
    }

    #[test]
    fn specificity_saturates_at_one() {
        let short = Evidence { context: "did a thing".into(), ..Default::default() };
        let long = Evidence { context: "x".repeat(500), ..Default::default() };
        assert!(specificity(&short) < specificity(&long));
        assert_eq!(specificity(&long), 1.0);
    }

    #[test]
    fn verifiability_rewards_url_artifacts() {
        let none = Evidence::default();
        let with_url = Evidence { artifacts: vec!["https://example.com/pr/1".into()], ..Default::default() };
        let junk = Evidence { artifacts: vec!["trust me".into()], ..Default::default() };
        assert_eq!(verifiability(&none), 0.0);
        assert_eq!(verifiability(&with_url), 1.0);
        assert_eq!(verifiability(&junk), 0.0);
    }

    #[test]
    fn relevance_detects_domain_and_specific_mentions() {
        let sk = skill();
        let both = Evidence { context: "pair-programmed on an async rust module".into(), outcome: "shipped".into(), ..Default::default() };
        let neither = Evidence { context: "baked bread".into(), outcome: "tasty".into(), ..Default::default() };
        assert_eq!(relevance(&both, &sk), 1.0);
        assert_eq!(relevance(&neither, &sk), 0.2);
    }

    #[test]
    fn recency_decays_with_age() {
        let now = Utc::now();
        let fresh = Evidence { interaction_date: Some(now.to_rfc3339()), ..Default::default() };
        let stale = Evidence {
            interaction_date: Some((now - chrono::Duration::days(360)).to_rfc3339()),
            ..Default::default()
        };
        assert!(recency(&fresh, now) > recency(&stale, now));
        assert!((recency(&fresh, now) - 1.0).abs() < 0.01);
    }

    #[test]
    fn behavioral_warning_threshold_gates_low_quality_evidence() {
        let weak = Evidence { context: "bad vibes".into(), outcome: "none".into(), ..Default::default() };
        let sk = Skill { domain: "conduct".into(), specific: "harassment".into(), proficiency: 0 };
        let sc = score(&weak, &sk, Utc::now());
        assert!(sc.composite < BEHAVIORAL_WARNING_MIN_COMPOSITE);
    }
}
