//! Deterministic policy evaluation.
//!
//! The engine maps `(thresholds, features, signals)` to a decision plus the
//! list of rules that fired. ML signals are inputs to the rules, never
//! overriding authorities: every rule is evaluated, each contributes a
//! candidate decision, and the outcome is the most severe candidate on the
//! lattice REJECT > QUARANTINE > REVIEW > ALLOW. Changing any threshold
//! (that is, the policy profile version) changes the outputs hash even for
//! identical inputs, because the profile version is part of the certificate
//! inputs object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binding decision for one upload.
///
/// Ordering is severity: `Allow < Review < Quarantine < Reject`, which is
/// exactly the tie-break order applied when several rules fire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Decision {
    /// Admit the upload.
    #[serde(rename = "ALLOW")]
    Allow,

    /// Admit but route to human review.
    #[serde(rename = "REVIEW")]
    Review,

    /// Hold the upload out of distribution.
    #[serde(rename = "QUARANTINE")]
    Quarantine,

    /// Refuse the upload.
    #[serde(rename = "REJECT")]
    Reject,
}

impl Decision {
    /// Wire form, as stored and returned to clients.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Review => "REVIEW",
            Self::Quarantine => "QUARANTINE",
            Self::Reject => "REJECT",
        }
    }
}

/// Per-upload features computed from persistent state.
///
/// Persisted verbatim on the upload row (`decision_inputs_json`) for replay
/// and explainability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Days since the account was first seen; 0 for a first sighting.
    pub account_age_days: i64,

    /// Uploads by this account in the preceding 24 hours.
    pub upload_velocity_24h: i64,

    /// Uploads from this device in the preceding 24 hours.
    pub device_velocity_24h: i64,

    /// Prior QUARANTINE decisions for this account.
    pub prior_quarantine_count: i64,

    /// Prior REJECT decisions for this account.
    pub prior_reject_count: i64,

    /// Prior QUARANTINE decisions for this provenance id.
    pub pvid_prior_quarantine_count: i64,

    /// Prior REJECT decisions for this provenance id.
    pub pvid_prior_reject_count: i64,

    /// Prior uploads sharing this provenance id.
    pub pvid_prior_sightings: i64,
}

/// ML signal vector with model provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    /// Risk score in [0,1]; higher is riskier.
    pub risk: f64,

    /// Assurance score in [0,1]; higher is more trustworthy.
    pub assurance: f64,

    /// Anomaly score in [0,1]; lower is more anomalous.
    pub anomaly: f64,

    /// Likelihood in [0,1] that the content is synthetic.
    pub synthetic_likelihood: f64,

    /// Version string of the risk model that produced `risk`/`assurance`.
    pub risk_model_version: String,

    /// Version string of the anomaly model.
    pub anomaly_model_version: String,

    /// When the signals were computed.
    pub computed_at: DateTime<Utc>,
}

/// Thresholds are data on the policy profile, not code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    /// Risk at or above this routes to REVIEW.
    #[serde(default = "default_risk_review")]
    pub risk_review: f64,

    /// Risk at or above this routes to QUARANTINE.
    #[serde(default = "default_risk_quarantine")]
    pub risk_quarantine: f64,

    /// Risk at or above this routes to REJECT.
    #[serde(default = "default_risk_reject")]
    pub risk_reject: f64,

    /// Assurance at or above this (with risk below `risk_review`) ALLOWs.
    #[serde(default = "default_assurance_allow")]
    pub assurance_allow: f64,

    /// Anomaly below this routes to REVIEW (lower is more anomalous).
    #[serde(default = "default_anomaly_review")]
    pub anomaly_review: f64,

    /// Synthetic likelihood at or above this routes to REVIEW.
    #[serde(default = "default_synthetic_review")]
    pub synthetic_review: f64,
}

const fn default_risk_review() -> f64 {
    0.3
}

const fn default_risk_quarantine() -> f64 {
    0.7
}

const fn default_risk_reject() -> f64 {
    0.9
}

const fn default_assurance_allow() -> f64 {
    0.8
}

const fn default_anomaly_review() -> f64 {
    0.3
}

const fn default_synthetic_review() -> f64 {
    0.7
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            risk_review: default_risk_review(),
            risk_quarantine: default_risk_quarantine(),
            risk_reject: default_risk_reject(),
            assurance_allow: default_assurance_allow(),
            anomaly_review: default_anomaly_review(),
            synthetic_review: default_synthetic_review(),
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    /// The binding decision.
    pub decision: Decision,

    /// Codes of every rule that fired, in evaluation order.
    pub reasons: Vec<String>,

    /// Human-readable explanation of the decisive rule.
    pub rationale: String,
}

/// Evaluates the rule set. Pure and deterministic.
#[must_use]
pub fn evaluate(
    thresholds: &PolicyThresholds,
    features: &Features,
    signals: &Signals,
) -> PolicyOutcome {
    // Each fired rule contributes (code, candidate decision, rationale).
    let mut fired: Vec<(&'static str, Decision, String)> = Vec::new();

    if features.prior_reject_count > 0 || features.pvid_prior_reject_count > 0 {
        fired.push((
            "PRIOR_REJECT",
            Decision::Reject,
            "content or account was previously rejected".to_string(),
        ));
    }

    if features.prior_quarantine_count > 0 || features.pvid_prior_quarantine_count > 0 {
        fired.push((
            "PRIOR_QUARANTINE",
            Decision::Quarantine,
            "content or account was previously quarantined".to_string(),
        ));
    }

    if signals.risk >= thresholds.risk_reject {
        fired.push((
            "RISK_THRESHOLD_REJECT",
            Decision::Reject,
            format!(
                "risk {:.2} at or above reject threshold {:.2}",
                signals.risk, thresholds.risk_reject
            ),
        ));
    } else if signals.risk >= thresholds.risk_quarantine {
        fired.push((
            "RISK_THRESHOLD_QUARANTINE",
            Decision::Quarantine,
            format!(
                "risk {:.2} at or above quarantine threshold {:.2}",
                signals.risk, thresholds.risk_quarantine
            ),
        ));
    } else if signals.risk >= thresholds.risk_review {
        fired.push((
            "RISK_THRESHOLD_REVIEW",
            Decision::Review,
            format!(
                "risk {:.2} at or above review threshold {:.2}",
                signals.risk, thresholds.risk_review
            ),
        ));
    }

    if signals.anomaly < thresholds.anomaly_review {
        fired.push((
            "HIGH_ANOMALY",
            Decision::Review,
            format!(
                "anomaly {:.2} below review threshold {:.2}",
                signals.anomaly, thresholds.anomaly_review
            ),
        ));
    }

    if signals.synthetic_likelihood >= thresholds.synthetic_review {
        fired.push((
            "SYNTHETIC_LIKELIHOOD",
            Decision::Review,
            format!(
                "synthetic likelihood {:.2} requires disclosure review",
                signals.synthetic_likelihood
            ),
        ));
    }

    if signals.assurance >= thresholds.assurance_allow && signals.risk < thresholds.risk_review {
        fired.push((
            "ASSURANCE_THRESHOLD_ALLOW",
            Decision::Allow,
            format!(
                "assurance {:.2} meets allow threshold with low risk",
                signals.assurance
            ),
        ));
    }

    if fired.is_empty() {
        fired.push((
            "DEFAULT_REVIEW",
            Decision::Review,
            "no rule produced a clear outcome".to_string(),
        ));
    }

    // Most severe candidate wins; ties broken by the lattice ordering.
    let decisive = fired
        .iter()
        .max_by_key(|(_, decision, _)| *decision)
        .expect("fired is non-empty");

    PolicyOutcome {
        decision: decisive.1,
        reasons: fired.iter().map(|(code, _, _)| (*code).to_string()).collect(),
        rationale: decisive.2.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Features {
        Features {
            account_age_days: 120,
            upload_velocity_24h: 2,
            device_velocity_24h: 2,
            prior_quarantine_count: 0,
            prior_reject_count: 0,
            pvid_prior_quarantine_count: 0,
            pvid_prior_reject_count: 0,
            pvid_prior_sightings: 0,
        }
    }

    fn signals(risk: f64, assurance: f64) -> Signals {
        Signals {
            risk,
            assurance,
            anomaly: 0.8,
            synthetic_likelihood: 0.1,
            risk_model_version: "risk-v1".to_string(),
            anomaly_model_version: "anomaly-v1".to_string(),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_high_assurance_low_risk_allows() {
        let outcome = evaluate(&PolicyThresholds::default(), &features(), &signals(0.1, 0.9));
        assert_eq!(outcome.decision, Decision::Allow);
        assert_eq!(outcome.reasons, vec!["ASSURANCE_THRESHOLD_ALLOW"]);
    }

    #[test]
    fn test_risk_thresholds() {
        let thresholds = PolicyThresholds::default();
        let f = features();

        let review = evaluate(&thresholds, &f, &signals(0.5, 0.5));
        assert_eq!(review.decision, Decision::Review);
        assert!(review.reasons.contains(&"RISK_THRESHOLD_REVIEW".to_string()));

        let quarantine = evaluate(&thresholds, &f, &signals(0.75, 0.5));
        assert_eq!(quarantine.decision, Decision::Quarantine);

        let reject = evaluate(&thresholds, &f, &signals(0.95, 0.5));
        assert_eq!(reject.decision, Decision::Reject);
    }

    #[test]
    fn test_prior_reject_dominates_high_assurance() {
        let mut f = features();
        f.prior_reject_count = 1;
        let outcome = evaluate(&PolicyThresholds::default(), &f, &signals(0.1, 0.95));
        assert_eq!(outcome.decision, Decision::Reject);
        assert!(outcome.reasons.contains(&"PRIOR_REJECT".to_string()));
        // The allow rule still fired and is reported, but lost the tie-break.
        assert!(outcome.reasons.contains(&"ASSURANCE_THRESHOLD_ALLOW".to_string()));
    }

    #[test]
    fn test_pvid_prior_quarantine_fires() {
        let mut f = features();
        f.pvid_prior_quarantine_count = 2;
        let outcome = evaluate(&PolicyThresholds::default(), &f, &signals(0.1, 0.5));
        assert_eq!(outcome.decision, Decision::Quarantine);
        assert!(outcome.reasons.contains(&"PRIOR_QUARANTINE".to_string()));
    }

    #[test]
    fn test_anomaly_and_synthetic_route_to_review() {
        let f = features();
        let mut s = signals(0.1, 0.5);
        s.anomaly = 0.1;
        let outcome = evaluate(&PolicyThresholds::default(), &f, &s);
        assert_eq!(outcome.decision, Decision::Review);
        assert!(outcome.reasons.contains(&"HIGH_ANOMALY".to_string()));

        let mut s = signals(0.1, 0.5);
        s.synthetic_likelihood = 0.9;
        let outcome = evaluate(&PolicyThresholds::default(), &f, &s);
        assert_eq!(outcome.decision, Decision::Review);
        assert!(outcome.reasons.contains(&"SYNTHETIC_LIKELIHOOD".to_string()));
    }

    #[test]
    fn test_default_review_when_nothing_fires() {
        let outcome = evaluate(&PolicyThresholds::default(), &features(), &signals(0.1, 0.5));
        assert_eq!(outcome.decision, Decision::Review);
        assert_eq!(outcome.reasons, vec!["DEFAULT_REVIEW"]);
    }

    #[test]
    fn test_lattice_order() {
        assert!(Decision::Reject > Decision::Quarantine);
        assert!(Decision::Quarantine > Decision::Review);
        assert!(Decision::Review > Decision::Allow);
    }

    #[test]
    fn test_determinism() {
        let f = features();
        let s = signals(0.42, 0.6);
        let a = evaluate(&PolicyThresholds::default(), &f, &s);
        let b = evaluate(&PolicyThresholds::default(), &f, &s);
        assert_eq!(a, b);
    }

    #[test]
    fn test_decision_wire_form() {
        assert_eq!(
            serde_json::to_string(&Decision::Quarantine).unwrap(),
            "\"QUARANTINE\""
        );
        assert_eq!(Decision::Allow.as_str(), "ALLOW");
    }
}
