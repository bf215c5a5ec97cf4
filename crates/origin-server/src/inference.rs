//! Risk signal inference.
//!
//! The scorer is a deterministic heuristic over the feature vector and
//! submission metadata; model training happens elsewhere, only the
//! inference contract matters here: scores in [0,1], model version strings
//! recorded on the signals, and a status surface reporting what is loaded.
//! When a model artifact is configured its SHA-256 is computed once at
//! startup and reported for provenance.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use origin_core::crypto::hash::hex_encode;
use origin_core::policy::{Features, Signals};

/// Version string recorded for the risk scorer.
pub const RISK_MODEL_VERSION: &str = "origin-risk-v1.2";

/// Version string recorded for the anomaly scorer.
pub const ANOMALY_MODEL_VERSION: &str = "origin-anomaly-v1.1";

/// Status surfaced at `GET /v1/models/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    /// Loaded model versions.
    pub loaded_versions: Vec<String>,

    /// SHA-256 of the configured model artifact, when one exists.
    pub file_sha256: Option<String>,

    /// When the service was initialized.
    pub loaded_at: DateTime<Utc>,
}

/// The inference service.
pub struct InferenceService {
    file_sha256: Option<String>,
    loaded_at: DateTime<Utc>,
}

impl InferenceService {
    /// Initializes the service, hashing the model artifact if configured.
    #[must_use]
    pub fn new(model_path: Option<&Path>) -> Self {
        let file_sha256 = model_path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => Some(hex_encode(&Sha256::digest(&bytes))),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "model artifact not readable");
                None
            }
        });

        Self {
            file_sha256,
            loaded_at: Utc::now(),
        }
    }

    /// Produces the signal vector for a submission.
    ///
    /// Pure in its inputs: identical features and metadata yield identical
    /// scores, which keeps certificate hashes replayable.
    #[must_use]
    pub fn score(
        &self,
        features: &Features,
        metadata: Option<&Map<String, Value>>,
        now: DateTime<Utc>,
    ) -> Signals {
        let velocity_pressure = f64::min(0.4, features.upload_velocity_24h as f64 * 0.04)
            + f64::min(0.3, features.device_velocity_24h as f64 * 0.03);

        let newness = match features.account_age_days {
            0 => 0.15,
            1..=7 => 0.08,
            _ => 0.0,
        };

        let history = if features.prior_quarantine_count > 0
            || features.pvid_prior_quarantine_count > 0
        {
            0.2
        } else {
            0.0
        };

        let risk = clamp(0.05 + velocity_pressure + newness + history);

        let age_factor = f64::min(0.5, features.account_age_days as f64 / 365.0);
        let clean_history = if features.prior_quarantine_count == 0
            && features.prior_reject_count == 0
            && features.pvid_prior_sightings > 0
        {
            0.15
        } else {
            0.0
        };
        let assurance = clamp(0.25 + age_factor + clean_history - history);

        // Lower anomaly = more anomalous; bursts depress the score.
        let anomaly = clamp(
            1.0 - (features.upload_velocity_24h as f64 / 25.0)
                - (features.device_velocity_24h as f64 / 25.0),
        );

        let synthetic_likelihood = metadata
            .map_or(0.05, |m| match m.get("ai_generated") {
                Some(Value::Bool(true)) => 0.95,
                Some(Value::Bool(false)) => 0.02,
                _ => 0.05,
            });

        Signals {
            risk,
            assurance,
            anomaly,
            synthetic_likelihood,
            risk_model_version: RISK_MODEL_VERSION.to_string(),
            anomaly_model_version: ANOMALY_MODEL_VERSION.to_string(),
            computed_at: now,
        }
    }

    /// The status surface.
    #[must_use]
    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            loaded_versions: vec![
                RISK_MODEL_VERSION.to_string(),
                ANOMALY_MODEL_VERSION.to_string(),
            ],
            file_sha256: self.file_sha256.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn features() -> Features {
        Features {
            account_age_days: 100,
            upload_velocity_24h: 1,
            device_velocity_24h: 1,
            prior_quarantine_count: 0,
            prior_reject_count: 0,
            pvid_prior_quarantine_count: 0,
            pvid_prior_reject_count: 0,
            pvid_prior_sightings: 0,
        }
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let service = InferenceService::new(None);
        let mut f = features();
        f.upload_velocity_24h = 500;
        f.device_velocity_24h = 500;
        f.prior_quarantine_count = 10;
        let signals = service.score(&f, None, Utc::now());

        for score in [
            signals.risk,
            signals.assurance,
            signals.anomaly,
            signals.synthetic_likelihood,
        ] {
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let service = InferenceService::new(None);
        let now = Utc::now();
        let a = service.score(&features(), None, now);
        let b = service.score(&features(), None, now);
        assert_eq!(a, b);
    }

    #[test]
    fn test_velocity_raises_risk_and_depresses_anomaly() {
        let service = InferenceService::new(None);
        let calm = service.score(&features(), None, Utc::now());

        let mut burst = features();
        burst.upload_velocity_24h = 20;
        burst.device_velocity_24h = 20;
        let bursty = service.score(&burst, None, Utc::now());

        assert!(bursty.risk > calm.risk);
        assert!(bursty.anomaly < calm.anomaly);
    }

    #[test]
    fn test_ai_disclosure_drives_synthetic_likelihood() {
        let service = InferenceService::new(None);
        let metadata = match json!({"ai_generated": true}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let signals = service.score(&features(), Some(&metadata), Utc::now());
        assert!(signals.synthetic_likelihood > 0.9);
    }

    #[test]
    fn test_model_versions_recorded() {
        let service = InferenceService::new(None);
        let signals = service.score(&features(), None, Utc::now());
        assert_eq!(signals.risk_model_version, RISK_MODEL_VERSION);
        assert_eq!(signals.anomaly_model_version, ANOMALY_MODEL_VERSION);

        let status = service.status();
        assert_eq!(status.loaded_versions.len(), 2);
        assert!(status.file_sha256.is_none());
    }

    #[test]
    fn test_model_file_hash_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("risk_model.bin");
        std::fs::write(&path, b"model bytes").unwrap();

        let service = InferenceService::new(Some(&path));
        let status = service.status();
        assert_eq!(
            status.file_sha256.as_deref(),
            // SHA-256 of "model bytes"
            Some(hex_encode(&Sha256::digest(b"model bytes")).as_str())
        );
    }
}
