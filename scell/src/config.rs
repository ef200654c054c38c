use crate::cluster::ClusterConfig;
use crate::dim_red::rand_svd::RandSvd;
use crate::error::{Error, Result};
use crate::integrate::IntegrateConfig;
use crate::normalize::NormConfig;
use crate::qc::QcConfig;
use serde::{Deserialize, Serialize};

/// Full pipeline configuration, deserializable from JSON. Every field has a
/// default so a partial config file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quality-control thresholds.
    pub qc: QcConfig,
    /// Normalization and HVG settings.
    pub norm: NormConfig,
    /// Clustering settings.
    pub cluster: ClusterConfig,
    /// Batch-balanced integration settings.
    pub integrate: IntegrateConfig,
    /// Randomized SVD solver settings; the projection seed comes from
    /// `seed`.
    pub pca: RandSvd,
    /// Principal components kept (clamped to the data when larger).
    pub n_pcs: usize,
    /// Neighbors per cell in the k-NN graph.
    pub n_neighbors: usize,
    /// Seed shared by all stochastic stages.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            qc: QcConfig::default(),
            norm: NormConfig::default(),
            cluster: ClusterConfig::default(),
            integrate: IntegrateConfig::default(),
            pca: RandSvd::default(),
            n_pcs: 50,
            n_neighbors: 15,
            seed: 0,
        }
    }
}

impl PipelineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.qc.validate()?;
        self.norm.validate()?;
        self.integrate.validate()?;
        if self.pca.l_multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "pca l_multiplier ({}) must be at least 1",
                self.pca.l_multiplier
            )));
        }
        if self.n_pcs == 0 {
            return Err(Error::Configuration("n_pcs must be at least 1".to_string()));
        }
        if self.n_neighbors == 0 {
            return Err(Error::Configuration("n_neighbors must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"n_pcs": 20, "qc": {"max_pct_mito": 5.0}, "pca": {"n_iter": 4}}"#,
        )
        .unwrap();
        assert_eq!(cfg.n_pcs, 20);
        assert_eq!(cfg.qc.max_pct_mito, 5.0);
        assert_eq!(cfg.pca.n_iter, 4);
        // untouched fields keep their defaults
        assert_eq!(cfg.n_neighbors, 15);
        assert_eq!(cfg.qc.min_genes_per_cell, 200);
        assert_eq!(cfg.pca.l_multiplier, 2.0);
    }

    #[test]
    fn test_pca_settings_validated() {
        let mut cfg = PipelineConfig::default();
        cfg.pca.l_multiplier = 0.5;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_section_rejected() {
        let cfg = PipelineConfig {
            n_pcs: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
