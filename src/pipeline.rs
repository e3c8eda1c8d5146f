use anyhow::Result;
use ndarray::ArrayView2;
use tracing::{debug, warn};

use crate::collinearity::reduce_collinearity;
use crate::correlation::correlation_matrix;
use crate::error::MbatError;
use crate::prune::prune_correlated;
use crate::qc::{check_positive, check_range_f64};
use crate::set_test::{SingularPolicy, set_test};
use crate::sign_mismatch::detect_sign_mismatch;
use crate::types::{ActiveSet, MismatchPair, StageCounts, TestResult, VariantRecord};

/// Policy constants of the QC stages.
#[derive(Debug, Clone, PartialEq)]
pub struct QcThresholds {
    /// Normal quantile bounding the weighted-correlation band of the sign filter.
    pub sign_z: f64,
    /// Largest tolerated pairwise r².
    pub max_rsq: f64,
    pub vif_threshold: f64,
    /// Eigenvalues below this are structural zeros of the pseudo-inverse.
    pub eigen_zero: f64,
    pub qdiag_tolerance: f64,
    pub vif_unit_tolerance: f64,
    pub vif_ceiling: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            sign_z: 1.96,
            max_rsq: 0.9,
            vif_threshold: 10.0,
            eigen_zero: 1e-5,
            qdiag_tolerance: 0.01,
            vif_unit_tolerance: 1e-5,
            vif_ceiling: 1e8,
        }
    }
}

impl QcThresholds {
    pub fn pairwise_cutoff(&self) -> f64 {
        self.max_rsq.sqrt()
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        check_range_f64(self.max_rsq, 0.0, 1.0, false, "max-rsq")?;
        if !(self.sign_z.is_finite() && self.sign_z >= 0.0) {
            return Err(MbatError::InvalidArgument(
                "sign-z should be a non-negative number".to_string(),
            ));
        }
        if !(self.vif_threshold.is_finite() && self.vif_threshold >= 1.0) {
            return Err(MbatError::InvalidArgument(
                "vif-threshold should be at least 1".to_string(),
            ));
        }
        for (value, name) in [
            (self.eigen_zero, "eigen-zero"),
            (self.qdiag_tolerance, "qdiag-tolerance"),
            (self.vif_unit_tolerance, "vif-unit-tolerance"),
            (self.vif_ceiling, "vif-ceiling"),
        ] {
            check_positive(value, name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub thresholds: QcThresholds,
    pub singular: SingularPolicy,
}

/// Everything one pass of the pipeline produces for a set.
#[derive(Debug, Clone)]
pub struct SetReport {
    pub result: TestResult,
    pub counts: StageCounts,
    pub mismatches: Vec<MismatchPair>,
    pub kept: Vec<String>,
}

impl SetReport {
    pub fn summary_line(&self) -> String {
        format!(
            "Initial snps {} BetaInv {} Pairwise {} Collinearity {} Chisq {} Pvalue {}",
            self.counts.initial,
            self.counts.after_sign,
            self.counts.after_pairwise,
            self.counts.after_collinearity,
            self.result.chisq,
            self.result.pvalue
        )
    }
}

/// Sign filter, pairwise pruning, collinearity reduction and the joint test,
/// in that order.
pub fn run_pipeline(mut set: ActiveSet, config: &PipelineConfig) -> Result<SetReport> {
    let thresholds = &config.thresholds;
    let mut counts = StageCounts {
        initial: set.len(),
        ..Default::default()
    };

    let sign = detect_sign_mismatch(&set, thresholds.sign_z);
    debug!(
        "off-diagonal weighted LD mean {} sd {}; {} mismatched pair(s)",
        sign.off_mean,
        sign.off_sd,
        sign.pairs.len()
    );
    set.remove(&sign.removal);
    counts.after_sign = set.len();
    if set.is_empty() {
        warn!(
            "all {} variants removed from the set due to beta/LD mismatch",
            counts.initial
        );
        return Ok(SetReport {
            result: TestResult::skipped(0),
            counts,
            mismatches: sign.pairs,
            kept: Vec::new(),
        });
    }

    let pruned = prune_correlated(set.correlation(), thresholds.pairwise_cutoff());
    set.remove(&pruned);
    counts.after_pairwise = set.len();

    let collinear = reduce_collinearity(&mut set, thresholds)?;
    if !collinear.is_empty() {
        debug!("removed collinear variants: {}", collinear.join(" "));
    }
    counts.after_collinearity = set.len();

    let result = set_test(&set, config.singular, thresholds.eigen_zero)?;
    Ok(SetReport {
        result,
        counts,
        mismatches: sign.pairs,
        kept: set.names(),
    })
}

/// Runs the pipeline on a samples × variants matrix of centered genotypes.
pub fn run_from_genotypes(
    x: ArrayView2<'_, f64>,
    variants: Vec<VariantRecord>,
    config: &PipelineConfig,
) -> Result<SetReport> {
    let corr = correlation_matrix(x);
    let set = ActiveSet::new(variants, corr)?;
    run_pipeline(set, config)
}
