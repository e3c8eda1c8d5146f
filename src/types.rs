use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::error::MbatError;
use crate::matrix::{RemovalList, ensure_square, submatrix};

/// Per-variant summary statistics carried through the QC stages.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub name: String,
    pub allele: String,
    pub beta: f64,
    pub se: f64,
}

impl VariantRecord {
    pub fn new(name: impl Into<String>, allele: impl Into<String>, beta: f64, se: f64) -> Self {
        Self {
            name: name.into(),
            allele: allele.into(),
            beta,
            se,
        }
    }
}

/// The surviving variants of one set together with their correlation matrix.
///
/// Row/column `k` of the matrix always belongs to `variants[k]`; every removal
/// goes through [`ActiveSet::retain_positions`] so the two never drift apart.
#[derive(Debug, Clone)]
pub struct ActiveSet {
    variants: Vec<VariantRecord>,
    corr: Array2<f64>,
}

impl ActiveSet {
    pub fn new(variants: Vec<VariantRecord>, corr: Array2<f64>) -> Result<Self> {
        if !variants.is_empty() {
            ensure_square(&corr, "correlation matrix")?;
        }
        if corr.nrows() != variants.len() {
            return Err(MbatError::Dimension(format!(
                "correlation matrix has {} rows but {} variants were supplied",
                corr.nrows(),
                variants.len()
            ))
            .into());
        }
        Ok(Self { variants, corr })
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variants(&self) -> &[VariantRecord] {
        &self.variants
    }

    pub fn correlation(&self) -> &Array2<f64> {
        &self.corr
    }

    pub fn betas(&self) -> Array1<f64> {
        self.variants.iter().map(|v| v.beta).collect()
    }

    pub fn standard_errors(&self) -> Array1<f64> {
        self.variants.iter().map(|v| v.se).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).collect()
    }

    /// Keeps the variants at `keep` (ascending positions) and the matching
    /// correlation submatrix.
    pub fn retain_positions(&mut self, keep: &[usize]) {
        self.corr = submatrix(&self.corr, keep);
        let mut flags = vec![false; self.variants.len()];
        for &pos in keep {
            flags[pos] = true;
        }
        self.variants = std::mem::take(&mut self.variants)
            .into_iter()
            .zip(flags)
            .filter_map(|(variant, kept)| kept.then_some(variant))
            .collect();
    }

    pub fn remove(&mut self, removal: &RemovalList) {
        if removal.is_empty() {
            return;
        }
        let keep = removal.complement(self.len());
        self.retain_positions(&keep);
    }
}

/// Outcome of the joint test for one set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestResult {
    pub chisq: f64,
    pub pvalue: f64,
    pub tested: usize,
    /// Rank of the inverse behind the statistic; below `tested` only for a
    /// degraded result. Degrees of freedom stay at `tested`.
    pub rank: usize,
    /// The weighted covariance matrix could not be factorized and the
    /// statistic came from the pseudo-inverse fallback.
    pub degraded: bool,
}

impl TestResult {
    pub const SKIPPED_PVALUE: f64 = 2.0;

    pub fn skipped(tested: usize) -> Self {
        Self {
            chisq: 0.0,
            pvalue: Self::SKIPPED_PVALUE,
            tested,
            rank: 0,
            degraded: false,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.pvalue <= 1.5
    }
}

/// Surviving variant counts after each QC stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub initial: usize,
    pub after_sign: usize,
    pub after_pairwise: usize,
    pub after_collinearity: usize,
}

/// A variant pair whose LD sign contradicts the sign of its effect product.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchPair {
    pub first: VariantRecord,
    pub second: VariantRecord,
    pub r: f64,
}
