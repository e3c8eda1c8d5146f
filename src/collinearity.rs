use anyhow::{Context, Result};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::linalg::pseudo_inverse;
use crate::matrix::RemovalList;
use crate::pipeline::QcThresholds;
use crate::types::ActiveSet;

#[derive(Debug, Clone)]
pub struct VifStats {
    pub vif: Vec<f64>,
    /// Number of eigenvalues kept in the pseudo-inverse.
    pub effective_rank: usize,
}

/// Variance inflation factor of every variant in `r`.
///
/// The multiple R² of variant `j` comes from the diagonal of the eigen
/// pseudo-inverse when that row of the inverse reproduces the identity, and
/// is never allowed to fall below the largest pairwise r² of the variant.
pub fn variance_inflation(r: &Array2<f64>, thresholds: &QcThresholds) -> Result<VifStats> {
    let m = r.nrows();
    let pinv = pseudo_inverse(r, thresholds.eigen_zero).context("eigendecompose LD matrix")?;
    let r_inv = &pinv.inverse;

    let vif = (0..m)
        .into_par_iter()
        .map(|j| {
            let q_diag = r_inv.column(j).dot(&r.row(j));
            let mut multi_rsq = if (q_diag - 1.0).abs() < thresholds.qdiag_tolerance {
                1.0 - 1.0 / r_inv[(j, j)]
            } else {
                1.0
            };
            multi_rsq = multi_rsq.min(1.0);

            let max_rsq = r
                .column(j)
                .iter()
                .enumerate()
                .filter(|(k, _)| *k != j)
                .map(|(_, v)| v * v)
                .fold(0.0, f64::max);
            if multi_rsq < max_rsq {
                multi_rsq = max_rsq;
            }

            if (1.0 - multi_rsq).abs() < thresholds.vif_unit_tolerance {
                thresholds.vif_ceiling
            } else {
                (1.0 / (1.0 - multi_rsq)).abs()
            }
        })
        .collect();

    Ok(VifStats {
        vif,
        effective_rank: pinv.rank,
    })
}

/// Position of the largest VIF above the threshold; the first one wins ties.
pub fn worst_vif(r: &Array2<f64>, thresholds: &QcThresholds) -> Result<Option<usize>> {
    let stats = variance_inflation(r, thresholds)?;
    let mut max = 0.0;
    let mut pos = None;
    for (j, &v) in stats.vif.iter().enumerate() {
        if v > max && v > thresholds.vif_threshold {
            max = v;
            pos = Some(j);
        }
    }
    if let Some(j) = pos {
        debug!(
            "VIF {max:.3} at position {j} (effective rank {} of {})",
            stats.effective_rank,
            r.nrows()
        );
    }
    Ok(pos)
}

/// Drops the worst collinear variant, one at a time, until every VIF is at or
/// below the threshold. Returns the removed variants in removal order.
pub fn reduce_collinearity(set: &mut ActiveSet, thresholds: &QcThresholds) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    while !set.is_empty() {
        let Some(pos) = worst_vif(set.correlation(), thresholds)? else {
            break;
        };
        removed.push(set.variants()[pos].name.clone());
        set.remove(&RemovalList::single(pos));
    }
    Ok(removed)
}
