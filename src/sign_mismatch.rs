//! Removal of variant pairs whose LD sign disagrees with their effect directions.
//!
//! For a pair in LD the product `r_ij * beta_i * beta_j` is expected to be
//! positive. Pairs whose weighted correlation is negative and falls more than
//! `z` standard deviations below the mean of all off-diagonal weighted
//! correlations are treated as allele-coding errors, and both variants are
//! dropped.

use crate::matrix::RemovalList;
use crate::types::{ActiveSet, MismatchPair};

#[derive(Debug, Clone, Default)]
pub struct SignMismatch {
    pub removal: RemovalList,
    pub pairs: Vec<MismatchPair>,
    pub off_mean: f64,
    pub off_sd: f64,
}

pub fn detect_sign_mismatch(set: &ActiveSet, z: f64) -> SignMismatch {
    let n = set.len();
    let betas = set.betas();
    let c = set.correlation();
    let weighted = |i: usize, j: usize| c[(i, j)] * betas[i] * betas[j];

    let (off_mean, off_sd) = off_diagonal_moments(n, &weighted);

    let mut positions = Vec::new();
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in 0..i {
            let vr = weighted(i, j);
            if vr < 0.0 && vr - off_mean < -z * off_sd {
                positions.push(i);
                positions.push(j);
                pairs.push(MismatchPair {
                    first: set.variants()[i].clone(),
                    second: set.variants()[j].clone(),
                    r: c[(i, j)],
                });
            }
        }
    }

    SignMismatch {
        removal: RemovalList::from_positions(positions),
        pairs,
        off_mean,
        off_sd,
    }
}

/// Mean and sample standard deviation of the strictly lower triangle.
///
/// With a single pair there is no spread to compare against, so the band
/// collapses to zero and any negative weighted correlation is flagged.
fn off_diagonal_moments(n: usize, weighted: &impl Fn(usize, usize) -> f64) -> (f64, f64) {
    let count = n * n.saturating_sub(1) / 2;
    if count < 2 {
        return (0.0, 0.0);
    }

    let mut sum = 0.0;
    for i in 1..n {
        for j in 0..i {
            sum += weighted(i, j);
        }
    }
    let mean = sum / count as f64;

    let mut ss = 0.0;
    for i in 1..n {
        for j in 0..i {
            let d = weighted(i, j) - mean;
            ss += d * d;
        }
    }
    (mean, (ss / (count as f64 - 1.0)).sqrt())
}
