use anyhow::Result;
use ndarray::{Array1, Array2};
use ndarray_linalg::{DeterminantC, Eigh, FactorizeC, InverseC, UPLO};

/// Eigen pseudo-inverse of a symmetric matrix together with its effective rank.
#[derive(Debug, Clone)]
pub struct PseudoInverse {
    pub inverse: Array2<f64>,
    pub rank: usize,
}

/// Rebuilds `U diag(1/d) Uᵗ`, dropping eigenvalues below `zero_below`.
pub fn inverse_from_eigh(
    eigvals: &Array1<f64>,
    eigvecs: &Array2<f64>,
    zero_below: f64,
) -> PseudoInverse {
    let mut rank = 0usize;
    let inv_vals = eigvals.mapv(|v| {
        if v < zero_below {
            0.0
        } else {
            rank += 1;
            1.0 / v
        }
    });
    let inv_diag = Array2::from_diag(&inv_vals);
    PseudoInverse {
        inverse: eigvecs.dot(&inv_diag).dot(&eigvecs.t()),
        rank,
    }
}

pub fn pseudo_inverse(matrix: &Array2<f64>, zero_below: f64) -> Result<PseudoInverse> {
    let (eigvals, eigvecs) = matrix.eigh(UPLO::Lower)?;
    Ok(inverse_from_eigh(&eigvals, &eigvecs, zero_below))
}

/// Inverse and log-determinant of a symmetric positive-definite matrix.
///
/// Returns `None` when the factorization fails, i.e. the matrix is not
/// positive definite.
pub fn inverse_logdet(matrix: &Array2<f64>) -> Option<(Array2<f64>, f64)> {
    let factor = matrix.factorizec(UPLO::Lower).ok()?;
    let logdet = factor.ln_detc();
    if !logdet.is_finite() {
        return None;
    }
    let inverse = factor.invc().ok()?;
    Some((inverse, logdet))
}
