use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

/// Variant-by-variant correlation from a samples × variants matrix whose
/// columns are already mean-centered.
///
/// Entries whose columns have no variance are set to zero, which also zeroes
/// the diagonal of a monomorphic variant.
pub fn correlation_matrix(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let sumsq: Array1<f64> = x.axis_iter(Axis(1)).map(|col| col.dot(&col)).collect();
    let mut c = x.t().dot(&x);
    Zip::indexed(&mut c).par_for_each(|(i, j), value| {
        let denom = (sumsq[i] * sumsq[j]).sqrt();
        *value = if denom > 0.0 { *value / denom } else { 0.0 };
    });

    // gemm does not promise bitwise symmetry
    let n = c.nrows();
    for i in 1..n {
        for j in 0..i {
            c[(j, i)] = c[(i, j)];
        }
    }
    c
}
