use anyhow::Result;
use ndarray::Array2;

pub fn ensure_square(matrix: &Array2<f64>, name: &str) -> Result<()> {
    let (rows, cols) = matrix.dim();
    if rows == 0 {
        return Err(anyhow::anyhow!("{name} must not be empty"));
    }
    if rows != cols {
        return Err(anyhow::anyhow!(
            "{name} has {rows} rows but {cols} columns"
        ));
    }
    Ok(())
}

pub fn to_array2(matrix: &[Vec<f64>]) -> Result<Array2<f64>> {
    let n = matrix.len();
    let m = matrix.first().map(|row| row.len()).unwrap_or(0);
    let mut data = Vec::with_capacity(n * m);
    for row in matrix {
        if row.len() != m {
            return Err(anyhow::anyhow!("Matrix is not rectangular"));
        }
        data.extend_from_slice(row);
    }
    Array2::from_shape_vec((n, m), data).map_err(|e| anyhow::anyhow!(e.to_string()))
}

/// Sorted, deduplicated positions into the current indexing of an active set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalList(Vec<usize>);

impl RemovalList {
    pub fn from_positions(mut positions: Vec<usize>) -> Self {
        positions.sort_unstable();
        positions.dedup();
        Self(positions)
    }

    pub fn single(pos: usize) -> Self {
        Self(vec![pos])
    }

    pub fn positions(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positions in `0..n` not in the list, in ascending order.
    pub fn complement(&self, n: usize) -> Vec<usize> {
        let mut keep = Vec::with_capacity(n.saturating_sub(self.0.len()));
        let mut removed = self.0.iter().peekable();
        for pos in 0..n {
            if removed.peek() == Some(&&pos) {
                removed.next();
            } else {
                keep.push(pos);
            }
        }
        keep
    }
}

pub fn submatrix(matrix: &Array2<f64>, keep: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((keep.len(), keep.len()), |(i, j)| matrix[(keep[i], keep[j])])
}
