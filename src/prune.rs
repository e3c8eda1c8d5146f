use std::collections::HashMap;

use ndarray::Array2;

use crate::matrix::RemovalList;

/// Greedy pruning of variant pairs with `|r| > cutoff`.
///
/// Of every offending pair the member taking part in more offending pairs is
/// removed; on a tie the later variant goes and the earlier one is kept.
pub fn prune_correlated(corr: &Array2<f64>, cutoff: f64) -> RemovalList {
    let n = corr.nrows();
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in 0..i {
            if corr[(i, j)].abs() > cutoff {
                pairs.push((i, j));
            }
        }
    }
    if pairs.is_empty() {
        return RemovalList::default();
    }

    let mut incidence: HashMap<usize, usize> = HashMap::new();
    for &(i, j) in &pairs {
        *incidence.entry(i).or_default() += 1;
        *incidence.entry(j).or_default() += 1;
    }

    let removed = pairs
        .into_iter()
        .map(|(i, j)| {
            if incidence[&i] < incidence[&j] { j } else { i }
        })
        .collect();
    RemovalList::from_positions(removed)
}
