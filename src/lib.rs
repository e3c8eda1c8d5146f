//! Set-based multivariate association test (mBAT) on GWAS summary statistics.
//!
//! Per variant set the pipeline builds an LD correlation matrix from a
//! reference panel, drops variants whose LD sign contradicts their effect
//! directions, prunes near-duplicate pairs, removes collinear variants by
//! VIF, and tests `betaᵗ V⁻¹ beta` against a chi-square distribution.

pub mod error;
pub mod logging;
pub mod types;

pub mod io;
pub mod linalg;
pub mod matrix;
pub mod parallel;
pub mod qc;

pub mod collinearity;
pub mod correlation;
pub mod pipeline;
pub mod prune;
pub mod sign_mismatch;

pub mod assoc;
pub mod mbat;
pub mod reference;
pub mod sets;
