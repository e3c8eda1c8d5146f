//! LD reference panel: variant metadata in PLINK `.bim` layout plus a
//! samples × variants genotype matrix whose columns follow the `.bim` order.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use tracing::info;

use crate::error::MbatError;
use crate::io::{open_lines, read_numeric_matrix};

#[derive(Debug, Clone, PartialEq)]
pub struct RefVariant {
    /// Chromosome code, 0 when unknown.
    pub chr: i32,
    pub name: String,
    /// Base-pair position, 0 when unknown.
    pub bp: i64,
    pub allele1: String,
    pub allele2: String,
    /// Frequency column of the variant table when present. Carried metadata;
    /// centering uses the genotype column means.
    pub freq: Option<f64>,
}

impl RefVariant {
    pub fn has_position(&self) -> bool {
        self.chr > 0 && self.bp > 0
    }
}

#[derive(Debug, Clone)]
pub struct ReferencePanel {
    variants: Vec<RefVariant>,
    index: HashMap<String, usize>,
    genotypes: Array2<f64>,
}

impl ReferencePanel {
    /// Builds a panel from metadata and a samples × variants matrix.
    /// Columns are mean-centered; missing genotypes are set to the mean.
    pub fn from_parts(variants: Vec<RefVariant>, mut genotypes: Array2<f64>) -> Result<Self> {
        if variants.len() != genotypes.ncols() {
            return Err(MbatError::Dimension(format!(
                "{} reference variants but {} genotype columns",
                variants.len(),
                genotypes.ncols()
            ))
            .into());
        }
        let mut index = HashMap::with_capacity(variants.len());
        for (i, v) in variants.iter().enumerate() {
            if index.insert(v.name.clone(), i).is_some() {
                return Err(MbatError::InvalidArgument(format!(
                    "duplicate variant {} in reference panel",
                    v.name
                ))
                .into());
            }
        }

        for mut col in genotypes.axis_iter_mut(Axis(1)) {
            let (sum, n) = col
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            let mean = if n > 0 { sum / n as f64 } else { 0.0 };
            col.mapv_inplace(|v| if v.is_finite() { v - mean } else { 0.0 });
        }

        Ok(Self {
            variants,
            index,
            genotypes,
        })
    }

    pub fn load(bim: &Path, geno: &Path) -> Result<Self> {
        let variants = read_bim(bim)?;
        let (names, matrix) = read_numeric_matrix(geno)
            .with_context(|| format!("read reference genotypes {}", geno.display()))?;
        let columns: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(j, name)| (name.as_str(), j))
            .collect();

        let mut genotypes = Array2::<f64>::zeros((matrix.nrows(), variants.len()));
        for (k, v) in variants.iter().enumerate() {
            let j = *columns.get(v.name.as_str()).ok_or_else(|| {
                MbatError::InvalidArgument(format!(
                    "variant {} from {} has no genotype column in {}",
                    v.name,
                    bim.display(),
                    geno.display()
                ))
            })?;
            genotypes.column_mut(k).assign(&matrix.column(j));
        }
        info!(
            "{} reference variants and {} samples read from {}",
            variants.len(),
            genotypes.nrows(),
            geno.display()
        );
        Self::from_parts(variants, genotypes)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variants(&self) -> &[RefVariant] {
        &self.variants
    }

    pub fn variant(&self, idx: usize) -> &RefVariant {
        &self.variants[idx]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Genotype columns for `(panel index, flipped)` pairs; flipped columns
    /// are negated so they are coded on the other allele.
    pub fn genotypes(&self, columns: &[(usize, bool)]) -> Array2<f64> {
        let mut x = Array2::<f64>::zeros((self.genotypes.nrows(), columns.len()));
        for (k, &(idx, flipped)) in columns.iter().enumerate() {
            let src = self.genotypes.column(idx);
            if flipped {
                x.column_mut(k).assign(&src.mapv(|v| -v));
            } else {
                x.column_mut(k).assign(&src);
            }
        }
        x
    }
}

pub fn read_bim(path: &Path) -> Result<Vec<RefVariant>> {
    let reader = open_lines(path)?;
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(MbatError::MalformedRecord {
                path: path.display().to_string(),
                line: lineno + 1,
                content: line.clone(),
            }
            .into());
        }
        let bp = fields[3].parse::<i64>().map_err(|_| {
            MbatError::Parse(format!(
                "bad base-pair position \"{}\" at {}:{}",
                fields[3],
                path.display(),
                lineno + 1
            ))
        })?;
        let freq = fields
            .get(6)
            .and_then(|f| f.parse::<f64>().ok())
            .filter(|f| f.is_finite());
        out.push(RefVariant {
            chr: parse_chromosome(fields[0]),
            name: fields[1].to_string(),
            bp,
            allele1: fields[4].to_ascii_uppercase(),
            allele2: fields[5].to_ascii_uppercase(),
            freq,
        });
    }
    if out.is_empty() {
        return Err(MbatError::InvalidArgument(format!(
            "no variants in reference file {}",
            path.display()
        ))
        .into());
    }
    Ok(out)
}

/// PLINK chromosome codes; anything unrecognised is 0.
pub fn parse_chromosome(code: &str) -> i32 {
    let code = code.strip_prefix("chr").unwrap_or(code);
    match code.to_ascii_uppercase().as_str() {
        "X" => 23,
        "Y" => 24,
        "XY" => 25,
        "MT" | "M" => 26,
        other => other.parse::<i32>().ok().filter(|c| *c > 0).unwrap_or(0),
    }
}
