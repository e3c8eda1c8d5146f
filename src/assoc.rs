use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::MbatError;
use crate::io::open_lines;
use crate::reference::ReferencePanel;
use crate::types::VariantRecord;

const ASSOC_FIELDS: usize = 8;

/// One association record matched to the reference panel.
#[derive(Debug, Clone, PartialEq)]
pub struct AssocVariant {
    pub panel_index: usize,
    pub name: String,
    /// Effect allele of the association study.
    pub allele: String,
    pub beta: f64,
    pub se: f64,
    pub pvalue: Option<f64>,
    /// Effect-allele frequency as reported. Carried with the record; the test
    /// itself takes allele frequencies from the panel genotypes.
    pub freq: Option<f64>,
    /// The effect allele is the panel's second allele, so the panel genotype
    /// column is negated for this variant.
    pub flipped: bool,
}

impl AssocVariant {
    pub fn record(&self) -> VariantRecord {
        VariantRecord::new(self.name.clone(), self.allele.clone(), self.beta, self.se)
    }
}

/// Association results in reference-panel order.
#[derive(Debug, Clone, Default)]
pub struct AssocTable {
    variants: Vec<AssocVariant>,
    index: HashMap<String, usize>,
    pub not_in_reference: usize,
    pub allele_mismatch: usize,
    pub duplicates: usize,
}

impl AssocTable {
    pub fn variants(&self) -> &[AssocVariant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, idx: usize) -> &AssocVariant {
        &self.variants[idx]
    }
}

pub fn read_assoc(path: &Path, panel: &ReferencePanel) -> Result<AssocTable> {
    info!("Reading SNP association results from {}", path.display());
    let reader = open_lines(path)?;
    parse_assoc(reader, &path.display().to_string(), panel)
}

/// Parses whitespace-delimited association lines
/// `name A1 A2 freq beta se p n`. Any line without exactly eight fields is an
/// error; variants absent from the panel are skipped.
pub fn parse_assoc<R: BufRead>(reader: R, source: &str, panel: &ReferencePanel) -> Result<AssocTable> {
    let mut table = AssocTable::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read {source}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != ASSOC_FIELDS {
            return Err(MbatError::MalformedRecord {
                path: source.to_string(),
                line: lineno + 1,
                content: line.clone(),
            }
            .into());
        }

        let name = fields[0];
        let Some(panel_index) = panel.find(name) else {
            table.not_in_reference += 1;
            continue;
        };
        let reference = panel.variant(panel_index);
        let a1 = fields[1].to_ascii_uppercase();
        let a2 = fields[2].to_ascii_uppercase();
        let known = |a: &str| a == reference.allele1 || a == reference.allele2;
        if !known(&a1) || !known(&a2) {
            warn!(
                "allele mismatch for {name}: {a1}/{a2} in association data, {}/{} in reference",
                reference.allele1, reference.allele2
            );
            table.allele_mismatch += 1;
            continue;
        }
        if !seen.insert(name.to_string()) {
            table.duplicates += 1;
            continue;
        }

        let number = |idx: usize, what: &str| -> Result<f64> {
            fields[idx].parse::<f64>().map_err(|_| {
                MbatError::Parse(format!(
                    "bad {what} \"{}\" for {name} at {source}:{}",
                    fields[idx],
                    lineno + 1
                ))
                .into()
            })
        };
        let beta = number(4, "beta")?;
        let se = number(5, "standard error")?;
        let pvalue = optional_number(fields[6]);
        let freq = optional_number(fields[3]);

        rows.push(AssocVariant {
            panel_index,
            name: name.to_string(),
            flipped: a1 != reference.allele1,
            allele: a1,
            beta,
            se,
            pvalue,
            freq,
        });
    }

    if rows.is_empty() {
        return Err(MbatError::InvalidArgument(format!(
            "no SNP from {source} is included in the analysis"
        ))
        .into());
    }

    rows.sort_by_key(|v| v.panel_index);
    table.index = rows
        .iter()
        .enumerate()
        .map(|(i, v)| (v.name.clone(), i))
        .collect();
    table.variants = rows;
    info!(
        "Association results of {} SNPs have been included ({} not in reference, {} allele mismatches, {} duplicates)",
        table.len(),
        table.not_in_reference,
        table.allele_mismatch,
        table.duplicates
    );
    Ok(table)
}

fn optional_number(token: &str) -> Option<f64> {
    if token.eq_ignore_ascii_case("NA") {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
