//! Set sources: explicit set lists, gene windows and fixed-length genomic
//! segments. Members are always indices into an [`AssocTable`].

use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::assoc::AssocTable;
use crate::error::MbatError;
use crate::io::open_lines;
use crate::reference::{ReferencePanel, parse_chromosome};

const SET_END: &str = "END";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSet {
    pub name: String,
    pub members: Vec<String>,
}

/// Reads a set-list file: whitespace-separated tokens where each set is its
/// name, its member variants, and the token `END`.
pub fn read_set_file(path: &Path) -> Result<Vec<NamedSet>> {
    let reader = open_lines(path)?;
    parse_set_list(reader).with_context(|| format!("read set file {}", path.display()))
}

pub fn parse_set_list<R: BufRead>(reader: R) -> Result<Vec<NamedSet>> {
    let mut sets = Vec::new();
    let mut current: Option<NamedSet> = None;
    for line in reader.lines() {
        let line = line?;
        for token in line.split_whitespace() {
            if let Some(set) = current.as_mut() {
                if token == SET_END {
                    sets.extend(current.take());
                } else {
                    set.members.push(token.to_string());
                }
            } else {
                current = Some(NamedSet {
                    name: token.to_string(),
                    members: Vec::new(),
                });
            }
        }
    }
    if let Some(set) = current {
        warn!("set {} is not terminated by {SET_END}", set.name);
        sets.push(set);
    }
    if sets.is_empty() {
        return Err(MbatError::InvalidArgument("no sets found".to_string()).into());
    }
    Ok(sets)
}

/// Positions in the association table of the members present in it, in
/// set-file order with repeats dropped. The order fixes which variant the
/// pruning and collinearity tie-breaks keep.
pub fn resolve_members(set: &NamedSet, assoc: &AssocTable) -> Vec<usize> {
    let mut seen = HashSet::new();
    set.members
        .iter()
        .filter_map(|name| assoc.find(name))
        .filter(|&idx| seen.insert(idx))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gene {
    pub name: String,
    pub chr: i32,
    pub start: i64,
    pub end: i64,
}

pub fn read_gene_annotation(path: &Path) -> Result<Vec<Gene>> {
    let reader = open_lines(path)?;
    let mut genes = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let malformed = || MbatError::MalformedRecord {
            path: path.display().to_string(),
            line: lineno + 1,
            content: line.clone(),
        };
        if fields.len() != 4 {
            return Err(malformed().into());
        }
        let start = fields[1].parse::<i64>().map_err(|_| malformed())?;
        let end = fields[2].parse::<i64>().map_err(|_| malformed())?;
        genes.push(Gene {
            chr: parse_chromosome(fields[0]),
            start,
            end,
            name: fields[3].to_string(),
        });
    }
    if genes.is_empty() {
        return Err(MbatError::InvalidArgument(format!(
            "no genes in annotation file {}",
            path.display()
        ))
        .into());
    }
    Ok(genes)
}

/// Association variants grouped by chromosome, each group sorted by position.
#[derive(Debug, Clone)]
pub struct PositionIndex {
    by_chr: BTreeMap<i32, Vec<(i64, usize)>>,
}

impl PositionIndex {
    /// Fails when any variant lacks a chromosome or position.
    pub fn build(assoc: &AssocTable, panel: &ReferencePanel) -> Result<Self> {
        let mut by_chr: BTreeMap<i32, Vec<(i64, usize)>> = BTreeMap::new();
        for (i, v) in assoc.variants().iter().enumerate() {
            let r = panel.variant(v.panel_index);
            if !r.has_position() {
                return Err(MbatError::MissingMetadata(format!(
                    "chromosome or bp information is missing for {}",
                    r.name
                ))
                .into());
            }
            by_chr.entry(r.chr).or_default().push((r.bp, i));
        }
        for entries in by_chr.values_mut() {
            entries.sort_unstable();
        }
        Ok(Self { by_chr })
    }

    /// Variants on `chr` with `lo <= bp <= hi`, by position.
    pub fn window(&self, chr: i32, lo: i64, hi: i64) -> Vec<usize> {
        let Some(entries) = self.by_chr.get(&chr) else {
            return Vec::new();
        };
        let first = entries.partition_point(|&(bp, _)| bp < lo);
        let last = entries.partition_point(|&(bp, _)| bp <= hi);
        entries[first..last.max(first)].iter().map(|&(_, i)| i).collect()
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = (i32, &[(i64, usize)])> {
        self.by_chr.iter().map(|(chr, v)| (*chr, v.as_slice()))
    }
}

/// A gene together with the variants inside its window.
#[derive(Debug, Clone)]
pub struct GeneSpan {
    pub gene: Gene,
    pub members: Vec<usize>,
}

/// Maps every gene to the variants within `window` bp of its boundaries.
pub fn map_genes(genes: &[Gene], positions: &PositionIndex, window: i64) -> Vec<GeneSpan> {
    genes
        .iter()
        .map(|gene| GeneSpan {
            members: positions.window(gene.chr, gene.start - window, gene.end + window),
            gene: gene.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub chr: i32,
    pub start_bp: i64,
    pub end_bp: i64,
    pub members: Vec<usize>,
}

/// Splits each chromosome into runs of consecutive variants spanning at most
/// `length` bp from the first variant of the run.
pub fn segments(positions: &PositionIndex, length: i64) -> Vec<Segment> {
    let mut out = Vec::new();
    for (chr, entries) in positions.chromosomes() {
        let mut current: Option<Segment> = None;
        for &(bp, idx) in entries {
            if let Some(seg) = current.as_mut()
                && bp - seg.start_bp <= length
            {
                seg.end_bp = bp;
                seg.members.push(idx);
                continue;
            }
            out.extend(current.take());
            current = Some(Segment {
                chr,
                start_bp: bp,
                end_bp: bp,
                members: vec![idx],
            });
        }
        out.extend(current);
    }
    out
}
