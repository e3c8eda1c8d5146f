//! Run drivers: read the reference panel and association results, enumerate
//! the variant sets, push each set through the QC/test pipeline and write the
//! result tables.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::debug;

use crate::assoc::{AssocTable, AssocVariant, read_assoc};
use crate::correlation::correlation_matrix;
use crate::error::MbatError;
use crate::io::write_dataframe;
use crate::logging::{RunLog, open_append};
use crate::parallel::with_threads;
use crate::pipeline::{PipelineConfig, SetReport, run_pipeline};
use crate::qc::{check_input_file, check_range_f64};
use crate::reference::ReferencePanel;
use crate::sets::{
    PositionIndex, map_genes, read_gene_annotation, read_set_file, resolve_members, segments,
};
use crate::sign_mismatch::detect_sign_mismatch;
use crate::types::{ActiveSet, MismatchPair, TestResult};

/// Largest set (set list or segment) that enters the pipeline.
pub const MAX_SET_VARIANTS: usize = 20_000;
/// Largest gene window that enters the pipeline.
pub const MAX_GENE_VARIANTS: usize = 10_000;

#[derive(Debug, Clone)]
pub enum SetSource {
    SetList { file: PathBuf },
    Gene { annotation: PathBuf, window_kb: f64 },
    Segment { length_kb: f64 },
    /// Sign-mismatch QC only, reporting pass/fail counts per segment.
    SegmentQc { length_kb: f64 },
}

#[derive(Debug, Clone)]
pub struct MbatConfig {
    pub assoc: PathBuf,
    pub bim: PathBuf,
    pub geno: PathBuf,
    /// Output prefix; result files append their own extension.
    pub out: PathBuf,
    pub source: SetSource,
    pub pipeline: PipelineConfig,
    pub threads: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: PathBuf,
    pub sets: usize,
    pub reported: usize,
    pub skipped: usize,
}

pub fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", prefix.display()))
}

pub fn mbat(config: &MbatConfig) -> Result<RunSummary> {
    check_input_file(&config.assoc, "assoc")?;
    check_input_file(&config.bim, "bim")?;
    check_input_file(&config.geno, "geno")?;
    match &config.source {
        SetSource::SetList { file } => check_input_file(file, "set-list")?,
        SetSource::Gene {
            annotation,
            window_kb,
        } => {
            check_input_file(annotation, "gene-list")?;
            check_range_f64(*window_kb, 0.0, f64::MAX, false, "window")?;
        }
        SetSource::Segment { length_kb } | SetSource::SegmentQc { length_kb } => {
            check_range_f64(*length_kb, 0.0, f64::MAX, true, "segment length")?;
        }
    }
    config.pipeline.thresholds.validate()?;

    with_threads(config.threads, || run(config))
}

fn run(config: &MbatConfig) -> Result<RunSummary> {
    let mut reports = Reports::open(&config.out)?;
    reports.log.info(&format!(
        "mBAT analysis started; output prefix {}",
        config.out.display()
    ))?;

    let panel = ReferencePanel::load(&config.bim, &config.geno)?;
    let assoc = read_assoc(&config.assoc, &panel)?;
    reports.log.info(&format!(
        "{} SNPs included from {} ({} not in reference, {} allele mismatches, {} duplicates)",
        assoc.len(),
        config.assoc.display(),
        assoc.not_in_reference,
        assoc.allele_mismatch,
        assoc.duplicates
    ))?;

    let mut ctx = SetContext {
        panel: &panel,
        assoc: &assoc,
        pipeline: &config.pipeline,
        reports: &mut reports,
    };
    match &config.source {
        SetSource::SetList { file } => run_set_list(&mut ctx, file, &config.out),
        SetSource::Gene {
            annotation,
            window_kb,
        } => run_genes(&mut ctx, annotation, kb_to_bp(*window_kb), &config.out),
        SetSource::Segment { length_kb } => {
            run_segments(&mut ctx, kb_to_bp(*length_kb), &config.out)
        }
        SetSource::SegmentQc { length_kb } => {
            run_segment_qc(&mut ctx, kb_to_bp(*length_kb), &config.out)
        }
    }
}

fn kb_to_bp(kb: f64) -> i64 {
    (kb * 1000.0).round() as i64
}

/// Output files shared by every set of one run.
struct Reports {
    log: RunLog,
    qc: File,
    kept: File,
}

impl Reports {
    fn open(prefix: &Path) -> Result<Self> {
        Ok(Self {
            log: RunLog::create(&output_path(prefix, ".log"))?,
            qc: open_append(&output_path(prefix, ".betasnps"))?,
            kept: File::create(output_path(prefix, ".kept.snps"))
                .context("create surviving SNP list")?,
        })
    }

    fn write_mismatches(&mut self, set: &str, pairs: &[MismatchPair]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        writeln!(self.qc, "> {set} snpi A1i betai snpj A1j betaj Rij")?;
        for pair in pairs {
            writeln!(
                self.qc,
                "{} {} {} {} {} {} {}",
                pair.first.name,
                pair.first.allele,
                pair.first.beta,
                pair.second.name,
                pair.second.allele,
                pair.second.beta,
                pair.r
            )?;
        }
        Ok(())
    }

    fn write_kept(&mut self, set: &str, kept: &[String]) -> Result<()> {
        writeln!(self.kept, "> {set}")?;
        for name in kept {
            writeln!(self.kept, "{name}")?;
        }
        Ok(())
    }
}

struct SetContext<'a> {
    panel: &'a ReferencePanel,
    assoc: &'a AssocTable,
    pipeline: &'a PipelineConfig,
    reports: &'a mut Reports,
}

impl SetContext<'_> {
    fn active_set(&self, members: &[usize]) -> Result<ActiveSet> {
        let columns: Vec<(usize, bool)> = members
            .iter()
            .map(|&i| {
                let v = self.assoc.get(i);
                (v.panel_index, v.flipped)
            })
            .collect();
        let x = self.panel.genotypes(&columns);
        let records = members.iter().map(|&i| self.assoc.get(i).record()).collect();
        ActiveSet::new(records, correlation_matrix(x.view()))
    }

    /// Full pipeline for one set, with its report lines written.
    fn test_set(&mut self, name: &str, members: &[usize]) -> Result<TestResult> {
        let set = self.active_set(members)?;
        let report =
            run_pipeline(set, self.pipeline).with_context(|| format!("test set {name}"))?;
        self.record(name, &report)?;
        Ok(report.result)
    }

    fn record(&mut self, name: &str, report: &SetReport) -> Result<()> {
        self.reports.write_mismatches(name, &report.mismatches)?;
        if report.counts.after_sign == 0 {
            self.reports.log.warn(&format!(
                "Warning: all {} SNPs removed from set [{name}] due to beta/LD mismatch",
                report.counts.initial
            ))?;
            return Ok(());
        }
        if report.result.degraded {
            self.reports.log.warn(&format!(
                "Warning: the V matrix of set [{name}] is not invertible; pseudo-inverse of rank {} used for {} SNPs",
                report.result.rank, report.result.tested
            ))?;
        }
        self.reports
            .log
            .detail(&format!("{name}: {}", report.summary_line()))?;
        self.reports.write_kept(name, &report.kept)
    }

    fn cap_exceeded(&mut self, label: &str, size: usize, cap: usize) -> Result<bool> {
        if size <= cap {
            return Ok(false);
        }
        self.reports.log.warn(&format!(
            "Warning: Too many SNPs ({size}) in the set [{label}]. Maximum limit is {cap}. This set is ignored in the analysis."
        ))?;
        Ok(true)
    }

    fn finish(
        &mut self,
        df: DataFrame,
        path: PathBuf,
        sets: usize,
        skipped: usize,
    ) -> Result<RunSummary> {
        write_dataframe(&df, &path)?;
        self.reports.log.info(&format!(
            "Results of {} of {sets} sets saved to [{}] ({skipped} skipped)",
            df.height(),
            path.display()
        ))?;
        Ok(RunSummary {
            output: path,
            sets,
            reported: df.height(),
            skipped,
        })
    }
}

/// Single-variant sets use the reported p-value directly, falling back to
/// `(beta/se)²` when the p-value is missing or zero.
pub fn single_variant_result(v: &AssocVariant) -> Result<TestResult> {
    if let Some(p) = v.pvalue
        && p > 0.0
        && p <= 1.0
    {
        // upper-tail 1-df quantile via the normal tail; 1 - p rounds to 1 below ~1e-16
        let normal = Normal::new(0.0, 1.0).context("normal distribution")?;
        let z = normal.inverse_cdf(p / 2.0);
        if (z * z).is_finite() {
            return Ok(TestResult {
                chisq: z * z,
                pvalue: p,
                tested: 1,
                rank: 1,
                degraded: false,
            });
        }
    }

    let z = v.beta / v.se;
    let chisq = z * z;
    if !chisq.is_finite() {
        return Ok(TestResult::skipped(1));
    }
    let chi = ChiSquared::new(1.0).context("chi-square distribution")?;
    Ok(TestResult {
        chisq,
        pvalue: chi.sf(chisq),
        tested: 1,
        rank: 1,
        degraded: false,
    })
}

fn progress(done: usize, total: usize, what: &str) {
    if done % 100 == 0 || done == total {
        debug!("{done} of {total} {what}");
    }
}

fn run_set_list(ctx: &mut SetContext<'_>, file: &Path, out: &Path) -> Result<RunSummary> {
    let sets = read_set_file(file)?;
    let resolved: Vec<Vec<usize>> = sets.iter().map(|s| resolve_members(s, ctx.assoc)).collect();
    if resolved.iter().all(|m| m.is_empty()) {
        return Err(MbatError::InvalidArgument(format!(
            "no SNP of {} maps to any set in {}",
            ctx.assoc.len(),
            file.display()
        ))
        .into());
    }
    ctx.reports.log.info(&format!(
        "Running set-based multivariate association test (mBAT) on {} sets",
        sets.len()
    ))?;

    let mut names = Vec::new();
    let mut n_snps = Vec::new();
    let mut n_tested = Vec::new();
    let mut chisq = Vec::new();
    let mut pvalues = Vec::new();
    let mut skipped = 0usize;
    for (i, (set, members)) in sets.iter().zip(&resolved).enumerate() {
        progress(i + 1, sets.len(), "sets");
        if members.is_empty() || ctx.cap_exceeded(&set.name, members.len(), MAX_SET_VARIANTS)? {
            skipped += 1;
            continue;
        }
        let result = ctx.test_set(&set.name, members)?;
        if !result.is_usable() {
            skipped += 1;
            continue;
        }
        names.push(set.name.clone());
        n_snps.push(members.len() as i64);
        n_tested.push(result.tested as i64);
        chisq.push(result.chisq);
        pvalues.push(result.pvalue);
    }

    let df = df!(
        "Set" => names,
        "Set.SNPs" => n_snps,
        "SNPsTested" => n_tested,
        "Chisq(Obs)" => chisq,
        "Pvalue" => pvalues
    )?;
    ctx.finish(df, output_path(out, ".mbat"), sets.len(), skipped)
}

fn run_genes(
    ctx: &mut SetContext<'_>,
    annotation: &Path,
    window: i64,
    out: &Path,
) -> Result<RunSummary> {
    let positions = PositionIndex::build(ctx.assoc, ctx.panel)?;
    let genes = read_gene_annotation(annotation)?;
    ctx.reports.log.info(&format!(
        "Mapping the physical positions of {} genes to SNP data (gene boundaries: {}Kb away from UTRs)",
        genes.len(),
        window / 1000
    ))?;
    let spans = map_genes(&genes, &positions, window);
    let mapped = spans.iter().filter(|s| !s.members.is_empty()).count();
    if mapped == 0 {
        return Err(MbatError::InvalidArgument(
            "no gene can be mapped to the SNP data; check the chr and bp columns".to_string(),
        )
        .into());
    }
    ctx.reports.log.info(&format!("{mapped} genes have been mapped to SNP data."))?;

    let mut names = Vec::new();
    let mut chrs = Vec::new();
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut n_snps = Vec::new();
    let mut n_tested = Vec::new();
    let mut first_snp = Vec::new();
    let mut last_snp = Vec::new();
    let mut chisq = Vec::new();
    let mut pvalues = Vec::new();
    let mut skipped = 0usize;
    for (i, span) in spans.iter().enumerate() {
        progress(i + 1, spans.len(), "genes");
        let members = &span.members;
        let (Some(&first), Some(&last)) = (members.first(), members.last()) else {
            skipped += 1;
            continue;
        };
        if ctx.cap_exceeded(&span.gene.name, members.len(), MAX_GENE_VARIANTS)? {
            skipped += 1;
            continue;
        }
        let result = if members.len() == 1 {
            single_variant_result(ctx.assoc.get(first))?
        } else {
            ctx.test_set(&span.gene.name, members)?
        };
        if !result.is_usable() {
            skipped += 1;
            continue;
        }
        names.push(span.gene.name.clone());
        chrs.push(span.gene.chr);
        starts.push(span.gene.start);
        ends.push(span.gene.end);
        n_snps.push(members.len() as i64);
        n_tested.push(result.tested as i64);
        first_snp.push(ctx.assoc.get(first).name.clone());
        last_snp.push(ctx.assoc.get(last).name.clone());
        chisq.push(result.chisq);
        pvalues.push(result.pvalue);
    }

    let df = df!(
        "Gene" => names,
        "Chr" => chrs,
        "Start" => starts,
        "End" => ends,
        "No.SNPs" => n_snps,
        "SNPsTested" => n_tested,
        "SNP_start" => first_snp,
        "SNP_end" => last_snp,
        "Chisq(Obs)" => chisq,
        "Pvalue" => pvalues
    )?;
    ctx.finish(df, output_path(out, ".gene.mbat"), spans.len(), skipped)
}

fn run_segments(ctx: &mut SetContext<'_>, length: i64, out: &Path) -> Result<RunSummary> {
    let positions = PositionIndex::build(ctx.assoc, ctx.panel)?;
    let segs = segments(&positions, length);
    ctx.reports.log.info(&format!(
        "Running set-based association test (mBAT) at {} genomic segments with a length of {}Kb",
        segs.len(),
        length / 1000
    ))?;

    let mut chrs = Vec::new();
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut n_snps = Vec::new();
    let mut n_tested = Vec::new();
    let mut chisq = Vec::new();
    let mut pvalues = Vec::new();
    let mut skipped = 0usize;
    for (i, seg) in segs.iter().enumerate() {
        progress(i + 1, segs.len(), "segments");
        let label = format!("chr{}:{}-{}", seg.chr, seg.start_bp, seg.end_bp);
        if ctx.cap_exceeded(&label, seg.members.len(), MAX_SET_VARIANTS)? {
            skipped += 1;
            continue;
        }
        let result = match seg.members.as_slice() {
            [only] => single_variant_result(ctx.assoc.get(*only))?,
            members => ctx.test_set(&label, members)?,
        };
        if !result.is_usable() {
            skipped += 1;
            continue;
        }
        chrs.push(seg.chr);
        starts.push(seg.start_bp);
        ends.push(seg.end_bp);
        n_snps.push(seg.members.len() as i64);
        n_tested.push(result.tested as i64);
        chisq.push(result.chisq);
        pvalues.push(result.pvalue);
    }

    let df = df!(
        "Chr" => chrs,
        "Start" => starts,
        "End" => ends,
        "Set.SNPs" => n_snps,
        "SNPsTested" => n_tested,
        "Chisq(Obs)" => chisq,
        "Pvalue" => pvalues
    )?;
    ctx.finish(df, output_path(out, ".seg.mbat"), segs.len(), skipped)
}

fn run_segment_qc(ctx: &mut SetContext<'_>, length: i64, out: &Path) -> Result<RunSummary> {
    let positions = PositionIndex::build(ctx.assoc, ctx.panel)?;
    let segs = segments(&positions, length);
    ctx.reports.log.info(&format!(
        "Running beta/LD sign QC at {} genomic segments with a length of {}Kb",
        segs.len(),
        length / 1000
    ))?;

    let mut chrs = Vec::new();
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut n_snps = Vec::new();
    let mut n_pass = Vec::new();
    let mut n_fail = Vec::new();
    let mut skipped = 0usize;
    for (i, seg) in segs.iter().enumerate() {
        progress(i + 1, segs.len(), "segments");
        let label = format!("chr{}:{}-{}", seg.chr, seg.start_bp, seg.end_bp);
        if ctx.cap_exceeded(&label, seg.members.len(), MAX_SET_VARIANTS)? {
            skipped += 1;
            continue;
        }
        let total = seg.members.len();
        let removed = if total > 1 {
            let set = ctx.active_set(&seg.members)?;
            let sign = detect_sign_mismatch(&set, ctx.pipeline.thresholds.sign_z);
            ctx.reports.write_mismatches(&label, &sign.pairs)?;
            sign.removal.len()
        } else {
            0
        };
        chrs.push(seg.chr);
        starts.push(seg.start_bp);
        ends.push(seg.end_bp);
        n_snps.push(total as i64);
        n_pass.push((total - removed) as i64);
        n_fail.push(removed as i64);
    }

    let df = df!(
        "Chr" => chrs,
        "Start" => starts,
        "End" => ends,
        "Set.SNPs" => n_snps,
        "No.SNPsPassQC" => n_pass,
        "SNPsFailQC" => n_fail
    )?;
    ctx.finish(df, output_path(out, ".seg.qc"), segs.len(), skipped)
}
