use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use mbat::logging::init_tracing;
use mbat::mbat::{MbatConfig, SetSource, mbat};
use mbat::pipeline::{PipelineConfig, QcThresholds};
use mbat::set_test::SingularPolicy;

#[derive(Parser)]
#[command(name = "mbat")]
#[command(about = "Set-based multivariate association test on GWAS summary statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Test the sets of a set-list file.
    Set {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, required = true)]
        set_list: PathBuf,
    },
    /// Test genes with a window around their boundaries.
    Gene {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, required = true)]
        gene_list: PathBuf,
        /// Window around each gene, in kb.
        #[arg(long, default_value_t = 50.0)]
        wind: f64,
    },
    /// Test fixed-length genomic segments.
    Segment {
        #[command(flatten)]
        common: CommonArgs,
        /// Segment length, in kb.
        #[arg(long, default_value_t = 100.0)]
        seg_size: f64,
    },
    /// Report beta/LD sign QC counts for fixed-length genomic segments.
    SegmentQc {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value_t = 100.0)]
        seg_size: f64,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Association results: SNP A1 A2 freq beta se p n.
    #[arg(long, required = true)]
    assoc: PathBuf,
    /// Reference variants in PLINK .bim layout.
    #[arg(long, required = true)]
    bim: PathBuf,
    /// Reference genotypes, one column per variant.
    #[arg(long, required = true)]
    geno: PathBuf,
    #[arg(long, required = true)]
    out: PathBuf,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, value_enum, default_value_t = Singular::Pinv)]
    singular: Singular,
    #[arg(long, default_value_t = 1.96)]
    sign_z: f64,
    #[arg(long, default_value_t = 0.9)]
    max_rsq: f64,
    #[arg(long, default_value_t = 10.0)]
    vif_threshold: f64,
    #[arg(long, default_value_t = 1e-5)]
    eigen_zero: f64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Singular {
    Skip,
    Pinv,
}

impl CommonArgs {
    fn into_config(self, source: SetSource) -> MbatConfig {
        let thresholds = QcThresholds {
            sign_z: self.sign_z,
            max_rsq: self.max_rsq,
            vif_threshold: self.vif_threshold,
            eigen_zero: self.eigen_zero,
            ..Default::default()
        };
        let singular = match self.singular {
            Singular::Skip => SingularPolicy::Skip,
            Singular::Pinv => SingularPolicy::PseudoInverse,
        };
        MbatConfig {
            assoc: self.assoc,
            bim: self.bim,
            geno: self.geno,
            out: self.out,
            source,
            pipeline: PipelineConfig {
                thresholds,
                singular,
            },
            threads: self.threads,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match cli.command {
        Command::Set { common, set_list } => {
            common.into_config(SetSource::SetList { file: set_list })
        }
        Command::Gene {
            common,
            gene_list,
            wind,
        } => common.into_config(SetSource::Gene {
            annotation: gene_list,
            window_kb: wind,
        }),
        Command::Segment { common, seg_size } => {
            common.into_config(SetSource::Segment {
                length_kb: seg_size,
            })
        }
        Command::SegmentQc { common, seg_size } => {
            common.into_config(SetSource::SegmentQc {
                length_kb: seg_size,
            })
        }
    };

    let summary = mbat(&config)?;
    tracing::info!(
        "{} of {} sets reported in {}",
        summary.reported,
        summary.sets,
        summary.output.display()
    );
    Ok(())
}
