use std::fs;
use std::path::{Path, PathBuf};

use mbat::mbat::{MAX_GENE_VARIANTS, MAX_SET_VARIANTS, MbatConfig, SetSource, mbat, output_path};
use mbat::pipeline::PipelineConfig;

/// Eight samples of four reference variants. `rs1`, `rs2` and `rs3` are
/// mutually uncorrelated after centering; `rs4` is the negated `rs1` and
/// carries the opposite effect, so the pair agrees in sign.
const GENO: &str = "\
rs1\trs2\trs3\trs4
2\t2\t0\t0
0\t2\t1\t2
2\t0\t0\t0
0\t0\t1\t2
2\t2\t2\t0
0\t2\t1\t2
2\t0\t2\t0
0\t0\t1\t2
";

const BIM: &str = "\
1 rs1 0 1500 A G
1 rs2 0 1800 C T
1 rs3 0 5000 A G
2 rs4 0 700 A C
";

const ASSOC: &str = "\
rs1 A G 0.3 0.10 0.05 NA 1000
rs2 T C 0.3 -0.20 0.05 NA 1000
rs3 A G 0.3 0.15 0.05 NA 1000
rs4 A C 0.3 -0.10 0.05 NA 1000
";

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        fs::write(root.join("ref.geno"), GENO).expect("write geno");
        fs::write(root.join("ref.bim"), BIM).expect("write bim");
        fs::write(root.join("trait.assoc"), ASSOC).expect("write assoc");
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn config(&self, source: SetSource) -> MbatConfig {
        MbatConfig {
            assoc: self.path("trait.assoc"),
            bim: self.path("ref.bim"),
            geno: self.path("ref.geno"),
            out: self.path("out"),
            source,
            pipeline: PipelineConfig::default(),
            threads: Some(2),
        }
    }
}

fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let text = fs::read_to_string(path).expect("read output");
    let mut lines = text.lines();
    let header = lines
        .next()
        .expect("header")
        .split('\t')
        .map(str::to_string)
        .collect();
    let rows = lines
        .filter(|l| !l.is_empty())
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect();
    (header, rows)
}

#[test]
fn set_list_run_writes_results() {
    let fx = Fixture::new();
    fs::write(
        fx.path("sets.txt"),
        "SET1 rs1 rs2 rs3 END\nEMPTY rs99 END\nPAIR rs1 rs4 END\n",
    )
    .expect("write sets");
    let config = fx.config(SetSource::SetList {
        file: fx.path("sets.txt"),
    });

    let summary = mbat(&config).expect("mbat run");
    assert_eq!(summary.sets, 3);
    assert_eq!(summary.output, output_path(&fx.path("out"), ".mbat"));

    let (header, rows) = read_rows(&summary.output);
    assert_eq!(
        header,
        vec!["Set", "Set.SNPs", "SNPsTested", "Chisq(Obs)", "Pvalue"]
    );
    let set1 = rows.iter().find(|r| r[0] == "SET1").expect("SET1 row");
    assert_eq!(set1[1], "3");
    assert_eq!(set1[2], "3");
    let chisq: f64 = set1[3].parse().expect("chisq");
    assert!((chisq - 29.0).abs() < 1e-6);
    assert!(rows.iter().all(|r| r[0] != "EMPTY"));

    // |r| = 1 between rs1 and rs4, so the pair prunes to one variant
    let pair = rows.iter().find(|r| r[0] == "PAIR").expect("PAIR row");
    assert_eq!(pair[1], "2");
    assert_eq!(pair[2], "1");

    let kept = fs::read_to_string(fx.path("out.kept.snps")).expect("kept snps");
    assert!(kept.contains("> SET1\nrs1\nrs2\nrs3\n"));
    let log = fs::read_to_string(fx.path("out.log")).expect("log");
    assert!(log.contains("SET1: Initial snps 3"));
}

#[test]
fn sign_mismatch_is_reported_and_set_omitted() {
    let fx = Fixture::new();
    // flipping rs4 onto its second allele makes it identical to rs1 while
    // the betas disagree in sign
    fs::write(
        fx.path("trait.assoc"),
        "rs1 A G 0.3 0.10 0.05 NA 1000\nrs4 C A 0.3 -0.10 0.05 NA 1000\n",
    )
    .expect("write assoc");
    fs::write(fx.path("sets.txt"), "BAD rs1 rs4 END\n").expect("write sets");
    let config = fx.config(SetSource::SetList {
        file: fx.path("sets.txt"),
    });

    let summary = mbat(&config).expect("mbat run");
    assert_eq!(summary.reported, 0);
    assert_eq!(summary.skipped, 1);

    let qc = fs::read_to_string(fx.path("out.betasnps")).expect("qc report");
    assert!(qc.starts_with("> BAD snpi A1i betai snpj A1j betaj Rij\n"));
    assert!(qc.contains("rs4 C -0.1 rs1 A 0.1 1"));
}

/// Writes `wide.bim`, `wide.geno` and `wide.assoc` with `n` variants `v0..`
/// on chromosome 3 at bp `1..=n`, and points `config` at them.
fn write_wide_panel(fx: &Fixture, config: &mut MbatConfig, n: usize) -> Vec<String> {
    let names: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();

    let mut bim = String::new();
    let mut assoc = String::new();
    for (i, name) in names.iter().enumerate() {
        bim.push_str(&format!("3 {name} 0 {} A G\n", i + 1));
        assoc.push_str(&format!("{name} A G 0.3 0.1 0.05 0.5 1000\n"));
    }
    let header = names.join("\t");
    let row0 = vec!["0"; n].join("\t");
    let row1 = (0..n)
        .map(|i| if i % 2 == 0 { "2" } else { "1" })
        .collect::<Vec<_>>()
        .join("\t");
    fs::write(fx.path("wide.bim"), bim).expect("write bim");
    fs::write(fx.path("wide.geno"), format!("{header}\n{row0}\n{row1}\n")).expect("write geno");
    fs::write(fx.path("wide.assoc"), assoc).expect("write assoc");

    config.bim = fx.path("wide.bim");
    config.geno = fx.path("wide.geno");
    config.assoc = fx.path("wide.assoc");
    names
}

#[test]
fn oversized_set_is_absent_from_results() {
    let fx = Fixture::new();
    let n = MAX_SET_VARIANTS + 1;
    let mut config = fx.config(SetSource::SetList {
        file: fx.path("sets.txt"),
    });
    let names = write_wide_panel(&fx, &mut config, n);
    fs::write(
        fx.path("sets.txt"),
        format!("BIG {} END\nSMALL v0 v1 END\n", names.join(" ")),
    )
    .expect("write sets");

    let summary = mbat(&config).expect("mbat run");
    let (_, rows) = read_rows(&summary.output);
    assert!(rows.iter().all(|r| r[0] != "BIG"));
    assert!(rows.iter().any(|r| r[0] == "SMALL"));
    assert_eq!(summary.sets, 2);

    let log = fs::read_to_string(fx.path("out.log")).expect("log");
    assert!(log.contains(&format!("Too many SNPs ({n}) in the set [BIG]")));
}

#[test]
fn oversized_gene_window_is_absent_from_results() {
    let fx = Fixture::new();
    let n = MAX_GENE_VARIANTS + 1;
    fs::write(
        fx.path("genes.txt"),
        format!("3 1 {n} HUGE\n3 1 2 SMALL\n"),
    )
    .expect("write genes");
    let mut config = fx.config(SetSource::Gene {
        annotation: fx.path("genes.txt"),
        window_kb: 0.0,
    });
    write_wide_panel(&fx, &mut config, n);

    let summary = mbat(&config).expect("mbat run");
    assert_eq!(summary.sets, 2);
    assert_eq!(summary.reported, 1);
    assert_eq!(summary.skipped, 1);

    let (_, rows) = read_rows(&summary.output);
    assert!(rows.iter().all(|r| r[0] != "HUGE"));
    let small = rows.iter().find(|r| r[0] == "SMALL").expect("SMALL row");
    assert_eq!(small[4], "2");

    let log = fs::read_to_string(fx.path("out.log")).expect("log");
    assert!(log.contains(&format!(
        "Too many SNPs ({n}) in the set [HUGE]. Maximum limit is {MAX_GENE_VARIANTS}."
    )));
}

#[test]
fn gene_run_reports_mapped_genes() {
    let fx = Fixture::new();
    fs::write(
        fx.path("genes.txt"),
        "1 1000 2000 GENE1\n1 4900 5100 GENE2\n5 100 200 NOWHERE\n",
    )
    .expect("write genes");
    let config = fx.config(SetSource::Gene {
        annotation: fx.path("genes.txt"),
        window_kb: 0.0,
    });

    let summary = mbat(&config).expect("mbat run");
    assert_eq!(summary.sets, 3);
    assert_eq!(summary.reported, 2);

    let (header, rows) = read_rows(&summary.output);
    assert_eq!(header[0], "Gene");
    assert_eq!(header.len(), 10);

    let gene1 = rows.iter().find(|r| r[0] == "GENE1").expect("GENE1 row");
    assert_eq!(gene1[4], "2");
    assert_eq!(gene1[6], "rs1");
    assert_eq!(gene1[7], "rs2");
    let chisq: f64 = gene1[8].parse().expect("chisq");
    assert!((chisq - 20.0).abs() < 1e-6);

    // a single variant takes (beta/se)² when no p-value is reported
    let gene2 = rows.iter().find(|r| r[0] == "GENE2").expect("GENE2 row");
    assert_eq!(gene2[4], "1");
    let chisq: f64 = gene2[8].parse().expect("chisq");
    assert!((chisq - 9.0).abs() < 1e-6);
}

#[test]
fn segment_runs_cover_every_chromosome() {
    let fx = Fixture::new();
    let summary = mbat(&fx.config(SetSource::Segment { length_kb: 1.0 })).expect("mbat run");
    assert_eq!(summary.sets, 3);
    let (header, rows) = read_rows(&summary.output);
    assert_eq!(header[0], "Chr");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][..4], ["1", "1500", "1800", "2"]);

    let summary = mbat(&fx.config(SetSource::SegmentQc { length_kb: 1.0 })).expect("qc run");
    assert_eq!(summary.output, output_path(&fx.path("out"), ".seg.qc"));
    let (header, rows) = read_rows(&summary.output);
    assert_eq!(
        header,
        vec!["Chr", "Start", "End", "Set.SNPs", "No.SNPsPassQC", "SNPsFailQC"]
    );
    assert_eq!(rows[0][3..], ["2", "2", "0"]);
}

#[test]
fn missing_input_is_rejected() {
    let fx = Fixture::new();
    let mut config = fx.config(SetSource::Segment { length_kb: 100.0 });
    config.assoc = fx.path("absent.assoc");
    assert!(mbat(&config).is_err());

    let config = fx.config(SetSource::Segment { length_kb: 0.0 });
    assert!(mbat(&config).is_err());
}
