use std::io::Cursor;

use ndarray::Array2;

use mbat::assoc::parse_assoc;
use mbat::error::MbatError;
use mbat::mbat::single_variant_result;
use mbat::reference::{RefVariant, ReferencePanel, parse_chromosome};
use mbat::sets::{Gene, NamedSet, PositionIndex, map_genes, parse_set_list, resolve_members, segments};

fn ref_variant(chr: i32, name: &str, bp: i64) -> RefVariant {
    RefVariant {
        chr,
        name: name.to_string(),
        bp,
        allele1: "A".to_string(),
        allele2: "G".to_string(),
        freq: None,
    }
}

fn panel() -> ReferencePanel {
    let variants = vec![
        ref_variant(1, "rs1", 1500),
        ref_variant(1, "rs2", 1800),
        ref_variant(1, "rs3", 5000),
        ref_variant(2, "rs4", 700),
    ];
    let genotypes = Array2::from_shape_fn((6, 4), |(i, j)| ((i + j) % 3) as f64);
    ReferencePanel::from_parts(variants, genotypes).expect("panel")
}

const ASSOC: &str = "\
rs3 A G 0.3 0.15 0.05 0.01 1000
rs1 a g 0.2 0.10 0.05 0.04 1000
rs2 G A NA -0.20 0.05 NA 1000

rs9 A G 0.1 0.10 0.05 0.10 1000
rs4 C T 0.1 0.10 0.05 0.10 1000
rs1 A G 0.2 0.10 0.05 0.04 1000
";

#[test]
fn reference_columns_are_centered() {
    let panel = panel();
    let x = panel.genotypes(&[(0, false), (0, true)]);
    let sum: f64 = x.column(0).sum();
    assert!(sum.abs() < 1e-12);
    for i in 0..x.nrows() {
        assert_eq!(x[(i, 1)], -x[(i, 0)]);
    }
}

#[test]
fn chromosome_codes() {
    assert_eq!(parse_chromosome("7"), 7);
    assert_eq!(parse_chromosome("chrX"), 23);
    assert_eq!(parse_chromosome("MT"), 26);
    assert_eq!(parse_chromosome("unplaced"), 0);
}

#[test]
fn assoc_matches_reference_and_orients_alleles() {
    let panel = panel();
    let table = parse_assoc(Cursor::new(ASSOC), "assoc", &panel).expect("parse assoc");

    assert_eq!(table.len(), 3);
    assert_eq!(table.not_in_reference, 1);
    assert_eq!(table.allele_mismatch, 1);
    assert_eq!(table.duplicates, 1);

    let names: Vec<&str> = table.variants().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["rs1", "rs2", "rs3"]);

    let rs1 = table.get(table.find("rs1").expect("rs1"));
    assert_eq!(rs1.allele, "A");
    assert!(!rs1.flipped);
    assert_eq!(rs1.pvalue, Some(0.04));
    assert_eq!(rs1.freq, Some(0.2));

    let rs2 = table.get(table.find("rs2").expect("rs2"));
    assert!(rs2.flipped);
    assert_eq!(rs2.beta, -0.20);
    assert_eq!(rs2.pvalue, None);
    assert_eq!(rs2.freq, None);
}

#[test]
fn assoc_line_with_wrong_field_count_is_fatal() {
    let panel = panel();
    let input = "rs1 A G 0.2 0.10 0.05 0.04 1000\nrs2 G A 0.2 0.10 0.05 0.04\n";
    let err = parse_assoc(Cursor::new(input), "assoc", &panel).expect_err("malformed line");
    match err.downcast_ref::<MbatError>() {
        Some(MbatError::MalformedRecord { line, .. }) => assert_eq!(*line, 2),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn assoc_without_matches_is_an_error() {
    let panel = panel();
    let input = "rs9 A G 0.2 0.10 0.05 0.04 1000\n";
    assert!(parse_assoc(Cursor::new(input), "assoc", &panel).is_err());
}

#[test]
fn set_list_is_split_on_end_markers() {
    let input = "SET1 rs1 rs2\nrs3 END\nSET2\nrs4 END SET3 rs9\n";
    let sets = parse_set_list(Cursor::new(input)).expect("set list");
    assert_eq!(
        sets,
        vec![
            NamedSet {
                name: "SET1".to_string(),
                members: vec!["rs1".into(), "rs2".into(), "rs3".into()],
            },
            NamedSet {
                name: "SET2".to_string(),
                members: vec!["rs4".into()],
            },
            NamedSet {
                name: "SET3".to_string(),
                members: vec!["rs9".into()],
            },
        ]
    );
}

#[test]
fn set_members_keep_file_order() {
    let panel = panel();
    let table = parse_assoc(Cursor::new(ASSOC), "assoc", &panel).expect("parse assoc");
    let set = NamedSet {
        name: "S".to_string(),
        members: vec!["rs3".into(), "rs9".into(), "rs1".into(), "rs3".into()],
    };
    let members = resolve_members(&set, &table);
    assert_eq!(members, vec![2, 0]);
}

#[test]
fn genes_map_to_variants_within_window() {
    let panel = panel();
    let table = parse_assoc(Cursor::new(ASSOC), "assoc", &panel).expect("parse assoc");
    let positions = PositionIndex::build(&table, &panel).expect("positions");
    let genes = vec![
        Gene {
            name: "G1".to_string(),
            chr: 1,
            start: 1000,
            end: 2000,
        },
        Gene {
            name: "G2".to_string(),
            chr: 3,
            start: 1000,
            end: 2000,
        },
    ];

    let spans = map_genes(&genes, &positions, 0);
    assert_eq!(spans[0].members, vec![0, 1]);
    assert!(spans[1].members.is_empty());

    let spans = map_genes(&genes, &positions, 3000);
    assert_eq!(spans[0].members, vec![0, 1, 2]);
}

#[test]
fn missing_positions_block_gene_mapping() {
    let variants = vec![ref_variant(1, "rs1", 1500), ref_variant(0, "rs2", 0)];
    let genotypes = Array2::from_shape_fn((4, 2), |(i, j)| ((i * 2 + j) % 3) as f64);
    let panel = ReferencePanel::from_parts(variants, genotypes).expect("panel");
    let input = "rs1 A G 0.2 0.1 0.05 0.04 100\nrs2 A G 0.2 0.1 0.05 0.04 100\n";
    let table = parse_assoc(Cursor::new(input), "assoc", &panel).expect("parse assoc");
    let err = PositionIndex::build(&table, &panel).expect_err("missing position");
    assert!(matches!(
        err.downcast_ref::<MbatError>(),
        Some(MbatError::MissingMetadata(_))
    ));
}

#[test]
fn segments_split_on_length_and_chromosome() {
    let panel = panel();
    let input = "\
rs1 A G 0.2 0.1 0.05 0.04 100
rs2 A G 0.2 0.1 0.05 0.04 100
rs3 A G 0.2 0.1 0.05 0.04 100
rs4 A G 0.2 0.1 0.05 0.04 100
";
    let table = parse_assoc(Cursor::new(input), "assoc", &panel).expect("parse assoc");
    let positions = PositionIndex::build(&table, &panel).expect("positions");
    let segs = segments(&positions, 1000);

    assert_eq!(segs.len(), 3);
    assert_eq!((segs[0].chr, segs[0].start_bp, segs[0].end_bp), (1, 1500, 1800));
    assert_eq!(segs[0].members, vec![0, 1]);
    assert_eq!(segs[1].members, vec![2]);
    assert_eq!((segs[2].chr, segs[2].start_bp), (2, 700));
}

#[test]
fn single_variant_uses_reported_pvalue() {
    let panel = panel();
    let table = parse_assoc(Cursor::new(ASSOC), "assoc", &panel).expect("parse assoc");

    let rs1 = table.get(table.find("rs1").expect("rs1"));
    let result = single_variant_result(rs1).expect("single variant");
    assert_eq!(result.pvalue, 0.04);
    assert!((result.chisq - 4.2179).abs() < 1e-3);

    let rs2 = table.get(table.find("rs2").expect("rs2"));
    let result = single_variant_result(rs2).expect("single variant");
    assert!((result.chisq - 16.0).abs() < 1e-9);
    assert!(result.pvalue < 1e-4);
}

#[test]
fn single_variant_chisq_stays_finite_for_tiny_pvalues() {
    let panel = panel();
    let input = "\
rs1 A G 0.2 0.5 0.01 1e-50 1000
rs2 A G 0.2 0.5 0.01 1e-300 1000
rs3 A G 0.2 0.5 0.01 0 1000
";
    let table = parse_assoc(Cursor::new(input), "assoc", &panel).expect("parse assoc");

    let rs1 = single_variant_result(table.get(0)).expect("single variant");
    assert!(rs1.chisq.is_finite());
    assert!((rs1.chisq - 224.385).abs() < 0.05);
    assert_eq!(rs1.pvalue, 1e-50);

    let rs2 = single_variant_result(table.get(1)).expect("single variant");
    assert!((rs2.chisq - 1373.87).abs() < 0.5);

    // a zero p-value carries no information, so (beta/se)² is used
    let rs3 = single_variant_result(table.get(2)).expect("single variant");
    assert!((rs3.chisq - 2500.0).abs() < 1e-6);
    assert!(rs3.is_usable());
}

#[test]
fn genotype_tables_read_in_any_layout() {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mbat::io::read_numeric_matrix;

    let dir = tempfile::tempdir().expect("tempdir");

    let spaced = dir.path().join("spaced.geno");
    std::fs::write(&spaced, "rs1  rs2\n0 NA\n\n2   1\n").expect("write");
    let (names, x) = read_numeric_matrix(&spaced).expect("whitespace table");
    assert_eq!(names, vec!["rs1", "rs2"]);
    assert_eq!(x.dim(), (2, 2));
    assert!(x[(0, 1)].is_nan());
    assert_eq!(x[(1, 0)], 2.0);

    let gz = dir.path().join("tabbed.geno.gz");
    let mut encoder = GzEncoder::new(
        std::fs::File::create(&gz).expect("create"),
        Compression::default(),
    );
    encoder
        .write_all(b"rs1\trs2\n0\t1\n2\tNA\n")
        .expect("write gz");
    encoder.finish().expect("finish gz");
    let (names, x) = read_numeric_matrix(&gz).expect("gzip table");
    assert_eq!(names, vec!["rs1", "rs2"]);
    assert_eq!(x[(0, 1)], 1.0);
    assert!(x[(1, 1)].is_nan());

    let ragged = dir.path().join("ragged.geno");
    std::fs::write(&ragged, "rs1 rs2\n0 1 2\n").expect("write");
    assert!(read_numeric_matrix(&ragged).is_err());
}
