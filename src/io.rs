use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use ndarray::Array2;
use polars::prelude::*;
use tempfile::NamedTempFile;

use crate::error::MbatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Self::Gzip,
            Some(ext) if ext.eq_ignore_ascii_case("bz2") => Self::Bzip2,
            _ => Self::None,
        }
    }

    fn reader(self, file: File) -> Box<dyn Read> {
        match self {
            Self::None => Box::new(file),
            Self::Gzip => Box::new(GzDecoder::new(file)),
            Self::Bzip2 => Box::new(BzDecoder::new(file)),
        }
    }
}

/// Line reader over a plain, gzip or bzip2 file.
pub fn open_lines(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(Box::new(BufReader::new(Compression::of(path).reader(file))))
}

/// Column separator of a genotype table, sniffed from its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Byte(u8),
    Whitespace,
}

impl Separator {
    fn sniff(header: &str) -> Self {
        if header.contains('\t') {
            Self::Byte(b'\t')
        } else if header.contains(',') {
            Self::Byte(b',')
        } else {
            Self::Whitespace
        }
    }
}

fn is_missing(token: &str) -> bool {
    matches!(token, "" | "." | "NA" | "na" | "NaN" | "nan")
}

/// Reads a samples × variants genotype table: a header of variant names and
/// one numeric row per sample. Missing cells (`NA`, `NaN`, `.` or empty)
/// become NaN.
pub fn read_numeric_matrix(path: &Path) -> Result<(Vec<String>, Array2<f64>)> {
    let mut header = String::new();
    open_lines(path)?
        .read_line(&mut header)
        .with_context(|| format!("read header of {}", path.display()))?;
    if header.trim().is_empty() {
        return Err(MbatError::InvalidArgument(format!("{} is empty", path.display())).into());
    }

    match Separator::sniff(&header) {
        Separator::Whitespace => parse_whitespace_matrix(open_lines(path)?, path),
        Separator::Byte(sep) => {
            // polars needs a seekable source, so compressed input is spilled first
            let df = match Compression::of(path) {
                Compression::None => read_delimited(path, sep)?,
                compression => {
                    let file =
                        File::open(path).with_context(|| format!("open {}", path.display()))?;
                    let mut tmp = NamedTempFile::new().context("create spill file")?;
                    std::io::copy(&mut compression.reader(file), &mut tmp)
                        .with_context(|| format!("decompress {}", path.display()))?;
                    read_delimited(tmp.path(), sep)?
                }
            };
            frame_to_matrix(&df)
        }
    }
}

fn read_delimited(path: &Path, separator: u8) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(separator)
                .with_null_values(Some(NullValues::AllColumns(vec![
                    "NA".into(),
                    "NaN".into(),
                    ".".into(),
                ])))
                .with_missing_is_null(true),
        )
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("read {}", path.display()))
}

fn frame_to_matrix(df: &DataFrame) -> Result<(Vec<String>, Array2<f64>)> {
    let mut names = Vec::with_capacity(df.width());
    let mut out = Array2::<f64>::from_elem((df.height(), df.width()), f64::NAN);
    for (j, column) in df.get_columns().iter().enumerate() {
        names.push(column.name().to_string());
        let values = column
            .as_materialized_series()
            .cast(&DataType::Float64)
            .with_context(|| format!("genotype column {} is not numeric", column.name()))?;
        for (i, value) in values.f64()?.into_iter().enumerate() {
            out[(i, j)] = value.unwrap_or(f64::NAN);
        }
    }
    Ok((names, out))
}

fn parse_whitespace_matrix<R: BufRead>(reader: R, path: &Path) -> Result<(Vec<String>, Array2<f64>)> {
    let mut lines = reader.lines().enumerate();
    let names: Vec<String> = match lines.next() {
        Some((_, header)) => header?.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    };

    let mut data = Vec::new();
    let mut rows = 0usize;
    for (lineno, line) in lines {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || MbatError::MalformedRecord {
            path: path.display().to_string(),
            line: lineno + 1,
            content: line.clone(),
        };
        let start = data.len();
        for token in line.split_whitespace() {
            let value = if is_missing(token) {
                f64::NAN
            } else {
                token.parse::<f64>().map_err(|_| malformed())?
            };
            data.push(value);
        }
        if data.len() - start != names.len() {
            return Err(malformed().into());
        }
        rows += 1;
    }
    let matrix = Array2::from_shape_vec((rows, names.len()), data)
        .map_err(|e| MbatError::Dimension(e.to_string()))?;
    Ok((names, matrix))
}

/// Writes a tab-separated table with a header line.
pub fn write_dataframe(df: &DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut df = df.clone();
    CsvWriter::new(&mut file)
        .with_separator(b'\t')
        .finish(&mut df)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
