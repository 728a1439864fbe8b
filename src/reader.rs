//! Ingress of tab-separated tables into polars [DataFrame]s.
//!
//! Every column is read as a string column and gzip-compressed files are decompressed
//! transparently. The submodules add the quirks of each source format.

pub mod eggnog;
pub mod emapper;
pub mod phylome;

use crate::error::AnnotationError;
use crate::options::LookupColumns;
use crate::translator::Lookup;
use crate::utils::{dedup_preserving_order, read_all_bytes};
use anyhow::Context;
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// How a tab-separated table is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsvOptions {
    pub has_header: bool,
    /// Lines skipped before the header.
    pub skip_rows: usize,
    /// Lines skipped between the header and the first record.
    pub skip_rows_after_header: usize,
    /// Names given to the columns of a headerless table, in order.
    pub column_names: Option<Vec<String>>,
}

impl Default for TsvOptions {
    fn default() -> Self {
        TsvOptions {
            has_header: true,
            skip_rows: 0,
            skip_rows_after_header: 0,
            column_names: None,
        }
    }
}

impl TsvOptions {
    /// A table without header whose columns get the given names.
    pub fn headerless<T: AsRef<str>>(names: &[T]) -> TsvOptions {
        TsvOptions {
            has_header: false,
            column_names: Some(names.iter().map(|n| n.as_ref().to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn with_skip_rows(mut self, n: usize) -> Self {
        self.skip_rows = n;
        self
    }

    pub fn with_skip_rows_after_header(mut self, n: usize) -> Self {
        self.skip_rows_after_header = n;
        self
    }
}

/// Parses `bytes` as a tab-separated table with all columns read as strings.
///
/// `source_name` only appears in error messages. Empty fields are read as nulls. Lines with
/// fewer fields than the header are padded with nulls and longer ones are truncated.
///
/// ### Example
///
/// ```rust
/// use orthoprop::reader::{parse_tsv, TsvOptions};
///
/// let bytes = b"Seed\torthologs\n456.GeneA\tHumanA,HumanA7\n".to_vec();
/// let df = parse_tsv(bytes, "example", &TsvOptions::default()).unwrap();
/// assert_eq!(df.shape(), (1, 2));
/// ```
pub fn parse_tsv(bytes: Vec<u8>, source_name: &str, opts: &TsvOptions) -> anyhow::Result<DataFrame> {
    let not_tabular = |reason: String| AnnotationError::NotTabular {
        source_name: source_name.to_string(),
        reason,
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(not_tabular("the input is empty".to_string()).into());
    }

    let mut df = CsvReader::new(Cursor::new(bytes))
        .has_header(opts.has_header)
        .with_separator(b'\t')
        .with_quote_char(None)
        .infer_schema(Some(0))
        .with_skip_rows(opts.skip_rows)
        .with_skip_rows_after_header(opts.skip_rows_after_header)
        .truncate_ragged_lines(true)
        .finish()
        .map_err(|e| not_tabular(e.to_string()))?;

    if let Some(names) = &opts.column_names {
        if names.len() != df.width() {
            return Err(not_tabular(format!(
                "expected {} columns ({:?}) but found {}",
                names.len(),
                names,
                df.width()
            ))
            .into());
        }
        df.set_column_names(names.as_slice())?;
    }

    debug!("parsed {} as a {:?} table", source_name, df.shape());
    Ok(df)
}

/// Reads the tab-separated (optionally gzipped) table at `file_path`.
pub fn read_tsv<T: AsRef<Path>>(file_path: T, opts: &TsvOptions) -> anyhow::Result<DataFrame> {
    let file_path = file_path.as_ref();
    let bytes = read_all_bytes(file_path)?;
    parse_tsv(bytes, &file_path.display().to_string(), opts)
}

/// Reads a lookup table (a previously saved lookup or a Biomart export) with the given columns.
pub fn read_lookup<T: AsRef<Path>>(file_path: T, columns: &LookupColumns) -> anyhow::Result<Lookup> {
    let file_path = file_path.as_ref();
    let df = read_tsv(file_path, &TsvOptions::default())?;
    let lookup = Lookup::from_df(&df, columns)
        .with_context(|| format!("Could not read a lookup from {:?}", file_path))?;
    info!(
        "read a lookup of {} identifiers from {:?}",
        lookup.len(),
        file_path
    );
    Ok(lookup)
}

/// Returns the distinct, non-empty values of the first column of `df`, in order of appearance.
pub fn first_column_values(df: &DataFrame) -> anyhow::Result<Vec<String>> {
    let Some(first) = df.get_columns().first() else {
        return Ok(Vec::new());
    };
    let first = first.cast(&DataType::String)?;
    Ok(dedup_preserving_order(
        first
            .str()?
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    ))
}

/// Reads a query gene list: the first column of a tab-separated file, with or without header.
pub fn read_query<T: AsRef<Path>>(file_path: T, has_header: bool) -> anyhow::Result<Vec<String>> {
    let file_path = file_path.as_ref();
    let opts = TsvOptions {
        has_header,
        ..Default::default()
    };
    let df = read_tsv(file_path, &opts)?;
    let query = first_column_values(&df)?;
    info!("read {} query genes from {:?}", query.len(), file_path);
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tsv_strings_and_nulls() {
        let bytes = b"a\tb\tc\n1\t\tx\n2\t3\n".to_vec();
        let df = parse_tsv(bytes, "t", &TsvOptions::default()).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.column("a").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("b").unwrap().null_count(), 1);
        assert_eq!(df.column("c").unwrap().null_count(), 1);
    }

    #[test]
    fn test_headerless_names() {
        let bytes = b"9606.P1\tSOX2\n9606.P2\tPAX6\n".to_vec();
        let df = parse_tsv(bytes.clone(), "t", &TsvOptions::headerless(&["id", "name"])).unwrap();
        assert_eq!(df.get_column_names(), vec!["id", "name"]);
        assert_eq!(first_column_values(&df).unwrap(), vec!["9606.P1", "9606.P2"]);

        let err = parse_tsv(bytes, "t", &TsvOptions::headerless(&["id"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnnotationError>(),
            Some(AnnotationError::NotTabular { .. })
        ));
    }

    #[test]
    fn test_empty_input_is_not_tabular() {
        let err = parse_tsv(b"\n".to_vec(), "empty", &TsvOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnnotationError>(),
            Some(AnnotationError::NotTabular { .. })
        ));
    }

    #[test]
    fn test_read_query_and_lookup() {
        let dir = std::env::temp_dir().join("orthoprop_reader_query");
        std::fs::create_dir_all(&dir).unwrap();

        let query = dir.join("query.tsv");
        std::fs::write(&query, "ENSG1\nENSG2\nENSG1\n").unwrap();
        assert_eq!(read_query(&query, false).unwrap(), vec!["ENSG1", "ENSG2"]);
        assert_eq!(read_query(&query, true).unwrap(), vec!["ENSG2", "ENSG1"]);

        let lookup = dir.join("biomart.tsv");
        std::fs::write(
            &lookup,
            "Gene stable ID\tProtein stable ID\tHGNC symbol\nENSG1\tENSP1\tSOX2\nENSG2\t\tPAX6\n",
        )
        .unwrap();
        let lookup = read_lookup(&lookup, &LookupColumns::biomart()).unwrap();
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.stable_id("ENSP1"), Some("ENSG1"));
    }
}
