//! eggNOG-mapper annotation output (`*.emapper.annotations`).

use crate::error::require_columns;
use crate::reader::{parse_tsv, TsvOptions};
use crate::utils::read_all_bytes;
use polars::prelude::*;
use std::path::Path;
use tracing::debug;

/// The annotated protein of the target proteome.
pub const QUERY: &str = "#query";
/// The orthogroups of the protein at every level, as `OG@taxid|level name` items.
pub const ORTHOGROUPS: &str = "eggNOG_OGs";
/// The GO terms of the protein, `,`-separated.
pub const GO_TERMS: &str = "GOs";

/// Parses emapper output. `skip_lines` comment lines precede the header, and the run statistics
/// that emapper appends as `##` lines are dropped.
pub fn parse_emapper(bytes: Vec<u8>, source_name: &str, skip_lines: usize) -> anyhow::Result<DataFrame> {
    let df = parse_tsv(bytes, source_name, &TsvOptions::default().with_skip_rows(skip_lines))?;
    require_columns(&df, "emapper", &[QUERY])?;
    let mask: BooleanChunked = df
        .column(QUERY)?
        .str()?
        .into_iter()
        .map(|q| q.map(|q| !q.starts_with("##")).unwrap_or(false))
        .collect();
    let out = df.filter(&mask)?;
    debug!(
        "dropped {} trailing comment rows from {}",
        df.height() - out.height(),
        source_name
    );
    Ok(out)
}

pub fn read_emapper<T: AsRef<Path>>(file_path: T, skip_lines: usize) -> anyhow::Result<DataFrame> {
    let file_path = file_path.as_ref();
    parse_emapper(
        read_all_bytes(file_path)?,
        &file_path.display().to_string(),
        skip_lines,
    )
}
