//! Phylome pairwise-orthology tables.
//!
//! A table lists, for every seed gene of one species, its orthologs in every other species. The
//! header is followed by a fixed block of metadata lines before the first record.

use crate::error::require_columns;
use crate::options::{PhylomeColumns, PhylomeConfig};
use crate::reader::{parse_tsv, TsvOptions};
use crate::utils::read_all_bytes;
use polars::prelude::*;
use std::path::Path;
use tracing::debug;

/// Keeps the rows of `df` whose `column` equals `species`.
pub fn filter_species(df: &DataFrame, column: &str, species: &str) -> anyhow::Result<DataFrame> {
    require_columns(df, "phylome orthology", &[column])?;
    let mask: BooleanChunked = df
        .column(column)?
        .str()?
        .into_iter()
        .map(|v| v.map(|v| v.trim() == species).unwrap_or(false))
        .collect();
    Ok(df.filter(&mask)?)
}

/// Parses a raw orthology table, skipping its metadata block and keeping only the rows that
/// point to the configured target species.
pub fn parse_orthology_table(
    bytes: Vec<u8>,
    source_name: &str,
    cfg: &PhylomeConfig,
) -> anyhow::Result<DataFrame> {
    let opts = TsvOptions::default().with_skip_rows_after_header(cfg.metadata_lines);
    let df = parse_tsv(bytes, source_name, &opts)?;
    cfg.columns.is_valid(&df, false)?;
    let filtered = filter_species(&df, &cfg.columns.target_species, &cfg.target_species)?;
    debug!(
        "kept {} of {} rows of {} with target species {:?}",
        filtered.height(),
        df.height(),
        source_name,
        cfg.target_species
    );
    Ok(filtered)
}

/// Reads the raw orthology table at `file_path`. See [parse_orthology_table].
pub fn read_orthology_table<T: AsRef<Path>>(
    file_path: T,
    cfg: &PhylomeConfig,
) -> anyhow::Result<DataFrame> {
    let file_path = file_path.as_ref();
    parse_orthology_table(
        read_all_bytes(file_path)?,
        &file_path.display().to_string(),
        cfg,
    )
}

/// Reads an orthology table saved after translation. It has a plain header and must carry
/// the stable-ID column.
pub fn read_translated_table<T: AsRef<Path>>(
    file_path: T,
    columns: &PhylomeColumns,
) -> anyhow::Result<DataFrame> {
    let file_path = file_path.as_ref();
    let df = parse_tsv(
        read_all_bytes(file_path)?,
        &file_path.display().to_string(),
        &TsvOptions::default(),
    )?;
    columns.is_valid(&df, true)?;
    Ok(df)
}
