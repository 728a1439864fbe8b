//! The pairwise-orthology (phylome) pathway.
//!
//! Each orthology table lists the human orthologs of the genes of one species as UniProt
//! accessions. In stable-ID mode the accessions are translated to stable gene IDs before the
//! query is located; in symbol mode the query is searched in the symbol column directly.

use crate::annotator::{annotate_query_positions, AnnotationColumns, MatchRule, RowIssue};
use crate::matcher::column_items;
use crate::options::{MatchMode, PhylomeColumns};
use crate::translator::Lookup;
use crate::utils::{
    dedup_preserving_order, split_alternates, TaxonId, ALTERNATE_DELIMITER, ITEM_DELIMITER,
    PLACEHOLDER,
};
use polars::prelude::*;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Gathers every external ID listed in the orthologs column of `tables`, with the taxon prefix
/// removed. Alternates of one item are collected separately.
pub fn collect_external_ids(
    tables: &[DataFrame],
    cols: &PhylomeColumns,
    taxon: &TaxonId,
) -> anyhow::Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();
    for df in tables {
        cols.is_valid(df, false)?;
        for items in column_items(df, &cols.orthologs)? {
            for item in items.iter() {
                for alt in split_alternates(item) {
                    let id = taxon.strip(alt).trim();
                    if !id.is_empty() {
                        ids.insert(id.to_string());
                    }
                }
            }
        }
    }
    info!(
        "collected {} distinct external IDs from {} tables",
        ids.len(),
        tables.len()
    );
    Ok(ids)
}

/// Translates one item of the orthologs column: the distinct stable IDs of its alternates,
/// `|`-joined, or `-` when none of them translates.
fn translate_item(item: &str, lookup: &Lookup, taxon: &TaxonId) -> String {
    let stable: Vec<&str> = dedup_preserving_order(
        split_alternates(item)
            .into_iter()
            .filter_map(|alt| lookup.stable_id(taxon.strip(alt)))
            .flat_map(split_alternates),
    );
    if stable.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        stable.join(&ALTERNATE_DELIMITER.to_string())
    }
}

/// Adds the stable-ID column to a raw orthology table.
///
/// The new column has exactly one item per item of the orthologs column, in the same order, so
/// positions found in one can be used in the other. An item whose alternates do not translate
/// becomes `-`. A row without orthologs gets a null.
///
/// ### Example
///
/// ```rust
/// use orthoprop::options::PhylomeColumns;
/// use orthoprop::phylome::translate_orthology;
/// use orthoprop::translator::Lookup;
/// use orthoprop::utils::TaxonId;
/// use polars::prelude::*;
///
/// let df = df!(
///     "##Seed_(co-)orthologs" => ["456.GeneA"],
///     "type" => ["one-to-many"],
///     "orthologs" => ["9606.P1,9606.P2|9606.P3"],
///     "GeneName_target" => ["SOX2,PAX6"],
/// ).unwrap();
/// let mut lookup = Lookup::new();
/// lookup.insert("P3", Some("ENSG6"), Some("PAX6"));
///
/// let taxon = TaxonId::parse("9606").unwrap();
/// let out = translate_orthology(&df, &lookup, &PhylomeColumns::default(), &taxon).unwrap();
/// let stable = out.column("ENSEMBL_ID").unwrap().str().unwrap().get(0);
/// assert_eq!(stable, Some("-,ENSG6"));
/// ```
pub fn translate_orthology(
    table: &DataFrame,
    lookup: &Lookup,
    cols: &PhylomeColumns,
    taxon: &TaxonId,
) -> anyhow::Result<DataFrame> {
    cols.is_valid(table, false)?;

    let mut n_items = 0usize;
    let mut n_missing = 0usize;
    let translated: Vec<Option<String>> = column_items(table, &cols.orthologs)?
        .iter()
        .map(|items| {
            if items.is_empty() {
                return None;
            }
            let row: Vec<String> = items
                .iter()
                .map(|item| translate_item(item, lookup, taxon))
                .collect();
            n_items += row.len();
            n_missing += row.iter().filter(|s| *s == PLACEHOLDER).count();
            Some(row.join(&ITEM_DELIMITER.to_string()))
        })
        .collect();

    if n_missing > 0 {
        warn!(
            "{} of {} orthologs have no stable ID and are written as {:?}",
            n_missing, n_items, PLACEHOLDER
        );
    }

    let mut out = table.clone();
    out.with_column(Series::new(&cols.stable_ids, translated))?;
    Ok(out)
}

/// Lists the orthologs of translated `tables` that did not get a stable ID.
///
/// Returns a table with the symbol (`Genes`) and the external IDs (`Uniprots`) of every such
/// item, one row per symbol. With `query_symbols` only the symbols in that set are reported.
/// Rows whose symbol column is not aligned with the orthologs column report no symbol.
pub fn lost_genes(
    tables: &[DataFrame],
    cols: &PhylomeColumns,
    query_symbols: Option<&HashSet<String>>,
) -> anyhow::Result<DataFrame> {
    let mut genes: Vec<Option<String>> = Vec::new();
    let mut externals: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for df in tables {
        cols.is_valid(df, true)?;
        let orthologs = column_items(df, &cols.orthologs)?;
        let stable = column_items(df, &cols.stable_ids)?;
        let symbols = column_items(df, &cols.symbols)?;

        for ((orthologs, stable), symbols) in orthologs.iter().zip(stable.iter()).zip(symbols.iter()) {
            if orthologs.len() != stable.len() {
                debug!("skipping a row whose stable IDs are not aligned with its orthologs");
                continue;
            }
            let aligned = symbols.len() == orthologs.len();
            for (pos, s) in stable.iter().enumerate() {
                if s != PLACEHOLDER {
                    continue;
                }
                let symbol = if aligned {
                    Some(symbols[pos].clone()).filter(|s| !s.is_empty())
                } else {
                    None
                };
                if let Some(query) = query_symbols {
                    match &symbol {
                        Some(symbol) if query.contains(symbol) => {}
                        _ => continue,
                    }
                }
                let key = symbol.clone().unwrap_or_else(|| orthologs[pos].clone());
                if seen.insert(key) {
                    genes.push(symbol);
                    externals.push(orthologs[pos].clone());
                }
            }
        }
    }

    info!("{} orthologs were lost in translation", genes.len());
    Ok(DataFrame::new(vec![
        Series::new("Genes", genes),
        Series::new("Uniprots", externals),
    ])?)
}

fn project(table: &DataFrame, columns: &[&str]) -> anyhow::Result<DataFrame> {
    Ok(table.select(columns.iter().copied())?)
}

fn log_annotation(mode: MatchMode, table: &DataFrame, annotated: &DataFrame, skipped: &[RowIssue]) {
    info!(
        "{:?} mode: {} of {} rows have an ortholog in the query",
        mode,
        annotated.height(),
        table.height()
    );
    if !skipped.is_empty() {
        warn!(
            "{} rows could not be annotated because their symbols are not aligned with their stable IDs",
            skipped.len()
        );
    }
}

/// Keeps the rows of a translated table with an ortholog among the `query` stable IDs and adds
/// the `ENSEMBL_query-only` and `GeneName_target_query-only` columns.
///
/// The output carries the seed, type, orthologs, symbol and stable-ID columns, in that order,
/// followed by the two masked columns.
pub fn annotate_stable_ids(
    table: &DataFrame,
    query: &[String],
    cols: &PhylomeColumns,
) -> anyhow::Result<(DataFrame, Vec<RowIssue>)> {
    cols.is_valid(table, true)?;
    let projected = project(table, &cols.carried(MatchMode::StableId))?;
    let (annotated, skipped) = annotate_query_positions(
        &projected,
        query,
        &AnnotationColumns::stable_ids(cols),
        MatchRule::Exact,
    )?;
    log_annotation(MatchMode::StableId, table, &annotated, &skipped);
    Ok((annotated, skipped))
}

/// Keeps the rows of a raw table with an ortholog among the `query` symbols and adds the
/// `GeneName_target_query-only` column. Symbols are compared with `rule`.
pub fn annotate_symbols(
    table: &DataFrame,
    query: &[String],
    cols: &PhylomeColumns,
    rule: MatchRule,
) -> anyhow::Result<(DataFrame, Vec<RowIssue>)> {
    cols.is_valid(table, false)?;
    let projected = project(table, &cols.carried(MatchMode::Symbol))?;
    let (annotated, skipped) =
        annotate_query_positions(&projected, query, &AnnotationColumns::symbols(cols), rule)?;
    log_annotation(MatchMode::Symbol, table, &annotated, &skipped);
    Ok((annotated, skipped))
}
