//! Locating query identifiers inside multi-valued cells and re-emitting "query-only" columns.
//!
//! Annotation is done in two passes over the same tokenization:
//!
//! 1. [locate_matches] scans a table and records, for every (row, query) pair that matches, the
//!    zero-based position of the matching item and the total number of items in that cell.
//! 2. [build_masked_columns] rebuilds, for every selected row, a list with one slot per item,
//!    writes the matching queries into their slots and fills every other slot with `-`.
//!
//! The masked columns therefore line up item by item with the column they were derived from.

use crate::error::{require_columns, AnnotationError};
use crate::matcher::column_items;
use crate::options::PhylomeColumns;
use crate::utils::{
    dedup_preserving_order, split_alternates, ALTERNATE_DELIMITER, ITEM_DELIMITER, PLACEHOLDER,
};
use anyhow::bail;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// How an item of a multi-valued cell is compared with a query identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MatchRule {
    /// One of the `|`-separated alternates of the item equals the query.
    #[default]
    Exact,
    /// The item contains the query as a substring. Used for symbols, to absorb alias quirks
    /// (the query `SOX2` also hits `SOX2-OT`).
    Contains,
    /// The part of the item before `@` equals the query, as in the `OG@taxid|name` items of
    /// emapper's `eggNOG_OGs` column.
    OrthogroupId,
}

impl MatchRule {
    pub fn matches(&self, item: &str, query: &str) -> bool {
        match self {
            MatchRule::Exact => split_alternates(item).iter().any(|a| *a == query),
            MatchRule::Contains => !query.is_empty() && item.contains(query),
            MatchRule::OrthogroupId => orthogroup_key(item) == query,
        }
    }
}

fn orthogroup_key(item: &str) -> &str {
    item.split('@').next().unwrap_or(item).trim()
}

/// The columns involved in one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationColumns {
    /// The multi-valued column searched for the queries.
    pub match_column: String,
    /// A multi-valued column parallel to `match_column` whose items are reported alongside each
    /// match, e.g. the symbols of the matched stable IDs.
    pub display_column: Option<String>,
    /// The output column holding the masked `match_column`.
    pub masked_match: String,
    /// The output column holding the masked `display_column`.
    pub masked_display: Option<String>,
}

impl AnnotationColumns {
    /// Searches stable IDs and reports the symbols found at the same positions.
    pub fn stable_ids(cols: &PhylomeColumns) -> AnnotationColumns {
        AnnotationColumns {
            match_column: cols.stable_ids.clone(),
            display_column: Some(cols.symbols.clone()),
            masked_match: cols.masked_stable_ids.clone(),
            masked_display: Some(cols.masked_symbols.clone()),
        }
    }

    /// Searches symbols directly.
    pub fn symbols(cols: &PhylomeColumns) -> AnnotationColumns {
        AnnotationColumns {
            match_column: cols.symbols.clone(),
            display_column: None,
            masked_match: cols.masked_symbols.clone(),
            masked_display: None,
        }
    }

    /// Searches `column` without a display column and writes the masked copy to `masked`.
    pub fn single<T: AsRef<str>>(column: T, masked: T) -> AnnotationColumns {
        AnnotationColumns {
            match_column: column.as_ref().to_string(),
            display_column: None,
            masked_match: masked.as_ref().to_string(),
            masked_display: None,
        }
    }
}

/// Where one query was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPosition {
    /// The row of [LocatedMatches::subset] the match is in.
    pub row: usize,
    pub matched_id: String,
    /// The item of the display column at `position`, if a display column was given.
    pub display_symbol: Option<String>,
    pub position: usize,
    pub total: usize,
}

/// A row that could not be annotated. The row is left out of the subset and the run continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    /// The row of the input table.
    pub row: usize,
    pub reason: String,
}

/// The result of [locate_matches].
#[derive(Debug, Clone)]
pub struct LocatedMatches {
    /// The rows with at least one match, in input order.
    pub subset: DataFrame,
    /// For every row of `subset`, its row in the input table.
    pub source_rows: Vec<usize>,
    /// Ordered by subset row, then by first appearance of the query.
    pub positions: Vec<QueryPosition>,
    pub skipped: Vec<RowIssue>,
}

impl LocatedMatches {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// For every query, finds the first item of `items` it matches. Keys are query indices.
fn first_hits(
    items: &[String],
    queries: &[String],
    index: &HashMap<&str, usize>,
    rule: MatchRule,
) -> BTreeMap<usize, usize> {
    let mut hits = BTreeMap::new();
    match rule {
        MatchRule::Exact => {
            for (pos, item) in items.iter().enumerate() {
                for alt in split_alternates(item) {
                    if let Some(&q) = index.get(alt) {
                        hits.entry(q).or_insert(pos);
                    }
                }
            }
        }
        MatchRule::OrthogroupId => {
            for (pos, item) in items.iter().enumerate() {
                if let Some(&q) = index.get(orthogroup_key(item)) {
                    hits.entry(q).or_insert(pos);
                }
            }
        }
        MatchRule::Contains => {
            for (q, query) in queries.iter().enumerate() {
                if let Some(pos) = items.iter().position(|item| rule.matches(item, query)) {
                    hits.insert(q, pos);
                }
            }
        }
    }
    hits
}

/// Selects the rows of `df` whose `match_column` holds at least one of `queries`, and records
/// where each query sits in the cell.
///
/// Only the first matching item is recorded per (row, query) pair: if a cell holds the same
/// query twice, the later occurrence is not reported and stays masked. Distinct queries that
/// hit the same row each get their own [QueryPosition].
///
/// When a display column is given, a matching row whose display cell has a different number of
/// items than its match cell cannot be annotated consistently. It is skipped and reported in
/// [LocatedMatches::skipped].
///
/// ### Arguments
///
/// * `df` - the table to scan; it is not modified.
/// * `queries` - the query identifiers. Duplicates and empty strings are ignored.
/// * `cols` - the match column and optional display column.
/// * `rule` - how an item is compared with a query.
///
/// ### Returns
///
/// The matching rows in input order, the positions, and the skipped rows.
///
/// ### Example
///
/// ```rust
/// use orthoprop::annotator::{locate_matches, AnnotationColumns, MatchRule};
/// use polars::prelude::*;
///
/// let df = df!(
///     "Seed" => ["456.GeneA", "768.GeneB"],
///     "orthologs" => ["HumanA,HumanA7", "HumanB"],
/// ).unwrap();
/// let cols = AnnotationColumns::single("orthologs", "orthologs_query-only");
/// let located = locate_matches(&df, &["HumanA7".to_string()], &cols, MatchRule::Exact).unwrap();
/// assert_eq!(located.subset.height(), 1);
/// assert_eq!(located.positions[0].position, 1);
/// assert_eq!(located.positions[0].total, 2);
/// ```
pub fn locate_matches(
    df: &DataFrame,
    queries: &[String],
    cols: &AnnotationColumns,
    rule: MatchRule,
) -> anyhow::Result<LocatedMatches> {
    require_columns(df, "annotation", &[&cols.match_column])?;
    if let Some(display) = &cols.display_column {
        require_columns(df, "annotation", &[display])?;
    }

    let queries: Vec<String> = dedup_preserving_order(
        queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty()),
    );
    let index: HashMap<&str, usize> = queries
        .iter()
        .enumerate()
        .map(|(i, q)| (q.as_str(), i))
        .collect();

    let match_items = column_items(df, &cols.match_column)?;
    let display_items = match &cols.display_column {
        Some(display) => Some(column_items(df, display)?),
        None => None,
    };

    let mut source_rows = Vec::new();
    let mut positions = Vec::new();
    let mut skipped = Vec::new();

    for (i, items) in match_items.iter().enumerate() {
        let hits = first_hits(items, &queries, &index, rule);
        if hits.is_empty() {
            continue;
        }

        let display_row = display_items.as_ref().map(|d| &d[i]);
        if let Some(display_row) = display_row {
            if display_row.len() != items.len() {
                let reason = format!(
                    "{:?} has {} items but {:?} has {}",
                    cols.match_column,
                    items.len(),
                    cols.display_column.as_deref().unwrap_or_default(),
                    display_row.len()
                );
                warn!("Skipping row {} during annotation: {}", i, reason);
                skipped.push(RowIssue { row: i, reason });
                continue;
            }
        }

        let subset_row = source_rows.len();
        source_rows.push(i);
        for (q, pos) in hits {
            positions.push(QueryPosition {
                row: subset_row,
                matched_id: queries[q].clone(),
                display_symbol: display_row.map(|d| d[pos].clone()),
                position: pos,
                total: items.len(),
            });
        }
    }

    let idx = IdxCa::from_vec(
        "idx",
        source_rows.iter().map(|&r| r as IdxSize).collect::<Vec<IdxSize>>(),
    );
    let subset = df.take(&idx)?;

    debug!(
        "{} queries matched {} of {} rows of {:?} ({} skipped)",
        queries.len(),
        subset.height(),
        df.height(),
        cols.match_column,
        skipped.len()
    );

    Ok(LocatedMatches {
        subset,
        source_rows,
        positions,
        skipped,
    })
}

fn fill_slot(slots: &mut [Option<String>], position: usize, value: &str) {
    match &mut slots[position] {
        Some(existing) => {
            if !split_alternates(existing).contains(&value) {
                existing.push(ALTERNATE_DELIMITER);
                existing.push_str(value);
            }
        }
        empty => *empty = Some(value.to_string()),
    }
}

fn join_slots(slots: Vec<Option<String>>) -> String {
    slots
        .into_iter()
        .map(|s| s.unwrap_or_else(|| PLACEHOLDER.to_string()))
        .collect::<Vec<String>>()
        .join(&ITEM_DELIMITER.to_string())
}

/// Adds the masked columns to the subset of `located`.
///
/// Every masked cell has as many items as the cell it was derived from. A slot holds the query
/// (or its display symbol) found there, several distinct queries are `|`-joined, and all other
/// slots hold `-`.
///
/// The match column is tokenized again here. If its item count for a row disagrees with the
/// count recorded by [locate_matches], the table changed in between and an
/// [AnnotationError::Consistency] is returned instead of a truncated or padded column.
pub fn build_masked_columns(
    located: &LocatedMatches,
    cols: &AnnotationColumns,
) -> anyhow::Result<DataFrame> {
    let subset = &located.subset;
    let match_items = column_items(subset, &cols.match_column)?;
    let display_items = match (&cols.display_column, &cols.masked_display) {
        (Some(display), Some(_)) => Some(column_items(subset, display)?),
        _ => None,
    };

    let mut masked: Vec<Vec<Option<String>>> =
        match_items.iter().map(|items| vec![None; items.len()]).collect();
    let mut masked_display: Option<Vec<Vec<Option<String>>>> = display_items
        .as_ref()
        .map(|d| d.iter().map(|items| vec![None; items.len()]).collect());

    for p in located.positions.iter() {
        let Some(items) = match_items.get(p.row) else {
            bail!(
                "A match was recorded for row {} but the subset has only {} rows",
                p.row,
                subset.height()
            );
        };
        if items.len() != p.total {
            return Err(AnnotationError::Consistency {
                row: p.row,
                column: cols.match_column.clone(),
                expected: p.total,
                found: items.len(),
            }
            .into());
        }
        if p.position >= p.total {
            bail!(
                "Position {} of {:?} in row {} is outside its {} items",
                p.position,
                p.matched_id,
                p.row,
                p.total
            );
        }
        fill_slot(&mut masked[p.row], p.position, &p.matched_id);

        if let (Some(display_items), Some(masked_display)) =
            (display_items.as_ref(), masked_display.as_mut())
        {
            let found = display_items[p.row].len();
            if found != p.total {
                return Err(AnnotationError::Consistency {
                    row: p.row,
                    column: cols.display_column.clone().unwrap_or_default(),
                    expected: p.total,
                    found,
                }
                .into());
            }
            let symbol = p
                .display_symbol
                .as_deref()
                .unwrap_or(display_items[p.row][p.position].as_str());
            if !symbol.is_empty() {
                fill_slot(&mut masked_display[p.row], p.position, symbol);
            }
        }
    }

    let mut out = subset.clone();
    let masked: Vec<String> = masked.into_iter().map(join_slots).collect();
    out.with_column(Series::new(&cols.masked_match, masked))?;
    if let (Some(name), Some(masked_display)) = (&cols.masked_display, masked_display) {
        let masked_display: Vec<String> = masked_display.into_iter().map(join_slots).collect();
        out.with_column(Series::new(name, masked_display))?;
    }
    Ok(out)
}

/// Runs [locate_matches] and [build_masked_columns] and returns the annotated rows together with
/// the rows that had to be skipped.
pub fn annotate_query_positions(
    df: &DataFrame,
    queries: &[String],
    cols: &AnnotationColumns,
    rule: MatchRule,
) -> anyhow::Result<(DataFrame, Vec<RowIssue>)> {
    let located = locate_matches(df, queries, cols, rule)?;
    let annotated = build_masked_columns(&located, cols)?;
    Ok((annotated, located.skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::split_items;

    fn strings(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|x| x.unwrap_or_default().to_string())
            .collect()
    }

    fn queries(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_query_position() {
        let df = df!(
            "Seed" => ["456.GeneA"],
            "orthologs" => ["HumanA,HumanA7"],
        )
        .unwrap();
        let cols = AnnotationColumns::single("orthologs", "masked");
        let located = locate_matches(&df, &queries(&["HumanA7"]), &cols, MatchRule::Exact).unwrap();

        assert_eq!(located.positions.len(), 1);
        assert_eq!(located.positions[0].position, 1);
        assert_eq!(located.positions[0].total, 2);

        let out = build_masked_columns(&located, &cols).unwrap();
        assert_eq!(strings(&out, "masked"), vec!["-,HumanA7"]);
        assert_eq!(strings(&out, "Seed"), vec!["456.GeneA"]);
    }

    #[test]
    fn test_stable_ids_with_symbols() {
        let cols = PhylomeColumns::default();
        let df = df!(
            "##Seed_(co-)orthologs" => ["456.GeneA", "768.GeneB", "999.GeneC"],
            "ENSEMBL_ID" => ["ENSG1|ENSG11,ENSG2,ENSG3", "ENSG4", "-,ENSG3"],
            "GeneName_target" => ["SOX2,PAX6,MYC", "FOXP2", "X,MYC"],
        )
        .unwrap();
        let ann = AnnotationColumns::stable_ids(&cols);
        let (out, skipped) =
            annotate_query_positions(&df, &queries(&["ENSG3", "ENSG11"]), &ann, MatchRule::Exact)
                .unwrap();

        assert!(skipped.is_empty());
        assert_eq!(
            strings(&out, "##Seed_(co-)orthologs"),
            vec!["456.GeneA", "999.GeneC"]
        );
        assert_eq!(
            strings(&out, "ENSEMBL_query-only"),
            vec!["ENSG11,-,ENSG3", "-,ENSG3"]
        );
        assert_eq!(
            strings(&out, "GeneName_target_query-only"),
            vec!["SOX2,-,MYC", "-,MYC"]
        );
    }

    #[test]
    fn test_masked_length_and_content() {
        let df = df!(
            "orthologs" => ["A1,B1,A1,C1", "C1", "D1,E1", ""],
        )
        .unwrap();
        let cols = AnnotationColumns::single("orthologs", "masked");
        let qs = queries(&["A1", "C1", "E1"]);
        let located = locate_matches(&df, &qs, &cols, MatchRule::Exact).unwrap();
        let out = build_masked_columns(&located, &cols).unwrap();

        // only the first A1 is kept
        assert_eq!(strings(&out, "masked"), vec!["A1,-,-,C1", "C1", "-,E1"]);
        for p in located.positions.iter() {
            assert!(p.position < p.total);
        }
        for (orig, masked) in strings(&out, "orthologs")
            .iter()
            .zip(strings(&out, "masked").iter())
        {
            let orig = split_items(Some(orig));
            let masked = split_items(Some(masked));
            assert_eq!(orig.len(), masked.len());
            for (o, m) in orig.iter().zip(masked.iter()) {
                assert!(*m == PLACEHOLDER || (m == o && qs.iter().any(|q| q == m)));
            }
        }
    }

    #[test]
    fn test_contains_rule_joins_collisions() {
        let df = df!("GeneName_target" => ["SOX2-OT,PAX6"]).unwrap();
        let cols = AnnotationColumns::single("GeneName_target", "masked");
        let (out, _) = annotate_query_positions(
            &df,
            &queries(&["SOX2", "SOX2-OT", "SOX2"]),
            &cols,
            MatchRule::Contains,
        )
        .unwrap();
        assert_eq!(strings(&out, "masked"), vec!["SOX2|SOX2-OT,-"]);
    }

    #[test]
    fn test_orthogroup_rule() {
        assert!(MatchRule::OrthogroupId.matches("COG0513@1|root", "COG0513"));
        assert!(!MatchRule::OrthogroupId.matches("COG0513@1|root", "root"));
        assert!(MatchRule::Exact.matches("E1|E2", "E2"));
        assert!(!MatchRule::Exact.matches("E12", "E1"));
        assert!(MatchRule::Contains.matches("E12", "E1"));
    }

    #[test]
    fn test_mismatched_display_row_is_skipped() {
        let cols = PhylomeColumns::default();
        let df = df!(
            "ENSEMBL_ID" => ["ENSG1,ENSG2", "ENSG2"],
            "GeneName_target" => ["SOX2", "PAX6"],
        )
        .unwrap();
        let ann = AnnotationColumns::stable_ids(&cols);
        let located = locate_matches(&df, &queries(&["ENSG2"]), &ann, MatchRule::Exact).unwrap();
        assert_eq!(located.skipped.len(), 1);
        assert_eq!(located.skipped[0].row, 0);
        assert_eq!(located.source_rows, vec![1]);
    }

    #[test]
    fn test_changed_table_is_a_consistency_error() {
        let df = df!("orthologs" => ["HumanA,HumanA7"]).unwrap();
        let cols = AnnotationColumns::single("orthologs", "masked");
        let mut located =
            locate_matches(&df, &queries(&["HumanA7"]), &cols, MatchRule::Exact).unwrap();
        located.subset = df!("orthologs" => ["HumanA7"]).unwrap();

        let err = build_masked_columns(&located, &cols).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AnnotationError>(),
            Some(&AnnotationError::Consistency {
                row: 0,
                column: "orthologs".to_string(),
                expected: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn test_no_match_gives_empty_subset() {
        let df = df!("orthologs" => ["HumanA"]).unwrap();
        let cols = AnnotationColumns::single("orthologs", "masked");
        let (out, _) =
            annotate_query_positions(&df, &queries(&["Nope"]), &cols, MatchRule::Exact).unwrap();
        assert_eq!(out.height(), 0);
        assert!(out.get_column_names().contains(&"masked"));
    }
}
