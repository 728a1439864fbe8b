//! The ortholog-group (eggNOG) pathway.
//!
//! A members table is restricted to the proteins of one taxon, exploded into one row per
//! protein and joined with a [Lookup]. Several taxonomic levels are combined into one table
//! keyed by protein, which is then matched against the query genes and, through the
//! orthogroups, against the emapper annotation of a target proteome.

use crate::annotator::{build_masked_columns, locate_matches, AnnotationColumns, MatchRule};
use crate::error::require_columns;
use crate::matcher::{column_items, match_tokens, matching_tokens, TokenPredicate};
use crate::options::{LevelLayout, LookupColumns};
use crate::reader::eggnog::{LEVEL, MEMBERS, ORTHOGROUP};
use crate::reader::emapper::{ORTHOGROUPS, QUERY};
use crate::translator::Lookup;
use crate::utils::{dedup_preserving_order, split_alternates, split_items, TaxonId, ITEM_DELIMITER};
use anyhow::bail;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// The column of [merge_with_query]'s output holding the query gene.
pub const QUERY_GENE: &str = "query";
/// The masked copy of emapper's orthogroup column.
pub const MASKED_ORTHOGROUPS: &str = "eggNOG_OGs_query-only";
/// The query genes behind the orthogroups an emapper row hit.
pub const QUERY_GENES: &str = "query_genes";

/// One protein of the target taxon in one orthogroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrthologRecord {
    pub protein_id: String,
    pub stable_id: Option<String>,
    pub symbol: Option<String>,
    pub orthogroup: String,
    pub taxon_label: String,
}

/// The translated proteins of one taxonomic level.
#[derive(Debug, Clone)]
pub struct TranslatedLevel {
    /// E.g. `@33213`.
    pub label: String,
    pub records: Vec<OrthologRecord>,
}

/// Keeps the rows of a members table with at least one protein of `taxon`, reducing the member
/// column to those proteins.
pub fn restrict_to_taxon(raw: &DataFrame, taxon: &TaxonId) -> anyhow::Result<DataFrame> {
    match_tokens(raw, MEMBERS, &TokenPredicate::TaxonPrefix(taxon.clone()))
}

/// Splits the member column of a restricted table into one row per protein. Every other column
/// is repeated. The taxon prefix is removed from the proteins when `strip_prefix` is set, and a
/// protein listed twice in one orthogroup yields one row.
pub fn explode(
    restricted: &DataFrame,
    taxon: &TaxonId,
    strip_prefix: bool,
) -> anyhow::Result<DataFrame> {
    require_columns(restricted, "eggNOG members", &[ORTHOGROUP, MEMBERS])?;
    let members = column_items(restricted, MEMBERS)?;
    let groups = restricted.column(ORTHOGROUP)?.cast(&DataType::String)?;

    let mut seen: HashSet<(Option<&str>, String)> = HashSet::new();
    let mut idx: Vec<IdxSize> = Vec::new();
    let mut proteins: Vec<String> = Vec::new();
    for (i, (items, group)) in members.iter().zip(groups.str()?.into_iter()).enumerate() {
        for item in items.iter().filter(|item| !item.is_empty()) {
            let protein = if strip_prefix {
                taxon.strip(item)
            } else {
                item.as_str()
            };
            if seen.insert((group, protein.to_string())) {
                idx.push(i as IdxSize);
                proteins.push(protein.to_string());
            }
        }
    }

    let mut out = restricted.take(&IdxCa::from_vec("idx", idx))?;
    out.with_column(Series::new(MEMBERS, proteins))?;
    Ok(out)
}

/// Left-joins the exploded proteins with `lookup`. Proteins the lookup does not know keep
/// `None` for their stable ID and symbol.
pub fn join_translation(
    exploded: &DataFrame,
    lookup: &Lookup,
    label: &str,
) -> anyhow::Result<Vec<OrthologRecord>> {
    require_columns(exploded, "eggNOG members", &[ORTHOGROUP, MEMBERS])?;
    let groups = exploded.column(ORTHOGROUP)?.cast(&DataType::String)?;
    let proteins = exploded.column(MEMBERS)?.cast(&DataType::String)?;

    let mut records = Vec::with_capacity(exploded.height());
    for (group, protein) in groups.str()?.into_iter().zip(proteins.str()?.into_iter()) {
        let (Some(group), Some(protein)) = (group, protein) else {
            continue;
        };
        let entry = lookup.get(protein);
        records.push(OrthologRecord {
            protein_id: protein.to_string(),
            stable_id: entry.and_then(|e| e.stable_id.clone()),
            symbol: entry.and_then(|e| e.symbol.clone()),
            orthogroup: group.to_string(),
            taxon_label: label.to_string(),
        });
    }
    Ok(records)
}

/// The label of a level: `@` followed by the first cell of the level column.
pub fn level_label(raw: &DataFrame) -> anyhow::Result<String> {
    require_columns(raw, "eggNOG members", &[LEVEL])?;
    let level = raw.column(LEVEL)?.cast(&DataType::String)?;
    match level.str()?.get(0).map(|l| l.trim()) {
        Some(l) if !l.is_empty() => Ok(format!("@{}", l)),
        _ => bail!("The members table has no level in its first row to label it with"),
    }
}

/// Restricts a raw members table to `taxon`, explodes it and translates its proteins.
pub fn translate_level(
    raw: &DataFrame,
    lookup: &Lookup,
    taxon: &TaxonId,
) -> anyhow::Result<TranslatedLevel> {
    let label = level_label(raw)?;
    let members = matching_tokens(raw, MEMBERS, &TokenPredicate::TaxonPrefix(taxon.clone()))?;
    let restricted = restrict_to_taxon(raw, taxon)?;
    let exploded = explode(&restricted, taxon, true)?;
    let records = join_translation(&exploded, lookup, &label)?;

    let n_untranslated = records.iter().filter(|r| r.stable_id.is_none()).count();
    info!(
        "level {}: {} of {} orthogroups hold {} distinct proteins of taxon {} ({} memberships, {} without a stable ID)",
        label,
        restricted.height(),
        raw.height(),
        members.len(),
        taxon.id(),
        records.len(),
        n_untranslated
    );
    Ok(TranslatedLevel { label, records })
}

/// The orthogroup column of a level in a wide table.
pub fn orthogroup_column(label: &str) -> String {
    format!("{}{}", ORTHOGROUP, label)
}

fn is_orthogroup_column(name: &str) -> bool {
    name.starts_with(ORTHOGROUP)
}

/// Combines translated levels into one table.
///
/// With [LevelLayout::Wide] the result has one row per protein, in order of first appearance,
/// with the protein, its stable ID and symbol, and one `Orthogroup@<label>` column per level.
/// A single level keeps a plain `Orthogroup` column. Orthogroups of one protein at one level are
/// `,`-joined. The translation is taken from the first level that has one, so the table holds
/// exactly one stable-ID/symbol pair however many levels are merged.
///
/// With [LevelLayout::Long] the records are stacked with a `Level` column.
///
/// ### Example
///
/// ```rust
/// use orthoprop::options::{LevelLayout, LookupColumns};
/// use orthoprop::orthogroup::{combine_across_levels, OrthologRecord, TranslatedLevel};
///
/// let record = |og: &str, label: &str| OrthologRecord {
///     protein_id: "P1".to_string(),
///     stable_id: Some("ENSG1".to_string()),
///     symbol: Some("SOX2".to_string()),
///     orthogroup: og.to_string(),
///     taxon_label: label.to_string(),
/// };
/// let levels = vec![
///     TranslatedLevel { label: "@Bilateria".to_string(), records: vec![record("OG1", "@Bilateria")] },
///     TranslatedLevel { label: "@Metazoa".to_string(), records: vec![record("OG9", "@Metazoa")] },
/// ];
/// let df = combine_across_levels(&levels, LevelLayout::Wide, &LookupColumns::biomart()).unwrap();
/// assert_eq!(df.shape(), (1, 5));
/// ```
pub fn combine_across_levels(
    levels: &[TranslatedLevel],
    layout: LevelLayout,
    cols: &LookupColumns,
) -> anyhow::Result<DataFrame> {
    let mut labels: Vec<&str> = Vec::with_capacity(levels.len());
    for level in levels {
        if labels.contains(&level.label.as_str()) {
            bail!("The level {} was given more than once", level.label);
        }
        labels.push(&level.label);
    }

    match layout {
        LevelLayout::Long => {
            let records = levels.iter().flat_map(|l| l.records.iter());
            let mut level = Vec::new();
            let mut group = Vec::new();
            let mut protein = Vec::new();
            let mut stable = Vec::new();
            let mut symbol = Vec::new();
            for r in records {
                level.push(r.taxon_label.as_str());
                group.push(r.orthogroup.as_str());
                protein.push(r.protein_id.as_str());
                stable.push(r.stable_id.as_deref());
                symbol.push(r.symbol.as_deref());
            }
            Ok(DataFrame::new(vec![
                Series::new(LEVEL, level),
                Series::new(ORTHOGROUP, group),
                Series::new(MEMBERS, protein),
                Series::new(&cols.stable, stable),
                Series::new(&cols.symbol, symbol),
            ])?)
        }
        LevelLayout::Wide => {
            struct Row<'a> {
                protein: &'a str,
                stable: Option<&'a str>,
                symbol: Option<&'a str>,
                groups: Vec<Vec<&'a str>>,
            }

            let mut rows: Vec<Row> = Vec::new();
            let mut index: HashMap<&str, usize> = HashMap::new();
            for (l, level) in levels.iter().enumerate() {
                for r in level.records.iter() {
                    let i = *index.entry(r.protein_id.as_str()).or_insert_with(|| {
                        rows.push(Row {
                            protein: r.protein_id.as_str(),
                            stable: None,
                            symbol: None,
                            groups: vec![Vec::new(); levels.len()],
                        });
                        rows.len() - 1
                    });
                    let row = &mut rows[i];
                    if row.stable.is_none() {
                        row.stable = r.stable_id.as_deref();
                    }
                    if row.symbol.is_none() {
                        row.symbol = r.symbol.as_deref();
                    }
                    if !row.groups[l].contains(&r.orthogroup.as_str()) {
                        row.groups[l].push(r.orthogroup.as_str());
                    }
                }
            }

            let mut columns = vec![
                Series::new(MEMBERS, rows.iter().map(|r| r.protein).collect::<Vec<&str>>()),
                Series::new(
                    &cols.stable,
                    rows.iter().map(|r| r.stable).collect::<Vec<Option<&str>>>(),
                ),
                Series::new(
                    &cols.symbol,
                    rows.iter().map(|r| r.symbol).collect::<Vec<Option<&str>>>(),
                ),
            ];
            for (l, label) in labels.iter().enumerate() {
                let name = if levels.len() == 1 {
                    ORTHOGROUP.to_string()
                } else {
                    orthogroup_column(label)
                };
                let groups: Vec<Option<String>> = rows
                    .iter()
                    .map(|r| {
                        if r.groups[l].is_empty() {
                            None
                        } else {
                            Some(r.groups[l].join(&ITEM_DELIMITER.to_string()))
                        }
                    })
                    .collect();
                columns.push(Series::new(&name, groups));
            }
            let df = DataFrame::new(columns)?;
            debug!(
                "combined {} levels into {} proteins",
                levels.len(),
                df.height()
            );
            Ok(df)
        }
    }
}

/// Pairs every query gene with the rows of `translated` whose `merge_on` column names it.
///
/// The output starts with a `query` column. With `keep_conversions` every column of the
/// translated table follows; otherwise only the orthogroup columns do. Query genes found nowhere
/// are left out and counted in a warning.
pub fn merge_with_query(
    translated: &DataFrame,
    query: &[String],
    merge_on: &str,
    keep_conversions: bool,
) -> anyhow::Result<DataFrame> {
    require_columns(translated, "translated eggNOG", &[merge_on])?;
    let keys = translated.column(merge_on)?.cast(&DataType::String)?;

    let mut rows_of: HashMap<&str, Vec<IdxSize>> = HashMap::new();
    for (i, key) in keys.str()?.into_iter().enumerate() {
        for alt in key.map(split_alternates).unwrap_or_default() {
            rows_of.entry(alt).or_default().push(i as IdxSize);
        }
    }

    let mut genes: Vec<&str> = Vec::new();
    let mut idx: Vec<IdxSize> = Vec::new();
    let mut n_missing = 0usize;
    for gene in query.iter() {
        match rows_of.get(gene.as_str()) {
            Some(rows) => {
                for &r in dedup_preserving_order(rows.iter().copied()).iter() {
                    genes.push(gene.as_str());
                    idx.push(r);
                }
            }
            None => n_missing += 1,
        }
    }
    if n_missing > 0 {
        warn!(
            "{} of {} query genes have no orthogroup in the translated table",
            n_missing,
            query.len()
        );
    }

    let taken = translated.take(&IdxCa::from_vec("idx", idx))?;
    let mut columns = vec![Series::new(QUERY_GENE, genes)];
    for s in taken.get_columns() {
        if keep_conversions || is_orthogroup_column(s.name()) {
            columns.push(s.clone());
        }
    }
    Ok(DataFrame::new(columns)?)
}

/// Maps every orthogroup of the query table to the query genes in it.
fn query_orthogroup_index(query_orthogroups: &DataFrame) -> anyhow::Result<Vec<(String, Vec<String>)>> {
    require_columns(query_orthogroups, "query orthogroup", &[QUERY_GENE])?;
    let genes = query_orthogroups.column(QUERY_GENE)?.cast(&DataType::String)?;
    let genes: Vec<Option<&str>> = genes.str()?.into_iter().collect();

    let mut order: Vec<String> = Vec::new();
    let mut genes_of: HashMap<String, Vec<String>> = HashMap::new();
    for name in query_orthogroups.get_column_names() {
        if !is_orthogroup_column(name) {
            continue;
        }
        for (row, items) in column_items(query_orthogroups, name)?.into_iter().enumerate() {
            for og in items.into_iter().filter(|og| !og.is_empty()) {
                let entry = genes_of.entry(og.clone()).or_insert_with(|| {
                    order.push(og.clone());
                    Vec::new()
                });
                if let Some(gene) = genes[row] {
                    if !entry.iter().any(|g| g == gene) {
                        entry.push(gene.to_string());
                    }
                }
            }
        }
    }
    if order.is_empty() {
        bail!("The query orthogroup table has no orthogroup column");
    }
    Ok(order
        .into_iter()
        .map(|og| {
            let genes = genes_of.remove(&og).unwrap_or_default();
            (og, genes)
        })
        .collect())
}

/// Marks the emapper rows whose orthogroups contain a query gene.
///
/// Every item of emapper's `eggNOG_OGs` column (`OG@taxid|name`) is compared with the
/// orthogroups of `query_orthogroups` by its orthogroup ID. Matching rows get an
/// `eggNOG_OGs_query-only` column, aligned item by item with `eggNOG_OGs`, and a `query_genes`
/// column listing the query genes behind the hits.
///
/// Without `keep_all_targets` only the matching rows are returned. With it every emapper row is
/// kept, and the two new columns are null where nothing matched.
pub fn emapper_annotation(
    emapper: &DataFrame,
    query_orthogroups: &DataFrame,
    keep_all_targets: bool,
) -> anyhow::Result<DataFrame> {
    require_columns(emapper, "emapper", &[QUERY, ORTHOGROUPS])?;
    let index = query_orthogroup_index(query_orthogroups)?;
    let genes_of: HashMap<&str, &[String]> = index
        .iter()
        .map(|(og, genes)| (og.as_str(), genes.as_slice()))
        .collect();
    let orthogroups: Vec<String> = index.iter().map(|(og, _)| og.clone()).collect();

    let cols = AnnotationColumns::single(ORTHOGROUPS, MASKED_ORTHOGROUPS);
    let located = locate_matches(emapper, &orthogroups, &cols, MatchRule::OrthogroupId)?;
    if located.is_empty() {
        warn!(
            "none of the {} query orthogroups is annotated on an emapper protein",
            orthogroups.len()
        );
    }
    let annotated = build_masked_columns(&located, &cols)?;

    let mut hits: Vec<Vec<&str>> = vec![Vec::new(); annotated.height()];
    for p in located.positions.iter() {
        for gene in genes_of.get(p.matched_id.as_str()).copied().unwrap_or_default() {
            if !hits[p.row].contains(&gene.as_str()) {
                hits[p.row].push(gene.as_str());
            }
        }
    }
    let hits: Vec<String> = hits
        .into_iter()
        .map(|genes| genes.join(&ITEM_DELIMITER.to_string()))
        .collect();

    info!(
        "{} of {} emapper proteins share an orthogroup with the query",
        annotated.height(),
        emapper.height()
    );

    if !keep_all_targets {
        let mut out = annotated;
        out.with_column(Series::new(QUERY_GENES, hits))?;
        return Ok(out);
    }

    let mut masked_all: Vec<Option<String>> = vec![None; emapper.height()];
    let mut hits_all: Vec<Option<String>> = vec![None; emapper.height()];
    let masked = annotated.column(MASKED_ORTHOGROUPS)?;
    for ((&source, m), h) in located
        .source_rows
        .iter()
        .zip(masked.str()?.into_iter())
        .zip(hits.into_iter())
    {
        masked_all[source] = m.map(String::from);
        hits_all[source] = Some(h);
    }
    let mut out = emapper.clone();
    out.with_column(Series::new(MASKED_ORTHOGROUPS, masked_all))?;
    out.with_column(Series::new(QUERY_GENES, hits_all))?;
    Ok(out)
}

/// How completely a translated eggNOG table covers the proteins and the query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QcReport {
    pub proteins: usize,
    pub without_stable_id: usize,
    pub without_symbol: usize,
    pub query_genes: usize,
    /// Query genes that never appear in the `merge_on` column.
    pub query_missing: Vec<String>,
}

impl QcReport {
    pub fn log(&self) {
        info!(
            "{} proteins: {} without a stable ID, {} without a symbol",
            self.proteins, self.without_stable_id, self.without_symbol
        );
        info!(
            "{} of {} query genes found in the translated table",
            self.query_genes - self.query_missing.len(),
            self.query_genes
        );
        if !self.query_missing.is_empty() {
            warn!("query genes without orthogroup: {:?}", self.query_missing);
        }
    }
}

/// Counts the proteins of `translated` lacking a translation and the query genes missing from it.
pub fn translation_qc(
    translated: &DataFrame,
    query: &[String],
    cols: &LookupColumns,
    merge_on: &str,
) -> anyhow::Result<QcReport> {
    require_columns(
        translated,
        "translated eggNOG",
        &[MEMBERS, cols.stable.as_str(), cols.symbol.as_str(), merge_on],
    )?;

    let mut report = QcReport {
        proteins: translated.height(),
        without_stable_id: translated.column(&cols.stable)?.null_count(),
        without_symbol: translated.column(&cols.symbol)?.null_count(),
        query_genes: query.len(),
        ..Default::default()
    };

    let present: BTreeSet<String> = column_items(translated, merge_on)?
        .into_iter()
        .flatten()
        .flat_map(|item| {
            split_alternates(&item)
                .into_iter()
                .map(String::from)
                .collect::<Vec<String>>()
        })
        .collect();
    report.query_missing = query
        .iter()
        .filter(|g| !present.contains(g.as_str()))
        .cloned()
        .collect();
    report.log();
    Ok(report)
}

/// Collects the distinct orthogroups listed in the orthogroup columns of `df`.
pub fn orthogroups_of(df: &DataFrame) -> anyhow::Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for name in df.get_column_names() {
        if is_orthogroup_column(name) {
            for cell in df.column(name)?.cast(&DataType::String)?.str()?.into_iter() {
                out.extend(split_items(cell).into_iter().map(String::from));
            }
        }
    }
    Ok(out)
}
