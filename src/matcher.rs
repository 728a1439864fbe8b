//! Filtering of tables on one multi-valued column.
//!
//! A multi-valued cell holds items separated by `,`. [match_tokens] keeps, in every row, only
//! the items accepted by a [TokenPredicate] and drops the rows where nothing is left. The output
//! column is always a `,`-joined string column, and a column that was already split into a
//! polars list is read as-is, so applying the matcher to its own output changes nothing.

use crate::error::require_columns;
use crate::utils::{split_items, TaxonId, ITEM_DELIMITER};
use anyhow::bail;
use polars::prelude::*;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Decides whether one item of a multi-valued cell is kept.
#[derive(Debug, Clone)]
pub enum TokenPredicate {
    /// The item contains the given substring.
    Contains(String),
    /// The item equals the given string.
    Exact(String),
    /// The item belongs to the taxon, i.e. starts with `"<taxon>."`.
    TaxonPrefix(TaxonId),
    /// The item is one of the given strings.
    AnyOf(HashSet<String>),
}

impl TokenPredicate {
    pub fn test(&self, token: &str) -> bool {
        match self {
            TokenPredicate::Contains(s) => token.contains(s.as_str()),
            TokenPredicate::Exact(s) => token == s,
            TokenPredicate::TaxonPrefix(taxon) => taxon.owns(token),
            TokenPredicate::AnyOf(set) => set.contains(token),
        }
    }
}

/// Returns the items of every row of `column`, in row order.
///
/// String cells are split on `,` (see [split_items]); list cells are taken as already split.
/// Other dtypes are cast to strings first.
pub fn column_items(df: &DataFrame, column: &str) -> anyhow::Result<Vec<Vec<String>>> {
    let series = df.column(column)?;
    let items = match series.dtype() {
        DataType::String => series
            .str()?
            .into_iter()
            .map(|cell| split_items(cell).into_iter().map(String::from).collect())
            .collect(),
        DataType::List(inner) => {
            if inner.as_ref() != &DataType::String {
                bail!(
                    "The column {:?} is a list of {:?}; only lists of strings can be matched.",
                    column,
                    inner
                );
            }
            let mut rows = Vec::with_capacity(series.len());
            for cell in series.list()?.into_iter() {
                let row = match cell {
                    Some(s) => s
                        .str()?
                        .into_iter()
                        .flatten()
                        .map(|t| t.trim().to_string())
                        .collect(),
                    None => Vec::new(),
                };
                rows.push(row);
            }
            rows
        }
        DataType::Null => vec![Vec::new(); series.len()],
        _ => {
            let casted = series.cast(&DataType::String)?;
            casted
                .str()?
                .into_iter()
                .map(|cell| split_items(cell).into_iter().map(String::from).collect())
                .collect()
        }
    };
    Ok(items)
}

/// Keeps, in each row of `column`, only the items accepted by `predicate`, and drops the rows
/// where no item is accepted. All other columns are carried over unchanged.
///
/// ### Example
///
/// ```rust
/// use orthoprop::matcher::{match_tokens, TokenPredicate};
/// use orthoprop::utils::TaxonId;
/// use polars::prelude::*;
///
/// let df = df!(
///     "Orthogroup" => ["OG1", "OG2"],
///     "ProtID" => ["9606.ENSP1,9606.ENSP2,10090.ENSP9", "10090.ENSP3"],
/// ).unwrap();
/// let human = TokenPredicate::TaxonPrefix(TaxonId::parse("9606").unwrap());
/// let out = match_tokens(&df, "ProtID", &human).unwrap();
/// assert_eq!(out.height(), 1);
/// ```
pub fn match_tokens(
    df: &DataFrame,
    column: &str,
    predicate: &TokenPredicate,
) -> anyhow::Result<DataFrame> {
    require_columns(df, "input", &[column])?;

    let items = column_items(df, column)?;
    let mut keep = Vec::with_capacity(items.len());
    let mut reduced: Vec<Option<String>> = Vec::with_capacity(items.len());
    for row in items.iter() {
        let matched: Vec<&str> = row
            .iter()
            .map(|t| t.as_str())
            .filter(|t| predicate.test(t))
            .collect();
        if matched.is_empty() {
            keep.push(false);
            reduced.push(None);
        } else {
            keep.push(true);
            reduced.push(Some(matched.join(&ITEM_DELIMITER.to_string())));
        }
    }

    let mut out = df.clone();
    out.with_column(Series::new(column, reduced))?;
    let mask: BooleanChunked = keep.into_iter().collect();
    let out = out.filter(&mask)?;

    debug!(
        "matched {} of {} rows on column {:?}",
        out.height(),
        df.height(),
        column
    );
    Ok(out)
}

/// Collects the distinct items of `column`, across all rows, that are accepted by `predicate`.
pub fn matching_tokens(
    df: &DataFrame,
    column: &str,
    predicate: &TokenPredicate,
) -> anyhow::Result<BTreeSet<String>> {
    require_columns(df, "input", &[column])?;
    Ok(column_items(df, column)?
        .into_iter()
        .flatten()
        .filter(|t| predicate.test(t))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> DataFrame {
        df!(
            "Orthogroup" => ["OG1", "OG2", "OG3", "OG4"],
            "ProtID" => [
                Some("9606.ENSP1,9606.ENSP2,10090.ENSP9"),
                Some("10090.ENSP3"),
                Some("96061.ENSP4,9606.ENSP5"),
                None,
            ],
        )
        .unwrap()
    }

    fn column_strings(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|x| x.unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_match_taxon_prefix() {
        let human = TokenPredicate::TaxonPrefix(TaxonId::parse("9606").unwrap());
        let out = match_tokens(&members(), "ProtID", &human).unwrap();

        assert_eq!(column_strings(&out, "Orthogroup"), vec!["OG1", "OG3"]);
        assert_eq!(
            column_strings(&out, "ProtID"),
            vec!["9606.ENSP1,9606.ENSP2", "9606.ENSP5"]
        );
    }

    #[test]
    fn test_match_is_idempotent() {
        let human = TokenPredicate::TaxonPrefix(TaxonId::parse("9606").unwrap());
        let once = match_tokens(&members(), "ProtID", &human).unwrap();
        let twice = match_tokens(&once, "ProtID", &human).unwrap();
        assert_eq!(once.height(), twice.height());
        assert_eq!(column_strings(&once, "ProtID"), column_strings(&twice, "ProtID"));
        assert_eq!(
            column_strings(&once, "Orthogroup"),
            column_strings(&twice, "Orthogroup")
        );
    }

    #[test]
    fn test_match_contains_and_any_of() {
        let df = df!(
            "Seed" => ["456.GeneA", "768.GeneB"],
            "orthologs" => ["HumanA,HumanA7", "HumanB4,HumanB3,HumanB6"],
        )
        .unwrap();

        let out = match_tokens(&df, "orthologs", &TokenPredicate::Contains("A7".into())).unwrap();
        assert_eq!(column_strings(&out, "Seed"), vec!["456.GeneA"]);
        assert_eq!(column_strings(&out, "orthologs"), vec!["HumanA7"]);

        let set: HashSet<String> = ["HumanB3".to_string(), "HumanB6".to_string()].into();
        let out = match_tokens(&df, "orthologs", &TokenPredicate::AnyOf(set)).unwrap();
        assert_eq!(column_strings(&out, "orthologs"), vec!["HumanB3,HumanB6"]);

        let out = match_tokens(&df, "orthologs", &TokenPredicate::Exact("Human".into())).unwrap();
        assert_eq!(out.height(), 0);
    }

    #[test]
    fn test_list_column_is_not_resplit() {
        let lists = Series::new(
            "ProtID",
            [
                Series::new("", ["9606.ENSP1", "10090.ENSP9"]),
                Series::new("", ["9606.ENSP2"]),
            ],
        );
        let df = DataFrame::new(vec![Series::new("Orthogroup", ["OG1", "OG2"]), lists]).unwrap();

        let human = TokenPredicate::TaxonPrefix(TaxonId::parse("9606").unwrap());
        let out = match_tokens(&df, "ProtID", &human).unwrap();
        assert_eq!(
            column_strings(&out, "ProtID"),
            vec!["9606.ENSP1", "9606.ENSP2"]
        );
    }

    #[test]
    fn test_matching_tokens_and_missing_column() {
        let human = TokenPredicate::TaxonPrefix(TaxonId::parse("9606").unwrap());
        let tokens = matching_tokens(&members(), "ProtID", &human).unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("9606.ENSP5"));

        assert!(match_tokens(&members(), "members", &human).is_err());
    }
}
