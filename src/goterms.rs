use crate::error::require_columns;
use crate::reader::emapper::{GO_TERMS, QUERY};
use polars::prelude::*;
use tracing::info;

/// Which emapper columns [go_term_annotation] returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GoColumns {
    /// Only `#query`.
    #[default]
    QueryOnly,
    /// `#query` followed by the given columns.
    Extra(Vec<String>),
    /// Every column.
    All,
}

/// Keeps the emapper rows whose `GOs` cell contains `go_term` (e.g. `GO:0003700`, DNA-binding
/// transcription factor activity). Rows without GO terms never match.
///
/// Asking for a column emapper does not have is an input-shape error.
pub fn go_term_annotation(
    emapper: &DataFrame,
    go_term: &str,
    columns: &GoColumns,
) -> anyhow::Result<DataFrame> {
    require_columns(emapper, "emapper", &[QUERY, GO_TERMS])?;
    let selected: Vec<String> = match columns {
        GoColumns::QueryOnly => vec![QUERY.to_string()],
        GoColumns::Extra(extra) => {
            require_columns(emapper, "emapper", extra.as_slice())?;
            let mut selected = vec![QUERY.to_string()];
            selected.extend(extra.iter().filter(|c| c.as_str() != QUERY).cloned());
            selected
        }
        GoColumns::All => emapper
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    };

    let mask: BooleanChunked = emapper
        .column(GO_TERMS)?
        .str()?
        .into_iter()
        .map(|gos| gos.map(|g| g.contains(go_term)).unwrap_or(false))
        .collect();
    let out = emapper.filter(&mask)?.select(selected)?;
    info!(
        "{} of {} emapper proteins carry {}",
        out.height(),
        emapper.height(),
        go_term
    );
    Ok(out)
}
