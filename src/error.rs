use thiserror::Error;

/// Failures that callers may want to tell apart. They travel inside [`anyhow::Error`]
/// and can be recovered with `err.downcast_ref::<AnnotationError>()`.
///
/// Translation gaps are not errors: they are reported through
/// [`MissingReport`](crate::translator::MissingReport) and the run continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    /// A table lacks a column the current step requires.
    #[error("The {table} table has no column named {column:?}; found {found:?}")]
    MissingColumn {
        table: String,
        column: String,
        found: Vec<String>,
    },

    /// A table could not be read as tab-separated text.
    #[error("Could not read {source_name} as a tab-separated table: {reason}")]
    NotTabular { source_name: String, reason: String },

    /// The token count seen while masking differs from the one recorded while locating matches.
    #[error("Row {row} of column {column:?} has {found} items but {expected} were recorded when the match was located")]
    Consistency {
        row: usize,
        column: String,
        expected: usize,
        found: usize,
    },

    /// The identifier resolver failed for a whole batch.
    #[error("Identifier resolution {from} -> {to} failed: {reason}")]
    Resolver {
        from: String,
        to: String,
        reason: String,
    },
}

/// Bails with [`AnnotationError::MissingColumn`] unless every name in `columns` is present in `df`.
pub fn require_columns<T: AsRef<str>>(
    df: &polars::frame::DataFrame,
    table: &str,
    columns: &[T],
) -> anyhow::Result<()> {
    let found = df.get_column_names();
    for c in columns {
        if !found.contains(&c.as_ref()) {
            return Err(AnnotationError::MissingColumn {
                table: table.to_string(),
                column: c.as_ref().to_string(),
                found: found.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_require_columns() {
        let df = df!("orthologs" => ["a"], "type" => ["one-to-one"]).unwrap();
        assert!(require_columns(&df, "phylome", &["orthologs"]).is_ok());

        let err = require_columns(&df, "phylome", &["orthologs", "ENSEMBL_ID"]).unwrap_err();
        match err.downcast_ref::<AnnotationError>() {
            Some(AnnotationError::MissingColumn { column, .. }) => assert_eq!(column, "ENSEMBL_ID"),
            _ => panic!("expected a missing column error"),
        }
    }
}
