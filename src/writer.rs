use crate::utils::TAXON_SEPARATOR;
use anyhow::Context;
use polars::prelude::*;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Returns the taxon ID a table belongs to: the text before the first `.` of its first cell,
/// e.g. `456` for a table whose first seed is `456.GeneA`.
pub fn taxon_of(df: &DataFrame) -> anyhow::Result<Option<String>> {
    let Some(first) = df.get_columns().first() else {
        return Ok(None);
    };
    if first.is_empty() {
        return Ok(None);
    }
    let first = first.cast(&DataType::String)?;
    Ok(first
        .str()?
        .get(0)
        .and_then(|cell| cell.split(TAXON_SEPARATOR).next())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}

/// Writes `df` as a tab-separated table with a header to `writer`. Nulls become empty fields.
pub fn write_tsv_to<W: Write>(df: &DataFrame, writer: &mut W) -> anyhow::Result<()> {
    let mut out_df = df.clone();
    CsvWriter::new(writer)
        .include_header(true)
        .with_separator(b'\t')
        .with_null_value(String::new())
        .finish(&mut out_df)?;
    Ok(())
}

/// Writes `df` to `file_path`, creating the parent folder if needed.
pub fn write_tsv<T: AsRef<Path>>(df: &DataFrame, file_path: T) -> anyhow::Result<()> {
    let file_path = file_path.as_ref();
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create the folder {:?}", parent))?;
    }
    let file = fs::File::create(file_path)
        .with_context(|| format!("Could not create {:?}", file_path))?;
    let mut file = BufWriter::with_capacity(4194304, file);
    write_tsv_to(df, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Saves every table to `<dir>/<taxonID><suffix>.tsv`.
///
/// Empty tables have no taxon to be named after and are skipped with a warning. Returns the
/// written paths in the order of `tables`.
pub fn save_tables<T: AsRef<Path>>(
    tables: &[DataFrame],
    dir: T,
    suffix: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Could not create the folder {:?}", dir))?;

    let mut written: Vec<PathBuf> = Vec::with_capacity(tables.len());
    for (i, df) in tables.iter().enumerate() {
        let Some(taxon) = taxon_of(df)? else {
            warn!("Table {} is empty and was not saved", i);
            continue;
        };
        let file_path = dir.join(format!("{}{}.tsv", taxon, suffix));
        if written.contains(&file_path) {
            warn!(
                "Two tables belong to taxon {}; {:?} is overwritten",
                taxon, file_path
            );
        }
        write_tsv(df, &file_path)?;
        written.push(file_path);
    }
    info!("saved {} tables to {:?}", written.len(), dir);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_tsv, TsvOptions};

    #[test]
    fn test_taxon_of() {
        let df = df!("Seed" => ["456.GeneA", "456.GeneB"], "x" => ["a", "b"]).unwrap();
        assert_eq!(taxon_of(&df).unwrap(), Some("456".to_string()));
        let empty = df.head(Some(0));
        assert_eq!(taxon_of(&empty).unwrap(), None);
    }

    #[test]
    fn test_save_tables_round_trip() {
        let dir = std::env::temp_dir().join("orthoprop_writer_save");
        let df = df!(
            "Seed" => ["456.GeneA", "456.GeneB"],
            "GeneName_target" => [Some("SOX2"), None],
        )
        .unwrap();
        let written = save_tables(&[df.clone(), df.head(Some(0))], &dir, "_annotated_orthology").unwrap();
        assert_eq!(written, vec![dir.join("456_annotated_orthology.tsv")]);

        let back = read_tsv(&written[0], &TsvOptions::default()).unwrap();
        assert_eq!(back.shape(), df.shape());
        assert_eq!(back.column("GeneName_target").unwrap().null_count(), 1);
    }
}
