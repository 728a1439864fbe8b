use orthoprop::cache::{CacheStore, DirCache, LOOKUP_KEY};
use orthoprop::options::{MatchMode, PhylomeConfig};
use orthoprop::pipeline::{resolver_from_files, run_phylome, save_phylome};
use orthoprop::reader::{read_query, read_tsv, TsvOptions};
use orthoprop::translator::MappingTableResolver;
use orthoprop::utils::{InputSource, TaxonId};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

fn fresh_dir(name: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn orthology_table(rows: &[&str]) -> String {
    let mut text = String::from("##Seed_(co-)orthologs\ttype\ttarget_species\torthologs\tGeneName_target\n");
    for i in 0..12 {
        text.push_str(&format!("# phylome metadata {}\n", i));
    }
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

fn column(df: &DataFrame, name: &str) -> anyhow::Result<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.map(String::from))
        .collect())
}

fn write_inputs(dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir.join("tables"))?;
    fs::write(
        dir.join("tables").join("456_orthologs.tsv"),
        orthology_table(&[
            "456.GeneA\tone-to-many\tHomo sapiens\t9606.P1,9606.P2\tSOX2,PAX6",
            "456.GeneB\tone-to-one\tMus musculus\t10090.P9\tSox2",
            "456.GeneC\tone-to-one\tHomo sapiens\t9606.P3|9606.P4\tGATA1",
        ]),
    )?;
    fs::write(dir.join("query.tsv"), "gene\nENSG6\nENSG3\n")?;
    fs::write(
        dir.join("to_ensembl.tsv"),
        "From\tTo\nP1\tENSG1\nP3\tENSG3\nP4\tENSG3\n",
    )?;
    fs::write(
        dir.join("to_symbol.tsv"),
        "From\tTo\nP1\tSOX2\nP2\tPAX6\nP3\tGATA1\nP4\tGATA1\n",
    )?;
    fs::write(dir.join("symbols.tsv"), "symbol\tensembl\nPAX6\tENSG6\n")?;
    Ok(())
}

#[test]
fn test_stable_id_pathway_on_disk() -> anyhow::Result<()> {
    let dir = fresh_dir("orthoprop_it_phylome_stable")?;
    write_inputs(&dir)?;
    let out = dir.join("out");

    let mut cfg = PhylomeConfig::new(TaxonId::parse("9606")?);
    cfg.report_lost = true;
    let resolver = resolver_from_files(
        Some(dir.join("to_ensembl.tsv").as_path()),
        Some(dir.join("to_symbol.tsv").as_path()),
        Some(dir.join("symbols.tsv").as_path()),
    )?;
    let query = read_query(dir.join("query.tsv"), true)?;
    assert_eq!(query, vec!["ENSG6", "ENSG3"]);

    let source = InputSource::resolve(dir.join("tables"))?;
    let mut cache = DirCache::new(&out);
    let run = run_phylome(&source, &query, &cfg, &resolver, &mut cache)?;
    assert!(run.skipped.is_empty());
    assert!(run.missing.as_ref().map(|m| m.is_empty()).unwrap_or(false));
    assert_eq!(run.lost.as_ref().map(|l| l.height()), Some(0));
    save_phylome(&run, &out, &cfg)?;

    let translated = read_tsv(
        out.join("translated_orthology_tables").join("456_translated.tsv"),
        &TsvOptions::default(),
    )?;
    assert_eq!(
        column(&translated, "ENSEMBL_ID")?,
        vec![Some("ENSG1,ENSG6".to_string()), Some("ENSG3".to_string())]
    );

    let annotated = read_tsv(out.join("456_annotated_orthology.tsv"), &TsvOptions::default())?;
    assert_eq!(annotated.height(), 2);
    assert_eq!(
        column(&annotated, "ENSEMBL_query-only")?,
        vec![Some("-,ENSG6".to_string()), Some("ENSG3".to_string())]
    );
    assert_eq!(
        column(&annotated, "GeneName_target_query-only")?,
        vec![Some("-,PAX6".to_string()), Some("GATA1".to_string())]
    );

    assert!(cache.get(LOOKUP_KEY)?.is_some());
    assert!(out.join("lost_genes.tsv").is_file());
    Ok(())
}

#[test]
fn test_cached_lookup_and_translated_input() -> anyhow::Result<()> {
    let dir = fresh_dir("orthoprop_it_phylome_cache")?;
    write_inputs(&dir)?;
    let out = dir.join("out");
    let cfg = PhylomeConfig::new(TaxonId::parse("9606")?);
    let query = read_query(dir.join("query.tsv"), true)?;
    let source = InputSource::resolve(dir.join("tables"))?;

    let resolver = resolver_from_files(
        Some(dir.join("to_ensembl.tsv").as_path()),
        Some(dir.join("to_symbol.tsv").as_path()),
        Some(dir.join("symbols.tsv").as_path()),
    )?;
    let first = run_phylome(&source, &query, &cfg, &resolver, &mut DirCache::new(&out))?;
    save_phylome(&first, &out, &cfg)?;

    // the lookup saved by the first run makes the resolver unnecessary
    let second = run_phylome(
        &source,
        &query,
        &cfg,
        &MappingTableResolver::new(),
        &mut DirCache::new(&out),
    )?;
    assert_eq!(second.missing.as_ref().map(|m| m.len()), Some(0));
    assert_eq!(
        column(&second.annotated[0], "ENSEMBL_query-only")?,
        column(&first.annotated[0], "ENSEMBL_query-only")?
    );

    let mut translated_cfg = cfg.clone();
    translated_cfg.input_translated = true;
    let translated_source = InputSource::resolve(out.join("translated_orthology_tables"))?;
    let third = run_phylome(
        &translated_source,
        &query,
        &translated_cfg,
        &MappingTableResolver::new(),
        &mut DirCache::new(dir.join("unused")),
    )?;
    assert!(third.translated.is_empty());
    assert_eq!(
        column(&third.annotated[0], "GeneName_target_query-only")?,
        vec![Some("-,PAX6".to_string()), Some("GATA1".to_string())]
    );
    Ok(())
}

#[test]
fn test_symbol_mode_skips_translation() -> anyhow::Result<()> {
    let dir = fresh_dir("orthoprop_it_phylome_symbol")?;
    write_inputs(&dir)?;
    let mut cfg = PhylomeConfig::new(TaxonId::parse("9606")?);
    cfg.mode = MatchMode::Symbol;

    let source = InputSource::resolve(dir.join("tables").join("456_orthologs.tsv"))?;
    let run = run_phylome(
        &source,
        &["PAX6".to_string()],
        &cfg,
        &MappingTableResolver::new(),
        &mut DirCache::new(dir.join("out")),
    )?;
    assert!(run.translated.is_empty());
    assert!(run.missing.is_none());
    assert!(!DirCache::new(dir.join("out")).path_of(LOOKUP_KEY).exists());

    let annotated = &run.annotated[0];
    assert_eq!(annotated.height(), 1);
    assert!(annotated.column("ENSEMBL_ID").is_err());
    assert_eq!(
        column(annotated, "GeneName_target_query-only")?,
        vec![Some("-,PAX6".to_string())]
    );
    Ok(())
}
