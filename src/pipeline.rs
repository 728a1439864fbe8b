//! Orchestration of the two pathways.
//!
//! The run functions take their collaborators (an [IdResolver], a [CacheStore]) as arguments and
//! return every intermediate product, leaving the decision of what to save to the caller.

use crate::annotator::RowIssue;
use crate::cache::{CacheStore, LOOKUP_KEY};
use crate::options::{MatchMode, OrthogroupConfig, PhylomeConfig};
use crate::orthogroup::{
    combine_across_levels, emapper_annotation, merge_with_query, orthogroups_of, translate_level,
    translation_qc, QcReport,
};
use crate::phylome::{
    annotate_stable_ids, annotate_symbols, collect_external_ids, lost_genes, translate_orthology,
};
use crate::reader::phylome::{filter_species, read_orthology_table, read_translated_table};
use crate::reader::{read_tsv, TsvOptions};
use crate::translator::{
    build_lookup, find_untranslated, recover_stable_ids, IdNamespace, IdResolver, Lookup,
    MappingTableResolver, MissingReport,
};
use crate::utils::InputSource;
use crate::writer::{save_tables, write_tsv};
use anyhow::{bail, Context};
use polars::prelude::*;
use std::path::Path;
use tracing::{info, warn};

/// Everything a phylome run produced.
#[derive(Debug, Default)]
pub struct PhylomeRun {
    pub annotated: Vec<DataFrame>,
    /// The tables translated during this run. Empty in symbol mode and with pre-translated input.
    pub translated: Vec<DataFrame>,
    /// The identifiers of the raw tables left untranslated by the lookup, whether it was built
    /// during this run or came from the cache. `None` when nothing was translated.
    pub missing: Option<MissingReport>,
    pub lost: Option<DataFrame>,
    pub skipped: Vec<RowIssue>,
}

/// Loads raw orthology tables. In-memory tables are filtered on the target species like the
/// files are.
pub fn load_orthology_tables(
    source: &InputSource,
    cfg: &PhylomeConfig,
) -> anyhow::Result<Vec<DataFrame>> {
    let tables = match source {
        InputSource::InMemory(tables) => tables
            .iter()
            .map(|(_, df)| filter_species(df, &cfg.columns.target_species, &cfg.target_species))
            .collect::<anyhow::Result<Vec<DataFrame>>>()?,
        _ => source
            .load(|p| read_orthology_table(p, cfg))?
            .into_iter()
            .map(|(_, df)| df)
            .collect(),
    };
    info!("loaded {} orthology tables", tables.len());
    Ok(tables)
}

/// Loads tables saved by a previous translation.
pub fn load_translated_tables(
    source: &InputSource,
    cfg: &PhylomeConfig,
) -> anyhow::Result<Vec<DataFrame>> {
    match source {
        InputSource::InMemory(tables) => tables
            .iter()
            .map(|(name, df)| {
                cfg.columns
                    .is_valid(df, true)
                    .with_context(|| format!("{} is not a translated table", name))?;
                Ok(df.clone())
            })
            .collect(),
        _ => Ok(source
            .load(|p| read_translated_table(p, &cfg.columns))?
            .into_iter()
            .map(|(_, df)| df)
            .collect()),
    }
}

/// Returns the lookup stored in `cache`, or builds it from the external IDs of `tables` with
/// `resolver`, runs the secondary symbol pass, and stores it.
///
/// Either way the external IDs of `tables` are checked against the lookup, so the report of
/// untranslated IDs is also available when the lookup was built for other tables.
pub fn obtain_lookup(
    tables: &[DataFrame],
    cfg: &PhylomeConfig,
    resolver: &dyn IdResolver,
    cache: &mut dyn CacheStore,
) -> anyhow::Result<(Lookup, MissingReport)> {
    let ids = collect_external_ids(tables, &cfg.columns, &cfg.taxon)?;

    if let Some(df) = cache.get(LOOKUP_KEY)? {
        let lookup = Lookup::from_df(&df, &cfg.lookup_columns)?;
        info!("using the cached lookup of {} identifiers", lookup.len());
        let unknown = ids.iter().filter(|id| lookup.get(id.as_str()).is_none()).count();
        if unknown > 0 {
            warn!(
                "{} of {} external IDs are not in the cached lookup; it may have been built for other tables",
                unknown,
                ids.len()
            );
        }
        let missing = find_untranslated(&ids, &lookup);
        return Ok((lookup, missing));
    }

    let lookup = build_lookup(&ids, resolver);
    let first_pass = find_untranslated(&ids, &lookup);
    let lookup = recover_stable_ids(&lookup, &first_pass, resolver, &cfg.stable_id_prefix);
    let missing = find_untranslated(&ids, &lookup);

    cache.put(LOOKUP_KEY, &lookup.to_df(&cfg.lookup_columns)?)?;
    Ok((lookup, missing))
}

/// Runs the phylome pathway on the tables of `source`.
///
/// * Symbol mode annotates the raw tables directly; `resolver` and `cache` are not used.
/// * Stable-ID mode translates the raw tables first, with the cached lookup if there is one, or
///   annotates pre-translated tables when `cfg.input_translated` is set.
pub fn run_phylome(
    source: &InputSource,
    query: &[String],
    cfg: &PhylomeConfig,
    resolver: &dyn IdResolver,
    cache: &mut dyn CacheStore,
) -> anyhow::Result<PhylomeRun> {
    cfg.check();
    let mut run = PhylomeRun::default();

    if cfg.mode == MatchMode::Symbol {
        for table in load_orthology_tables(source, cfg)? {
            let (annotated, skipped) =
                annotate_symbols(&table, query, &cfg.columns, cfg.symbol_rule)?;
            run.annotated.push(annotated);
            run.skipped.extend(skipped);
        }
        return Ok(run);
    }

    let translated = if cfg.input_translated {
        load_translated_tables(source, cfg)?
    } else {
        let raw = load_orthology_tables(source, cfg)?;
        let (lookup, missing) = obtain_lookup(&raw, cfg, resolver, cache)?;
        run.missing = Some(missing);
        let translated = raw
            .iter()
            .map(|t| translate_orthology(t, &lookup, &cfg.columns, &cfg.taxon))
            .collect::<anyhow::Result<Vec<DataFrame>>>()?;
        run.translated = translated.clone();
        translated
    };

    for table in translated.iter() {
        let (annotated, skipped) = annotate_stable_ids(table, query, &cfg.columns)?;
        run.annotated.push(annotated);
        run.skipped.extend(skipped);
    }

    if cfg.report_lost {
        let lost = lost_genes(&translated, &cfg.columns, None)?;
        if lost.height() > 0 {
            warn!("{} orthologs could not be translated to a stable ID", lost.height());
        }
        run.lost = Some(lost);
    }
    Ok(run)
}

/// Saves the products of a phylome run to `out_dir`: the annotated tables, the translated tables
/// under `translated_orthology_tables/`, and the lost-gene and untranslated-ID reports.
pub fn save_phylome<T: AsRef<Path>>(
    run: &PhylomeRun,
    out_dir: T,
    cfg: &PhylomeConfig,
) -> anyhow::Result<()> {
    let out_dir = out_dir.as_ref();
    save_tables(&run.annotated, out_dir, &cfg.annotated_suffix)?;
    if !run.translated.is_empty() {
        save_tables(
            &run.translated,
            out_dir.join("translated_orthology_tables"),
            &cfg.translated_suffix,
        )?;
    }
    if let Some(lost) = &run.lost {
        write_tsv(lost, out_dir.join("lost_genes.tsv"))?;
    }
    if cfg.report_lost {
        if let Some(missing) = &run.missing {
            write_tsv(&missing.to_df()?, out_dir.join("untranslated_ids.tsv"))?;
        }
    }
    Ok(())
}

/// Builds an offline resolver from saved mapping responses and a symbol table (symbol in the
/// first column, stable ID in the second, with a header).
pub fn resolver_from_files(
    stable_mapping: Option<&Path>,
    symbol_mapping: Option<&Path>,
    symbol_table: Option<&Path>,
) -> anyhow::Result<MappingTableResolver> {
    let mut resolver = MappingTableResolver::new();
    if let Some(p) = stable_mapping {
        let text = std::fs::read_to_string(p).with_context(|| format!("Could not read {:?}", p))?;
        resolver = resolver.with_response(IdNamespace::UniProtKb, IdNamespace::Ensembl, &text);
    }
    if let Some(p) = symbol_mapping {
        let text = std::fs::read_to_string(p).with_context(|| format!("Could not read {:?}", p))?;
        resolver = resolver.with_response(IdNamespace::UniProtKb, IdNamespace::GeneCards, &text);
    }
    if let Some(p) = symbol_table {
        let df = read_tsv(p, &TsvOptions::default())?;
        let columns = df.get_columns();
        if columns.len() < 2 {
            bail!("The symbol table {:?} needs a symbol and a stable-ID column", p);
        }
        let symbols = columns[0].cast(&DataType::String)?;
        let stable = columns[1].cast(&DataType::String)?;
        let pairs: Vec<(&str, &str)> = symbols
            .str()?
            .into_iter()
            .zip(stable.str()?.into_iter())
            .filter_map(|(s, e)| Some((s?, e?)))
            .collect();
        resolver = resolver.with_symbol_table(pairs);
    }
    Ok(resolver)
}

/// Everything an orthogroup run produced.
#[derive(Debug)]
pub struct OrthogroupRun {
    /// All levels combined.
    pub translated: DataFrame,
    pub qc: QcReport,
    /// `None` when the run stopped after the QC.
    pub query_orthogroups: Option<DataFrame>,
    /// `None` without emapper input.
    pub annotated: Option<DataFrame>,
}

/// Runs the ortholog-group pathway.
///
/// Every members table in `levels` is translated with `lookup` and the levels are combined. The
/// query genes are then paired with their orthogroups and, if `emapper` is given, the target
/// proteins sharing one of those orthogroups are annotated.
pub fn run_orthogroup(
    levels: &[DataFrame],
    lookup: &Lookup,
    query: &[String],
    emapper: Option<&DataFrame>,
    cfg: &OrthogroupConfig,
) -> anyhow::Result<OrthogroupRun> {
    if levels.is_empty() {
        bail!("At least one eggNOG members table is needed");
    }
    let translated_levels = levels
        .iter()
        .map(|raw| translate_level(raw, lookup, &cfg.taxon))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let translated = combine_across_levels(&translated_levels, cfg.layout, &cfg.lookup_columns)?;
    let qc = translation_qc(&translated, query, &cfg.lookup_columns, &cfg.merge_on)?;

    if cfg.qc_only {
        return Ok(OrthogroupRun {
            translated,
            qc,
            query_orthogroups: None,
            annotated: None,
        });
    }

    let query_orthogroups =
        merge_with_query(&translated, query, &cfg.merge_on, cfg.keep_conversions)?;
    info!(
        "{} query genes fall in {} distinct orthogroups",
        query.len().saturating_sub(qc.query_missing.len()),
        orthogroups_of(&query_orthogroups)?.len()
    );
    let annotated = match emapper {
        Some(emapper) => Some(emapper_annotation(
            emapper,
            &query_orthogroups,
            cfg.keep_all_targets,
        )?),
        None => None,
    };
    Ok(OrthogroupRun {
        translated,
        qc,
        query_orthogroups: Some(query_orthogroups),
        annotated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::utils::TaxonId;

    fn raw() -> DataFrame {
        df!(
            "##Seed_(co-)orthologs" => ["456.GeneA", "456.GeneB"],
            "type" => ["one-to-many", "one-to-one"],
            "target_species" => ["Homo sapiens", "Mus musculus"],
            "orthologs" => ["9606.P1,9606.P2", "10090.P9"],
            "GeneName_target" => ["SOX2,PAX6", "Sox2"],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_is_cached() {
        let cfg = PhylomeConfig::new(TaxonId::parse("9606").unwrap());
        let resolver = MappingTableResolver::new()
            .with_response(IdNamespace::UniProtKb, IdNamespace::Ensembl, "From\tTo\nP1\tENSG1\n")
            .with_response(IdNamespace::UniProtKb, IdNamespace::GeneCards, "From\tTo\nP1\tSOX2\nP2\tPAX6\n");
        let mut cache = MemoryCache::new();
        let human = filter_species(&raw(), "target_species", "Homo sapiens").unwrap();

        let (lookup, missing) = obtain_lookup(&[human.clone()], &cfg, &resolver, &mut cache).unwrap();
        assert_eq!(lookup.stable_id("P1"), Some("ENSG1"));
        assert_eq!(missing.missing_stable_ids().into_iter().collect::<Vec<_>>(), vec!["P2"]);

        // the second call is served from the cache, even with a resolver that knows nothing
        let (lookup, missing) =
            obtain_lookup(&[human], &cfg, &MappingTableResolver::new(), &mut cache).unwrap();
        assert_eq!(lookup.stable_id("P1"), Some("ENSG1"));
        assert_eq!(missing.missing_stable_ids().into_iter().collect::<Vec<_>>(), vec!["P2"]);
    }

    #[test]
    fn test_cached_lookup_still_reports_untranslated() {
        let mut cfg = PhylomeConfig::new(TaxonId::parse("9606").unwrap());
        cfg.report_lost = true;
        let mut partial = Lookup::new();
        partial.insert("P1", Some("ENSG1"), Some("SOX2"));
        let mut cache = MemoryCache::new();
        cache
            .put(LOOKUP_KEY, &partial.to_df(&cfg.lookup_columns).unwrap())
            .unwrap();
        let source = InputSource::InMemory(vec![("456_orthologs.tsv".to_string(), raw())]);

        let run = run_phylome(
            &source,
            &["ENSG1".to_string()],
            &cfg,
            &MappingTableResolver::new(),
            &mut cache,
        )
        .unwrap();
        assert_eq!(
            run.translated[0].column("ENSEMBL_ID").unwrap().str().unwrap().get(0),
            Some("ENSG1,-")
        );
        let missing = run.missing.as_ref().unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing.entries[0].external_id, "P2");
        assert!(missing.entries[0].missing_stable_id && missing.entries[0].missing_symbol);

        let out = std::env::temp_dir().join("orthoprop_pipeline_cached_report");
        if out.exists() {
            std::fs::remove_dir_all(&out).unwrap();
        }
        save_phylome(&run, &out, &cfg).unwrap();
        let report = read_tsv(out.join("untranslated_ids.tsv"), &TsvOptions::default()).unwrap();
        assert_eq!(report.height(), 1);
    }

    #[test]
    fn test_run_phylome_in_memory() {
        let mut cfg = PhylomeConfig::new(TaxonId::parse("9606").unwrap());
        cfg.report_lost = true;
        let resolver = MappingTableResolver::new()
            .with_response(IdNamespace::UniProtKb, IdNamespace::Ensembl, "From\tTo\nP1\tENSG1\n")
            .with_response(IdNamespace::UniProtKb, IdNamespace::GeneCards, "From\tTo\nP1\tSOX2\nP2\tPAX6\n")
            .with_symbol_table([("PAX6", "ENSG6")]);
        let source = InputSource::InMemory(vec![("456_orthologs.tsv".to_string(), raw())]);

        let run = run_phylome(
            &source,
            &["ENSG6".to_string()],
            &cfg,
            &resolver,
            &mut MemoryCache::new(),
        )
        .unwrap();
        assert_eq!(run.translated.len(), 1);
        assert_eq!(run.translated[0].height(), 1);
        assert_eq!(run.annotated[0].height(), 1);
        let masked: Vec<&str> = run.annotated[0]
            .column("GeneName_target_query-only")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(masked, vec!["-,PAX6"]);
        assert_eq!(run.lost.unwrap().height(), 0);

        cfg.mode = MatchMode::Symbol;
        let run = run_phylome(
            &source,
            &["SOX2".to_string()],
            &cfg,
            &resolver,
            &mut MemoryCache::new(),
        )
        .unwrap();
        assert!(run.translated.is_empty());
        assert_eq!(run.annotated[0].height(), 1);
    }
}
