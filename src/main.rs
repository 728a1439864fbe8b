use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use orthoprop::cache::{CacheStore, DirCache, MemoryCache, LOOKUP_KEY};
use orthoprop::goterms::{go_term_annotation, GoColumns};
use orthoprop::options::{LevelLayout, MatchMode, OrthogroupConfig, PhylomeConfig};
use orthoprop::pipeline::{resolver_from_files, run_orthogroup, run_phylome, save_phylome};
use orthoprop::reader::eggnog::read_members;
use orthoprop::reader::emapper::read_emapper;
use orthoprop::reader::{read_lookup, read_query};
use orthoprop::utils::{InputSource, TaxonId};
use orthoprop::writer::{save_tables, write_tsv, write_tsv_to};
use peak_alloc::PeakAlloc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[global_allocator]
static PEAK_ALLOC: PeakAlloc = PeakAlloc;

/// Propagate curated human gene modules to other species through orthology resources.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Annotate pairwise orthology tables from a phylome.
    Phylome(PhylomeArgs),
    /// Annotate emapper output through eggNOG ortholog groups.
    Orthogroup(OrthogroupArgs),
    /// Select the emapper rows carrying a GO term.
    Goterms(GotermsArgs),
}

#[derive(Debug, Args)]
struct PhylomeArgs {
    /// An orthology table, or a folder of them.
    #[arg(short = 't', long, value_name = "PATH")]
    tables: PathBuf,
    /// The query genes, one per line, with a header.
    #[arg(short, long, value_name = "FILE")]
    query: PathBuf,
    /// Output folder. A lookup built during the run is cached here as lookup.tsv.
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,
    /// Suffix of the annotated tables.
    #[arg(short, long, default_value = "_annotated_orthology")]
    suffix: String,
    /// A previously saved lookup; skips the identifier mapping entirely.
    #[arg(short, long, value_name = "FILE")]
    lookup: Option<PathBuf>,
    /// The tables already carry the stable-ID column.
    #[arg(long)]
    input_translated: bool,
    /// The query lists gene symbols; no identifier translation happens.
    #[arg(long)]
    symbol_mode: bool,
    /// Mapping response from UniProtKB accessions to Ensembl gene IDs.
    #[arg(long, value_name = "FILE")]
    stable_mapping: Option<PathBuf>,
    /// Mapping response from UniProtKB accessions to gene symbols.
    #[arg(long, value_name = "FILE")]
    symbol_mapping: Option<PathBuf>,
    /// Table of gene symbols (first column) and their Ensembl gene IDs (second column).
    #[arg(long, value_name = "FILE")]
    symbol_table: Option<PathBuf>,
    /// Save the orthologs and identifiers that could not be translated.
    #[arg(long)]
    report_lost: bool,
    /// The taxon of the translated orthologs.
    #[arg(long, default_value = "9606")]
    taxon: String,
    /// The species kept from every orthology table.
    #[arg(long, default_value = "Homo sapiens")]
    species: String,
}

#[derive(Debug, Args)]
struct OrthogroupArgs {
    /// An eggNOG members file. Repeat for every taxonomic level.
    #[arg(short = 'g', long = "eggnog", value_name = "FILE", required = true)]
    eggnog: Vec<PathBuf>,
    /// A Biomart export with protein IDs, gene IDs and symbols.
    #[arg(short, long, value_name = "FILE")]
    lookup: PathBuf,
    /// The query genes, one per line, without header.
    #[arg(short, long, value_name = "FILE")]
    query: PathBuf,
    /// emapper annotations of the target proteins.
    #[arg(short, long, value_name = "FILE")]
    emapper: Option<PathBuf>,
    /// The lookup column the query genes are written in.
    #[arg(short, long, default_value = "Gene stable ID")]
    merge_on: String,
    /// Log the translation QC and stop.
    #[arg(long)]
    qc: bool,
    /// Keep emapper rows that hit no query orthogroup.
    #[arg(long)]
    keep_all_targets: bool,
    /// Drop the other identifier columns from the query/orthogroup table.
    #[arg(long)]
    rm_conversions: bool,
    /// How the eggNOG levels are combined: "wide" or "long".
    #[arg(long, default_value_t = LevelLayout::Wide)]
    layout: LevelLayout,
    /// Comment lines before the emapper header.
    #[arg(long, default_value_t = 4)]
    emapper_skip_lines: usize,
    /// Output folder.
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,
    #[arg(long, default_value = "9606")]
    taxon: String,
}

#[derive(Debug, Args)]
struct GotermsArgs {
    /// emapper annotations.
    #[arg(short, long, value_name = "FILE")]
    emapper: PathBuf,
    /// The GO term to select, e.g. GO:0003700.
    #[arg(long = "go", value_name = "TERM")]
    go_term: String,
    /// An extra emapper column to report. Repeatable.
    #[arg(short = 'x', long = "extra", value_name = "COLUMN")]
    extra: Vec<String>,
    /// Report every emapper column.
    #[arg(long, conflicts_with = "extra")]
    all_columns: bool,
    #[arg(long, default_value_t = 4)]
    emapper_skip_lines: usize,
    /// Output file; standard output when missing.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn phylome(args: PhylomeArgs) -> anyhow::Result<()> {
    let mut cfg = PhylomeConfig::new(TaxonId::parse(&args.taxon)?);
    cfg.mode = MatchMode::from(args.symbol_mode);
    cfg.input_translated = args.input_translated;
    cfg.report_lost = args.report_lost;
    cfg.annotated_suffix = args.suffix;
    cfg.target_species = args.species;

    let dir_cache = DirCache::new(&args.output);
    let needs_lookup = !cfg.mode.is_symbol() && !cfg.input_translated;
    let has_mapping = args.stable_mapping.is_some() || args.symbol_mapping.is_some();
    if needs_lookup
        && args.lookup.is_none()
        && !has_mapping
        && !dir_cache.path_of(LOOKUP_KEY).is_file()
    {
        bail!(
            "Translating the orthologs needs a lookup (--lookup) or identifier mappings (--stable-mapping, --symbol-mapping); use --symbol-mode to match on symbols instead"
        );
    }

    let resolver = resolver_from_files(
        args.stable_mapping.as_deref(),
        args.symbol_mapping.as_deref(),
        args.symbol_table.as_deref(),
    )?;
    let query = read_query(&args.query, true)?;
    let source = InputSource::resolve(&args.tables)?;

    let run = match &args.lookup {
        Some(path) => {
            let lookup = read_lookup(path, &cfg.lookup_columns)?;
            let mut cache = MemoryCache::new();
            cache.put(LOOKUP_KEY, &lookup.to_df(&cfg.lookup_columns)?)?;
            run_phylome(&source, &query, &cfg, &resolver, &mut cache)?
        }
        None => {
            let mut cache = dir_cache;
            run_phylome(&source, &query, &cfg, &resolver, &mut cache)?
        }
    };

    if !run.skipped.is_empty() {
        warn!("{} rows were skipped", run.skipped.len());
        for issue in run.skipped.iter() {
            debug!("row {}: {}", issue.row, issue.reason);
        }
    }
    save_phylome(&run, &args.output, &cfg)?;
    info!(
        "saved {} annotated tables to {:?}",
        run.annotated.len(),
        args.output
    );
    Ok(())
}

fn orthogroup(args: OrthogroupArgs) -> anyhow::Result<()> {
    let mut cfg = OrthogroupConfig::new(TaxonId::parse(&args.taxon)?);
    cfg.merge_on = args.merge_on;
    cfg.qc_only = args.qc;
    cfg.keep_all_targets = args.keep_all_targets;
    cfg.keep_conversions = !args.rm_conversions;
    cfg.layout = args.layout;
    cfg.emapper_skip_lines = args.emapper_skip_lines;

    let levels = args
        .eggnog
        .iter()
        .map(read_members)
        .collect::<anyhow::Result<Vec<_>>>()?;
    let lookup = read_lookup(&args.lookup, &cfg.lookup_columns)?;
    let query = read_query(&args.query, false)?;
    let emapper = match &args.emapper {
        Some(p) => Some(read_emapper(p, cfg.emapper_skip_lines)?),
        None => {
            if !cfg.qc_only {
                warn!("No emapper file was given; only the query orthogroups are saved");
            }
            None
        }
    };

    let run = run_orthogroup(&levels, &lookup, &query, emapper.as_ref(), &cfg)?;
    if let Some(query_orthogroups) = &run.query_orthogroups {
        write_tsv(query_orthogroups, args.output.join("query_orthogroups.tsv"))?;
    }
    if let Some(annotated) = &run.annotated {
        let written = save_tables(std::slice::from_ref(annotated), &args.output, &cfg.suffix)?;
        info!("saved the annotated emapper table to {:?}", written);
    }
    Ok(())
}

fn goterms(args: GotermsArgs) -> anyhow::Result<()> {
    let columns = if args.all_columns {
        GoColumns::All
    } else if args.extra.is_empty() {
        GoColumns::QueryOnly
    } else {
        GoColumns::Extra(args.extra)
    };
    let emapper = read_emapper(&args.emapper, args.emapper_skip_lines)?;
    let selected = go_term_annotation(&emapper, &args.go_term, &columns)?;
    match &args.output {
        Some(path) => write_tsv(&selected, path)?,
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            write_tsv_to(&selected, &mut handle).context("Could not write to standard output")?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let start = Instant::now();
    match cli.command {
        Command::Phylome(args) => phylome(args)?,
        Command::Orthogroup(args) => orthogroup(args)?,
        Command::Goterms(args) => goterms(args)?,
    }
    debug!(
        "finished in {:?}; peak memory {:.2} MB",
        start.elapsed(),
        PEAK_ALLOC.peak_usage_as_mb()
    );
    Ok(())
}
