use crate::annotator::MatchRule;
use crate::error::require_columns;
use crate::utils::{TaxonId, DEFAULT_STABLE_ID_PREFIX};
use polars::frame::DataFrame;
use tracing::warn;

/// Which identifier space the query genes are given in, and therefore which column of a
/// phylome orthology table is searched.
///
/// * `StableId` - the query lists Ensembl gene IDs. The orthology table must first be
///   translated (see [`crate::phylome::translate_orthology`]) and matches are searched in the
///   stable-ID column. Each match also yields the display symbol at the same position.
/// * `Symbol` - the query lists gene symbols. Matches are searched directly in the symbol
///   column and the Identifier Translator is bypassed entirely.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    StableId,
    Symbol,
}

impl MatchMode {
    pub fn from(symbol_only: bool) -> MatchMode {
        if symbol_only {
            MatchMode::Symbol
        } else {
            MatchMode::StableId
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, MatchMode::Symbol)
    }
}

/// How per-level ortholog-group tables are merged.
///
/// * `Wide` - one row per protein, one `Orthogroup@<level>` column per level.
/// * `Long` - the per-level rows stacked on top of each other with a `Level` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LevelLayout {
    #[default]
    Wide,
    Long,
}

impl std::str::FromStr for LevelLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<LevelLayout> {
        let layout = match s.to_lowercase().as_str() {
            "wide" => LevelLayout::Wide,
            "long" => LevelLayout::Long,
            _ => anyhow::bail!("Cannot parse the level layout {:?}; use \"wide\" or \"long\".", s),
        };
        Ok(layout)
    }
}

impl std::fmt::Display for LevelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelLayout::Wide => write!(f, "wide"),
            LevelLayout::Long => write!(f, "long"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The names of the columns of a phylome orthology table that the pipeline reads or writes.
///
/// The defaults follow the layout of the phylome orthology exports. If an export
/// uses different names, build a [PhylomeColumns] with the right ones instead of renaming
/// the columns of the table.
pub struct PhylomeColumns {
    /// The seed gene(s) of the target species, e.g. `456.GeneA`. The first token of the first
    /// cell of this column names the output file.
    pub seed: String,
    /// The orthology type, e.g. `one-to-many`.
    pub orthology_type: String,
    /// The species of the orthologs listed in the row.
    pub target_species: String,
    /// The orthologous proteins, `,`-separated, each optionally with `|`-separated alternates.
    pub orthologs: String,
    /// The symbols of the orthologs, parallel to `orthologs`.
    pub symbols: String,
    /// The stable gene IDs added by the translation step, parallel to `orthologs`.
    pub stable_ids: String,
    /// The stable IDs that belong to the query, with non-matches masked.
    pub masked_stable_ids: String,
    /// The symbols that belong to the query, with non-matches masked.
    pub masked_symbols: String,
}

impl Default for PhylomeColumns {
    fn default() -> Self {
        Self {
            seed: "##Seed_(co-)orthologs".to_string(),
            orthology_type: "type".to_string(),
            target_species: "target_species".to_string(),
            orthologs: "orthologs".to_string(),
            symbols: "GeneName_target".to_string(),
            stable_ids: "ENSEMBL_ID".to_string(),
            masked_stable_ids: "ENSEMBL_query-only".to_string(),
            masked_symbols: "GeneName_target_query-only".to_string(),
        }
    }
}

impl PhylomeColumns {
    /// Checks that the columns required by the given step exist in `df`.
    ///
    /// A raw table needs the seed, type, orthologs and symbols columns; a translated table
    /// additionally needs the stable-ID column. Missing columns are an input-shape error.
    pub fn is_valid(&self, df: &DataFrame, translated: bool) -> anyhow::Result<()> {
        let mut required = vec![
            self.seed.as_str(),
            self.orthology_type.as_str(),
            self.orthologs.as_str(),
            self.symbols.as_str(),
        ];
        if translated {
            required.push(self.stable_ids.as_str());
        }
        require_columns(df, "phylome orthology", &required)
    }

    /// The columns carried into the annotated output, in order, for the given mode.
    pub fn carried(&self, mode: MatchMode) -> Vec<&str> {
        match mode {
            MatchMode::StableId => vec![
                self.seed.as_str(),
                self.orthology_type.as_str(),
                self.orthologs.as_str(),
                self.symbols.as_str(),
                self.stable_ids.as_str(),
            ],
            MatchMode::Symbol => vec![
                self.seed.as_str(),
                self.orthology_type.as_str(),
                self.symbols.as_str(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The three aligned columns of a lookup table.
///
/// * `external` - the identifier found in the source tables (UniProt accession or Ensembl protein ID).
/// * `stable` - the stable gene ID it translates to.
/// * `symbol` - the display symbol it translates to.
pub struct LookupColumns {
    pub external: String,
    pub stable: String,
    pub symbol: String,
}

impl Default for LookupColumns {
    /// The layout of a lookup built from UniProt mapping responses.
    fn default() -> Self {
        Self {
            external: "UniProtKB".to_string(),
            stable: "ENSEMBL_ID".to_string(),
            symbol: "HGNC".to_string(),
        }
    }
}

impl LookupColumns {
    /// The layout of a Biomart export translating Ensembl proteins.
    pub fn biomart() -> LookupColumns {
        LookupColumns {
            external: "Protein stable ID".to_string(),
            stable: "Gene stable ID".to_string(),
            symbol: "HGNC symbol".to_string(),
        }
    }
}

/// Options for the pairwise-orthology (phylome) pathway.
#[derive(Debug, Clone)]
pub struct PhylomeConfig {
    /// The taxon whose members are translated, usually human (`9606`).
    pub taxon: TaxonId,
    /// Only rows whose target species equals this value are kept.
    pub target_species: String,
    /// Number of metadata lines between the header and the first record.
    pub metadata_lines: usize,
    pub columns: PhylomeColumns,
    pub lookup_columns: LookupColumns,
    pub mode: MatchMode,
    /// How symbols are compared in [`MatchMode::Symbol`].
    pub symbol_rule: MatchRule,
    /// A "symbol" that starts with this prefix is really a stable ID.
    pub stable_id_prefix: String,
    /// Skip translation; the orthology tables already carry the stable-ID column.
    pub input_translated: bool,
    /// Log and return the untranslated identifiers.
    pub report_lost: bool,
    pub annotated_suffix: String,
    pub translated_suffix: String,
}

impl PhylomeConfig {
    /// Creates a configuration for `taxon` with the defaults of the phylome exports.
    pub fn new(taxon: TaxonId) -> PhylomeConfig {
        PhylomeConfig {
            taxon,
            target_species: "Homo sapiens".to_string(),
            metadata_lines: 12,
            columns: PhylomeColumns::default(),
            lookup_columns: LookupColumns::default(),
            mode: MatchMode::default(),
            symbol_rule: MatchRule::Contains,
            stable_id_prefix: DEFAULT_STABLE_ID_PREFIX.to_string(),
            input_translated: false,
            report_lost: false,
            annotated_suffix: "_annotated_orthology".to_string(),
            translated_suffix: "_translated".to_string(),
        }
    }

    /// Warns about option combinations that silently do nothing.
    pub fn check(&self) {
        if self.mode.is_symbol() && self.input_translated {
            warn!("--input-translated has no effect in symbol mode; the orthology tables are used as they are.");
        }
        if self.mode.is_symbol() && self.report_lost {
            warn!("No translation happens in symbol mode, so there are no lost identifiers to report.");
        }
    }
}

/// Options for the ortholog-group (eggNOG) pathway.
#[derive(Debug, Clone)]
pub struct OrthogroupConfig {
    /// The taxon whose members are extracted from every level.
    pub taxon: TaxonId,
    pub lookup_columns: LookupColumns,
    pub layout: LevelLayout,
    /// The column of the translated table holding the identifiers the query is written in.
    pub merge_on: String,
    /// Keep the other translation columns in the query/orthogroup table.
    pub keep_conversions: bool,
    /// Keep emapper rows that hit no query orthogroup.
    pub keep_all_targets: bool,
    /// Stop after logging the translation QC.
    pub qc_only: bool,
    /// Number of comment lines before the emapper header.
    pub emapper_skip_lines: usize,
    pub suffix: String,
}

impl OrthogroupConfig {
    pub fn new(taxon: TaxonId) -> OrthogroupConfig {
        let lookup_columns = LookupColumns::biomart();
        OrthogroupConfig {
            taxon,
            merge_on: lookup_columns.stable.clone(),
            lookup_columns,
            layout: LevelLayout::default(),
            keep_conversions: true,
            keep_all_targets: false,
            qc_only: false,
            emapper_skip_lines: 4,
            suffix: "_orthogroup_annotated".to_string(),
        }
    }
}
