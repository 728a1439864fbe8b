//! Translation between the three identifier spaces used by the pipelines: the external ID found
//! in the source tables (UniProt accession, Ensembl protein ID), the stable gene ID and the
//! display symbol.
//!
//! The translation itself comes from an [IdResolver], a best-effort black box that may return
//! nothing for some identifiers. A [Lookup] records what was resolved, [find_untranslated] reports
//! what was not, and [recover_stable_ids] runs the secondary symbol-to-stable-ID pass.
//!
//! [MappingTableResolver] answers offline from saved responses. A network-backed [IdResolver]
//! should be wrapped in a [RetryingResolver], which retries transient failures with backoff and
//! requests each symbol at most once.

use crate::error::{require_columns, AnnotationError};
use crate::options::LookupColumns;
use crate::utils::{split_alternates, ALTERNATE_DELIMITER};
use polars::prelude::*;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The identifier namespaces understood by the mapping service, with the tag it expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IdNamespace {
    /// UniProtKB accessions.
    UniProtKb,
    /// Ensembl gene IDs.
    Ensembl,
    /// GeneCards (HGNC) symbols.
    GeneCards,
}

impl IdNamespace {
    pub fn tag(&self) -> &'static str {
        match self {
            IdNamespace::UniProtKb => "ID",
            IdNamespace::Ensembl => "ENSEMBL_ID",
            IdNamespace::GeneCards => "GENECARDS_ID",
        }
    }
}

impl std::fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A best-effort identifier mapping service.
///
/// Implementations may return an empty result or omit any identifier; they must never invent
/// a mapping. An `Err` means the whole batch failed and is treated as "no translation".
pub trait IdResolver {
    /// Maps `ids` from one namespace to another, returning `(from, to)` pairs.
    fn map_ids(
        &self,
        ids: &[String],
        from: IdNamespace,
        to: IdNamespace,
    ) -> anyhow::Result<Vec<(String, String)>>;

    /// Looks up the stable gene ID of a symbol.
    fn stable_id_for_symbol(&self, symbol: &str) -> anyhow::Result<Option<String>>;
}

/// Parses a two-column, tab-separated mapping response.
///
/// The first line is the header. Every other line must have exactly two non-empty fields;
/// anything else (blank trailing lines, truncated rows, rows with extra fields) is skipped.
pub fn parse_mapping_response(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut n_malformed = 0usize;
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        match fields.as_slice() {
            [from, to] if !from.trim().is_empty() && !to.trim().is_empty() => {
                pairs.push((from.trim().to_string(), to.trim().to_string()))
            }
            [] | [""] => {}
            _ => n_malformed += 1,
        }
    }
    if n_malformed > 0 {
        debug!("skipped {} malformed rows in a mapping response", n_malformed);
    }
    pairs
}

/// An offline [IdResolver] that answers from previously downloaded mapping responses and a
/// symbol to stable-ID table.
#[derive(Debug, Clone, Default)]
pub struct MappingTableResolver {
    responses: HashMap<(IdNamespace, IdNamespace), Vec<(String, String)>>,
    symbols: HashMap<String, String>,
}

impl MappingTableResolver {
    pub fn new() -> MappingTableResolver {
        MappingTableResolver::default()
    }

    /// Registers the raw text of a mapping response for the `from -> to` direction.
    pub fn with_response(mut self, from: IdNamespace, to: IdNamespace, text: &str) -> Self {
        self.responses
            .entry((from, to))
            .or_default()
            .extend(parse_mapping_response(text));
        self
    }

    /// Registers symbol to stable-ID pairs for the secondary pass. The first pair of a symbol wins.
    pub fn with_symbol_table<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        for (symbol, stable) in pairs {
            self.symbols
                .entry(symbol.as_ref().to_string())
                .or_insert_with(|| stable.as_ref().to_string());
        }
        self
    }
}

impl IdResolver for MappingTableResolver {
    fn map_ids(
        &self,
        ids: &[String],
        from: IdNamespace,
        to: IdNamespace,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let pairs = self.responses.get(&(from, to)).ok_or_else(|| AnnotationError::Resolver {
            from: from.to_string(),
            to: to.to_string(),
            reason: "no mapping response was provided for this direction".to_string(),
        })?;
        let wanted: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        Ok(pairs
            .iter()
            .filter(|(f, _)| wanted.contains(f.as_str()))
            .cloned()
            .collect())
    }

    fn stable_id_for_symbol(&self, symbol: &str) -> anyhow::Result<Option<String>> {
        Ok(self.symbols.get(symbol).cloned())
    }
}

/// Exponential backoff for calls to a remote resolver.
#[derive(Debug, Copy, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Calls `f` until it succeeds or `max_attempts` calls have failed, doubling the delay
    /// between attempts.
    pub fn run<T, F>(&self, what: &str, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("{} failed after {} attempts", what, attempt)))
                }
            }
        }
    }
}

/// Wraps a resolver with retries. Successful symbol lookups are memoised, so a symbol shared by
/// several external IDs, or retried after a later failure, is requested only once.
pub struct RetryingResolver<R> {
    inner: R,
    policy: RetryPolicy,
    answered: RefCell<HashMap<String, Option<String>>>,
}

impl<R: IdResolver> RetryingResolver<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> RetryingResolver<R> {
        RetryingResolver {
            inner,
            policy,
            answered: RefCell::new(HashMap::new()),
        }
    }
}

impl<R: IdResolver> IdResolver for RetryingResolver<R> {
    fn map_ids(
        &self,
        ids: &[String],
        from: IdNamespace,
        to: IdNamespace,
    ) -> anyhow::Result<Vec<(String, String)>> {
        self.policy.run(&format!("mapping {} -> {}", from, to), || {
            self.inner.map_ids(ids, from, to)
        })
    }

    fn stable_id_for_symbol(&self, symbol: &str) -> anyhow::Result<Option<String>> {
        if let Some(known) = self.answered.borrow().get(symbol) {
            return Ok(known.clone());
        }
        let found = self
            .policy
            .run(&format!("looking up symbol {:?}", symbol), || {
                self.inner.stable_id_for_symbol(symbol)
            })?;
        self.answered
            .borrow_mut()
            .insert(symbol.to_string(), found.clone());
        Ok(found)
    }
}

/// One row of a [Lookup]. A missing translation is `None`, never an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub external_id: String,
    /// One or more stable IDs. Several are `|`-joined: they are alternates of one logical item.
    pub stable_id: Option<String>,
    pub symbol: Option<String>,
}

/// The translation table between external IDs, stable IDs and symbols, keyed by external ID.
#[derive(Debug, Clone, Default)]
pub struct Lookup {
    entries: Vec<LookupEntry>,
    index: HashMap<String, usize>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl Lookup {
    pub fn new() -> Lookup {
        Lookup::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LookupEntry] {
        &self.entries
    }

    pub fn get(&self, external_id: &str) -> Option<&LookupEntry> {
        self.index.get(external_id).map(|&i| &self.entries[i])
    }

    pub fn stable_id(&self, external_id: &str) -> Option<&str> {
        self.get(external_id).and_then(|e| e.stable_id.as_deref())
    }

    pub fn symbol(&self, external_id: &str) -> Option<&str> {
        self.get(external_id).and_then(|e| e.symbol.as_deref())
    }

    /// Adds a translation. Repeated external IDs are merged into one entry: new stable IDs are
    /// appended as `|` alternates, and the first symbol seen is kept.
    pub fn insert(&mut self, external_id: &str, stable_id: Option<&str>, symbol: Option<&str>) {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return;
        }
        let stable_id = non_empty(stable_id);
        let symbol = non_empty(symbol);

        let i = match self.index.get(external_id) {
            Some(&i) => i,
            None => {
                self.entries.push(LookupEntry {
                    external_id: external_id.to_string(),
                    stable_id: None,
                    symbol: None,
                });
                self.index
                    .insert(external_id.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[i];
        if let Some(new_stable) = stable_id {
            entry.stable_id = Some(match entry.stable_id.take() {
                None => new_stable.to_string(),
                Some(old) => {
                    let mut alternates: Vec<&str> = split_alternates(&old);
                    for alt in split_alternates(new_stable) {
                        if !alternates.contains(&alt) {
                            alternates.push(alt);
                        }
                    }
                    alternates.join(&ALTERNATE_DELIMITER.to_string())
                }
            });
        }
        if entry.symbol.is_none() {
            entry.symbol = symbol.map(String::from);
        }
    }

    /// Outer-joins the two resolver results on the external ID. An ID present in only one of
    /// them gets a missing value for the other field.
    pub fn from_pairs(stable_pairs: &[(String, String)], symbol_pairs: &[(String, String)]) -> Lookup {
        let mut lookup = Lookup::new();
        for (external, stable) in stable_pairs {
            lookup.insert(external, Some(stable), None);
        }
        for (external, symbol) in symbol_pairs {
            lookup.insert(external, None, Some(symbol));
        }
        lookup
    }

    /// Reads a lookup from a table with the given column names, e.g. a Biomart export or a
    /// cached lookup. Rows without an external ID are skipped.
    pub fn from_df(df: &DataFrame, columns: &LookupColumns) -> anyhow::Result<Lookup> {
        require_columns(
            df,
            "lookup",
            &[&columns.external, &columns.stable, &columns.symbol],
        )?;
        let external = df.column(&columns.external)?.cast(&DataType::String)?;
        let stable = df.column(&columns.stable)?.cast(&DataType::String)?;
        let symbol = df.column(&columns.symbol)?.cast(&DataType::String)?;

        let mut lookup = Lookup::new();
        for ((e, st), sy) in external
            .str()?
            .into_iter()
            .zip(stable.str()?.into_iter())
            .zip(symbol.str()?.into_iter())
        {
            if let Some(e) = e {
                lookup.insert(e, st, sy);
            }
        }
        debug!("read a lookup with {} external IDs", lookup.len());
        Ok(lookup)
    }

    /// Writes the lookup as a three-column table with nulls for missing translations.
    pub fn to_df(&self, columns: &LookupColumns) -> anyhow::Result<DataFrame> {
        let external: Vec<&str> = self.entries.iter().map(|e| e.external_id.as_str()).collect();
        let stable: Vec<Option<&str>> = self.entries.iter().map(|e| e.stable_id.as_deref()).collect();
        let symbol: Vec<Option<&str>> = self.entries.iter().map(|e| e.symbol.as_deref()).collect();
        Ok(DataFrame::new(vec![
            Series::new(&columns.external, external),
            Series::new(&columns.stable, stable),
            Series::new(&columns.symbol, symbol),
        ])?)
    }

    fn set(&mut self, entry: LookupEntry) {
        match self.index.get(&entry.external_id) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index
                    .insert(entry.external_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

fn resolve_or_warn(
    resolver: &dyn IdResolver,
    ids: &[String],
    from: IdNamespace,
    to: IdNamespace,
) -> Vec<(String, String)> {
    match resolver.map_ids(ids, from, to) {
        Ok(pairs) => {
            info!("resolved {} {} -> {} pairs", pairs.len(), from, to);
            pairs
        }
        Err(e) => {
            warn!(
                "Identifier resolution {} -> {} failed; continuing without it: {:#}",
                from, to, e
            );
            Vec::new()
        }
    }
}

/// Builds the lookup for `raw_ids` by asking `resolver` for their stable IDs and their symbols.
///
/// A failure of either request is logged and treated as "nothing translated". Pairs for IDs that
/// were not asked for are ignored.
pub fn build_lookup(raw_ids: &BTreeSet<String>, resolver: &dyn IdResolver) -> Lookup {
    let ids: Vec<String> = raw_ids.iter().cloned().collect();
    let keep = |pairs: Vec<(String, String)>| -> Vec<(String, String)> {
        pairs
            .into_iter()
            .filter(|(external, _)| raw_ids.contains(external))
            .collect()
    };
    let stable = keep(resolve_or_warn(
        resolver,
        &ids,
        IdNamespace::UniProtKb,
        IdNamespace::Ensembl,
    ));
    let symbols = keep(resolve_or_warn(
        resolver,
        &ids,
        IdNamespace::UniProtKb,
        IdNamespace::GeneCards,
    ));
    let lookup = Lookup::from_pairs(&stable, &symbols);
    info!(
        "built a lookup for {} of {} identifiers",
        lookup.len(),
        raw_ids.len()
    );
    lookup
}

/// An external ID that lacks at least one of its translations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntry {
    pub external_id: String,
    pub missing_stable_id: bool,
    pub missing_symbol: bool,
    /// Whichever translation was found, if any.
    pub partial: Option<String>,
}

/// The identifiers that were not fully translated.
#[derive(Debug, Clone, Default)]
pub struct MissingReport {
    pub entries: Vec<MissingEntry>,
}

impl MissingReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The external IDs that have no stable ID.
    pub fn missing_stable_ids(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|e| e.missing_stable_id)
            .map(|e| e.external_id.as_str())
            .collect()
    }

    pub fn to_df(&self) -> anyhow::Result<DataFrame> {
        let ids: Vec<&str> = self.entries.iter().map(|e| e.external_id.as_str()).collect();
        let no_stable: Vec<bool> = self.entries.iter().map(|e| e.missing_stable_id).collect();
        let no_symbol: Vec<bool> = self.entries.iter().map(|e| e.missing_symbol).collect();
        let partial: Vec<Option<&str>> = self.entries.iter().map(|e| e.partial.as_deref()).collect();
        Ok(DataFrame::new(vec![
            Series::new("external_id", ids),
            Series::new("missing_stable_id", no_stable),
            Series::new("missing_symbol", no_symbol),
            Series::new("translation", partial),
        ])?)
    }
}

/// Reports, for every ID of `raw_ids`, whether its stable ID and symbol are absent from `lookup`.
/// IDs with both translations are left out.
pub fn find_untranslated(raw_ids: &BTreeSet<String>, lookup: &Lookup) -> MissingReport {
    let mut entries = Vec::new();
    for id in raw_ids {
        let stable = lookup.stable_id(id);
        let symbol = lookup.symbol(id);
        if stable.is_none() || symbol.is_none() {
            entries.push(MissingEntry {
                external_id: id.clone(),
                missing_stable_id: stable.is_none(),
                missing_symbol: symbol.is_none(),
                partial: stable.or(symbol).map(String::from),
            });
        }
    }
    if !entries.is_empty() {
        warn!(
            "{} of {} identifiers are not fully translated",
            entries.len(),
            raw_ids.len()
        );
    }
    MissingReport { entries }
}

/// Tries to fill the missing stable IDs of `lookup` from the symbols that were found.
///
/// Returns a new lookup; `lookup` itself is left untouched. For every entry of `report` lacking a
/// stable ID but carrying a symbol:
///
/// * if the symbol starts with `stable_id_prefix`, the mapping service answered a symbol request
///   with a stable ID. The value is moved into the stable-ID slot and the symbol becomes missing.
/// * otherwise the symbol is looked up with [IdResolver::stable_id_for_symbol]. Each distinct
///   symbol is requested once; failures are logged and leave the entry unchanged.
pub fn recover_stable_ids(
    lookup: &Lookup,
    report: &MissingReport,
    resolver: &dyn IdResolver,
    stable_id_prefix: &str,
) -> Lookup {
    let mut patched = lookup.clone();
    let mut answered: HashMap<String, Option<String>> = HashMap::new();
    let mut n_moved = 0usize;
    let mut n_recovered = 0usize;

    for missing in report.entries.iter().filter(|e| e.missing_stable_id) {
        let Some(symbol) = lookup.symbol(&missing.external_id) else {
            continue;
        };

        if symbol.starts_with(stable_id_prefix) {
            patched.set(LookupEntry {
                external_id: missing.external_id.clone(),
                stable_id: Some(symbol.to_string()),
                symbol: None,
            });
            n_moved += 1;
            continue;
        }

        let found = match answered.get(symbol) {
            Some(known) => known.clone(),
            None => match resolver.stable_id_for_symbol(symbol) {
                Ok(found) => {
                    answered.insert(symbol.to_string(), found.clone());
                    found
                }
                Err(e) => {
                    warn!("Could not look up the stable ID of {:?}: {:#}", symbol, e);
                    None
                }
            },
        };

        if let Some(stable) = found {
            patched.set(LookupEntry {
                external_id: missing.external_id.clone(),
                stable_id: Some(stable),
                symbol: Some(symbol.to_string()),
            });
            n_recovered += 1;
        }
    }

    info!(
        "recovered {} stable IDs from symbols and moved {} stable IDs out of the symbol field",
        n_recovered, n_moved
    );
    patched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const ENSEMBL_RESPONSE: &str = "From\tTo\nP1\tENSG00000001\nP2\tENSG00000002\nP2\tENSG00000022\nP9\tENSG00000009\n\tbroken\n";
    const SYMBOL_RESPONSE: &str = "From\tTo\nP1\tSOX2\nP3\tPAX6\nP4\tENSG00000004\n";

    fn ids(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn resolver() -> MappingTableResolver {
        MappingTableResolver::new()
            .with_response(IdNamespace::UniProtKb, IdNamespace::Ensembl, ENSEMBL_RESPONSE)
            .with_response(IdNamespace::UniProtKb, IdNamespace::GeneCards, SYMBOL_RESPONSE)
            .with_symbol_table([("PAX6", "ENSG00000006")])
    }

    #[test]
    fn test_parse_mapping_response() {
        let pairs = parse_mapping_response("From\tTo\nA\tB\nC\t\nD\tE\tF\n\nG\tH\r\n");
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "B".to_string()),
                ("G".to_string(), "H".to_string())
            ]
        );
        assert!(parse_mapping_response("").is_empty());
    }

    #[test]
    fn test_build_lookup_outer_join() {
        let raw = ids(&["P1", "P2", "P3", "P4", "P5"]);
        let lookup = build_lookup(&raw, &resolver());

        // P9 was not asked for
        assert!(lookup.get("P9").is_none());
        assert_eq!(lookup.stable_id("P1"), Some("ENSG00000001"));
        assert_eq!(lookup.symbol("P1"), Some("SOX2"));
        assert_eq!(lookup.stable_id("P2"), Some("ENSG00000002|ENSG00000022"));
        assert_eq!(lookup.symbol("P2"), None);
        assert_eq!(lookup.stable_id("P3"), None);
        assert_eq!(lookup.symbol("P3"), Some("PAX6"));
        assert!(lookup.get("P5").is_none());
        assert_eq!(lookup.len(), 4);
    }

    #[test]
    fn test_missing_report_matches_lookup() {
        let raw = ids(&["P1", "P2", "P3", "P4", "P5"]);
        let lookup = build_lookup(&raw, &resolver());
        let report = find_untranslated(&raw, &lookup);

        let without_stable: BTreeSet<&str> = raw
            .iter()
            .map(|s| s.as_str())
            .filter(|id| lookup.stable_id(id).is_none())
            .collect();
        assert_eq!(report.missing_stable_ids(), without_stable);

        let p2 = report.entries.iter().find(|e| e.external_id == "P2").unwrap();
        assert!(!p2.missing_stable_id && p2.missing_symbol);
        let p5 = report.entries.iter().find(|e| e.external_id == "P5").unwrap();
        assert!(p5.missing_stable_id && p5.missing_symbol && p5.partial.is_none());
        assert!(!report.entries.iter().any(|e| e.external_id == "P1"));
        assert_eq!(report.to_df().unwrap().height(), report.len());
    }

    #[test]
    fn test_recover_stable_ids() {
        let raw = ids(&["P1", "P2", "P3", "P4", "P5"]);
        let lookup = build_lookup(&raw, &resolver());
        let report = find_untranslated(&raw, &lookup);
        let patched = recover_stable_ids(&lookup, &report, &resolver(), "ENSG0000");

        // recovered from the symbol
        assert_eq!(patched.stable_id("P3"), Some("ENSG00000006"));
        assert_eq!(patched.symbol("P3"), Some("PAX6"));
        // the "symbol" was a stable ID
        assert_eq!(patched.stable_id("P4"), Some("ENSG00000004"));
        assert_eq!(patched.symbol("P4"), None);
        // nothing to recover from
        assert_eq!(patched.stable_id("P5"), None);
        // the input is untouched
        assert_eq!(lookup.stable_id("P3"), None);
    }

    #[test]
    fn test_lookup_df_round_trip_keeps_nulls() {
        let mut lookup = Lookup::new();
        lookup.insert("P1", Some("ENSG1"), Some("SOX2"));
        lookup.insert("P2", None, Some(""));
        let cols = LookupColumns::default();
        let df = lookup.to_df(&cols).unwrap();
        assert_eq!(df.column("ENSEMBL_ID").unwrap().null_count(), 1);
        assert_eq!(df.column("HGNC").unwrap().null_count(), 1);

        let back = Lookup::from_df(&df, &cols).unwrap();
        assert_eq!(back.entries(), lookup.entries());
    }

    #[test]
    fn test_missing_direction_is_an_error() {
        let r = MappingTableResolver::new();
        let err = r
            .map_ids(&["P1".to_string()], IdNamespace::UniProtKb, IdNamespace::Ensembl)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnnotationError>(),
            Some(AnnotationError::Resolver { .. })
        ));
        // build_lookup survives it
        assert!(build_lookup(&ids(&["P1"]), &r).is_empty());
    }

    struct Flaky {
        failures_left: Cell<usize>,
        calls: Cell<usize>,
    }

    impl IdResolver for Flaky {
        fn map_ids(
            &self,
            _ids: &[String],
            _from: IdNamespace,
            _to: IdNamespace,
        ) -> anyhow::Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }

        fn stable_id_for_symbol(&self, symbol: &str) -> anyhow::Result<Option<String>> {
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                anyhow::bail!("status 503");
            }
            Ok(Some(format!("ENSG-{}", symbol)))
        }
    }

    #[test]
    fn test_retrying_resolver_asks_once() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let r = RetryingResolver::new(
            Flaky {
                failures_left: Cell::new(2),
                calls: Cell::new(0),
            },
            policy,
        );
        assert_eq!(
            r.stable_id_for_symbol("SOX2").unwrap(),
            Some("ENSG-SOX2".to_string())
        );
        assert_eq!(
            r.stable_id_for_symbol("SOX2").unwrap(),
            Some("ENSG-SOX2".to_string())
        );
        assert_eq!(r.inner.calls.get(), 3);

        let r = RetryingResolver::new(
            Flaky {
                failures_left: Cell::new(5),
                calls: Cell::new(0),
            },
            policy,
        );
        assert!(r.stable_id_for_symbol("PAX6").is_err());
        assert_eq!(r.inner.calls.get(), 3);
    }
}
