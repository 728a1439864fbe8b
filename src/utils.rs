use anyhow::{bail, Context};
use flate2::bufread::MultiGzDecoder;
use nutype::nutype;
use polars::frame::DataFrame;
use std::collections::HashSet;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Separates distinct items of a multi-valued cell.
pub const ITEM_DELIMITER: char = ',';
/// Separates alternate identifiers of one logical item.
pub const ALTERNATE_DELIMITER: char = '|';
/// Written in every slot of a masked column that did not match the query.
pub const PLACEHOLDER: &str = "-";
/// Separates the NCBI taxonomy ID from the protein ID in source databases, e.g. `9606.ENSP0001`.
pub const TAXON_SEPARATOR: char = '.';
/// Prefix of human Ensembl gene IDs. Used to spot a stable ID returned where a symbol was asked for.
pub const DEFAULT_STABLE_ID_PREFIX: &str = "ENSG0000";

/// An NCBI taxonomy identifier such as `9606`, used as the prefix of protein IDs
/// in ortholog-group databases and phylome tables.
#[nutype(sanitize(trim) validate(not_empty))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonId(String);

impl TaxonId {
    /// Parses a taxon identifier, rejecting empty or whitespace-only input.
    pub fn parse<T: AsRef<str>>(s: T) -> anyhow::Result<TaxonId> {
        TaxonId::new(s.as_ref().to_string())
            .map_err(|e| anyhow::anyhow!("Invalid taxon id {:?}: {:?}", s.as_ref(), e))
    }

    /// The taxon identifier as an owned string.
    pub fn id(&self) -> String {
        self.clone().into_inner()
    }

    /// The prefix a member token carries when it belongs to this taxon, e.g. `"9606."`.
    pub fn member_prefix(&self) -> String {
        format!("{}{}", self.id(), TAXON_SEPARATOR)
    }

    /// Returns `true` if `token` is a member of this taxon. `96` never matches `9606.X`.
    pub fn owns(&self, token: &str) -> bool {
        token.starts_with(&self.member_prefix())
    }

    /// Removes the taxon prefix from `token` if present.
    pub fn strip<'a>(&self, token: &'a str) -> &'a str {
        token
            .strip_prefix(self.member_prefix().as_str())
            .unwrap_or(token)
    }
}

/// Splits a multi-valued cell into its items. Tokens are trimmed and an empty
/// or missing cell yields no items, so the token count of a cell is well defined.
pub fn split_items(cell: Option<&str>) -> Vec<&str> {
    match cell {
        Some(s) if !s.trim().is_empty() => s.split(ITEM_DELIMITER).map(|t| t.trim()).collect(),
        _ => Vec::new(),
    }
}

/// Splits one item into its alternate identifiers.
pub fn split_alternates(item: &str) -> Vec<&str> {
    item.split(ALTERNATE_DELIMITER)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Removes duplicates while keeping the first occurrence of each element.
pub fn dedup_preserving_order<T: Eq + Hash + Clone>(values: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Tests if the stream underlying the [BufReader] `reader` is gzipped or not by examining the
/// first 2 bytes for the magic header.  This function *requires*, but does not check, that
/// none of the stream has yet been consumed (i.e. that no read calls have yet been issued
/// to `reader`). It will fill the buffer to examine the first two bytes, but will not consume
/// them.
///
/// If the first 2 bytes could be succesfully read, this returns
/// [Ok]`(true)` if the file is a gzipped file
/// [Ok]`(false)` if it is not a gzipped file
///
/// If the first 2 bytes could not be succesfully read, then this
/// returns the relevant [std::io::Error].
pub fn is_gzipped<T: BufRead>(reader: &mut T) -> std::io::Result<bool> {
    const GZIP_MAGIC_NUMBER: [u8; 2] = [0x1f, 0x8b];

    let src = reader.fill_buf()?;
    if src.get(..2) == Some(&GZIP_MAGIC_NUMBER) {
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Reads the whole file at `p` into memory, transparently decompressing it if it is gzipped.
/// eggNOG distributes its member tables as `*_members.tsv.gz`, so every table reader goes
/// through here.
pub fn read_all_bytes<T: AsRef<Path>>(p: T) -> anyhow::Result<Vec<u8>> {
    let p = p.as_ref();
    let file = File::open(p).with_context(|| format!("Could not open {:?}", p))?;
    let mut inner_rdr = BufReader::new(file);
    let mut buf = Vec::new();
    if is_gzipped(&mut inner_rdr)? {
        trace!("auto-detected gzipped file {:?} - reading via decompression", p);
        MultiGzDecoder::new(inner_rdr).read_to_end(&mut buf)?;
    } else {
        inner_rdr.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// Where a set of input tables comes from. Resolved once at the boundary so the
/// pipelines never need to guess whether a path names a file or a folder.
#[derive(Clone)]
pub enum InputSource {
    /// A single table file.
    SingleFile(PathBuf),
    /// A folder whose every regular file is one table.
    Directory(PathBuf),
    /// Tables that are already loaded, with a name for each.
    InMemory(Vec<(String, DataFrame)>),
}

impl InputSource {
    /// Classifies `path` as a file or a directory. Anything else is an error.
    pub fn resolve<T: AsRef<Path>>(path: T) -> anyhow::Result<InputSource> {
        let path = path.as_ref();
        if path.is_dir() {
            Ok(InputSource::Directory(path.to_path_buf()))
        } else if path.is_file() {
            Ok(InputSource::SingleFile(path.to_path_buf()))
        } else {
            bail!(
                "The provided path {:?} is neither a folder nor a file",
                path.as_os_str()
            )
        }
    }

    /// Lists the files this source refers to, sorted by name. In-memory sources have none.
    pub fn files(&self) -> anyhow::Result<Vec<PathBuf>> {
        match self {
            InputSource::SingleFile(p) => Ok(vec![p.clone()]),
            InputSource::Directory(dir) => {
                let mut files = Vec::new();
                for entry in std::fs::read_dir(dir)
                    .with_context(|| format!("Could not list the folder {:?}", dir))?
                {
                    let path = entry?.path();
                    if path.is_file() {
                        files.push(path);
                    }
                }
                files.sort();
                Ok(files)
            }
            InputSource::InMemory(_) => Ok(Vec::new()),
        }
    }

    /// Loads every table of this source with `read`, pairing each with its file name.
    pub fn load<F>(&self, mut read: F) -> anyhow::Result<Vec<(String, DataFrame)>>
    where
        F: FnMut(&Path) -> anyhow::Result<DataFrame>,
    {
        match self {
            InputSource::InMemory(tables) => Ok(tables.clone()),
            _ => {
                let mut tables = Vec::new();
                for path in self.files()? {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let df = read(&path).with_context(|| format!("Could not read {:?}", path))?;
                    tables.push((name, df));
                }
                Ok(tables)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_items() {
        assert_eq!(split_items(Some("A,B, C")), vec!["A", "B", "C"]);
        assert!(split_items(Some("")).is_empty());
        assert!(split_items(None).is_empty());
        // an empty item still takes a position
        assert_eq!(split_items(Some("A,,B")), vec!["A", "", "B"]);
        assert_eq!(split_alternates("E1|E2"), vec!["E1", "E2"]);
    }

    #[test]
    fn test_taxon_id() {
        let taxon = TaxonId::parse(" 9606 ").unwrap();
        assert_eq!(taxon.id(), "9606");
        assert!(taxon.owns("9606.ENSP1"));
        assert!(!taxon.owns("96061.ENSP1"));
        assert!(!TaxonId::parse("96").unwrap().owns("9606.ENSP1"));
        assert_eq!(taxon.strip("9606.ENSP1"), "ENSP1");
        assert_eq!(taxon.strip("10090.ENSP9"), "10090.ENSP9");
        assert!(TaxonId::parse("  ").is_err());
    }

    #[test]
    fn test_dedup_preserving_order() {
        assert_eq!(dedup_preserving_order(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert!(dedup_preserving_order(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_read_all_bytes_gzipped() {
        let dir = std::env::temp_dir().join("orthoprop_utils_gz");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("members.tsv.gz");
        let file = File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(b"33213\tOG1\n").unwrap();
        enc.finish().unwrap();

        let bytes = read_all_bytes(&path).unwrap();
        assert_eq!(bytes, b"33213\tOG1\n");

        let source = InputSource::resolve(&dir).unwrap();
        assert!(source.files().unwrap().contains(&path));
        assert!(InputSource::resolve(dir.join("missing")).is_err());
    }
}
