//! eggNOG `members.tsv(.gz)` tables.
//!
//! The files have no header. Each line is one orthogroup at one taxonomic level:
//! the level's taxon ID, the orthogroup ID, the protein and species counts, the
//! `,`-separated members (`<taxid>.<protein>`) and the `,`-separated species.

use crate::reader::{parse_tsv, TsvOptions};
use crate::utils::read_all_bytes;
use polars::prelude::*;
use std::path::Path;

pub const LEVEL: &str = "Level";
pub const ORTHOGROUP: &str = "Orthogroup";
pub const MEMBERS: &str = "ProtID";
pub const SPECIES: &str = "SpeciesID";

/// The positional column names of a members table.
pub const MEMBERS_COLUMNS: [&str; 6] = [LEVEL, ORTHOGROUP, "N_Prots", "N_Spec", MEMBERS, SPECIES];

pub fn parse_members(bytes: Vec<u8>, source_name: &str) -> anyhow::Result<DataFrame> {
    parse_tsv(bytes, source_name, &TsvOptions::headerless(&MEMBERS_COLUMNS))
}

/// Reads one members table, gzipped or not.
pub fn read_members<T: AsRef<Path>>(file_path: T) -> anyhow::Result<DataFrame> {
    let file_path = file_path.as_ref();
    parse_members(read_all_bytes(file_path)?, &file_path.display().to_string())
}
