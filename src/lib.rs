//! Orthoprop propagates curated human gene modules (transcription factors, signalling components,
//! ...) to the genes of other species. It reads orthology resources into
//! [Polars](https://pola.rs/) data frames and follows two pathways:
//!
//! * the ortholog-group pathway, which translates the human members of eggNOG orthogroups to
//!   stable gene IDs and marks the target proteins annotated with one of the query orthogroups;
//! * the phylome pathway, which translates the human side of pairwise orthology tables and marks,
//!   position by position, the orthologs that belong to the query module.
//!
//! The heavy lifting is done on comma/pipe-delimited cells: [matcher] filters the tokens of such
//! cells, [translator] maps identifiers between namespaces, and [annotator] writes the
//! "query-only" columns that keep the position of every hit.

pub mod annotator;
pub mod cache;
pub mod error;
pub mod goterms;
pub mod matcher;
pub mod options;
pub mod orthogroup;
pub mod phylome;
pub mod pipeline;
pub mod reader;
pub mod translator;
pub mod utils;
pub mod writer;

pub use annotator::{AnnotationColumns, MatchRule, RowIssue};
pub use error::AnnotationError;
pub use options::{LevelLayout, LookupColumns, MatchMode, OrthogroupConfig, PhylomeConfig, PhylomeColumns};
pub use translator::{IdResolver, Lookup, MissingReport};
pub use utils::{InputSource, TaxonId};
