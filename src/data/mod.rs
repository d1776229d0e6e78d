/// Data layer: table I/O, typed specimen records, and export.
///
/// Architecture:
/// ```text
///  .json / .csv / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Table (cells kept verbatim)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  parse    │  validate rows → SpecimenRecord / ScanGroup
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Dataset  │  Table + records, mutated by the selection session
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  merge selection/comment columns → Table → file
///   └──────────┘
/// ```

pub mod export;
pub mod filter;
pub mod loader;
pub mod model;
pub mod parse;
pub mod sorting;
pub mod table;

#[cfg(test)]
pub(crate) mod fixtures;
