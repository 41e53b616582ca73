//! Feed descriptors
//!
//! A feed is one remote resource (inspections, users, ...) stored as one
//! table or file set. Each feed is described declaratively: its columns,
//! primary key, initial request and how its table is refreshed. The
//! orchestrator drives every descriptor through the same code path.

mod catalog;
mod mapping;
mod types;

pub use catalog::{catalog, dependency_order, select, INSPECTIONS, INSPECTION_ITEMS};
pub use mapping::{
    batch_size, dedup_last_wins, map_record, map_records, parse_timestamp, row_key, MappedPage,
};
pub use types::{
    boolean, float, int, text, timestamp, Cell, ColumnDef, ColumnKind, FeedDescriptor, Row,
    ScopedDelete, SkipFilter, TruncatePolicy,
};
