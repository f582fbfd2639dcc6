//! Aggregation and filtering: selection plus filters in, ordered items and
//! counts out.

mod cache;
mod pipeline;
mod query;

pub use cache::{AggregateCache, Invalidation, DEFAULT_CACHE_CAPACITY};
pub use pipeline::{
    aggregate, apply_since, apply_text, apply_unread, base_set, category_counts, category_rows,
    Aggregate, CategoryCounts, CategoryRow,
};
pub use query::{FilterSpec, Selection};
