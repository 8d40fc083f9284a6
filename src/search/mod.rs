//! Filtered search over persisted request logs, independent of aggregation

pub mod engine;
pub mod filters;
pub mod memory;
pub mod page;

pub use engine::{LogSource, SearchContext, SearchQueryEngine};
pub use filters::{DateRange, LogPredicate, SearchFilters, SearchParams};
pub use memory::MemoryLogSource;
pub use page::{LogScan, PageRequest, SearchCursor, SearchPage};
