//! Aggregation of request logs into sealed insight windows
//!
//! ```text
//! LogIngester::ingest ─► AggregateStore::add ─► Accumulator (per request id)
//!                                │
//!                 threshold / interval / manual seal
//!                                ▼
//!                   ScoreCalculator ─► SealedWindow ─► PersistenceWriter
//! ```

pub mod accumulator;
pub mod headers;
pub mod ingest;
pub mod recent;
pub mod score;
pub mod sealer;
pub mod store;

pub use accumulator::{Accumulator, AccumulatorSettings, InsightDraft};
pub use headers::HeaderFrequencyTracker;
pub use ingest::{validate, IngestOutcome, LogIngester, SealTrigger};
pub use recent::RecentOutputsBuffer;
pub use score::ScoreCalculator;
pub use sealer::spawn_sealer;
pub use store::AggregateStore;
