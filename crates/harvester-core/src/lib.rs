//! Harvester Core - building blocks for multi-stage registry harvesting
//!
//! Pagination with forward-progress checks, per-class rate limiting and
//! retry, a bounded failure-isolating stage executor, identity maps shared
//! across stages, and the buffer/flush protocol for one consolidated export
//! per run.

pub mod buffer;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod payload;
pub mod progress;
pub mod rate_limit;
pub mod resolver;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod work_queue;

// Re-exports for convenience
pub use buffer::{BufferKey, ResultBuffer};
pub use cursor::{Cursor, Position};
pub use error::{ExportError, ExtractionError, FetchError, TaskError};
pub use executor::{StageExecutor, StageTally, TaskFailure, TaskResult, panic_message};
pub use export::{EntryStatus, ExportFinalizer, ExportManifest, ManifestEntry};
pub use fetch::{PageControl, PaginatedFetcher, PaginationEnd, PaginationOutcome};
pub use logging::{IndicatifLogger, init_logging};
pub use payload::{Payload, Shape};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use rate_limit::{RateLimiter, RateLimiters};
pub use resolver::IdentityResolver;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use shutdown::{StopReason, StopSignal};
pub use sink::{LocalSink, StorageSink};
pub use source::{
    Combination, DetailEndpoint, DetailRequest, IdExtractor, ItemKey, ListEndpoint, Page,
    Period, PrimaryValue, ReferenceList, ReferenceSource, ResolvedId, SourceRef,
};
