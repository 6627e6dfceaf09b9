pub mod backoff;
pub mod prefetch;
pub mod retry;
pub mod sync;

pub use backoff::{backoff_delay, with_jitter};
pub use prefetch::{
    CandidateSource, ContentStore, InMemoryContentStore, PrefetchCandidate, PrefetchConfig,
    PrefetchReport, Prefetcher,
};
pub use retry::{AttemptError, RetryOutcome, RetryPolicy, RetryableTask, run_with_retries};
pub use sync::{DEFAULT_SYNC_URL, RuleUpdateService, SyncOutcome, VERSION_FILE_NAME};
