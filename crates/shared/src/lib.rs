// Public modules
pub mod config;
pub mod error;
pub mod espn;
pub mod extractor;
pub mod facebook;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod schedule;
pub mod status;
pub mod stylist;
pub mod traits;
pub mod trigger;

// Re-export commonly used types
pub use config::Config;
pub use error::{AlreadyRunning, FetchError, LedgerWriteError, PublishError, TransformError};
pub use espn::EspnClient;
pub use extractor::ContentExtractor;
pub use facebook::FacebookPublisher;
pub use ledger::{open_store, DedupLedger, FileLedgerStore, LedgerStore, SqliteLedgerStore};
pub use models::{
    Article, ArticleOutcome, OutcomeStatus, PipelineRun, RunOutcome, SkipReason, StyledContent,
    Trigger,
};
pub use pipeline::{Pipeline, PipelineConfig};
pub use schedule::{run_scheduler, Schedule};
pub use status::{LiveStatus, LogLevel, LogLine};
pub use stylist::OpenRouterStylist;
pub use traits::{BodyExtractor, Fetcher, Publisher, Transformer};
pub use trigger::{Controller, RunSlot};
