pub mod batch;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extract;
pub mod llm;
pub mod record;
pub mod store;
pub mod validate;

pub use batch::{BatchCoordinator, BatchStatus, PlannedDocument, RunPlan};
pub use config::{EngineConfig, ExtractorMode};
pub use db::Database;
pub use engine::{
    DocumentPhase, DocumentProgressEvent, PipelineEngine, StageResult, StatsSnapshot,
};
pub use error::{
    ConfigError, DeedflowError, EngineError, ErrorKind, ExtractError, Result, StorageError,
};
pub use extract::{ExtractedText, TextExtractor};
pub use llm::{LlmError, LlmExtractor, StructuredExtractor};
pub use record::{DeedRecord, Party};
pub use store::{FileStore, RouteOutcome};
