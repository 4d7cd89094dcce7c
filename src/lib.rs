//! Parallel, snapshot-consistent bulk data migration with logical
//! replication tailing. See `config::RunConfig` for the knobs and
//! `orchestrator::run` for the entry point.

pub mod applier;
pub mod config;
pub mod decode;
pub mod decoder_thread;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod replication;
pub mod snapshot;
pub mod status;
pub mod table;
pub mod task_queue;
pub mod typemap;
pub mod version;
pub mod wire;
pub mod worker;

pub use config::{ConnectionDescriptor, RunConfig, SourceKind};
pub use error::{Result, SyncError};
pub use orchestrator::run;
pub use status::{Report, StatusEvent, StatusSink, TracingSink};
pub use table::Relation;
