//! Job screening pipeline.
//!
//! ```text
//! JobSource ──payload──▶ Screener ──Dispatch──▶ ResultSink
//!     ▲                     │
//!     │                  Verifier
//! Supervisor (reconnect with backoff)
//! ```
//!
//! Safe jobs go to the accepted topic as execution records. Everything else,
//! including jobs with no code, goes to the rejected topic with its reason.

mod job;
mod screener;
mod supervisor;
mod worker;

pub use job::{
    Dispatch, ExecutionRecord, Job, Record, RejectionRecord, DEFAULT_LANGUAGE, STATUS_SAFE,
    STATUS_UNSAFE,
};
pub use screener::Screener;
pub use supervisor::{Backoff, ConnectionState, Connector, Supervisor};
pub use worker::{
    JobSource, JsonLinesSink, LineSource, LinesConnector, ResultSink, Worker, WorkerStats,
};
