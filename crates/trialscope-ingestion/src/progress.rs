//! Progress events published while a run is in flight.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Source,
    Dedup,
    Classify,
    Rank,
    Done,
}

/// Progress event emitted during a pipeline run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub stage: Stage,
    pub source: Option<SourceId>,
    pub message: String,
    pub records: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Sender half bound to one run. Without a channel every emit is a no-op;
/// a send with no live receivers is ignored.
#[derive(Clone)]
pub struct Progress {
    run_id: Uuid,
    tx: Option<broadcast::Sender<ProgressEvent>>,
    started: Instant,
}

impl Progress {
    pub fn new(run_id: Uuid, tx: Option<broadcast::Sender<ProgressEvent>>) -> Self {
        Self { run_id, tx, started: Instant::now() }
    }

    pub fn disabled() -> Self {
        Self::new(Uuid::nil(), None)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>, records: usize) {
        self.send(stage, None, message.into(), records, None);
    }

    pub fn emit_source(&self, source: SourceId, message: impl Into<String>, records: usize, error: Option<String>) {
        self.send(Stage::Source, Some(source), message.into(), records, error);
    }

    fn send(&self, stage: Stage, source: Option<SourceId>, message: String, records: usize, error: Option<String>) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(ProgressEvent {
                run_id: self.run_id,
                stage,
                source,
                message,
                records,
                elapsed_ms: self.elapsed_ms(),
                error,
            });
        }
    }
}
