//! PodDigest production pipeline.
//!
//! Owns the six stage implementations (components D-I) and the orchestrator
//! (component J) that drives a digest through them. Each stage is a
//! [`worker::JobHandler`] bound to its own named queue; `poddigestd` spawns
//! one [`worker::Worker`] pool per stage and a cron loop that calls into
//! [`orchestrator`] to trigger and advance digests.

pub mod analyzer;
pub mod assembler;
pub mod deliverer;
pub mod ingestor;
pub mod narrator;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod stage_handlers;
pub mod transcriber;
pub mod worker;

pub use analyzer::Analyzer;
pub use assembler::Assembler;
pub use deliverer::Deliverer;
pub use ingestor::FeedIngestor;
pub use narrator::Narrator;
pub use orchestrator::{
    next_queue_after, status_for_queue, Orchestrator, QUEUE_ANALYZE, QUEUE_ASSEMBLE, QUEUE_DELIVER,
    QUEUE_INGEST, QUEUE_NARRATE, QUEUE_TRANSCRIBE,
};
pub use providers::{HttpCandidateScorer, HttpNotifier, HttpScriptGenerator, HttpSpeechSynthesizer};
pub use retry::{retry_with_backoff, Transient};
pub use stage_handlers::{
    AnalyzeHandler, AssembleHandler, DeliverHandler, IngestHandler, NarrateHandler, TranscribeHandler,
};
pub use transcriber::{HttpTranscriptionProvider, Transcriber};
pub use worker::{JobHandler, Worker};
