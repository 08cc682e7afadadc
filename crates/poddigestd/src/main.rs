//! PodDigest pipeline daemon.
//!
//! Connects once to the repository, object store, and queue broker, then
//! spawns one worker pool per pipeline stage plus the hourly cron loop
//! that drives the orchestrator's scheduling tick. A single `main`
//! constructs shared clients once and hands clones to independent
//! long-running tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use poddigest_domain::METRICS;
use poddigest_pipeline::{
    AnalyzeHandler, AssembleHandler, Analyzer, Assembler, DeliverHandler, Deliverer, FeedIngestor,
    HttpCandidateScorer, HttpNotifier, HttpScriptGenerator, HttpSpeechSynthesizer, HttpTranscriptionProvider,
    IngestHandler, NarrateHandler, Narrator, Orchestrator, TranscribeHandler, Transcriber, Worker,
    QUEUE_ANALYZE, QUEUE_ASSEMBLE, QUEUE_DELIVER, QUEUE_INGEST, QUEUE_NARRATE, QUEUE_TRANSCRIBE,
};
use poddigest_state::{FsObjectStore, SurrealHandle, SurrealQueue, SurrealRepository};
use tracing::{info, warn, Level};

/// Process configuration, read from the environment at startup.
struct Settings {
    object_store_root: String,
    public_cdn_base_url: String,
    llm_scorer_endpoint: String,
    llm_script_endpoint: String,
    tts_endpoint: String,
    transcription_endpoint: String,
    push_endpoint: String,
    email_endpoint: String,
    provider_api_key: String,
    workers_per_stage: usize,
    cron_interval_secs: u64,
    json_logs: bool,
}

impl Settings {
    fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
        Self {
            object_store_root: var("PODDIGEST_OBJECT_STORE_ROOT", "./data/objects"),
            public_cdn_base_url: var("PODDIGEST_CDN_BASE_URL", "https://cdn.poddigest.dev"),
            llm_scorer_endpoint: var("PODDIGEST_LLM_SCORER_URL", "https://llm.internal/score"),
            llm_script_endpoint: var("PODDIGEST_LLM_SCRIPT_URL", "https://llm.internal/narration"),
            tts_endpoint: var("PODDIGEST_TTS_URL", "https://tts.internal/synthesize"),
            transcription_endpoint: var("PODDIGEST_TRANSCRIBE_URL", "https://stt.internal/transcribe"),
            push_endpoint: var("PODDIGEST_PUSH_URL", "https://notify.internal/push"),
            email_endpoint: var("PODDIGEST_EMAIL_URL", "https://notify.internal/email"),
            provider_api_key: var("PODDIGEST_PROVIDER_API_KEY", "dev-key"),
            workers_per_stage: var("PODDIGEST_WORKERS_PER_STAGE", "2").parse().unwrap_or(2),
            cron_interval_secs: var("PODDIGEST_CRON_INTERVAL_SECS", "3600").parse().unwrap_or(3600),
            json_logs: var("PODDIGEST_JSON_LOGS", "false") == "true",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    poddigest_domain::init_tracing(settings.json_logs, Level::INFO);
    info!("poddigestd starting");

    let db = SurrealHandle::setup_db().await.context("failed to connect to SurrealDB")?;
    let repo = Arc::new(SurrealRepository::new(db.clone()));
    let queue = Arc::new(SurrealQueue::new(db));
    let object_store = Arc::new(
        FsObjectStore::new(&settings.object_store_root, &settings.public_cdn_base_url)
            .context("failed to initialize object store")?,
    );
    let http = reqwest::Client::new();

    let orchestrator = Arc::new(Orchestrator::new(repo.clone(), queue.clone()));

    let ingestor = Arc::new(FeedIngestor::new(repo.clone(), http.clone()));
    let transcription_provider = Arc::new(HttpTranscriptionProvider::new(
        http.clone(),
        settings.transcription_endpoint.clone(),
        settings.provider_api_key.clone(),
    ));
    let transcriber = Arc::new(Transcriber::new(repo.clone(), transcription_provider));
    let scorer = Arc::new(HttpCandidateScorer::new(
        http.clone(),
        settings.llm_scorer_endpoint.clone(),
        settings.provider_api_key.clone(),
    ));
    let analyzer = Arc::new(Analyzer::new(repo.clone(), scorer));
    let script_generator = Arc::new(HttpScriptGenerator::new(
        http.clone(),
        settings.llm_script_endpoint.clone(),
        settings.provider_api_key.clone(),
    ));
    let speech_synthesizer = Arc::new(HttpSpeechSynthesizer::new(
        http.clone(),
        settings.tts_endpoint.clone(),
        settings.provider_api_key.clone(),
    ));
    let narrator = Arc::new(Narrator::new(object_store.clone(), script_generator, speech_synthesizer));
    let assembler = Arc::new(Assembler::new(http.clone(), object_store.clone()));
    let notifier = Arc::new(HttpNotifier::new(
        http.clone(),
        settings.push_endpoint.clone(),
        settings.email_endpoint.clone(),
        settings.provider_api_key.clone(),
    ));
    let deliverer = Arc::new(Deliverer::new(
        repo.clone(),
        object_store.clone(),
        notifier,
        "PodDigest Weekly".to_string(),
    ));

    let mut handles = Vec::new();

    let ingest_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(IngestHandler {
            orchestrator: orchestrator.clone(),
            repo: repo.clone(),
            ingestor,
        }),
        QUEUE_INGEST,
    ));
    handles.extend(ingest_worker.spawn_pool(settings.workers_per_stage));

    let transcribe_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(TranscribeHandler {
            orchestrator: orchestrator.clone(),
            transcriber,
        }),
        QUEUE_TRANSCRIBE,
    ));
    handles.extend(transcribe_worker.spawn_pool(settings.workers_per_stage));

    let analyze_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(AnalyzeHandler {
            orchestrator: orchestrator.clone(),
            repo: repo.clone(),
            analyzer,
        }),
        QUEUE_ANALYZE,
    ));
    handles.extend(analyze_worker.spawn_pool(settings.workers_per_stage));

    let narrate_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(NarrateHandler {
            orchestrator: orchestrator.clone(),
            repo: repo.clone(),
            narrator,
        }),
        QUEUE_NARRATE,
    ));
    handles.extend(narrate_worker.spawn_pool(settings.workers_per_stage));

    let assemble_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(AssembleHandler {
            orchestrator: orchestrator.clone(),
            repo: repo.clone(),
            assembler,
        }),
        QUEUE_ASSEMBLE,
    ));
    handles.extend(assemble_worker.spawn_pool(settings.workers_per_stage));

    let deliver_worker = Arc::new(Worker::new(
        queue.clone(),
        Arc::new(DeliverHandler {
            orchestrator: orchestrator.clone(),
            repo: repo.clone(),
            deliverer,
        }),
        QUEUE_DELIVER,
    ));
    handles.extend(deliver_worker.spawn_pool(settings.workers_per_stage));

    info!(
        workers_per_stage = settings.workers_per_stage,
        cron_interval_secs = settings.cron_interval_secs,
        "all stage worker pools started"
    );

    let cron_orchestrator = orchestrator.clone();
    let cron_interval = Duration::from_secs(settings.cron_interval_secs);
    handles.push(tokio::spawn(async move {
        loop {
            tokio::time::sleep(cron_interval).await;
            match cron_orchestrator.run_cron_tick(chrono::Utc::now()).await {
                Ok(triggered) => {
                    if !triggered.is_empty() {
                        info!(count = triggered.len(), "cron tick triggered digests");
                    }
                }
                Err(e) => warn!(error = %e, "cron tick failed"),
            }
            METRICS.flush();
        }
    }));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("poddigestd shutting down");
    Ok(())
}
