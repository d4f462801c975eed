use std::fs;
use std::path::Path;
use std::sync::Arc;

use pill_core::config::PillPalConfig;
use pill_core::domain::Notification;
use pill_core::error::AppError;
use pill_core::history::{HistoryEntry, SqliteHistory};
use pill_core::notify::{reminder_from_config, NotificationDispatcher, NtfyNotifier};
use pill_rag::embeddings::gemini_embed::GeminiEmbedder;
use pill_rag::embeddings::Embedder;
use pill_rag::gemini::GeminiClient;
use pill_rag::index::{IndexStatus, VectorIndex};
use pill_rag::intake::{mime_for_path, IntakeResponse, IntakeService, PrescriptionExtractor};
use pill_rag::llm::gemini_llm::GeminiLlm;
use pill_rag::llm::{Generator, InlineImage};
use pill_rag::loader::{CorpusLoader, LoadSummary};
use pill_rag::query::{LookupOutcome, QueryService};
use pill_rag::retry::{RetryPolicy, RetryingEmbedder, RetryingGenerator};
use serde::Serialize;

pub mod cli;
pub mod logging;

use cli::Command;

#[derive(Debug, Serialize)]
pub struct ReminderQueued {
    pub queued: bool,
    pub topic: String,
    pub title: String,
}

/// JSON document printed for a command; `ok` is false when the command ran but reports a failure.
#[derive(Debug)]
pub struct CommandOutput {
    pub json: serde_json::Value,
    pub ok: bool,
}

impl CommandOutput {
    fn encode<T: Serialize>(value: &T, ok: bool) -> Result<Self, AppError> {
        let json = serde_json::to_value(value).map_err(|e| {
            AppError::new("OUTPUT_ENCODE_FAILED", "Failed to encode command output")
                .with_details(e.to_string())
        })?;
        Ok(Self { json, ok })
    }
}

pub fn execute(cfg: &PillPalConfig, command: Command) -> Result<CommandOutput, AppError> {
    match command {
        Command::Index { corpus, append } => {
            CommandOutput::encode(&index_corpus(cfg, &corpus, append)?, true)
        }
        Command::Lookup { name } => {
            let outcome = lookup(cfg, &name)?;
            let ok = outcome.is_completed();
            CommandOutput::encode(&outcome, ok)
        }
        Command::Process { image, mime } => {
            CommandOutput::encode(&process_image(cfg, &image, mime.as_deref())?, true)
        }
        Command::Notify { title, body } => CommandOutput::encode(&send_reminder(cfg, title, body)?, true),
        Command::Status => CommandOutput::encode(&index_status(cfg)?, true),
        Command::History { limit } => CommandOutput::encode(&recent_history(cfg, limit)?, true),
    }
}

fn open_index(cfg: &PillPalConfig) -> Result<Arc<VectorIndex>, AppError> {
    Ok(Arc::new(VectorIndex::open(&cfg.index.root, &cfg.index.collection)?))
}

fn open_history(cfg: &PillPalConfig) -> Result<Arc<SqliteHistory>, AppError> {
    Ok(Arc::new(SqliteHistory::open(&cfg.history.db_path)?))
}

fn embedder(cfg: &PillPalConfig, client: &GeminiClient) -> Arc<dyn Embedder> {
    let inner: Arc<dyn Embedder> = Arc::new(GeminiEmbedder::from_config(client.clone(), &cfg.gemini));
    Arc::new(RetryingEmbedder::new(inner, RetryPolicy::from_config(&cfg.retry)))
}

fn generator(cfg: &PillPalConfig, client: &GeminiClient) -> Arc<dyn Generator> {
    let inner: Arc<dyn Generator> = Arc::new(GeminiLlm::from_config(client.clone(), &cfg.gemini));
    Arc::new(RetryingGenerator::new(inner, RetryPolicy::from_config(&cfg.retry)))
}

fn query_service(cfg: &PillPalConfig, client: &GeminiClient) -> Result<QueryService, AppError> {
    Ok(QueryService::new(
        embedder(cfg, client),
        open_index(cfg)?,
        generator(cfg, client),
        cfg.retrieval.top_k,
    )
    .with_history(open_history(cfg)?))
}

/// Re-index the collection from `corpus`; `append` upserts into it instead.
pub fn index_corpus(cfg: &PillPalConfig, corpus: &Path, append: bool) -> Result<LoadSummary, AppError> {
    let client = GeminiClient::from_config(&cfg.gemini)?;
    let loader = CorpusLoader::new(embedder(cfg, &client), open_index(cfg)?);
    loader.load_file(corpus, cfg.chunking.chunk_size, cfg.chunking.overlap, !append)
}

pub fn lookup(cfg: &PillPalConfig, name: &str) -> Result<LookupOutcome, AppError> {
    let client = GeminiClient::from_config(&cfg.gemini)?;
    Ok(query_service(cfg, &client)?.answer_outcome(name))
}

pub fn process_image(cfg: &PillPalConfig, image: &Path, mime: Option<&str>) -> Result<IntakeResponse, AppError> {
    let mime_type = match mime {
        Some(m) => m.trim().to_ascii_lowercase(),
        None => mime_for_path(image)
            .ok_or_else(|| {
                AppError::new("INTAKE_IMAGE_INVALID", "Cannot infer image type; pass --mime")
                    .with_details(format!("path={}", image.display()))
            })?
            .to_string(),
    };
    let data = fs::read(image).map_err(|e| {
        AppError::new("INTAKE_IMAGE_MISSING", "Failed to read prescription image")
            .with_details(format!("path={}; err={}", image.display(), e))
    })?;

    let client = GeminiClient::from_config(&cfg.gemini)?;
    let intake = IntakeService::new(
        PrescriptionExtractor::new(generator(cfg, &client)),
        Arc::new(query_service(cfg, &client)?),
    );
    intake.process(&InlineImage { mime_type, data })
}

pub fn send_reminder(
    cfg: &PillPalConfig,
    title: Option<String>,
    body: Option<String>,
) -> Result<ReminderQueued, AppError> {
    let notifier = NtfyNotifier::from_config(&cfg.notify)?;
    let topic = notifier.topic().to_string();
    let defaults = reminder_from_config(&cfg.notify);
    let notification = Notification {
        title: title.unwrap_or(defaults.title),
        body: body.unwrap_or(defaults.body),
        ..defaults
    };
    let title = notification.title.clone();

    let dispatcher = NotificationDispatcher::spawn(Arc::new(notifier))?;
    let queued = dispatcher.dispatch(notification);
    // Waits for the queued reminder to be attempted before the process exits.
    dispatcher.shutdown();
    Ok(ReminderQueued {
        queued,
        topic,
        title,
    })
}

pub fn index_status(cfg: &PillPalConfig) -> Result<IndexStatus, AppError> {
    Ok(open_index(cfg)?.status())
}

pub fn recent_history(cfg: &PillPalConfig, limit: u32) -> Result<Vec<HistoryEntry>, AppError> {
    open_history(cfg)?.list_recent(limit)
}
