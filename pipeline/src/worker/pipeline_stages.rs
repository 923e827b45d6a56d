//! The four-stage pipeline a worker runs for one job attempt: uploading →
//! parsing → embedding → saving. Each stage reports progress before it
//! starts and tags its own failures distinctly.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::{
    Embedder, FileReader, ImageFormat, ImageTranscoder, NewResume, PdfRenderer, ResumeStore,
    SectionEmbeddings, StructuredResume, VisionParser,
};
use crate::error::{PipelineError, Result};
use crate::model::{ErrorDetails, ErrorValue, FileType, Job, Step};
use crate::store::JobStore;

/// Races a capability call against `shutdown`, so a worker mid-stage when
/// shutdown fires observes cancellation at this I/O suspension point instead
/// of running the call to completion.
async fn cancellable<T>(shutdown: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = shutdown.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

/// The capability bundle a worker needs to run the stage pipeline. Each
/// field is an injected interface per the external interfaces contract —
/// none of these are implemented by this crate beyond the OpenAI adapters.
pub struct Capabilities {
    pub file_reader: Arc<dyn FileReader>,
    pub pdf_renderer: Arc<dyn PdfRenderer>,
    pub vision_parser: Arc<dyn VisionParser>,
    pub image_transcoder: Arc<dyn ImageTranscoder>,
    pub embedder: Arc<dyn Embedder>,
    pub resume_store: Arc<dyn ResumeStore>,
}

/// Runs all four stages for one attempt, updating `current_step` and
/// `progress_percentage` on the store before each stage starts. Returns the
/// id of the persisted résumé on success.
pub async fn run<S: JobStore>(
    store: &S,
    job: &Job,
    caps: &Capabilities,
    shutdown: &CancellationToken,
) -> Result<Uuid> {
    store.update_progress(job.id, Step::Uploading, 0).await?;
    let bytes = cancellable(shutdown, caps.file_reader.read(&job.file_path)).await?;
    store.update_progress(job.id, Step::Uploading, 25).await?;

    let structured = parse(job.file_type, &bytes, caps, shutdown).await?;
    store.update_progress(job.id, Step::Parsing, 50).await?;

    let embeddings = embed(&structured, caps, shutdown).await?;
    store.update_progress(job.id, Step::Embedding, 75).await?;

    let resume_id = save(job, structured, embeddings, caps, shutdown).await?;
    store.update_progress(job.id, Step::Saving, 100).await?;

    Ok(resume_id)
}

async fn parse(
    file_type: FileType,
    bytes: &[u8],
    caps: &Capabilities,
    shutdown: &CancellationToken,
) -> Result<StructuredResume> {
    match file_type {
        FileType::Pdf => {
            let pages = cancellable(shutdown, caps.pdf_renderer.render_to_images(bytes)).await?;
            if pages.is_empty() {
                return Err(PipelineError::ParseFailed(
                    "pdf rendered zero pages".into(),
                ));
            }
            let pages_with_mime: Vec<(Vec<u8>, String)> = pages
                .into_iter()
                .map(|bytes| (bytes, "image/jpeg".to_string()))
                .collect();
            cancellable(
                shutdown,
                caps.vision_parser.parse_multi_page(&pages_with_mime),
            )
            .await
        }
        FileType::Jpg | FileType::Jpeg | FileType::Png => {
            let (normalized, mime_type) = match caps.image_transcoder.detect_format(bytes) {
                ImageFormat::Jpeg => (bytes.to_vec(), "image/jpeg"),
                ImageFormat::Png => (bytes.to_vec(), "image/png"),
                ImageFormat::Other => (caps.image_transcoder.to_jpeg(bytes)?, "image/jpeg"),
            };
            cancellable(shutdown, caps.vision_parser.parse_image(&normalized, mime_type)).await
        }
    }
}

async fn embed(
    structured: &StructuredResume,
    caps: &Capabilities,
    shutdown: &CancellationToken,
) -> Result<SectionEmbeddings> {
    let sections: Vec<(&str, &Option<String>)> = vec![
        ("experience", &structured.experience),
        ("education", &structured.education),
        ("skills", &structured.skills),
        ("languages", &structured.languages),
        ("personal_statement", &structured.personal_statement),
    ];

    let present: Vec<(&str, &str)> = sections
        .iter()
        .filter_map(|(name, text)| {
            text.as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(|t| (*name, t))
        })
        .collect();

    if present.is_empty() {
        return Ok(SectionEmbeddings::default());
    }

    let texts: Vec<&str> = present.iter().map(|(_, t)| *t).collect();
    let vectors = cancellable(shutdown, caps.embedder.embed_batch(&texts)).await?;

    if vectors.len() != texts.len() {
        return Err(PipelineError::EmbeddingFailed(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        )));
    }

    let mut out = SectionEmbeddings::default();
    for ((name, _), vector) in present.into_iter().zip(vectors.into_iter()) {
        match name {
            "experience" => out.experience = Some(vector),
            "education" => out.education = Some(vector),
            "skills" => out.skills = Some(vector),
            "languages" => out.languages = Some(vector),
            "personal_statement" => out.personal_statement = Some(vector),
            _ => unreachable!(),
        }
    }
    Ok(out)
}

async fn save(
    job: &Job,
    structured: StructuredResume,
    embeddings: SectionEmbeddings,
    caps: &Capabilities,
    shutdown: &CancellationToken,
) -> Result<Uuid> {
    if job.request_payload.is_default {
        cancellable(shutdown, caps.resume_store.unset_default(job.tenant_id)).await?;
    }

    let resume = NewResume {
        tenant_id: job.tenant_id,
        title: job.title.clone(),
        is_active: job.request_payload.is_active,
        is_default: job.request_payload.is_default,
        structured,
    };

    cancellable(shutdown, caps.resume_store.create(&resume, &embeddings)).await
}

/// Maps an error surfaced from the stage pipeline to the stage tag named in
/// the worker pool's stage table (`file_read_failed`, `parsing_failed`,
/// `embedding_generation_failed`, `save_failed`), used as the job row's
/// `error_message` on failure.
pub fn stage_tag(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::FileReadFailed(_) | PipelineError::FileNotFound(_) => "file_read_failed",
        PipelineError::ParseFailed(_) => "parsing_failed",
        PipelineError::InvalidFileType(_) => "invalid_file_type",
        PipelineError::EmbeddingFailed(_) => "embedding_generation_failed",
        PipelineError::SaveFailed(_) => "save_failed",
        PipelineError::Cancelled => "cancelled",
        _ => "job_update_failed",
    }
}

/// Builds the `error_details` bag the worker pool attaches to a failed
/// attempt: the stage tag and the underlying cause.
pub fn error_details(stage_tag: &str, cause: &PipelineError) -> ErrorDetails {
    let mut details = ErrorDetails::new();
    details.insert("stage".into(), ErrorValue::Str(stage_tag.to_string()));
    details.insert("cause".into(), ErrorValue::Str(cause.to_string()));
    details.insert("code".into(), ErrorValue::Str(cause.code().to_string()));
    details
}
