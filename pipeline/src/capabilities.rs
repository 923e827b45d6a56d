//! Capability contracts: the external collaborators the stage pipeline
//! invokes but does not implement. The core names the contract only; the
//! object store, PDF renderer, vision LLM, embeddings client, and résumé
//! store are out of scope for this crate.
//!
//! Concrete OpenAI-backed adapters for `Embedder` and `VisionParser` live in
//! [`openai_adapters`] since those two are the ones this crate can ground
//! directly on the `openai-client` library.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;

/// Reads raw bytes for an opaque, pre-resolved file path.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Renders a PDF's pages to images for vision-based parsing.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// An empty result is an error, not an empty vec.
    async fn render_to_images(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Structured field extraction from résumé images via a vision LLM.
#[async_trait]
pub trait VisionParser: Send + Sync {
    async fn parse_image(&self, image: &[u8], mime_type: &str) -> Result<StructuredResume>;

    /// Multi-page documents are parsed together so cross-page context (e.g. a
    /// section split across pages) is preserved.
    async fn parse_multi_page(&self, pages: &[(Vec<u8>, String)]) -> Result<StructuredResume>;
}

/// Detects and normalizes image formats ahead of vision parsing.
pub trait ImageTranscoder: Send + Sync {
    fn detect_format(&self, bytes: &[u8]) -> ImageFormat;
    fn to_jpeg(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Other,
}

/// Batch text-embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returned length must equal `texts.len()`; a mismatch is fatal for the
    /// calling attempt.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Expected dimensionality of each returned vector.
    fn dim(&self) -> usize;
}

/// Durable résumé persistence and the default-résumé invariant.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn create(&self, resume: &NewResume, embeddings: &SectionEmbeddings) -> Result<Uuid>;
    async fn count_by_tenant(&self, tenant_id: Uuid) -> Result<u32>;
    async fn unset_default(&self, tenant_id: Uuid) -> Result<()>;
}

/// The structured fields a vision parser extracts from a résumé.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct StructuredResume {
    pub experience: Option<String>,
    pub education: Option<String>,
    pub skills: Option<String>,
    pub languages: Option<String>,
    pub personal_statement: Option<String>,
}

/// A résumé row ready to persist, derived from a structured parse plus
/// intake metadata.
#[derive(Debug, Clone)]
pub struct NewResume {
    pub tenant_id: Uuid,
    pub title: String,
    pub is_active: bool,
    pub is_default: bool,
    pub structured: StructuredResume,
}

/// The five résumé sections embedded independently, named so they map back
/// onto the section they were generated from (order in, order out).
#[derive(Debug, Clone, Default)]
pub struct SectionEmbeddings {
    pub experience: Option<Vec<f32>>,
    pub education: Option<Vec<f32>>,
    pub skills: Option<Vec<f32>>,
    pub languages: Option<Vec<f32>>,
    pub personal_statement: Option<Vec<f32>>,
}

pub mod openai_adapters {
    //! OpenAI-backed implementations of [`Embedder`] and [`VisionParser`],
    //! built on the pure REST client in the `openai-client` crate.

    use super::*;
    use base64::Engine;
    use openai_client::OpenAIClient;

    pub struct OpenAiEmbedder {
        client: OpenAIClient,
        model: String,
        dim: usize,
    }

    impl OpenAiEmbedder {
        pub fn new(client: OpenAIClient, model: impl Into<String>, dim: usize) -> Self {
            Self {
                client,
                model: model.into(),
                dim,
            }
        }
    }

    #[async_trait]
    impl Embedder for OpenAiEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.client
                .create_embeddings_batch(texts, &self.model)
                .await
                .map_err(|e| crate::error::PipelineError::EmbeddingFailed(e.to_string()))
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }

    pub struct OpenAiVisionParser {
        client: OpenAIClient,
        model: String,
    }

    impl OpenAiVisionParser {
        pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
            Self {
                client,
                model: model.into(),
            }
        }

        const SYSTEM_PROMPT: &'static str =
            "You extract structured resume fields from page images. \
             Return only the fields you can find; leave others absent.";
    }

    #[async_trait]
    impl VisionParser for OpenAiVisionParser {
        async fn parse_image(&self, image: &[u8], mime_type: &str) -> Result<StructuredResume> {
            let encoded = base64::engine::general_purpose::STANDARD.encode(image);
            self.client
                .extract_from_images::<StructuredResume>(
                    &self.model,
                    Self::SYSTEM_PROMPT,
                    "Extract the resume fields from this page.",
                    &[(mime_type.to_string(), encoded)],
                )
                .await
                .map_err(|e| crate::error::PipelineError::ParseFailed(e.to_string()))
        }

        async fn parse_multi_page(
            &self,
            pages: &[(Vec<u8>, String)],
        ) -> Result<StructuredResume> {
            let images: Vec<(String, String)> = pages
                .iter()
                .map(|(bytes, mime_type)| {
                    (
                        mime_type.clone(),
                        base64::engine::general_purpose::STANDARD.encode(bytes),
                    )
                })
                .collect();

            self.client
                .extract_from_images::<StructuredResume>(
                    &self.model,
                    Self::SYSTEM_PROMPT,
                    "Extract the resume fields from these pages, in order.",
                    &images,
                )
                .await
                .map_err(|e| crate::error::PipelineError::ParseFailed(e.to_string()))
        }
    }
}

/// Minimal, genuinely-functional implementations of the capabilities that
/// don't require a dedicated external service: reading from local disk and
/// sniffing/passing through image bytes. A production deployment likely
/// swaps `LocalFileReader` for an object-store-backed one but can use these
/// as-is in development.
pub mod local {
    use super::*;
    use tokio::io::AsyncReadExt;

    pub struct LocalFileReader;

    #[async_trait]
    impl FileReader for LocalFileReader {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| crate::error::PipelineError::FileReadFailed(e.to_string()))?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)
                .await
                .map_err(|e| crate::error::PipelineError::FileReadFailed(e.to_string()))?;
            Ok(bytes)
        }
    }

    pub struct MagicByteTranscoder;

    impl ImageTranscoder for MagicByteTranscoder {
        fn detect_format(&self, bytes: &[u8]) -> ImageFormat {
            match bytes {
                [0xFF, 0xD8, 0xFF, ..] => ImageFormat::Jpeg,
                [0x89, b'P', b'N', b'G', ..] => ImageFormat::Png,
                _ => ImageFormat::Other,
            }
        }

        fn to_jpeg(&self, _bytes: &[u8]) -> Result<Vec<u8>> {
            Err(crate::error::PipelineError::CapabilityNotConfigured(
                "image_transcoder.to_jpeg (no codec wired)".into(),
            ))
        }
    }
}

/// Placeholders for the capabilities this crate genuinely does not
/// implement: the object store, the PDF renderer, and the relational
/// résumé store are named contracts only (see the purpose and scope
/// section). A real deployment replaces these before going live; wiring
/// them here keeps the worker pool's binary entrypoint runnable out of the
/// box against the capabilities this crate *can* ground.
pub mod unconfigured {
    use super::*;

    fn not_configured(capability: &str) -> crate::error::PipelineError {
        crate::error::PipelineError::CapabilityNotConfigured(capability.to_string())
    }

    pub struct UnconfiguredPdfRenderer;

    #[async_trait]
    impl PdfRenderer for UnconfiguredPdfRenderer {
        async fn render_to_images(&self, _bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
            Err(not_configured("pdf_renderer"))
        }
    }

    pub struct UnconfiguredResumeStore;

    #[async_trait]
    impl ResumeStore for UnconfiguredResumeStore {
        async fn create(&self, _resume: &NewResume, _embeddings: &SectionEmbeddings) -> Result<Uuid> {
            Err(not_configured("resume_store"))
        }

        async fn count_by_tenant(&self, _tenant_id: Uuid) -> Result<u32> {
            Err(not_configured("resume_store"))
        }

        async fn unset_default(&self, _tenant_id: Uuid) -> Result<()> {
            Err(not_configured("resume_store"))
        }
    }
}
