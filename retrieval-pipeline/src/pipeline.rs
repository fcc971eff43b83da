use async_openai::{config::OpenAIConfig, Client};
use tracing::{debug, instrument};

use common::{error::AppError, utils::embedding::EmbeddingProvider};
use vector_index::VectorIndex;

use crate::{answer, memory::ChatMemory};

/// The retrieval-and-answer pipeline bound to one index snapshot.
///
/// Holds the loaded index for the life of the session instead of re-fetching
/// it per question; the cache below rebuilds it when an upload produces a
/// new revision.
pub struct SessionPipeline {
    index: VectorIndex,
    top_k: usize,
}

impl SessionPipeline {
    pub fn new(index: VectorIndex, top_k: usize) -> Self {
        Self { index, top_k }
    }

    pub fn revision(&self) -> &str {
        self.index.revision()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    /// Answers `question` from the index: embed, retrieve top-k, call the
    /// model with history + context, append the exchange to `memory`.
    #[instrument(skip_all, fields(top_k = self.top_k))]
    pub async fn ask(
        &self,
        memory: &mut ChatMemory,
        openai_client: &Client<OpenAIConfig>,
        embedder: &EmbeddingProvider,
        model: &str,
        question: &str,
    ) -> Result<String, AppError> {
        self.ask_inner(memory, openai_client, embedder, model, question)
            .await
            .map_err(AppError::query)
    }

    async fn ask_inner(
        &self,
        memory: &mut ChatMemory,
        openai_client: &Client<OpenAIConfig>,
        embedder: &EmbeddingProvider,
        model: &str,
        question: &str,
    ) -> Result<String, AppError> {
        let query_embedding = embedder.embed(question).await?;
        let hits = self.index.top_k(&query_embedding, self.top_k);
        debug!(hits = hits.len(), "Retrieved context chunks");

        let context = answer::chunks_to_chat_context(&hits);
        let user_message =
            answer::create_user_message_with_history(&context, memory.turns(), question);
        let request = answer::create_chat_request(user_message, model)?;

        let response = openai_client.chat().create(request).await?;
        let answer_text = answer::process_llm_response(response)?;

        memory.record_exchange(question, &answer_text);
        Ok(answer_text)
    }
}

/// Holds the active pipeline for the session.
///
/// The pipeline is rebuilt only when the backing index revision changes,
/// so questions never trigger a remote re-download on their own.
#[derive(Default)]
pub struct PipelineCache {
    current: Option<SessionPipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached pipeline when it was built from the same index
    /// revision; otherwise builds a fresh one around `index`.
    pub fn get_or_build(&mut self, index: VectorIndex, top_k: usize) -> &SessionPipeline {
        match self.current.take() {
            Some(existing) if existing.revision() == index.revision() => {
                self.current.insert(existing)
            }
            _ => {
                debug!(revision = index.revision(), "Building session pipeline");
                self.current.insert(SessionPipeline::new(index, top_k))
            }
        }
    }

    pub fn current(&self) -> Option<&SessionPipeline> {
        self.current.as_ref()
    }

    /// Drops the cached pipeline; the next question forces a reload.
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
