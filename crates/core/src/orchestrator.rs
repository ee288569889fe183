use crate::context::{build_context_prompt, format_citations, optimize_chunks, ContextConfig, ContextPrompt};
use crate::models::RetrievedChunk;
use crate::query::{preprocess_query, tune_retrieval_params, RetrievalParams, UserContext};
use crate::rerank::Reranker;
use crate::retrieval::Retriever;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct PreparedContext {
    pub processed_query: String,
    pub params: RetrievalParams,
    pub chunks: Vec<RetrievedChunk>,
    pub prompt: ContextPrompt,
    pub citations: String,
}

pub struct RagPipeline {
    retriever: Retriever,
    reranker: Reranker,
    context: ContextConfig,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, reranker: Reranker, context: ContextConfig) -> Self {
        Self {
            retriever,
            reranker,
            context,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn retrieve_relevant_chunks(
        &self,
        query: &str,
        collection: &str,
        max_chunks: usize,
        similarity_threshold: f64,
    ) -> Vec<RetrievedChunk> {
        let candidates = self
            .retriever
            .retrieve(query, collection, max_chunks, similarity_threshold)
            .await;
        self.reranker.rerank(query, candidates, max_chunks)
    }

    pub async fn prepare_context(&self, query: &str, user: Option<&UserContext>) -> PreparedContext {
        let started = Instant::now();
        let processed_query = preprocess_query(query);

        let config = self.retriever.config();
        let defaults = RetrievalParams {
            max_chunks: config.max_chunks,
            similarity_threshold: config.similarity_threshold,
        };
        let params = tune_retrieval_params(query, defaults, user);

        let chunks = self
            .retrieve_relevant_chunks(
                &processed_query,
                &config.collection,
                params.max_chunks,
                params.similarity_threshold,
            )
            .await;
        let chunks = optimize_chunks(chunks, &self.context);

        let prompt = build_context_prompt(query, &chunks);
        let citations = format_citations(&prompt.sources);

        info!(
            collection = %config.collection,
            chunk_count = chunks.len(),
            sources = prompt.sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prepared context"
        );

        PreparedContext {
            processed_query,
            params,
            chunks,
            prompt,
            citations,
        }
    }
}
