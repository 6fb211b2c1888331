//! Retrieval-augmented generation.
//!
//! Query → embedding → top-k chunks from the shared index → prompt →
//! generator. Classification additionally runs the generated text through
//! the structured output parser.

use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::embedding::embed_query;
use crate::error::AppError;
use crate::generation::FragmentStream;
use crate::models::{Chunk, RiskAssessment};
use crate::parse::parse_risk_assessment;
use crate::prompts::{format_context, render_qa, render_risk};

/// Response body of `POST /`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// Source paths of the retrieved chunks, deduplicated, in retrieval order.
    pub context: Vec<String>,
}

/// Top-k chunks for `text`, most similar first. Query vectors bypass the
/// embedding cache, which only holds chunk texts.
pub async fn retrieve(ctx: &AppContext, text: &str) -> Result<Vec<Chunk>, AppError> {
    let query = embed_query(ctx.cache.provider().as_ref(), text).await?;
    let hits = ctx.index.search(&query, ctx.config.retrieval.k);
    tracing::debug!(hits = hits.len(), "retrieved context");
    Ok(hits.into_iter().map(|h| h.chunk).collect())
}

pub async fn answer(ctx: &AppContext, query: &str) -> Result<Answer, AppError> {
    let query = non_empty(query, "query")?;
    let chunks = retrieve(ctx, query).await?;
    let prompt = render_qa(&format_context(&chunks), query);

    let answer = ctx.generator.generate(&prompt).await?;
    Ok(Answer {
        answer: answer.trim().to_string(),
        context: sources(&chunks),
    })
}

/// Like [`answer`], but yields the generated text fragment by fragment.
pub async fn answer_stream(ctx: &AppContext, query: &str) -> Result<FragmentStream, AppError> {
    let query = non_empty(query, "query")?;
    let chunks = retrieve(ctx, query).await?;
    let prompt = render_qa(&format_context(&chunks), query);
    Ok(ctx.generator.generate_stream(&prompt).await?)
}

/// Classify a project description against the EU AI Act risk levels.
pub async fn classify(ctx: &AppContext, description: &str) -> Result<RiskAssessment, AppError> {
    let description = non_empty(description, "description")?;
    let chunks = retrieve(ctx, description).await?;
    let prompt = render_risk(&format_context(&chunks), description);

    let raw = ctx.generator.generate(&prompt).await?;
    match parse_risk_assessment(&raw) {
        Ok(assessment) => {
            tracing::info!(risk = %assessment.risk, "project classified");
            Ok(assessment)
        }
        Err(e) => {
            tracing::warn!(error = %e, output = %raw, "unparseable classification");
            Err(e.into())
        }
    }
}

fn non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("Missing required field: {}", field)));
    }
    Ok(trimmed)
}

fn sources(chunks: &[Chunk]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for chunk in chunks {
        if !out.contains(&chunk.source) {
            out.push(chunk.source.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::generation::{GenerationError, Generator};
    use crate::index::VectorIndex;
    use crate::models::RiskLevel;
    use crate::{db, migrate};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Embeds text as counts of the letters 'a' and 'b'.
    struct LetterProvider;

    #[async_trait]
    impl EmbeddingProvider for LetterProvider {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let a = t.matches('a').count() as f32;
                    let b = t.matches('b').count() as f32;
                    vec![a, b]
                })
                .collect())
        }
    }

    /// Returns a canned reply and records the prompts it was given.
    struct ScriptedGenerator {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
        async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let (tx, rx) = mpsc::channel(8);
            for word in self.reply.split_inclusive(' ') {
                tx.send(Ok(word.to_string())).await.unwrap();
            }
            Ok(rx)
        }
    }

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            source: source.into(),
            page: 1,
            chunk_index: 0,
            start: 0,
            text: text.into(),
            hash: crate::chunk::content_hash(text),
        }
    }

    async fn context(generator: Arc<dyn Generator>) -> (TempDir, AppContext) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.url = format!("sqlite://{}", tmp.path().join("r.sqlite").display());
        config.embedding.cache_dir = tmp.path().join("cache");
        config.retrieval.k = 2;

        let pool = db::connect(&config.db).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let ctx = AppContext::new(config, pool, Arc::new(LetterProvider), generator).unwrap();

        let mut index = VectorIndex::new();
        index.add(chunk("act.pdf", "aaaa"), vec![4.0, 0.0]);
        index.add(chunk("act.pdf", "aaab"), vec![3.0, 1.0]);
        index.add(chunk("annex.pdf", "bbbb"), vec![0.0, 4.0]);
        ctx.index.replace(index);
        (tmp, ctx)
    }

    #[tokio::test]
    async fn test_answer_uses_top_k_context() {
        let generator = ScriptedGenerator::new("  It is prohibited. ");
        let (_tmp, ctx) = context(generator.clone()).await;

        let answer = answer(&ctx, "aa?").await.unwrap();
        assert_eq!(answer.answer, "It is prohibited.");
        assert_eq!(answer.context, vec!["act.pdf".to_string()]);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("aaaa\n\naaab"));
        assert!(!prompts[0].contains("bbbb"));
        assert!(prompts[0].contains("Question: aa?"));
    }

    #[tokio::test]
    async fn test_queries_are_not_written_to_the_cache() {
        let generator = ScriptedGenerator::new("risk: Minimal\nreason: Spam filter.");
        let (_tmp, ctx) = context(generator).await;
        for i in 0..5 {
            answer(&ctx, &format!("question {} about a", i)).await.unwrap();
        }
        classify(&ctx, "b spam filter").await.unwrap();

        assert!(!ctx.cache.dir().exists());
        assert_eq!(ctx.cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let (_tmp, ctx) = context(ScriptedGenerator::new("x")).await;
        assert!(matches!(
            answer(&ctx, "   ").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_parses_reply() {
        let generator = ScriptedGenerator::new("risk: High\nreason: Biometric identification.");
        let (_tmp, ctx) = context(generator).await;

        let assessment = classify(&ctx, "bb face matching").await.unwrap();
        assert_eq!(assessment.risk, RiskLevel::High);
        assert_eq!(assessment.reason, "Biometric identification.");
    }

    #[tokio::test]
    async fn test_classify_surfaces_parse_failure() {
        let (_tmp, ctx) = context(ScriptedGenerator::new("I cannot say.")).await;
        assert!(matches!(
            classify(&ctx, "something").await,
            Err(AppError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let (_tmp, ctx) = context(ScriptedGenerator::new("one two three")).await;
        let mut rx = answer_stream(&ctx, "b").await.unwrap();
        let mut text = String::new();
        while let Some(fragment) = rx.recv().await {
            text.push_str(&fragment.unwrap());
        }
        assert_eq!(text, "one two three");
    }

    #[test]
    fn test_sources_are_deduplicated_in_order() {
        let chunks = [chunk("b.pdf", "1"), chunk("a.pdf", "2"), chunk("b.pdf", "3")];
        assert_eq!(sources(&chunks), vec!["b.pdf", "a.pdf"]);
    }
}
