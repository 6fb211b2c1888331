//! Index build pipeline.
//!
//! Coordinates one full build: loader → chunker → embedding cache → vector
//! index. The result is a complete [`VectorIndex`] that the caller publishes
//! with [`SharedIndex::replace`](crate::index::SharedIndex::replace).

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::chunk::Chunker;
use crate::config::DocumentsConfig;
use crate::embedding::cache::EmbeddingCache;
use crate::index::VectorIndex;
use crate::loader::load_documents;
use crate::models::Chunk;

/// Counts reported by `eurisk index` and `POST /index/rebuild`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Source files that produced at least one page.
    pub documents: usize,
    pub chunks: usize,
    /// Chunks whose vectors came from the embedding backend.
    pub embedded: u64,
    /// Chunks whose vectors came from the cache.
    pub cached: u64,
}

pub async fn build_index(
    documents: &DocumentsConfig,
    chunker: Chunker,
    cache: &EmbeddingCache,
) -> Result<(VectorIndex, IndexStats)> {
    let started = Instant::now();

    // PDF extraction is CPU-bound.
    let docs_config = documents.clone();
    let docs = tokio::task::spawn_blocking(move || load_documents(&docs_config))
        .await
        .context("document loader task failed")??;

    let sources: BTreeSet<&str> = docs.iter().map(|d| d.source.as_str()).collect();
    let chunks: Vec<Chunk> = chunker.chunk_documents(&docs).collect();
    tracing::info!(
        documents = sources.len(),
        pages = docs.len(),
        chunks = chunks.len(),
        "documents chunked"
    );

    let before = cache.stats();
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = cache
        .get_or_compute_batch(&texts)
        .await
        .context("embedding chunks")?;
    let after = cache.stats();

    let mut index = VectorIndex::new();
    for (chunk, vector) in chunks.into_iter().zip(vectors) {
        index.add(chunk, vector);
    }

    let stats = IndexStats {
        documents: sources.len(),
        chunks: index.len(),
        embedded: after.misses - before.misses,
        cached: after.hits - before.hits,
    };
    tracing::info!(
        documents = stats.documents,
        chunks = stats.chunks,
        embedded = stats.embedded,
        cached = stats.cached,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index built"
    );

    Ok((index, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_build_then_rebuild_hits_cache() {
        let tmp = TempDir::new().unwrap();
        let docs_dir = tmp.path().join("docs");
        fs::create_dir_all(&docs_dir).unwrap();
        fs::write(docs_dir.join("act.txt"), "a".repeat(250)).unwrap();
        fs::write(docs_dir.join("annex.txt"), "Annex III lists high-risk areas.").unwrap();

        let config = DocumentsConfig {
            dir: docs_dir,
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
        };
        let chunker = Chunker::new(100, 10).unwrap();
        let cache = EmbeddingCache::new(Arc::new(LengthProvider), &tmp.path().join("cache"), "t", 8);

        let (index, first) = build_index(&config, chunker, &cache).await.unwrap();
        assert_eq!(first.documents, 2);
        assert_eq!(first.chunks, index.len());
        assert!(first.chunks >= 3);
        assert_eq!(first.embedded + first.cached, first.chunks as u64);

        let (_, second) = build_index(&config, chunker, &cache).await.unwrap();
        assert_eq!(second.chunks, first.chunks);
        assert_eq!(second.embedded, 0);
        assert_eq!(second.cached, second.chunks as u64);
    }

    #[tokio::test]
    async fn test_empty_directory_builds_empty_index() {
        let tmp = TempDir::new().unwrap();
        let config = DocumentsConfig {
            dir: tmp.path().join("missing"),
            ..Default::default()
        };
        let cache = EmbeddingCache::new(Arc::new(LengthProvider), tmp.path(), "t", 8);
        let (index, stats) = build_index(&config, Chunker::new(100, 10).unwrap(), &cache)
            .await
            .unwrap();
        assert!(index.is_empty());
        assert_eq!(stats, IndexStats::default());
    }
}
