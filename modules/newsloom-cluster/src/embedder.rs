//! Batched article encoding with progress events. Cancellation is honoured
//! between batches, never mid-batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ai_client::TextEmbedder;
use newsloom_common::{
    Article, LogLevel, NewsloomError, PipelineStatus, ProgressEvent, ProgressSink,
};
use tracing::info;

/// Text fed to the encoder: title plus the first 500 chars of the body.
fn embedding_text(article: &Article) -> String {
    let body: String = article.raw_text.chars().take(500).collect();
    format!("{} {}", article.raw_title, body)
}

pub struct EmbeddingBatcher {
    embedder: Arc<dyn TextEmbedder>,
    sink: Arc<dyn ProgressSink>,
    batch_size: usize,
}

impl EmbeddingBatcher {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        sink: Arc<dyn ProgressSink>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            sink,
            batch_size: batch_size.max(1),
        }
    }

    /// Encode all articles. A backend failure aborts the stage: without
    /// embeddings nothing downstream is meaningful.
    pub async fn embed_articles(
        &self,
        articles: &[Article],
        cancelled: &AtomicBool,
    ) -> Result<Vec<Vec<f32>>, NewsloomError> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }
        let total_batches = articles.len().div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(articles.len());

        for (batch_index, batch) in articles.chunks(self.batch_size).enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                return Err(NewsloomError::Cancelled);
            }
            self.sink.publish(ProgressEvent::Progress {
                percent: 0,
                step: format!("embeddings ({}/{})", batch_index + 1, total_batches),
                status: PipelineStatus::Running,
            });

            let texts: Vec<String> = batch.iter().map(embedding_text).collect();
            let batch_vectors = self
                .embedder
                .embed_batch(texts)
                .await
                .map_err(|e| NewsloomError::Embedding(e.to_string()))?;
            if batch_vectors.len() != batch.len() {
                return Err(NewsloomError::Embedding(format!(
                    "backend returned {} vectors for {} texts",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        if let Some(first) = vectors.first() {
            let dim = first.len();
            if vectors.iter().any(|v| v.len() != dim) {
                return Err(NewsloomError::Embedding(
                    "inconsistent embedding dimensions".to_string(),
                ));
            }
        }

        info!(count = vectors.len(), "Embeddings computed");
        self.sink.publish(ProgressEvent::log(
            LogLevel::Success,
            format!("{} embeddings computed", vectors.len()),
        ));
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use newsloom_common::{ExtractionMethod, NullSink};
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        batches: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl TextEmbedder for CountingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("backend down");
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn article(i: usize) -> Article {
        Article {
            url: format!("https://a.fr/{i}"),
            source_domain: "a.fr".to_string(),
            source_name: "A".to_string(),
            raw_title: format!("Titre {i}"),
            raw_text: "corps".repeat(30),
            published_at: Some(Utc::now()),
            authors: Vec::new(),
            image_url: None,
            language: "fr".to_string(),
            extraction_method: ExtractionMethod::ScrapeFull,
            tier: 2,
            category: None,
            meta_description: String::new(),
            used_in_synthesis_id: String::new(),
            covered_by_sources: Vec::new(),
            duplicate_count: 0,
        }
    }

    #[tokio::test]
    async fn batches_are_sized_and_concatenated() {
        let embedder = Arc::new(CountingEmbedder {
            batches: AtomicUsize::new(0),
            fail: false,
        });
        let batcher = EmbeddingBatcher::new(embedder.clone(), Arc::new(NullSink), 20);
        let articles: Vec<Article> = (0..45).map(article).collect();
        let vectors = batcher
            .embed_articles(&articles, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(vectors.len(), 45);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backend_failure_aborts_stage() {
        let batcher = EmbeddingBatcher::new(
            Arc::new(CountingEmbedder {
                batches: AtomicUsize::new(0),
                fail: true,
            }),
            Arc::new(NullSink),
            20,
        );
        let articles = vec![article(0)];
        let err = batcher
            .embed_articles(&articles, &AtomicBool::new(false))
            .await
            .unwrap_err();
        assert!(matches!(err, NewsloomError::Embedding(_)));
    }

    #[tokio::test]
    async fn cancellation_checked_between_batches() {
        let batcher = EmbeddingBatcher::new(
            Arc::new(CountingEmbedder {
                batches: AtomicUsize::new(0),
                fail: false,
            }),
            Arc::new(NullSink),
            20,
        );
        let articles = vec![article(0)];
        let err = batcher
            .embed_articles(&articles, &AtomicBool::new(true))
            .await
            .unwrap_err();
        assert!(matches!(err, NewsloomError::Cancelled));
    }
}
