//! Streaming answers.
//!
//! The stream runs the same pipeline as [`Orchestrator::answer`], forwarding
//! generator tokens as they arrive. Persistence happens once, after the last
//! token, and only if the stream ran to completion: cancelling the token or
//! dropping the stream early leaves every tier untouched.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{RagError, Result};
use crate::orchestrator::{Lookup, Orchestrator};
use crate::types::{AnswerEvent, AnswerOptions};

/// Stream of answer events. Ends after `Done` or the first error.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<AnswerEvent>> + Send>>;

impl Orchestrator {
    /// Answer `query` as a stream of tokens followed by the full answer.
    ///
    /// A cache hit yields the cached response as a single token.
    pub fn answer_stream(
        &self,
        query: impl Into<String>,
        model_id: impl Into<String>,
        options: AnswerOptions,
        cancellation: CancellationToken,
    ) -> AnswerStream {
        let orchestrator = self.clone();
        let query = query.into();
        let model_id = model_id.into();

        Box::pin(async_stream::stream! {
            let prepared = match orchestrator.prepare(&query, &model_id, &options).await {
                Ok(Lookup::Hit(answer)) => {
                    yield Ok(AnswerEvent::Token(answer.response.clone()));
                    yield Ok(AnswerEvent::Done(answer));
                    return;
                }
                Ok(Lookup::Miss(prepared)) => prepared,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            if cancellation.is_cancelled() {
                info!("Answer stream cancelled before generation");
                yield Err(RagError::Cancelled);
                return;
            }

            let mut tokens = match orchestrator.generator.generate_stream(&prepared.request).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    yield Err(RagError::generation(e));
                    return;
                }
            };

            let mut response = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    next = tokens.next() => Some(next),
                };

                match next {
                    None => {
                        info!(partial_len = response.len(), "Answer stream cancelled, nothing persisted");
                        yield Err(RagError::Cancelled);
                        return;
                    }
                    Some(Some(Ok(token))) => {
                        response.push_str(&token);
                        yield Ok(AnswerEvent::Token(token));
                    }
                    Some(Some(Err(e))) => {
                        yield Err(RagError::generation(e));
                        return;
                    }
                    Some(None) => break,
                }
            }

            // The consumer may have cancelled while holding the last token
            if cancellation.is_cancelled() {
                yield Err(RagError::Cancelled);
                return;
            }

            let answer = orchestrator.persist(*prepared, response);
            yield Ok(AnswerEvent::Done(answer));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::StreamExt;
    use mnemos_cache::{MemoryStore, ResponseCache, VectorCache};
    use mnemos_llm::{MockEmbedder, MockGenerator};

    use crate::types::OrchestratorConfig;

    fn orchestrator(generator: MockGenerator) -> Orchestrator {
        Orchestrator::new(
            Arc::new(VectorCache::open_in_memory().unwrap()),
            Arc::new(ResponseCache::open_in_memory().unwrap()),
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockEmbedder::new(32)),
            Arc::new(generator),
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_stream_tokens_then_done() {
        let orchestrator = orchestrator(MockGenerator::with_text("streamed reply here"));
        let events: Vec<_> = orchestrator
            .answer_stream("q", "m1", AnswerOptions::default(), CancellationToken::new())
            .collect()
            .await;

        let mut text = String::new();
        let mut done = None;
        for event in events {
            match event.unwrap() {
                AnswerEvent::Token(t) => text.push_str(&t),
                AnswerEvent::Done(answer) => done = Some(answer),
            }
        }
        let done = done.unwrap();
        assert_eq!(text, "streamed reply here");
        assert_eq!(done.response, text);
        assert!(done.memory_id.is_some());
        assert_eq!(orchestrator.stats().unwrap().responses.cached_count, 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_stream_persists_nothing() {
        let orchestrator = orchestrator(MockGenerator::with_text("never stored"));
        let token = CancellationToken::new();
        token.cancel();

        let events: Vec<_> = orchestrator
            .answer_stream("q", "m1", AnswerOptions::default(), token)
            .collect()
            .await;
        assert!(matches!(events.last(), Some(Err(RagError::Cancelled))));

        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats.responses.cached_count, 0);
        assert_eq!(stats.memory.total_records, 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_persists_nothing() {
        let orchestrator = orchestrator(MockGenerator::with_text("one two three four"));
        let token = CancellationToken::new();
        let mut stream =
            orchestrator.answer_stream("q", "m1", AnswerOptions::default(), token.clone());

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, AnswerEvent::Token("one ".to_string()));
        token.cancel();

        let mut saw_cancel = false;
        while let Some(event) = stream.next().await {
            match event {
                Err(RagError::Cancelled) => saw_cancel = true,
                Ok(AnswerEvent::Done(_)) => panic!("stream completed after cancel"),
                _ => {}
            }
        }
        assert!(saw_cancel);

        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats.responses.cached_count, 0);
        assert_eq!(stats.memory.total_records, 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_persists_nothing() {
        let orchestrator = orchestrator(MockGenerator::with_text("a b c"));
        {
            let mut stream = orchestrator.answer_stream(
                "q",
                "m1",
                AnswerOptions::default(),
                CancellationToken::new(),
            );
            stream.next().await.unwrap().unwrap();
        }
        assert_eq!(orchestrator.stats().unwrap().responses.cached_count, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_streams_single_token() {
        let orchestrator = orchestrator(MockGenerator::new(vec!["cached words here".to_string()]));
        orchestrator
            .answer("q", "m1", &AnswerOptions::default())
            .await
            .unwrap();

        let events: Vec<_> = orchestrator
            .answer_stream("q", "m1", AnswerOptions::default(), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &AnswerEvent::Token("cached words here".to_string())
        );
        match events[1].as_ref().unwrap() {
            AnswerEvent::Done(answer) => assert!(answer.stats.cache_hit),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generation_failure_ends_stream() {
        let orchestrator = orchestrator(MockGenerator::failing("model offline"));
        let events: Vec<_> = orchestrator
            .answer_stream("q", "m1", AnswerOptions::default(), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(RagError::Collaborator { .. })
        ));
        assert_eq!(orchestrator.stats().unwrap().memory.total_records, 0);
    }
}
