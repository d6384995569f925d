use std::pin::pin;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::facts::{AtomicFact, FactTable};
use crate::document::ChunkStore;
use crate::llm::{system_user, LanguageModel};
use crate::metrics;
use crate::{Error, Result};

/// One key/fact pair emitted for a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyedFact {
    /// Lowercased key as the model wrote it
    pub key: String,
    pub atom_fact: String,
    pub chunk_id: usize,
}

/// Parse `fact | key1 | key2 ...` records.
///
/// Lines without a pipe carry no key and are discarded. Within one chunk all
/// fragments sharing a key are joined with a single space, so every key
/// yields exactly one fact. Keys come out in order of first appearance.
pub fn parse_key_facts(output: &str, chunk_id: usize) -> Vec<RawKeyedFact> {
    let mut per_key = FactTable::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split('|');
        let fact = fields.next().unwrap_or_default().trim();
        let keys: Vec<String> = fields
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        if fact.is_empty() || keys.is_empty() {
            debug!("Chunk {}: discarding record without fact or key: {:?}", chunk_id, line);
            continue;
        }
        for key in keys {
            per_key.push(key, AtomicFact::new(fact, chunk_id));
        }
    }

    per_key
        .into_iter()
        .map(|(key, fragments)| RawKeyedFact {
            key,
            atom_fact: fragments
                .iter()
                .map(|f| f.atom_fact.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            chunk_id,
        })
        .collect()
}

/// Extracts keyed atomic facts from chunks through the language model.
pub struct FactExtractor {
    llm: Arc<dyn LanguageModel>,
    prompt: String,
    concurrency: usize,
}

impl FactExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, prompt: impl Into<String>) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            concurrency: 1,
        }
    }

    /// Number of chunks processed in parallel; results still merge in chunk order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Extract facts from one chunk.
    pub async fn extract_chunk(&self, chunk_id: usize, text: &str) -> Result<Vec<RawKeyedFact>> {
        let output = self
            .llm
            .complete(&system_user(&self.prompt, text))
            .await?;

        if output.trim().is_empty() {
            return Err(Error::ExtractionParse(format!(
                "chunk {} returned no output",
                chunk_id
            )));
        }

        let facts = parse_key_facts(&output, chunk_id);
        if facts.is_empty() {
            return Err(Error::ExtractionParse(format!(
                "chunk {} returned no `fact | key` records",
                chunk_id
            )));
        }
        Ok(facts)
    }

    /// Extract facts from every chunk into the raw key table.
    ///
    /// A chunk whose extraction fails is logged and skipped. A configuration
    /// error (missing or rejected credentials) aborts at once, and so does a
    /// run in which no chunk could be extracted.
    pub async fn extract_all(&self, store: &ChunkStore) -> Result<FactTable> {
        info!(
            "Extracting atomic facts from {} chunks (concurrency {})",
            store.len(),
            self.concurrency
        );

        let mut results = pin!(stream::iter(store.iter())
            .map(|(id, text)| async move { (id, self.extract_chunk(id, text).await) })
            .buffered(self.concurrency));

        let mut table = FactTable::new();
        let mut skipped = 0usize;
        let mut last_error = None;
        while let Some((chunk_id, result)) = results.next().await {
            match result {
                Ok(facts) => {
                    debug!("Chunk {}: {} keyed facts", chunk_id, facts.len());
                    for fact in facts {
                        table.push(fact.key, AtomicFact::new(fact.atom_fact, fact.chunk_id));
                    }
                }
                Err(e @ Error::Configuration(_)) => {
                    error!("Aborting extraction at chunk {}: {}", chunk_id, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping chunk {}: {}", chunk_id, e);
                    metrics::record_chunk_skipped();
                    skipped += 1;
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error.filter(|_| skipped == store.len()) {
            return Err(Error::Service(format!(
                "fact extraction failed for all {} chunks, last error: {}",
                skipped, e
            )));
        }

        info!(
            "Extracted {} facts under {} raw keys ({} chunks skipped)",
            table.fact_count(),
            table.len(),
            skipped
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;
    use crate::llm::{ChatMessage, Decision, OutputSchema, ToolSpec};
    use async_trait::async_trait;
    use serde_json::Value;

    #[test]
    fn parses_multi_key_records() {
        let facts = parse_key_facts(
            "Paris is the capital of France|paris|france\n\nFrance is in Europe| France |EUROPE",
            0,
        );

        let pairs: Vec<(&str, &str)> = facts
            .iter()
            .map(|f| (f.key.as_str(), f.atom_fact.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("paris", "Paris is the capital of France"),
                ("france", "Paris is the capital of France France is in Europe"),
                ("europe", "France is in Europe"),
            ]
        );
    }

    #[test]
    fn lines_without_pipe_are_discarded() {
        let facts = parse_key_facts("Here are the facts:\nRust is fast|rust\n|orphan key\n", 3);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key, "rust");
        assert_eq!(facts[0].chunk_id, 3);
    }

    #[test]
    fn garbage_output_yields_nothing() {
        assert!(parse_key_facts("", 0).is_empty());
        assert!(parse_key_facts("no structure at all", 0).is_empty());
        assert!(parse_key_facts("fact | | ", 0).is_empty());
    }

    /// Answers with a canned reply per chunk text.
    struct Scripted(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            let chunk = messages
                .last()
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            self.0
                .iter()
                .find(|(text, _)| *text == chunk)
                .map(|(_, reply)| reply.to_string())
                .ok_or_else(|| Error::Service("no reply scripted".into()))
        }

        async fn complete_structured(
            &self,
            _messages: &[ChatMessage],
            _schema: &OutputSchema,
        ) -> Result<Value> {
            unimplemented!()
        }

        async fn decide(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Decision> {
            unimplemented!()
        }
    }

    fn store() -> ChunkStore {
        ChunkStore::from_chunks(vec![
            Chunk::new(0, "alpha"),
            Chunk::new(1, "beta"),
            Chunk::new(2, "gamma"),
        ])
    }

    #[tokio::test]
    async fn bad_chunks_are_skipped() {
        let llm = Arc::new(Scripted(vec![
            ("alpha", "Alpha leads|alpha"),
            ("beta", "   "),
            ("gamma", "Gamma follows alpha|gamma|alpha"),
        ]));
        let extractor = FactExtractor::new(llm, "extract");

        let table = extractor.extract_all(&store()).await.unwrap();

        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["alpha", "gamma"]);
        let alpha = table.get("alpha").unwrap();
        assert_eq!(alpha.len(), 2);
        assert_eq!(alpha[0].chunk_id, 0);
        assert_eq!(alpha[1].chunk_id, 2);
    }

    #[tokio::test]
    async fn concurrent_extraction_keeps_chunk_order() {
        let llm = Arc::new(Scripted(vec![
            ("alpha", "A|shared"),
            ("beta", "B|shared"),
            ("gamma", "C|shared"),
        ]));
        let extractor = FactExtractor::new(llm, "extract").with_concurrency(3);

        let table = extractor.extract_all(&store()).await.unwrap();

        let facts: Vec<&str> = table
            .get("shared")
            .unwrap()
            .iter()
            .map(|f| f.atom_fact.as_str())
            .collect();
        assert_eq!(facts, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn extraction_fails_when_every_chunk_fails() {
        let llm = Arc::new(Scripted(vec![("alpha", ""), ("beta", "no records")]));
        let extractor = FactExtractor::new(llm, "extract");

        let err = extractor.extract_all(&store()).await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));
        assert!(err.to_string().contains("all 3 chunks"));
    }

    /// Rejects every call as if the API key were wrong.
    struct Unauthorized(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl LanguageModel for Unauthorized {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(Error::Configuration("OpenAI rejected the API key".into()))
        }

        async fn complete_structured(
            &self,
            _messages: &[ChatMessage],
            _schema: &OutputSchema,
        ) -> Result<Value> {
            unimplemented!()
        }

        async fn decide(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Decision> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn configuration_error_aborts_extraction_at_first_chunk() {
        let llm = Arc::new(Unauthorized(Default::default()));
        let extractor = FactExtractor::new(llm.clone(), "extract");

        let err = extractor.extract_all(&store()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(llm.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_store_yields_empty_table() {
        let llm = Arc::new(Scripted(Vec::new()));
        let table = FactExtractor::new(llm, "extract")
            .extract_all(&ChunkStore::new())
            .await
            .unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn empty_output_is_extraction_parse_error() {
        let llm = Arc::new(Scripted(vec![("alpha", "")]));
        let extractor = FactExtractor::new(llm, "extract");

        let err = extractor.extract_chunk(0, "alpha").await.unwrap_err();
        assert!(matches!(err, Error::ExtractionParse(_)));
    }
}
