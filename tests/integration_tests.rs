//! Integration tests for graph_reader library
//!
//! These tests run the whole pipeline with a scripted language model, the
//! hashing embedder and the in-process index.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use graph_reader::analysis::{IndexerConfig, LocalEmbedder, LocalIndex, NodeIndexer};
use graph_reader::document::{Document, PageTrim};
use graph_reader::graph::{
    EdgeMatching, FactExtractor, GraphBuilder, KeyNormalizer, KnowledgeGraph,
};
use graph_reader::llm::{ChatMessage, Decision, LanguageModel, OutputSchema, ToolCall, ToolSpec};
use graph_reader::reader::{GraphReader, NotesSink, QueryStage};
use graph_reader::{Error, PromptSet, Result};

const DIM: usize = 64;

fn prompts() -> PromptSet {
    PromptSet::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts")).unwrap()
}

/// Language model that answers each call shape from a script.
///
/// Extraction and planning are routed by system prompt; tool-calling turns
/// come from one queue per stage, told apart by the tools offered.
struct ScriptedModel {
    prompts: PromptSet,
    extraction: Vec<(&'static str, &'static str)>,
    plan: &'static str,
    selection: Value,
    explore: Mutex<VecDeque<Decision>>,
    read: Mutex<VecDeque<Decision>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedModel {
    fn new(prompts: PromptSet) -> Self {
        Self {
            prompts,
            extraction: vec![
                (
                    "Paris is the capital of France.",
                    "Paris is the capital of France | Paris | France",
                ),
                (
                    "France is in Europe.",
                    "France is in Europe | France | Europe",
                ),
                (
                    "Paris is the capital of France. France is in Europe.",
                    "Paris is the capital of France | Paris | France\n\
                     France is in Europe | France | Europe",
                ),
            ],
            plan: "Find where Paris is, then find the continent of that country.",
            selection: json!({ "nodes": ["paris", "atlantis"] }),
            explore: Mutex::new(VecDeque::new()),
            read: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_explore(self, decisions: Vec<Decision>) -> Self {
        *self.explore.lock().unwrap() = decisions.into();
        self
    }

    fn with_read(self, decisions: Vec<Decision>) -> Self {
        *self.read.lock().unwrap() = decisions.into();
        self
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

fn system_text(messages: &[ChatMessage]) -> &str {
    messages
        .first()
        .and_then(|m| m.content.as_deref())
        .unwrap_or_default()
}

fn user_text(messages: &[ChatMessage]) -> &str {
    messages
        .get(1)
        .and_then(|m| m.content.as_deref())
        .unwrap_or_default()
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let system = system_text(messages);
        if system == self.prompts.key_atomic {
            self.record("extract");
            let chunk = user_text(messages);
            return self
                .extraction
                .iter()
                .find(|(text, _)| *text == chunk)
                .map(|(_, out)| out.to_string())
                .ok_or_else(|| Error::Service(format!("no extraction for '{}'", chunk)));
        }
        if system == self.prompts.rational_plan {
            self.record("plan");
            return Ok(self.plan.to_string());
        }
        Err(Error::Service("unexpected completion".into()))
    }

    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        _schema: &OutputSchema,
    ) -> Result<Value> {
        assert_eq!(system_text(messages), self.prompts.select_nodes);
        self.record("select");
        Ok(self.selection.clone())
    }

    async fn decide(&self, _messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Decision> {
        let exploring = tools.iter().any(|t| t.name == "read_node");
        let queue = if exploring {
            self.record("explore");
            &self.explore
        } else {
            self.record("read");
            &self.read
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Service("script exhausted".into()))
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

fn happy_explore() -> Vec<Decision> {
    vec![
        Decision::ToolCalls(vec![call("e1", "read_node", json!({ "node_name": "paris" }))]),
        Decision::ToolCalls(vec![call(
            "e2",
            "search_neighbors",
            json!({ "node_name": "paris" }),
        )]),
        Decision::Final("[0, 1]".into()),
    ]
}

fn happy_read() -> Vec<Decision> {
    vec![
        Decision::ToolCalls(vec![
            call("r1", "read_chunk", json!({ "chunk_id": 0 })),
            call("r2", "write_notes", json!({ "text": "Paris is the capital of France." })),
        ]),
        Decision::ToolCalls(vec![call("r3", "read_next_chunk", json!({ "chunk_id": "0" }))]),
        Decision::Final("Paris is in France, which is in Europe.".into()),
    ]
}

struct Pipeline {
    graph: Arc<KnowledgeGraph>,
    chunks: Arc<graph_reader::document::ChunkStore>,
    indexer: Arc<NodeIndexer>,
}

async fn build_pipeline(llm: Arc<ScriptedModel>) -> Pipeline {
    build_pipeline_with_top_k(llm, IndexerConfig::default().top_k).await
}

async fn build_pipeline_with_top_k(llm: Arc<ScriptedModel>, top_k: usize) -> Pipeline {
    let doc = Document::from_pages(
        vec!["Paris is the capital of France. France is in Europe.".to_string()],
        35,
    );
    let chunks = doc.chunks(PageTrim::default());
    assert_eq!(chunks.len(), 2);

    let extractor = FactExtractor::new(llm.clone(), llm.prompts.key_atomic.clone());
    let builder = GraphBuilder::new(extractor, KeyNormalizer::new(), EdgeMatching::CaseInsensitive);
    let graph = builder.build(&chunks).await.unwrap();
    graph.validate_chunks(&chunks).unwrap();

    let mut config = IndexerConfig::default();
    config.index.dimension = DIM;
    config.top_k = top_k;
    let indexer = NodeIndexer::new(
        Arc::new(LocalEmbedder::new(DIM)),
        Arc::new(LocalIndex::new()),
        config,
    )
    .unwrap();
    assert_eq!(indexer.index_graph(&graph).await.unwrap(), 3);

    Pipeline {
        graph: Arc::new(graph),
        chunks: Arc::new(chunks),
        indexer: Arc::new(indexer),
    }
}

fn reader(llm: Arc<ScriptedModel>, pipeline: &Pipeline, notes: &Path) -> GraphReader {
    GraphReader::new(
        llm.clone(),
        pipeline.graph.clone(),
        pipeline.chunks.clone(),
        pipeline.indexer.clone(),
        Arc::new(llm.prompts.clone()),
        NotesSink::new(notes),
    )
}

#[tokio::test]
async fn builds_the_paris_graph() {
    let llm = Arc::new(ScriptedModel::new(prompts()));
    let pipeline = build_pipeline(llm).await;
    let graph = &pipeline.graph;

    let mut keys: Vec<&str> = graph.nodes().map(|n| n.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["europe", "france", "paris"]);

    assert!(graph.has_edge("france", "paris"));
    assert!(graph.has_edge("paris", "france"));
    assert!(graph.has_edge("france", "europe"));
    assert!(!graph.has_edge("paris", "europe"));
    assert_eq!(graph.edge_count(), 2);

    let france = graph.node("france").unwrap();
    let chunk_ids: Vec<usize> = france.facts.iter().map(|f| f.chunk_id).collect();
    assert_eq!(chunk_ids, vec![0, 1]);
}

#[tokio::test]
async fn single_chunk_document_coalesces_facts_per_key() {
    let llm = Arc::new(ScriptedModel::new(prompts()));
    let doc = Document::from_pages(
        vec!["Paris is the capital of France. France is in Europe.".to_string()],
        1000,
    );
    let chunks = doc.chunks(PageTrim::default());
    assert_eq!(chunks.len(), 1);

    let extractor = FactExtractor::new(llm.clone(), llm.prompts.key_atomic.clone());
    let graph = GraphBuilder::new(extractor, KeyNormalizer::new(), EdgeMatching::CaseInsensitive)
        .build(&chunks)
        .await
        .unwrap();
    graph.validate_chunks(&chunks).unwrap();

    let mut keys: Vec<&str> = graph.nodes().map(|n| n.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["europe", "france", "paris"]);

    assert!(graph.has_edge("france", "paris"));
    assert!(graph.has_edge("france", "europe"));
    assert!(!graph.has_edge("paris", "europe"));
    assert_eq!(graph.edge_count(), 2);

    let france = graph.node("france").unwrap();
    assert_eq!(france.facts.len(), 1);
    assert_eq!(
        france.facts[0].atom_fact,
        "Paris is the capital of France France is in Europe"
    );
    assert_eq!(france.facts[0].chunk_id, 0);
    assert_eq!(llm.calls(), vec!["extract"]);
}

#[tokio::test]
async fn graph_survives_gml_round_trip() {
    let llm = Arc::new(ScriptedModel::new(prompts()));
    let pipeline = build_pipeline(llm).await;

    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.gml");
    pipeline.graph.export_gml(&path).unwrap();

    let loaded = KnowledgeGraph::load_gml(&path).unwrap();
    assert_eq!(&loaded, pipeline.graph.as_ref());
    loaded.validate_chunks(&pipeline.chunks).unwrap();
}

#[tokio::test]
async fn answers_a_question_through_every_stage_in_order() {
    let llm = Arc::new(
        ScriptedModel::new(prompts())
            .with_explore(happy_explore())
            .with_read(happy_read()),
    );
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();
    let notes = dir.path().join("notes.txt");

    let session = reader(llm.clone(), &pipeline, &notes)
        .run("Which continent is Paris in?")
        .await
        .unwrap();

    assert_eq!(session.trace(), QueryStage::ORDER.as_slice());
    assert_eq!(session.stage(), QueryStage::Done);
    assert_eq!(
        session.answer.as_deref(),
        Some("Paris is in France, which is in Europe.")
    );
    assert_eq!(session.shortlisted_nodes.len(), 3);
    assert_eq!(session.selected_nodes, vec!["paris".to_string()]);
    assert_eq!(session.selected_chunk_ids, vec![0, 1]);
    assert_eq!(session.actions.len(), 5);

    let calls = llm.calls();
    let query_calls: Vec<&str> = calls.into_iter().filter(|c| *c != "extract").collect();
    assert_eq!(
        query_calls,
        vec!["plan", "select", "explore", "explore", "explore", "read", "read", "read"]
    );

    assert_eq!(
        std::fs::read_to_string(&notes).unwrap(),
        "Paris is the capital of France.\n"
    );
}

#[tokio::test]
async fn get_response_returns_the_answer() {
    let llm = Arc::new(
        ScriptedModel::new(prompts())
            .with_explore(happy_explore())
            .with_read(happy_read()),
    );
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();

    let answer = reader(llm, &pipeline, &dir.path().join("notes.txt"))
        .get_response("Which continent is Paris in?")
        .await
        .unwrap();
    assert_eq!(answer, "Paris is in France, which is in Europe.");
}

#[tokio::test]
async fn malformed_chunk_list_aborts_before_reading() {
    let llm = Arc::new(
        ScriptedModel::new(prompts())
            .with_explore(vec![Decision::Final("[zero, one]".into())])
            .with_read(happy_read()),
    );
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();

    let err = reader(llm.clone(), &pipeline, &dir.path().join("notes.txt"))
        .get_response("Which continent is Paris in?")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SchemaViolation(_)));
    assert!(!llm.calls().contains(&"read"));
}

#[tokio::test]
async fn unknown_chunk_ids_are_referential_errors() {
    let llm = Arc::new(
        ScriptedModel::new(prompts())
            .with_explore(vec![Decision::Final("[0, 42]".into())])
            .with_read(happy_read()),
    );
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();

    let err = reader(llm.clone(), &pipeline, &dir.path().join("notes.txt"))
        .get_response("Which continent is Paris in?")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReferentialIntegrity(42)));
    assert!(!llm.calls().contains(&"read"));
}

#[tokio::test]
async fn shortlist_length_follows_index_top_k() {
    let mut model = ScriptedModel::new(prompts())
        .with_explore(happy_explore())
        .with_read(happy_read());
    model.selection = json!({ "nodes": ["paris", "france", "europe"] });
    let llm = Arc::new(model);
    let pipeline = build_pipeline_with_top_k(llm.clone(), 1).await;
    let dir = tempdir().unwrap();

    let session = reader(llm, &pipeline, &dir.path().join("notes.txt"))
        .run("Which continent is Paris in?")
        .await
        .unwrap();

    assert_eq!(session.shortlisted_nodes.len(), 1);
    assert_eq!(session.selected_nodes, session.shortlisted_nodes);
}

#[tokio::test]
async fn selection_outside_the_shortlist_fails_the_query() {
    let mut model = ScriptedModel::new(prompts()).with_explore(happy_explore());
    model.selection = json!({ "nodes": ["atlantis"] });
    let llm = Arc::new(model);
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();

    let err = reader(llm.clone(), &pipeline, &dir.path().join("notes.txt"))
        .get_response("Which continent is Paris in?")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SchemaViolation(_)));
    assert!(!llm.calls().contains(&"explore"));
}

#[tokio::test]
async fn non_conforming_selection_is_a_schema_violation() {
    let mut model = ScriptedModel::new(prompts());
    model.selection = json!({ "picked": "paris" });
    let llm = Arc::new(model);
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();

    let err = reader(llm, &pipeline, &dir.path().join("notes.txt"))
        .get_response("Which continent is Paris in?")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaViolation(_)));
}

#[tokio::test]
async fn oracle_failure_during_reading_surfaces_and_keeps_notes() {
    let llm = Arc::new(
        ScriptedModel::new(prompts())
            .with_explore(happy_explore())
            .with_read(vec![Decision::ToolCalls(vec![call(
                "r1",
                "write_notes",
                json!({ "text": "partial evidence" }),
            )])]),
    );
    let pipeline = build_pipeline(llm.clone()).await;
    let dir = tempdir().unwrap();
    let notes = dir.path().join("notes.txt");

    let err = reader(llm, &pipeline, &notes)
        .get_response("Which continent is Paris in?")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Service(_)));
    assert_eq!(std::fs::read_to_string(&notes).unwrap(), "partial evidence\n");
}

#[tokio::test]
async fn similarity_queries_are_deterministic() {
    let llm = Arc::new(ScriptedModel::new(prompts()));
    let pipeline = build_pipeline(llm).await;

    let first = pipeline.indexer.search("capital of France").await.unwrap();
    let second = pipeline.indexer.search("capital of France").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}
