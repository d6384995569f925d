//! Multi-stage retrieval controller.
//!
//! A query moves through
//! `PLAN → SHORTLIST → SELECT_NODES → EXPLORE_FACTS → READ_CHUNKS → DONE`
//! strictly in that order. Any oracle failure aborts the query.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::agent::run_agent;
use super::notes::NotesSink;
use super::tools::{chunk_tools, explore_tools, Action, ChunkReader, GraphExplorer};
use crate::analysis::NodeIndexer;
use crate::document::ChunkStore;
use crate::graph::KnowledgeGraph;
use crate::llm::{complete_as, system_user, LanguageModel};
use crate::metrics;
use crate::prompts::PromptSet;
use crate::{Error, Result};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStage {
    Plan,
    Shortlist,
    SelectNodes,
    ExploreFacts,
    ReadChunks,
    Done,
}

impl QueryStage {
    pub const ORDER: [QueryStage; 6] = [
        QueryStage::Plan,
        QueryStage::Shortlist,
        QueryStage::SelectNodes,
        QueryStage::ExploreFacts,
        QueryStage::ReadChunks,
        QueryStage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Plan => "plan",
            QueryStage::Shortlist => "shortlist",
            QueryStage::SelectNodes => "select_nodes",
            QueryStage::ExploreFacts => "explore_facts",
            QueryStage::ReadChunks => "read_chunks",
            QueryStage::Done => "done",
        }
    }

    /// The only stage allowed to follow this one.
    pub fn next(&self) -> Option<QueryStage> {
        let pos = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(pos + 1).copied()
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one `get_response` call.
#[derive(Debug, Clone)]
pub struct QuerySession {
    pub id: Uuid,
    pub query: String,
    pub plan: String,
    pub shortlisted_nodes: Vec<String>,
    pub selected_nodes: Vec<String>,
    pub selected_chunk_ids: Vec<i64>,
    pub answer: Option<String>,
    /// Agent actions of both tool stages, in execution order
    pub actions: Vec<Action>,
    trace: Vec<QueryStage>,
}

impl QuerySession {
    fn new(query: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            plan: String::new(),
            shortlisted_nodes: Vec::new(),
            selected_nodes: Vec::new(),
            selected_chunk_ids: Vec::new(),
            answer: None,
            actions: Vec::new(),
            trace: vec![QueryStage::Plan],
        }
    }

    pub fn stage(&self) -> QueryStage {
        self.trace.last().copied().unwrap_or(QueryStage::Plan)
    }

    /// Stages entered so far, in order.
    pub fn trace(&self) -> &[QueryStage] {
        &self.trace
    }

    fn advance(&mut self, to: QueryStage) -> Result<()> {
        let from = self.stage();
        if from.next() != Some(to) {
            return Err(Error::InvalidArgument(format!(
                "illegal stage transition {} -> {}",
                from, to
            )));
        }
        self.trace.push(to);
        Ok(())
    }
}

/// Limits of the reading agents.
///
/// The shortlist length is the indexer's `top_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSettings {
    pub max_agent_steps: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self { max_agent_steps: 25 }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NodeSelection {
    /// Chosen node names, most relevant first
    nodes: Vec<String>,
}

/// Answers questions by walking the knowledge graph.
///
/// Graph, chunk store and index are shared read-only; one reader can serve
/// concurrent queries.
pub struct GraphReader {
    llm: Arc<dyn LanguageModel>,
    graph: Arc<KnowledgeGraph>,
    chunks: Arc<ChunkStore>,
    indexer: Arc<NodeIndexer>,
    prompts: Arc<PromptSet>,
    notes: NotesSink,
    settings: ReaderSettings,
}

impl GraphReader {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        graph: Arc<KnowledgeGraph>,
        chunks: Arc<ChunkStore>,
        indexer: Arc<NodeIndexer>,
        prompts: Arc<PromptSet>,
        notes: NotesSink,
    ) -> Self {
        Self {
            llm,
            graph,
            chunks,
            indexer,
            prompts,
            notes,
            settings: ReaderSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ReaderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Answer `query`.
    pub async fn get_response(&self, query: &str) -> Result<String> {
        let session = self.run(query).await?;
        session
            .answer
            .ok_or_else(|| Error::Service("query finished without an answer".to_string()))
    }

    /// Answer `query` and return the whole session, trace included.
    pub async fn run(&self, query: &str) -> Result<QuerySession> {
        let mut session = QuerySession::new(query);
        let span = info_span!("query", id = %session.id);
        async {
            info!("Answering: {}", query);
            self.plan(&mut session).await?;
            session.advance(QueryStage::Shortlist)?;
            self.shortlist(&mut session).await?;
            session.advance(QueryStage::SelectNodes)?;
            self.select_nodes(&mut session).await?;
            session.advance(QueryStage::ExploreFacts)?;
            self.explore_facts(&mut session).await?;
            session.advance(QueryStage::ReadChunks)?;
            self.read_chunks(&mut session).await?;
            session.advance(QueryStage::Done)?;
            info!("Query done after {} agent actions", session.actions.len());
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await?;
        Ok(session)
    }

    fn context(session: &QuerySession) -> String {
        format!("Question: {}\nPlan: {}", session.query, session.plan)
    }

    async fn plan(&self, session: &mut QuerySession) -> Result<()> {
        let started = Instant::now();
        let messages = system_user(&self.prompts.rational_plan, &session.query);
        session.plan = self.llm.complete(&messages).await?.trim().to_string();
        info!("Plan: {}", session.plan);
        metrics::record_stage(QueryStage::Plan.as_str(), started.elapsed());
        Ok(())
    }

    async fn shortlist(&self, session: &mut QuerySession) -> Result<()> {
        let started = Instant::now();
        let text = format!("{} {}", session.query, session.plan);
        let matches = self.indexer.search(&text).await?;

        let mut nodes: Vec<String> = Vec::with_capacity(matches.len());
        for key in matches {
            if self.graph.node(&key).is_none() {
                warn!("Index returned '{}', which is not in the graph", key);
                continue;
            }
            if !nodes.contains(&key) {
                nodes.push(key);
            }
        }
        info!("Shortlisted {} nodes", nodes.len());
        session.shortlisted_nodes = nodes;
        metrics::record_stage(QueryStage::Shortlist.as_str(), started.elapsed());
        Ok(())
    }

    async fn select_nodes(&self, session: &mut QuerySession) -> Result<()> {
        let started = Instant::now();
        let user = format!(
            "{}\nNodes: {}",
            Self::context(session),
            serde_json::to_string(&session.shortlisted_nodes)?
        );
        let messages = system_user(&self.prompts.select_nodes, &user);
        let selection: NodeSelection =
            complete_as(self.llm.as_ref(), &messages, "node_selection").await?;

        let mut selected = Vec::new();
        for node in selection.nodes {
            let node = node.trim().to_string();
            if !session.shortlisted_nodes.contains(&node) {
                warn!("Ignoring selected node '{}' outside the shortlist", node);
                continue;
            }
            if !selected.contains(&node) {
                selected.push(node);
            }
        }
        if selected.is_empty() {
            return Err(Error::SchemaViolation(
                "node selection contains no shortlisted node".to_string(),
            ));
        }
        info!("Selected nodes: {:?}", selected);
        session.selected_nodes = selected;
        metrics::record_stage(QueryStage::SelectNodes.as_str(), started.elapsed());
        Ok(())
    }

    async fn explore_facts(&self, session: &mut QuerySession) -> Result<()> {
        let started = Instant::now();
        let user = format!(
            "{}\nNodes: {}",
            Self::context(session),
            serde_json::to_string(&session.selected_nodes)?
        );
        let messages = system_user(&self.prompts.read_atomic_facts, &user);
        let mut explorer = GraphExplorer::new(&self.graph);
        let outcome = run_agent(
            self.llm.as_ref(),
            messages,
            &explore_tools(),
            &mut explorer,
            self.settings.max_agent_steps,
        )
        .await?;

        session.selected_chunk_ids = parse_chunk_ids(&outcome.answer)?;
        session.actions.extend(outcome.actions);
        info!("Chunks to read: {:?}", session.selected_chunk_ids);
        metrics::record_stage(QueryStage::ExploreFacts.as_str(), started.elapsed());
        Ok(())
    }

    async fn read_chunks(&self, session: &mut QuerySession) -> Result<()> {
        let started = Instant::now();
        if let Some(&missing) = session
            .selected_chunk_ids
            .iter()
            .find(|&&id| !self.chunks.contains(id))
        {
            return Err(Error::ReferentialIntegrity(missing));
        }

        let user = format!(
            "{}\nChunk ids: {:?}",
            Self::context(session),
            session.selected_chunk_ids
        );
        let messages = system_user(&self.prompts.read_chunks, &user);
        let mut reader = ChunkReader::new(&self.chunks, &self.notes);
        let outcome = run_agent(
            self.llm.as_ref(),
            messages,
            &chunk_tools(),
            &mut reader,
            self.settings.max_agent_steps,
        )
        .await?;

        session.answer = Some(outcome.answer.trim().to_string());
        session.actions.extend(outcome.actions);
        metrics::record_stage(QueryStage::ReadChunks.as_str(), started.elapsed());
        Ok(())
    }
}

/// Parse a bracketed, comma-separated list of chunk ids such as `[3, 7, 8]`.
///
/// Text around the brackets is ignored and repeated ids keep their first
/// position. Anything that is not an integer, or an empty list, is a schema
/// violation.
pub fn parse_chunk_ids(text: &str) -> Result<Vec<i64>> {
    let trimmed = text.trim();
    let inner = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed.trim_matches(|c| c == '[' || c == ']'),
    };

    let mut ids = Vec::new();
    for token in inner.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let id: i64 = token.parse().map_err(|_| {
            Error::SchemaViolation(format!("'{}' in chunk id list is not an integer", token))
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(Error::SchemaViolation(format!(
            "no chunk ids in '{}'",
            trimmed
        )));
    }
    Ok(ids)
}
