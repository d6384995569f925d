//! GML persistence for [`KnowledgeGraph`].
//!
//! Layout written by [`KnowledgeGraph::to_gml`]:
//!
//! ```text
//! graph [
//!   node [
//!     id 0
//!     label "paris"
//!     data [
//!       atom_fact "Paris is the capital of France"
//!       chunk_id 0
//!     ]
//!   ]
//!   edge [
//!     source 0
//!     target 1
//!   ]
//! ]
//! ```
//!
//! Each fact is a repeated `data` block. Strings escape `&`, `"` and control
//! characters as `&#N;` entities.

use std::fmt::Write as _;
use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use tracing::info;

use super::facts::AtomicFact;
use super::graph::{GraphNode, KnowledgeGraph};
use crate::{Error, Result};

impl KnowledgeGraph {
    /// Render the graph as GML text.
    pub fn to_gml(&self) -> String {
        let mut out = String::from("graph [\n");
        for (id, node) in self.nodes().enumerate() {
            let _ = writeln!(out, "  node [");
            let _ = writeln!(out, "    id {}", id);
            let _ = writeln!(out, "    label \"{}\"", escape(&node.key));
            for fact in &node.facts {
                let _ = writeln!(out, "    data [");
                let _ = writeln!(out, "      atom_fact \"{}\"", escape(&fact.atom_fact));
                let _ = writeln!(out, "      chunk_id {}", fact.chunk_id);
                let _ = writeln!(out, "    ]");
            }
            let _ = writeln!(out, "  ]");
        }
        for (source, target) in self.edges() {
            let _ = writeln!(out, "  edge [\n    source {}\n    target {}\n  ]", source, target);
        }
        out.push_str("]\n");
        out
    }

    /// Parse GML text produced by [`KnowledgeGraph::to_gml`].
    pub fn from_gml(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text);
        let top = parser.list(false)?;

        let graph = top
            .into_iter()
            .find_map(|(key, value)| match (key.as_str(), value) {
                ("graph", GmlValue::List(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| Error::GraphFormat("missing top-level `graph [ ... ]`".into()))?;

        let mut ids = Vec::new();
        let mut nodes = Vec::new();
        let mut raw_edges = Vec::new();
        for (key, value) in graph {
            match (key.as_str(), value) {
                ("node", GmlValue::List(items)) => {
                    let (id, node) = parse_node(items)?;
                    ids.push(id);
                    nodes.push(node);
                }
                ("edge", GmlValue::List(items)) => {
                    let source = int_field(&items, "source")?;
                    let target = int_field(&items, "target")?;
                    raw_edges.push((source, target));
                }
                _ => {}
            }
        }

        let position = |id: i64| {
            ids.iter()
                .position(|&n| n == id)
                .ok_or_else(|| Error::GraphFormat(format!("edge references unknown node id {}", id)))
        };
        let edges = raw_edges
            .into_iter()
            .map(|(s, t)| -> Result<(usize, usize)> { Ok((position(s)?, position(t)?)) })
            .collect::<Result<Vec<_>>>()?;

        KnowledgeGraph::from_parts(nodes, &edges)
    }

    /// Write the graph to `path`, creating parent directories.
    pub fn export_gml(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_gml())?;
        info!("Graph exported to {}", path.display());
        Ok(())
    }

    pub fn load_gml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::GraphFormat(format!("failed to read graph {}: {}", path.display(), e))
        })?;
        let graph = Self::from_gml(&text)?;
        info!(
            "Loaded graph from {} ({} nodes, {} edges)",
            path.display(),
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

fn parse_node(items: Vec<(String, GmlValue)>) -> Result<(i64, GraphNode)> {
    let id = int_field(&items, "id")?;
    let mut label = None;
    let mut facts = Vec::new();

    for (key, value) in items {
        match (key.as_str(), value) {
            ("label", GmlValue::Str(s)) => label = Some(s),
            ("data", GmlValue::List(fields)) => {
                let chunk_id = int_field(&fields, "chunk_id")?;
                let chunk_id = usize::try_from(chunk_id)
                    .map_err(|_| Error::GraphFormat(format!("negative chunk_id {}", chunk_id)))?;
                let atom_fact = fields
                    .into_iter()
                    .find_map(|(k, v)| match (k.as_str(), v) {
                        ("atom_fact", GmlValue::Str(s)) => Some(s),
                        _ => None,
                    })
                    .ok_or_else(|| Error::GraphFormat(format!("node {} fact without atom_fact", id)))?;
                facts.push(AtomicFact::new(atom_fact, chunk_id));
            }
            _ => {}
        }
    }

    let key = label.ok_or_else(|| Error::GraphFormat(format!("node {} has no label", id)))?;
    Ok((id, GraphNode { key, facts }))
}

fn int_field(items: &[(String, GmlValue)], name: &str) -> Result<i64> {
    items
        .iter()
        .find_map(|(k, v)| match v {
            GmlValue::Int(n) if k == name => Some(*n),
            _ => None,
        })
        .ok_or_else(|| Error::GraphFormat(format!("missing integer field `{}`", name)))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' | '"' => {
                let _ = write!(out, "&#{};", ch as u32);
            }
            c if c.is_control() => {
                let _ = write!(out, "&#{};", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find(';')
            .map(|e| start + e)
            .ok_or_else(|| Error::GraphFormat(format!("unterminated entity in \"{}\"", value)))?;
        let entity = &rest[start + 1..end];
        let ch = match entity {
            "amp" => Some('&'),
            "quot" => Some('"'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16).ok())
                .unwrap_or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        let ch = ch.ok_or_else(|| Error::GraphFormat(format!("invalid entity &{};", entity)))?;
        out.push(ch);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum GmlValue {
    Int(i64),
    #[allow(dead_code)]
    Real(f64),
    Str(String),
    List(Vec<(String, GmlValue)>),
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::GraphFormat(format!("line {}: {}", self.line, msg))
    }

    fn skip_blank(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                self.line += 1;
                self.chars.next();
            } else if c.is_whitespace() {
                self.chars.next();
            } else if c == '#' {
                // comment until end of line
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
            } else {
                break;
            }
        }
    }

    /// Parse `key value` pairs until `]` (nested) or end of input (top level).
    fn list(&mut self, nested: bool) -> Result<Vec<(String, GmlValue)>> {
        let mut items = Vec::new();
        loop {
            self.skip_blank();
            match self.chars.peek() {
                None if nested => return Err(self.error("unexpected end of input, missing `]`")),
                None => return Ok(items),
                Some(']') if nested => {
                    self.chars.next();
                    return Ok(items);
                }
                Some(_) => {
                    let key = self.key()?;
                    self.skip_blank();
                    let value = self.value()?;
                    items.push((key, value));
                }
            }
        }
    }

    fn key(&mut self) -> Result<String> {
        let mut key = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                key.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if key.is_empty() || !key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            let found = self.chars.peek().copied();
            return Err(self.error(format!("expected a key, found {:?}", found)));
        }
        Ok(key)
    }

    fn value(&mut self) -> Result<GmlValue> {
        match self.chars.peek().copied() {
            Some('[') => {
                self.chars.next();
                Ok(GmlValue::List(self.list(true)?))
            }
            Some('"') => {
                self.chars.next();
                let mut raw = String::new();
                loop {
                    match self.chars.next() {
                        Some('"') => break,
                        Some(c) => {
                            if c == '\n' {
                                self.line += 1;
                            }
                            raw.push(c);
                        }
                        None => return Err(self.error("unterminated string")),
                    }
                }
                Ok(GmlValue::Str(unescape(&raw)?))
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let mut raw = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.') {
                        raw.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                if let Ok(n) = raw.parse::<i64>() {
                    Ok(GmlValue::Int(n))
                } else {
                    raw.parse::<f64>()
                        .map(GmlValue::Real)
                        .map_err(|_| self.error(format!("invalid number `{}`", raw)))
                }
            }
            other => Err(self.error(format!("expected a value, found {:?}", other))),
        }
    }
}
