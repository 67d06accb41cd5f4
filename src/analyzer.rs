use regex::Regex;
use std::path::Path;
use tracing::{event, Level};

use crate::defs::{Backend, Edge, Kind, PrefixRow, StoreArgs};
use crate::error::AnalyzeError;
use crate::extract::Extraction;
use crate::rank::RankingIndex;
use crate::read::read_extraction;
use crate::sink::{GraphSink, LoadReport, Neo4jHttp, StatementExecutor};

/// What the presentation layer can ask of a loaded trace, whatever the backend.
pub trait Analyzer: Send + Sync {
    fn backend(&self) -> Backend;

    fn index(&self) -> &RankingIndex;

    fn top_by_caller_prefix(&self, n: usize, prefix: &str) -> Result<Vec<PrefixRow>, AnalyzeError>;

    fn first(&self) -> Option<&Edge> {
        self.index().first()
    }

    fn top(&self, n: usize, kind: Kind) -> Vec<&Edge> {
        self.index().top(n, kind)
    }

    fn reference(&self, kind: Kind) -> f64 {
        self.index().reference(kind)
    }

    fn percentage(&self, edge: &Edge, kind: Kind) -> Option<f64> {
        self.index().percentage(edge, kind)
    }
}

fn prefix_regex(prefix: &str) -> Result<Regex, AnalyzeError> {
    Regex::new(&format!("^(?:{prefix})")).map_err(|source| AnalyzeError::InvalidPattern {
        prefix: prefix.to_string(),
        source,
    })
}

pub struct MemoryAnalyzer {
    index: RankingIndex,
}

impl MemoryAnalyzer {
    pub fn new(extraction: Extraction) -> Self {
        Self {
            index: RankingIndex::build(extraction),
        }
    }
}

impl Analyzer for MemoryAnalyzer {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn index(&self) -> &RankingIndex {
        &self.index
    }

    fn top_by_caller_prefix(&self, n: usize, prefix: &str) -> Result<Vec<PrefixRow>, AnalyzeError> {
        let pattern = prefix_regex(prefix)?;
        Ok(self
            .index
            .top(self.index.len(), Kind::Time)
            .into_iter()
            .filter(|edge| pattern.is_match(&edge.caller_name))
            .take(n)
            .map(PrefixRow::from)
            .collect())
    }
}

/// Ranks in memory, answers prefix queries from the graph store it loaded.
pub struct GraphAnalyzer<E> {
    index: RankingIndex,
    sink: GraphSink<E>,
    report: LoadReport,
}

impl<E: StatementExecutor> GraphAnalyzer<E> {
    pub fn new(extraction: Extraction, sink: GraphSink<E>) -> Result<Self, AnalyzeError> {
        let report = sink.load(&extraction)?;
        Ok(Self {
            index: RankingIndex::build(extraction),
            sink,
            report,
        })
    }

    pub fn report(&self) -> LoadReport {
        self.report
    }
}

impl<E: StatementExecutor> Analyzer for GraphAnalyzer<E> {
    fn backend(&self) -> Backend {
        Backend::Graph
    }

    fn index(&self) -> &RankingIndex {
        &self.index
    }

    fn top_by_caller_prefix(&self, n: usize, prefix: &str) -> Result<Vec<PrefixRow>, AnalyzeError> {
        prefix_regex(prefix)?;
        Ok(self.sink.top_by_caller_prefix(n, prefix)?)
    }
}

/// Reads `trace` and builds the analyzer selected by `store`.
pub fn open(trace: &Path, store: &StoreArgs) -> Result<Box<dyn Analyzer>, AnalyzeError> {
    let extraction = read_extraction(trace)?;
    match store.backend {
        Backend::Memory => Ok(Box::new(MemoryAnalyzer::new(extraction))),
        Backend::Graph => {
            event!(Level::INFO, "loading call graph into {}", store.neo4j_url);
            let executor = Neo4jHttp::new(
                &store.neo4j_url,
                &store.neo4j_database,
                &store.neo4j_user,
                &store.neo4j_password,
            )?;
            Ok(Box::new(GraphAnalyzer::new(extraction, GraphSink::new(executor))?))
        }
    }
}
