// persisted call graph: (:function)-[:called]->(:function) in a cypher store.
// writes go out in chunks of BATCH_SIZE statements; a failed chunk is
// logged and counted and the load moves on to the next one.

use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ops::AddAssign;
use tracing::{event, Level};

use crate::defs::{Edge, FunctionIdentity, PrefixRow, BATCH_SIZE};
use crate::error::SinkError;
use crate::extract::Extraction;

const RESET_NODES: &str = "MATCH (n:function) DETACH DELETE n";
const MERGE_NODE: &str = "MERGE (f:function {id: $id}) SET f.name = $name, f.file = $file";
const MERGE_EDGE: &str = "MATCH (a:function {id: $caller}), (b:function {id: $callee}) \
     MERGE (a)-[r:called]->(b) \
     SET r.time_sec = $time, r.memory_kB = $memory, r.line = $line, r.occurrences = $occurrences";
const TOP_BY_CALLER_PREFIX: &str = "MATCH (a:function)-[r:called]->(b:function) \
     WHERE a.name =~ $pattern \
     RETURN a.name, b.name, r.time_sec, r.memory_kB, r.line \
     ORDER BY r.time_sec DESC LIMIT $limit";
const INDEXES: [&str; 4] = [
    "CREATE INDEX function_id IF NOT EXISTS FOR (f:function) ON (f.id)",
    "CREATE INDEX function_name IF NOT EXISTS FOR (f:function) ON (f.name)",
    "CREATE INDEX called_time_sec IF NOT EXISTS FOR ()-[r:called]-() ON (r.time_sec)",
    "CREATE INDEX called_memory_kb IF NOT EXISTS FOR ()-[r:called]-() ON (r.memory_kB)",
];

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Statement {
    pub statement: String,
    pub parameters: Value,
}

impl Statement {
    pub fn new(statement: &str, parameters: Value) -> Self {
        Self {
            statement: statement.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<QueryRow>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryRow {
    pub row: Vec<Value>,
}

/// Runs a batch of statements in one request, returning one result per statement.
pub trait StatementExecutor: Send + Sync {
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryResult>, SinkError>;
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Neo4j HTTP transactional endpoint; every batch is one auto-committed transaction.
pub struct Neo4jHttp {
    client: reqwest::blocking::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jHttp {
    pub fn new(url: &str, database: &str, user: &str, password: &str) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self::with_client(client, url, database, user, password))
    }

    pub fn with_client(
        client: reqwest::blocking::Client,
        url: &str,
        database: &str,
        user: &str,
        password: &str,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/db/{}/tx/commit", url.trim_end_matches('/'), database),
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

impl StatementExecutor for Neo4jHttp {
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryResult>, SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        let body: TxResponse = response.json()?;
        if let Some(error) = body.errors.into_iter().next() {
            return Err(SinkError::Store {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.results)
    }
}

/// Outcome of a chunked write.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub chunks: usize,
    pub failed_chunks: usize,
    pub statements: usize,
    pub failed_statements: usize,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks == 0
    }
}

impl AddAssign for LoadReport {
    fn add_assign(&mut self, other: Self) {
        self.chunks += other.chunks;
        self.failed_chunks += other.failed_chunks;
        self.statements += other.statements;
        self.failed_statements += other.failed_statements;
    }
}

pub struct GraphSink<E> {
    executor: E,
}

impl<E: StatementExecutor> GraphSink<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn run(&self, statement: Statement) -> Result<QueryResult, SinkError> {
        let mut results = self.executor.execute(std::slice::from_ref(&statement))?;
        if results.is_empty() {
            return Ok(QueryResult::default());
        }
        Ok(results.swap_remove(0))
    }

    fn run_batch(&self, what: &str, batch: &[Statement]) -> LoadReport {
        let mut report = LoadReport::default();
        for (i, chunk) in batch.chunks(BATCH_SIZE).enumerate() {
            report.chunks += 1;
            report.statements += chunk.len();
            match self.executor.execute(chunk) {
                Ok(_) => event!(Level::DEBUG, "{} chunk {}: {} statements", what, i, chunk.len()),
                Err(e) => {
                    report.failed_chunks += 1;
                    report.failed_statements += chunk.len();
                    event!(Level::ERROR, "{} chunk {} failed: {}", what, i, e);
                }
            }
        }
        report
    }

    /// Removes every function node and its relationships.
    pub fn reset_function_nodes(&self) -> Result<(), SinkError> {
        self.run(Statement::new(RESET_NODES, json!({})))?;
        Ok(())
    }

    pub fn upsert_function_nodes(&self, identities: &[FunctionIdentity]) -> LoadReport {
        let batch: Vec<Statement> = identities
            .iter()
            .map(|f| {
                Statement::new(
                    MERGE_NODE,
                    json!({ "id": f.id(), "name": f.name, "file": f.file }),
                )
            })
            .collect();
        self.run_batch("nodes", &batch)
    }

    /// Best effort; the store answers queries without them, only slower.
    pub fn create_indexes(&self) {
        for index in INDEXES {
            if let Err(e) = self.run(Statement::new(index, json!({}))) {
                event!(Level::WARN, "could not create index ({}): {}", index, e);
            }
        }
    }

    pub fn upsert_called_edges(&self, edges: &[Edge]) -> LoadReport {
        let batch: Vec<Statement> = edges
            .iter()
            .map(|e| {
                Statement::new(
                    MERGE_EDGE,
                    json!({
                        "caller": e.caller().id(),
                        "callee": e.callee().id(),
                        "time": e.time_seconds,
                        "memory": e.memory_kilobytes,
                        "line": e.line,
                        "occurrences": e.occurrences,
                    }),
                )
            })
            .collect();
        self.run_batch("edges", &batch)
    }

    /// Replaces the stored graph with `extraction`.
    pub fn load(&self, extraction: &Extraction) -> Result<LoadReport, SinkError> {
        self.reset_function_nodes()?;
        let mut report = self.upsert_function_nodes(&extraction.functions());
        self.create_indexes();
        report += self.upsert_called_edges(&extraction.edges);
        if report.is_complete() {
            event!(Level::INFO, "loaded {} statements in {} chunks", report.statements, report.chunks);
        } else {
            event!(
                Level::ERROR,
                "{} of {} chunks failed ({} statements lost), reset and reload to repair",
                report.failed_chunks,
                report.chunks,
                report.failed_statements
            );
        }
        Ok(report)
    }

    /// Hottest `n` edges whose caller name starts with the regex `prefix`.
    pub fn top_by_caller_prefix(&self, n: usize, prefix: &str) -> Result<Vec<PrefixRow>, SinkError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let result = self.run(Statement::new(
            TOP_BY_CALLER_PREFIX,
            // =~ matches the whole name; the group keeps alternations anchored.
            json!({ "pattern": format!("(?:{prefix}).*"), "limit": n }),
        ))?;
        result
            .data
            .into_iter()
            .map(|row| {
                let (caller, callee, time_sec, memory_kb, line): (String, String, f64, f64, u32) =
                    serde_json::from_value(Value::Array(row.row))
                        .map_err(|e| SinkError::Response(e.to_string()))?;
                Ok(PrefixRow {
                    caller,
                    callee,
                    time_sec,
                    memory_kb,
                    line,
                })
            })
            .collect()
    }
}
