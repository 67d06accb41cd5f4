use clap::{Parser, ValueEnum};
use highway::{HighwayHash, HighwayHasher, Key};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AnalyzeError;

pub const HASHER_SEED: Key = Key([1, 2, 3, 4]);
/// Statements per request when loading the graph store.
pub const BATCH_SIZE: usize = 1000;
pub const TIME_DIVISOR: f64 = 1_000_000.0;
pub const MEMORY_DIVISOR: f64 = 1_000.0;
pub const DEFAULT_PREFIX: &str = "App";
pub const DEFAULT_TEMPLATE: &str = "({{ row }}) {{ measurement }} {{ unit }} [{{ percentage }}%]:
\t{{ caller_file | abbr(len=60) }}:{{ caller_fn | abbr(len=40) }}
\t-> {{ callee_file | abbr(len=60) }}::{{ callee_fn | abbr(len=40) }}
\t(line: {{ line }}, times: {{ occurrences }})

";

/// Measurement kinds carried by every call of a trace.
#[derive(ValueEnum, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Time,
    Memory,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Time, Kind::Memory];

    /// Event name used for this kind in trace files.
    pub fn event_name(self) -> &'static str {
        match self {
            Kind::Time => "Time",
            Kind::Memory => "Memory",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Kind::Time => "sec",
            Kind::Memory => "kB",
        }
    }

    pub fn convert(self, raw: i64) -> f64 {
        match self {
            Kind::Time => raw as f64 / TIME_DIVISOR,
            Kind::Memory => raw as f64 / MEMORY_DIVISOR,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for Kind {
    type Err = AnalyzeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.event_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AnalyzeError::InvalidKind(s.to_string()))
    }
}

#[derive(ValueEnum, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Graph,
}

/// A function is the same function iff name and file both match.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    pub name: String,
    pub file: String,
}

impl FunctionIdentity {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }

    /// Stable node key, shifted to stay positive as a signed store integer.
    pub fn id(&self) -> u64 {
        let mut hasher = HighwayHasher::new(HASHER_SEED);
        hasher.append(self.name.as_bytes());
        hasher.append(&[0]);
        hasher.append(self.file.as_bytes());
        hasher.finalize64() >> 1
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.name)
    }
}

/// One deduplicated caller -> callee relationship.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Edge {
    pub caller_name: String,
    pub caller_file: String,
    pub callee_name: String,
    pub callee_file: String,
    /// Call site of the first sighting.
    pub line: u32,
    pub time_seconds: f64,
    pub memory_kilobytes: f64,
    pub occurrences: u64,
}

impl Edge {
    pub fn measurement(&self, kind: Kind) -> f64 {
        match kind {
            Kind::Time => self.time_seconds,
            Kind::Memory => self.memory_kilobytes,
        }
    }

    pub fn caller(&self) -> FunctionIdentity {
        FunctionIdentity::new(&self.caller_name, &self.caller_file)
    }

    pub fn callee(&self) -> FunctionIdentity {
        FunctionIdentity::new(&self.callee_name, &self.callee_file)
    }
}

/// Row of a caller-prefix query.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PrefixRow {
    pub caller: String,
    pub callee: String,
    pub time_sec: f64,
    pub memory_kb: f64,
    pub line: u32,
}

impl From<&Edge> for PrefixRow {
    fn from(edge: &Edge) -> Self {
        Self {
            caller: edge.caller_name.clone(),
            callee: edge.callee_name.clone(),
            time_sec: edge.time_seconds,
            memory_kb: edge.memory_kilobytes,
            line: edge.line,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(value_enum, short, long, env = "APOLLON_BACKEND", default_value_t = Backend::Memory)]
    pub backend: Backend,
    #[arg(long, env = "NEO4J_URL", default_value_t = String::from("http://localhost:7474"))]
    pub neo4j_url: String,
    #[arg(long, env = "NEO4J_USER", default_value_t = String::from("neo4j"))]
    pub neo4j_user: String,
    #[arg(long, env = "NEO4J_PASSWORD", default_value_t = String::from("neo4j"))]
    pub neo4j_password: String,
    #[arg(long, env = "NEO4J_DATABASE", default_value_t = String::from("neo4j"))]
    pub neo4j_database: String,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = "Inspect the hottest call edges of a cachegrind trace")]
pub struct Args {
    /// Cachegrind trace to analyze.
    pub trace: PathBuf,
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long, help = "initial output template (tera syntax).")]
    pub template: Option<String>,
    #[arg(short, long, env = "APOLLON_LOG", default_value_t = tracing::Level::INFO)]
    pub log_level: tracing::Level,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = "Serve ranked call edges of a cachegrind trace over http")]
pub struct ServerArgs {
    /// Cachegrind trace to analyze.
    pub trace: PathBuf,
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long, env = "APOLLON_PORT", default_value_t = 8082)]
    pub port: u16,
    #[arg(long, default_value_t = String::from(DEFAULT_PREFIX), help = "caller prefix served on /.")]
    pub default_prefix: String,
    #[arg(short, long, env = "APOLLON_LOG", default_value_t = tracing::Level::INFO)]
    pub log_level: tracing::Level,
}
