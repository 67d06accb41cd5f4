// turn a call tree into a flat list of caller -> callee edges.
// every distinct (caller, callee) pair becomes exactly one edge; the callee
// subtree is only walked on the first sighting of the pair, which is what
// terminates recursive traces.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{event, Level};

use crate::defs::{Edge, FunctionIdentity, Kind};
use crate::error::AnalyzeError;
use crate::trace::{FunctionId, Trace};

type EdgeKey<'t> = (&'t FunctionIdentity, &'t FunctionIdentity);

/// Result of one extraction run. Edges are in discovery order.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub root: FunctionIdentity,
    pub edges: Vec<Edge>,
    pub reference_time: f64,
    pub reference_memory: f64,
}

impl Extraction {
    /// Root edge: the first call made by the root function.
    pub fn first(&self) -> Option<&Edge> {
        self.edges.first()
    }

    pub fn reference(&self, kind: Kind) -> f64 {
        match kind {
            Kind::Time => self.reference_time,
            Kind::Memory => self.reference_memory,
        }
    }

    /// Distinct functions in discovery order, root first.
    pub fn functions(&self) -> Vec<FunctionIdentity> {
        let mut seen = HashSet::new();
        let mut functions = Vec::new();
        let endpoints = std::iter::once(self.root.clone())
            .chain(self.edges.iter().flat_map(|e| [e.caller(), e.callee()]));
        for identity in endpoints {
            if seen.insert(identity.clone()) {
                functions.push(identity);
            }
        }
        functions
    }
}

/// Per-run walker. The memo lives and dies with one extraction.
struct Extractor<'t> {
    trace: &'t Trace,
    seen: HashMap<EdgeKey<'t>, usize>,
    edges: Vec<Edge>,
}

impl<'t> Extractor<'t> {
    fn new(trace: &'t Trace) -> Self {
        Self {
            trace,
            seen: HashMap::new(),
            edges: Vec::new(),
        }
    }

    // pre-order dfs with an explicit stack of (function, next call index).
    // a new edge pushes its callee, so the callee is explored completely
    // before the caller's remaining calls, same as the recursive walk.
    fn walk(&mut self, root: FunctionId) {
        let trace = self.trace;
        let mut stack = vec![(root, 0usize)];
        while let Some(frame) = stack.last_mut() {
            let (current, next) = *frame;
            frame.1 += 1;
            let function = trace.function(current);
            let Some(call) = function.calls.get(next) else {
                stack.pop();
                continue;
            };

            let callee = trace.function(call.callee);
            match self.seen.entry((&function.identity, &callee.identity)) {
                Entry::Occupied(seen) => self.edges[*seen.get()].occurrences += 1,
                Entry::Vacant(slot) => {
                    slot.insert(self.edges.len());
                    self.edges.push(Edge {
                        caller_name: function.name().to_string(),
                        caller_file: function.file().to_string(),
                        callee_name: callee.name().to_string(),
                        callee_file: callee.file().to_string(),
                        line: call.line,
                        time_seconds: Kind::Time.convert(call.raw(Kind::Time)),
                        memory_kilobytes: Kind::Memory.convert(call.raw(Kind::Memory)),
                        occurrences: 1,
                    });
                    stack.push((call.callee, 0));
                }
            }
        }
    }
}

/// Extracts the deduplicated edge set of `trace`, starting at its main function.
///
/// `label` names the trace in errors and logs.
pub fn extract(trace: &Trace, label: &str) -> Result<Extraction, AnalyzeError> {
    let root = trace
        .main_function()
        .ok_or_else(|| AnalyzeError::NoRootFunction {
            trace: label.to_string(),
        })?;

    let mut extractor = Extractor::new(trace);
    extractor.walk(root);
    event!(
        Level::DEBUG,
        "extracted {} edges from {} functions of {}",
        extractor.edges.len(),
        trace.len(),
        label
    );

    Ok(Extraction {
        root: trace.function(root).identity.clone(),
        edges: extractor.edges,
        reference_time: trace.measurement(root, Kind::Time),
        reference_memory: trace.measurement(root, Kind::Memory),
    })
}
