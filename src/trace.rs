// in-memory call tree as handed over by the trace parser.
// functions live in an arena and calls refer to callees by index, so
// recursive and mutually recursive programs are plain cycles of ids.

use std::collections::{BTreeMap, HashMap};

use crate::defs::{FunctionIdentity, Kind};

pub const MAIN_FUNCTION_NAMES: [&str; 2] = ["{main}", "main"];

/// Raw counters keyed by event name ("Time", "Memory", ...).
pub type Counters = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

#[derive(Debug, Clone)]
pub struct Call {
    pub callee: FunctionId,
    pub line: u32,
    pub counters: Counters,
}

impl Call {
    pub fn raw(&self, kind: Kind) -> i64 {
        self.counters.get(kind.event_name()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub identity: FunctionIdentity,
    /// Self cost, summed over all cost lines of the function.
    pub counters: Counters,
    pub calls: Vec<Call>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn file(&self) -> &str {
        &self.identity.file
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraceHeader {
    pub creator: Option<String>,
    pub cmd: Option<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub header: TraceHeader,
    functions: Vec<Function>,
    index: HashMap<FunctionIdentity, FunctionId>,
    main: Option<FunctionId>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name` in `file`, creating the function on first use.
    pub fn intern(&mut self, name: &str, file: &str) -> FunctionId {
        let identity = FunctionIdentity::new(name, file);
        if let Some(id) = self.index.get(&identity) {
            return *id;
        }
        let id = FunctionId(self.functions.len());
        self.functions.push(Function {
            identity: identity.clone(),
            counters: Counters::new(),
            calls: Vec::new(),
        });
        self.index.insert(identity, id);
        id
    }

    pub fn lookup(&self, name: &str, file: &str) -> Option<FunctionId> {
        self.index.get(&FunctionIdentity::new(name, file)).copied()
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i), f))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn add_cost<'a>(&mut self, id: FunctionId, costs: impl IntoIterator<Item = (&'a str, i64)>) {
        let counters = &mut self.functions[id.0].counters;
        for (event, value) in costs {
            let total = counters.entry(event.to_string()).or_insert(0);
            *total = total.saturating_add(value);
        }
    }

    pub fn add_call<'a>(
        &mut self,
        caller: FunctionId,
        callee: FunctionId,
        line: u32,
        costs: impl IntoIterator<Item = (&'a str, i64)>,
    ) {
        let counters = costs
            .into_iter()
            .map(|(event, value)| (event.to_string(), value))
            .collect();
        self.functions[caller.0].calls.push(Call {
            callee,
            line,
            counters,
        });
    }

    pub fn set_main(&mut self, id: FunctionId) {
        self.main = Some(id);
    }

    /// The explicitly chosen root, else the first function named like an entry point.
    pub fn main_function(&self) -> Option<FunctionId> {
        self.main.or_else(|| {
            MAIN_FUNCTION_NAMES.iter().find_map(|main| {
                self.functions
                    .iter()
                    .position(|f| f.name() == *main)
                    .map(FunctionId)
            })
        })
    }

    /// Inclusive raw cost: own cost lines plus the cost of every outgoing call.
    /// Sums saturate at the `i64` bounds.
    pub fn raw_measurement(&self, id: FunctionId, kind: Kind) -> i64 {
        let function = self.function(id);
        let own = function
            .counters
            .get(kind.event_name())
            .copied()
            .unwrap_or(0);
        function
            .calls
            .iter()
            .fold(own, |acc, call| acc.saturating_add(call.raw(kind)))
    }

    pub fn measurement(&self, id: FunctionId, kind: Kind) -> f64 {
        kind.convert(self.raw_measurement(id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_by_name_and_file() {
        let mut trace = Trace::new();
        let a = trace.intern("foo", "a.php");
        let b = trace.intern("foo", "b.php");
        assert_ne!(a, b);
        assert_eq!(trace.intern("foo", "a.php"), a);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.lookup("foo", "b.php"), Some(b));
        assert_eq!(trace.lookup("bar", "b.php"), None);
    }

    #[test]
    fn main_function_prefers_explicit_root() {
        let mut trace = Trace::new();
        let other = trace.intern("boot", "a.php");
        let main = trace.intern("{main}", "a.php");
        assert_eq!(trace.main_function(), Some(main));
        trace.set_main(other);
        assert_eq!(trace.main_function(), Some(other));
    }

    #[test]
    fn no_main_function() {
        let mut trace = Trace::new();
        trace.intern("foo", "a.php");
        assert_eq!(trace.main_function(), None);
    }

    #[test]
    fn measurement_is_inclusive() {
        let mut trace = Trace::new();
        let main = trace.intern("{main}", "a.php");
        let foo = trace.intern("foo", "a.php");
        trace.add_cost(main, [("Time", 500_000), ("Memory", 100)]);
        trace.add_call(main, foo, 3, [("Time", 1_500_000), ("Memory", 900)]);
        assert_eq!(trace.raw_measurement(main, Kind::Time), 2_000_000);
        assert_eq!(trace.measurement(main, Kind::Time), 2.0);
        assert_eq!(trace.measurement(main, Kind::Memory), 1.0);
        assert_eq!(trace.measurement(foo, Kind::Memory), 0.0);
    }
}
