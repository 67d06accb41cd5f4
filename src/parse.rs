// cachegrind/callgrind text format, as written by xdebug and valgrind.
// only what the call graph needs is kept: function and file names
// (with name compression), self costs and call costs per event.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::io::BufRead;
use thiserror::Error;
use tracing::{event, Level};

use crate::trace::{FunctionId, Trace};

lazy_static! {
    static ref HEADER_RE: Regex = Regex::new(r#"^(?P<key>[a-z]+):\s*(?P<value>.*)$"#).unwrap();
    static ref NAME_RE: Regex = Regex::new(
        r#"^(?P<spec>fl|fi|fe|fn|cfl|cfi|cfn|jfi|ob|cob)=\s*(?:\((?P<id>\d+)\))?\s*(?P<name>.*)$"#
    )
    .unwrap();
    static ref CALLS_RE: Regex = Regex::new(r#"^calls=\s*(?P<count>\d+)(?:\s+.*)?$"#).unwrap();
    // --collect-jumps output; jumps carry no cost for the call graph.
    static ref JUMP_RE: Regex = Regex::new(r#"^(?:jump|jcnd)="#).unwrap();
    // xdebug 3 writes "Time_(10ns)"; the unit suffix is not part of the event name.
    static ref EVENT_UNIT_RE: Regex = Regex::new(r#"_\(.*\)$"#).unwrap();
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: compressed name ({id}) used before it was defined")]
    UndefinedName { line: usize, id: u64 },
    #[error("line {line}: fn= before any fl=")]
    FunctionWithoutFile { line: usize },
    #[error("line {line}: calls= without a preceding cfn=")]
    CallWithoutTarget { line: usize },
    #[error("line {line}: calls= not followed by a cost line")]
    DanglingCall { line: usize },
    #[error("line {line}: cost line outside of a function")]
    CostOutsideFunction { line: usize },
    #[error("line {line}: cost line before the events: header")]
    MissingEvents { line: usize },
    #[error("line {line}: malformed cost line {text:?}")]
    MalformedCost { line: usize, text: String },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

enum State {
    Body,
    CallCost { callee: FunctionId, line: usize },
}

#[derive(Clone, Copy)]
enum NameSpace {
    File,
    Function,
    Object,
}

#[derive(Default)]
struct Names {
    files: HashMap<u64, String>,
    functions: HashMap<u64, String>,
    objects: HashMap<u64, String>,
}

impl Names {
    // "(3) name" defines id 3, "(3)" alone refers back to it.
    fn resolve(
        &mut self,
        space: NameSpace,
        id: Option<u64>,
        name: &str,
        line: usize,
    ) -> Result<String, ParseError> {
        let table = match space {
            NameSpace::File => &mut self.files,
            NameSpace::Function => &mut self.functions,
            NameSpace::Object => &mut self.objects,
        };
        match id {
            None => Ok(name.to_string()),
            Some(id) if !name.is_empty() => {
                table.insert(id, name.to_string());
                Ok(name.to_string())
            }
            Some(id) => table
                .get(&id)
                .cloned()
                .ok_or(ParseError::UndefinedName { line, id }),
        }
    }
}

struct Parser {
    trace: Trace,
    names: Names,
    positions: Vec<String>,
    last_positions: Vec<i64>,
    events: Vec<String>,
    file: Option<String>,
    function: Option<FunctionId>,
    callee_file: Option<String>,
    callee_name: Option<String>,
    state: State,
}

impl Parser {
    fn new() -> Self {
        Self {
            trace: Trace::new(),
            names: Names::default(),
            positions: vec!["line".to_string()],
            last_positions: vec![0],
            events: Vec::new(),
            file: None,
            function: None,
            callee_file: None,
            callee_name: None,
            state: State::Body,
        }
    }

    fn line(&mut self, row: &str, line: usize) -> Result<(), ParseError> {
        let row = row.trim_end();
        if row.is_empty() || row.starts_with('#') {
            return Ok(());
        }

        if let State::CallCost { callee, .. } = self.state {
            self.state = State::Body;
            let (call_line, costs) = self.costs(row, line)?;
            let caller = self.function.ok_or(ParseError::CostOutsideFunction { line })?;
            let events = &self.events;
            self.trace.add_call(
                caller,
                callee,
                call_line,
                events.iter().map(String::as_str).zip(costs),
            );
            return Ok(());
        }

        if let Some(captured) = NAME_RE.captures(row) {
            let id = captured.name("id").and_then(|x| x.as_str().parse().ok());
            let name = captured.name("name").map_or("", |x| x.as_str().trim());
            match &captured["spec"] {
                "fl" => {
                    self.file = Some(self.names.resolve(NameSpace::File, id, name, line)?);
                }
                "fi" | "fe" | "jfi" => {
                    // inlined code still costs the enclosing function.
                    self.names.resolve(NameSpace::File, id, name, line)?;
                }
                "fn" => {
                    let name = self.names.resolve(NameSpace::Function, id, name, line)?;
                    let file = self
                        .file
                        .as_deref()
                        .ok_or(ParseError::FunctionWithoutFile { line })?;
                    self.function = Some(self.trace.intern(&name, file));
                    self.callee_file = None;
                    self.callee_name = None;
                }
                "cfl" | "cfi" => {
                    self.callee_file = Some(self.names.resolve(NameSpace::File, id, name, line)?);
                }
                "cfn" => {
                    self.callee_name = Some(self.names.resolve(NameSpace::Function, id, name, line)?);
                }
                _ => {
                    self.names.resolve(NameSpace::Object, id, name, line)?;
                }
            }
            return Ok(());
        }

        if JUMP_RE.is_match(row) {
            return Ok(());
        }

        if CALLS_RE.is_match(row) {
            let name = self
                .callee_name
                .take()
                .ok_or(ParseError::CallWithoutTarget { line })?;
            // without cfl= the callee lives in the caller's file.
            let file = self
                .callee_file
                .take()
                .or_else(|| self.file.clone())
                .ok_or(ParseError::FunctionWithoutFile { line })?;
            let callee = self.trace.intern(&name, &file);
            self.state = State::CallCost { callee, line };
            return Ok(());
        }

        if let Some(captured) = HEADER_RE.captures(row) {
            let value = captured["value"].trim();
            match &captured["key"] {
                "events" => {
                    self.events = value
                        .split_whitespace()
                        .map(|e| EVENT_UNIT_RE.replace(e, "").into_owned())
                        .collect();
                    self.trace.header.events = self.events.clone();
                }
                "positions" => {
                    self.positions = value.split_whitespace().map(String::from).collect();
                    self.last_positions = vec![0; self.positions.len()];
                }
                "creator" => self.trace.header.creator = Some(value.to_string()),
                "cmd" => self.trace.header.cmd = Some(value.to_string()),
                key => event!(Level::TRACE, "skipping header {}", key),
            }
            return Ok(());
        }

        let function = self.function.ok_or(ParseError::CostOutsideFunction { line })?;
        let (_, costs) = self.costs(row, line)?;
        let events = &self.events;
        self.trace
            .add_cost(function, events.iter().map(String::as_str).zip(costs));
        Ok(())
    }

    // returns the source line of the cost line and its costs in event order.
    fn costs(&mut self, row: &str, line: usize) -> Result<(u32, Vec<i64>), ParseError> {
        if self.events.is_empty() {
            return Err(ParseError::MissingEvents { line });
        }
        let malformed = || ParseError::MalformedCost {
            line,
            text: row.to_string(),
        };

        let mut tokens = row.split_whitespace();
        for slot in self.last_positions.iter_mut() {
            let token = tokens.next().ok_or_else(malformed)?;
            *slot = position(token, *slot).ok_or_else(malformed)?;
        }
        let costs = tokens
            .map(|t| t.parse::<i64>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;
        if costs.len() > self.events.len() {
            return Err(malformed());
        }

        let source_line = self
            .positions
            .iter()
            .position(|p| p == "line")
            .and_then(|i| self.last_positions.get(i))
            .copied()
            .unwrap_or(0);
        Ok((u32::try_from(source_line).unwrap_or(0), costs))
    }

    fn finish(self, lines: usize) -> Result<Trace, ParseError> {
        if let State::CallCost { line, .. } = self.state {
            return Err(ParseError::DanglingCall { line });
        }
        event!(
            Level::DEBUG,
            "parsed {} lines into {} functions",
            lines,
            self.trace.len()
        );
        Ok(self.trace)
    }
}

// absolute, relative ("+3", "-2") or repeated ("*") position.
fn position(token: &str, previous: i64) -> Option<i64> {
    if token == "*" {
        return Some(previous);
    }
    if let Some(delta) = token.strip_prefix('+') {
        return delta.parse::<i64>().ok().and_then(|d| previous.checked_add(d));
    }
    if let Some(delta) = token.strip_prefix('-') {
        return delta.parse::<i64>().ok().and_then(|d| previous.checked_sub(d));
    }
    match token.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

/// Parses a cachegrind trace from `reader`.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Trace, ParseError> {
    let mut parser = Parser::new();
    let mut count = 0;
    for (i, row) in reader.lines().enumerate() {
        parser.line(&row?, i + 1)?;
        count = i + 1;
    }
    parser.finish(count)
}

pub fn parse_str(data: &str) -> Result<Trace, ParseError> {
    parse_trace(data.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::Kind;

    const SAMPLE: &str = "version: 1
creator: xdebug 2.5.5 (PHP 7.1.0)
cmd: /var/www/index.php
part: 1
positions: line

events: Time Memory

fl=(1) php:internal
fn=(1) php::strlen
4 3 0

fl=(2) /var/www/lib.php
fn=(2) helper
10 20 64
cfl=(1)
cfn=(1)
calls=1 0 0
11 3 0

fl=(3) /var/www/index.php
fn=(3) {main}

summary: 2000500 3136

0 1000000 2048
cfl=(2)
cfn=(2)
calls=1 0 0
5 23 64
cfl=(2)
cfn=(2)
calls=1 0 0
6 1000477 1024
";

    #[test]
    fn parses_functions_and_calls() {
        let trace = parse_str(SAMPLE).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.header.creator.as_deref(), Some("xdebug 2.5.5 (PHP 7.1.0)"));
        assert_eq!(trace.header.events, ["Time", "Memory"]);

        let main = trace.main_function().unwrap();
        let function = trace.function(main);
        assert_eq!(function.file(), "/var/www/index.php");
        assert_eq!(function.calls.len(), 2);
        assert_eq!(function.calls[1].line, 6);
        assert_eq!(function.calls[1].raw(Kind::Time), 1_000_477);

        let helper = trace.lookup("helper", "/var/www/lib.php").unwrap();
        assert_eq!(function.calls[0].callee, helper);
        let strlen = trace.function(helper).calls[0].callee;
        assert_eq!(trace.function(strlen).name(), "php::strlen");
        assert_eq!(trace.function(strlen).file(), "php:internal");
    }

    #[test]
    fn main_measurement_is_inclusive() {
        let trace = parse_str(SAMPLE).unwrap();
        let main = trace.main_function().unwrap();
        assert_eq!(trace.raw_measurement(main, Kind::Time), 2_000_500);
        assert_eq!(trace.raw_measurement(main, Kind::Memory), 3_136);
    }

    #[test]
    fn callee_defaults_to_caller_file() {
        let data = "events: Time Memory
fl=(1) a.php
fn=(1) {main}
cfn=(2) local
calls=1 0 0
7 10 20
";
        let trace = parse_str(data).unwrap();
        assert!(trace.lookup("local", "a.php").is_some());
    }

    #[test]
    fn xdebug3_event_units_are_dropped() {
        let data = "events: Time_(10ns) Memory_(bytes)
fl=(1) a.php
fn=(1) {main}
1 5 6
";
        let trace = parse_str(data).unwrap();
        assert_eq!(trace.header.events, ["Time", "Memory"]);
        let main = trace.main_function().unwrap();
        assert_eq!(trace.raw_measurement(main, Kind::Memory), 6);
    }

    #[test]
    fn relative_positions() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
10 1
cfn=(2) f
calls=1 0
+2 5
cfn=(2)
calls=1 0
* 5
cfn=(2)
calls=1 0
-4 5
";
        let trace = parse_str(data).unwrap();
        let main = trace.main_function().unwrap();
        let lines: Vec<u32> = trace.function(main).calls.iter().map(|c| c.line).collect();
        assert_eq!(lines, [12, 12, 8]);
    }

    #[test]
    fn undefined_compressed_name() {
        let data = "events: Time
fl=(1) a.php
fn=(7)
";
        let err = parse_str(data).unwrap_err();
        assert!(matches!(err, ParseError::UndefinedName { line: 3, id: 7 }));
    }

    #[test]
    fn call_without_target() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
calls=1 0
3 4
";
        let err = parse_str(data).unwrap_err();
        assert!(matches!(err, ParseError::CallWithoutTarget { line: 4 }));
    }

    #[test]
    fn cost_outside_function() {
        let err = parse_str("events: Time\n3 4\n").unwrap_err();
        assert!(matches!(err, ParseError::CostOutsideFunction { line: 2 }));
    }

    #[test]
    fn malformed_cost_line() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
3 four
";
        let err = parse_str(data).unwrap_err();
        assert!(matches!(err, ParseError::MalformedCost { line: 4, .. }));
    }

    #[test]
    fn dangling_call() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
cfn=(2) f
calls=1 0
";
        let err = parse_str(data).unwrap_err();
        assert!(matches!(err, ParseError::DanglingCall { line: 5 }));
    }

    #[test]
    fn position_overflow_is_malformed() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
9223372036854775807 1
+1 1
";
        let err = parse_str(data).unwrap_err();
        assert!(matches!(err, ParseError::MalformedCost { line: 5, .. }));

        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
-9223372036854775807 1
-2 1
";
        assert!(matches!(
            parse_str(data).unwrap_err(),
            ParseError::MalformedCost { line: 5, .. }
        ));
    }

    #[test]
    fn huge_costs_saturate() {
        let data = "events: Time
fl=(1) a.php
fn=(1) {main}
1 9223372036854775807
2 9223372036854775807
cfn=(2) f
calls=1 0
3 9223372036854775807
";
        let trace = parse_str(data).unwrap();
        let main = trace.main_function().unwrap();
        assert_eq!(trace.function(main).counters["Time"], i64::MAX);
        assert_eq!(trace.raw_measurement(main, Kind::Time), i64::MAX);
    }

    #[test]
    fn jump_lines_are_skipped() {
        let data = "events: Ir
positions: line
fl=(1) a.c
fn=(1) main
16 3
jump=2 +3
+1 4
jcnd=1/2 18
jfi=(2) b.h
18 1
cfi=(2)
cfn=(2) helper
calls=1 20
18 7
";
        let trace = parse_str(data).unwrap();
        let main = trace.main_function().unwrap();
        assert_eq!(trace.function(main).counters["Ir"], 8);
        assert_eq!(trace.function(main).calls[0].line, 18);
        assert!(trace.lookup("helper", "b.h").is_some());
    }
}
