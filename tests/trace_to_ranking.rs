//! Integration test: read a recursive xdebug trace from disk, extract its
//! call edges and rank them.

use std::io::Write;
use std::path::{Path, PathBuf};

use apollon::analyzer::{Analyzer, MemoryAnalyzer};
use apollon::defs::{FunctionIdentity, Kind};
use apollon::error::AnalyzeError;
use apollon::rank::RankingIndex;
use apollon::read::read_extraction;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn callees(edges: &[&apollon::defs::Edge]) -> Vec<String> {
    edges.iter().map(|e| format!("{}->{}", e.caller_name, e.callee_name)).collect()
}

#[test]
fn recursive_trace_is_deduplicated() {
    let extraction = read_extraction(&fixture("recursive.cachegrind")).expect("fixture should load");
    assert_eq!(extraction.root, FunctionIdentity::new("{main}", "/srv/app/public/index.php"));

    let found: Vec<(String, u64)> = extraction
        .edges
        .iter()
        .map(|e| (format!("{}->{}", e.caller_name, e.callee_name), e.occurrences))
        .collect();
    assert_eq!(
        found,
        [
            ("{main}->AppKernel->boot".to_string(), 2),
            ("AppKernel->boot->Tree->walk".to_string(), 1),
            ("Tree->walk->php::count".to_string(), 2),
            ("Tree->walk->Tree->visit".to_string(), 2),
            ("Tree->visit->Tree->walk".to_string(), 2),
        ]
    );

    let boot = &extraction.edges[0];
    assert_eq!(boot.line, 5);
    assert_eq!(boot.time_seconds, 1.5);
    assert_eq!(boot.memory_kilobytes, 6.144);
    assert_eq!(extraction.edges[2].callee_file, "php:internal");
    assert_eq!(extraction.functions().len(), 5);
}

#[test]
fn ranked_views_over_the_fixture() {
    let index = RankingIndex::build(read_extraction(&fixture("recursive.cachegrind")).unwrap());
    assert_eq!(index.reference(Kind::Time), 3.501);
    assert_eq!(index.reference(Kind::Memory), 8.192);

    assert_eq!(
        callees(&index.top(3, Kind::Time)),
        ["{main}->AppKernel->boot", "AppKernel->boot->Tree->walk", "Tree->walk->Tree->visit"]
    );
    assert_eq!(
        callees(&index.top(10, Kind::Memory)),
        [
            "{main}->AppKernel->boot",
            "AppKernel->boot->Tree->walk",
            "Tree->visit->Tree->walk",
            "Tree->walk->Tree->visit",
            "Tree->walk->php::count",
        ]
    );
    assert!(index.top(0, Kind::Memory).is_empty());
    assert!(matches!(index.top_named(5, "Bogus"), Err(AnalyzeError::InvalidKind(_))));

    let first = index.first().unwrap();
    let share = index.percentage(first, Kind::Time).unwrap();
    assert!((share - 42.844).abs() < 0.001);
}

#[test]
fn memory_backend_answers_prefix_queries() {
    let analyzer = MemoryAnalyzer::new(read_extraction(&fixture("recursive.cachegrind")).unwrap());
    let rows = analyzer.top_by_caller_prefix(5, "Tree").unwrap();
    let pairs: Vec<(&str, &str)> = rows.iter().map(|r| (r.caller.as_str(), r.callee.as_str())).collect();
    assert_eq!(
        pairs,
        [
            ("Tree->walk", "Tree->visit"),
            ("Tree->visit", "Tree->walk"),
            ("Tree->walk", "php::count"),
        ]
    );
}

#[test]
fn missing_file_is_source_unavailable() {
    let err = read_extraction(&fixture("does-not-exist.cachegrind")).unwrap_err();
    assert!(matches!(err, AnalyzeError::SourceUnavailable { .. }));
}

#[test]
fn trace_without_main_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "events: Time Memory\nfl=(1) a.php\nfn=(1) helper\n1 2 3\n").unwrap();
    let err = read_extraction(file.path()).unwrap_err();
    assert!(matches!(err, AnalyzeError::NoRootFunction { .. }));
}

#[test]
fn broken_trace_reports_the_line() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "events: Time\nfl=(1) a.php\nfn=(1) {{main}}\ncfn=(9)\n").unwrap();
    let err = read_extraction(file.path()).unwrap_err();
    assert!(err.to_string().contains("line 4"));
}
