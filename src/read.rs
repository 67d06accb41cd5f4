use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{event, Level};

use crate::error::AnalyzeError;
use crate::extract::{extract, Extraction};
use crate::parse::parse_trace;
use crate::trace::Trace;

pub fn read_trace(in_file: &Path) -> Result<Trace, AnalyzeError> {
    let file = File::open(in_file).map_err(|source| AnalyzeError::SourceUnavailable {
        path: in_file.to_path_buf(),
        source,
    })?;
    event!(Level::INFO, "parsing {}", in_file.display());
    parse_trace(BufReader::new(file)).map_err(|source| AnalyzeError::Parse {
        path: in_file.to_path_buf(),
        source,
    })
}

/// Reads `in_file` and extracts its edge set.
pub fn read_extraction(in_file: &Path) -> Result<Extraction, AnalyzeError> {
    let trace = read_trace(in_file)?;
    let extraction = extract(&trace, &in_file.display().to_string())?;
    event!(
        Level::INFO,
        "{} functions, {} distinct call edges",
        trace.len(),
        extraction.edges.len()
    );
    Ok(extraction)
}
