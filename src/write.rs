use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::defs::{Edge, FunctionIdentity};
use crate::rank::RankingIndex;

/// On-disk form of a ranked edge set.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EdgeReport {
    pub root: FunctionIdentity,
    pub reference_time_sec: f64,
    pub reference_memory_kb: f64,
    /// Discovery order.
    pub edges: Vec<Edge>,
}

impl From<&RankingIndex> for EdgeReport {
    fn from(index: &RankingIndex) -> Self {
        let extraction = index.extraction();
        Self {
            root: extraction.root.clone(),
            reference_time_sec: extraction.reference_time,
            reference_memory_kb: extraction.reference_memory,
            edges: extraction.edges.clone(),
        }
    }
}

pub fn write_report(index: &RankingIndex, out_file: &Path) -> Result<(), anyhow::Error> {
    let outfile = File::create(out_file)?;
    let mut bufwriter = BufWriter::new(outfile);
    serde_json::to_writer_pretty(&mut bufwriter, &EdgeReport::from(index))?;
    bufwriter.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::trace::Trace;
    use std::fs;

    #[test]
    fn report_round_trips_through_disk() {
        let mut trace = Trace::new();
        let main = trace.intern("{main}", "a.php");
        let foo = trace.intern("foo", "b.php");
        trace.add_call(main, foo, 3, [("Time", 2_000_000), ("Memory", 4_096)]);
        let index = RankingIndex::build(extract(&trace, "t").unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edges.json");
        write_report(&index, &path).unwrap();

        let report: EdgeReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.root, FunctionIdentity::new("{main}", "a.php"));
        assert_eq!(report.reference_time_sec, 2.0);
        assert_eq!(report.edges, index.edges());
    }
}
