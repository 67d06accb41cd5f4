use crate::defs::{Edge, FunctionIdentity, Kind};
use crate::error::AnalyzeError;
use crate::extract::Extraction;

/// The edge set of one extraction with a time and a memory ordering.
///
/// Both orderings index into the same owned edges. Sorting is stable, so
/// equal measurements keep their discovery order.
#[derive(Debug, Clone)]
pub struct RankingIndex {
    extraction: Extraction,
    by_time: Vec<usize>,
    by_memory: Vec<usize>,
}

impl RankingIndex {
    pub fn build(extraction: Extraction) -> Self {
        let by_time = sorted_desc(&extraction.edges, Kind::Time);
        let by_memory = sorted_desc(&extraction.edges, Kind::Memory);
        Self {
            extraction,
            by_time,
            by_memory,
        }
    }

    fn view(&self, kind: Kind) -> &[usize] {
        match kind {
            Kind::Time => &self.by_time,
            Kind::Memory => &self.by_memory,
        }
    }

    pub fn top(&self, n: usize, kind: Kind) -> Vec<&Edge> {
        self.view(kind)
            .iter()
            .take(n)
            .map(|&i| &self.extraction.edges[i])
            .collect()
    }

    /// `top` for callers holding untyped input; `n <= 0` is an empty result.
    pub fn top_named(&self, n: i64, kind: &str) -> Result<Vec<&Edge>, AnalyzeError> {
        let kind: Kind = kind.parse()?;
        Ok(self.top(usize::try_from(n).unwrap_or(0), kind))
    }

    pub fn reference(&self, kind: Kind) -> f64 {
        self.extraction.reference(kind)
    }

    pub fn reference_named(&self, kind: &str) -> Result<f64, AnalyzeError> {
        Ok(self.reference(kind.parse()?))
    }

    /// Share of the root's measurement, `None` when there is nothing to divide by.
    pub fn percentage(&self, edge: &Edge, kind: Kind) -> Option<f64> {
        let share = edge.measurement(kind) / self.reference(kind) * 100.0;
        share.is_finite().then_some(share)
    }

    pub fn first(&self) -> Option<&Edge> {
        self.extraction.first()
    }

    pub fn root(&self) -> &FunctionIdentity {
        &self.extraction.root
    }

    /// Edges in discovery order.
    pub fn edges(&self) -> &[Edge] {
        &self.extraction.edges
    }

    pub fn extraction(&self) -> &Extraction {
        &self.extraction
    }

    pub fn len(&self) -> usize {
        self.extraction.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extraction.edges.is_empty()
    }
}

fn sorted_desc(edges: &[Edge], kind: Kind) -> Vec<usize> {
    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by(|&a, &b| edges[b].measurement(kind).total_cmp(&edges[a].measurement(kind)));
    order
}
