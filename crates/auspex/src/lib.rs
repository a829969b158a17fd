//! Memory leak diagnosis for HPROF heap snapshots.
//!
//! A snapshot is indexed in one streaming pass ([`graph::HprofIndex`]), then
//! queried through [`graph::HeapGraph`]. The [`scan`] heuristics pick leak
//! suspects, [`path::PathFinder`] finds the shortest path from a GC root to
//! each of them and [`report::ReportBuilder`] groups those paths into a
//! [`report::HeapReport`].

use std::path::Path;
use std::time::Instant;

use log::info;

pub mod config;
pub mod error;
pub mod graph;
pub mod hprof;
pub mod path;
pub mod report;
pub mod scan;

pub use config::AnalyzerConfig;
pub use error::{AuspexError, FormatError, Result};
pub use graph::HeapGraph;
pub use hprof::reader::{ByteSource, BytesSource, FileSource};
pub use report::{HeapReport, PhaseTimings, RunContext};

use crate::path::{PathFinder, PathFindingResults};
use crate::report::ReportBuilder;
use crate::scan::{LeakScanner, ScanOutcome};

/// One analysis run over one snapshot. Owns the graph and with it every cache
/// used during the run.
pub struct Analysis {
    config: AnalyzerConfig,
    graph: HeapGraph,
    timings: PhaseTimings,
}

impl Analysis {
    pub fn open(source: &dyn ByteSource, config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let graph = HeapGraph::open(source, &config.graph)?;
        let index_seconds = start.elapsed().as_secs_f64();
        let timings = PhaseTimings { index_seconds, ..PhaseTimings::default() };
        Ok(Self { config, graph, timings })
    }

    pub fn graph(&self) -> &HeapGraph {
        &self.graph
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn timings(&self) -> PhaseTimings {
        self.timings
    }

    pub fn scan(&mut self) -> Result<ScanOutcome> {
        let start = Instant::now();
        let outcome = LeakScanner::new(&self.graph, &self.config.scanner).scan()?;
        self.timings.scan_seconds = start.elapsed().as_secs_f64();
        Ok(outcome)
    }

    pub fn find_paths(&mut self, scan: &ScanOutcome) -> Result<PathFindingResults> {
        let start = Instant::now();
        let finder = PathFinder::new(&self.graph, &self.config.path_finder);
        let results = finder.find_paths(&scan.suspects)?;
        self.timings.find_paths_seconds = start.elapsed().as_secs_f64();
        Ok(results)
    }

    pub fn report(
        &self,
        scan: &ScanOutcome,
        results: &PathFindingResults,
        context: &RunContext,
    ) -> HeapReport {
        let builder = ReportBuilder::new(&self.graph, &self.config.report);
        builder.build(scan, results, context, self.timings)
    }

    /// Scans, finds paths and builds the report.
    pub fn run(mut self, context: &RunContext) -> Result<HeapReport> {
        let scan = self.scan()?;
        let results = self.find_paths(&scan)?;
        let report = self.report(&scan, &results, context);
        info!(
            "{} application and {} library leak paths, analysis took {:.3}s",
            report.gc_paths.len(),
            report.library_gc_paths.len(),
            self.timings.index_seconds + self.timings.scan_seconds + self.timings.find_paths_seconds
        );
        Ok(report)
    }
}

pub fn analyze_source(
    source: &dyn ByteSource,
    config: AnalyzerConfig,
    context: &RunContext,
) -> Result<HeapReport> {
    Analysis::open(source, config)?.run(context)
}

pub fn analyze_file(
    path: impl AsRef<Path>,
    config: AnalyzerConfig,
    context: &RunContext,
) -> Result<HeapReport> {
    analyze_source(&FileSource::new(path.as_ref()), config, context)
}
