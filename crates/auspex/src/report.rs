//! Leak paths grouped into a serializable report.

use std::fmt::Write;

use chrono::DateTime;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ReportConfig;
use crate::error::Result;
use crate::graph::heap::HeapGraph;
use crate::path::finder::{LeakPath, PathFindingResults, PathReference};
use crate::path::node::ReferenceType;
use crate::scan::ScanOutcome;

/// Context supplied by whoever asked for the analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub dump_reason: Option<String>,
    pub current_page: Option<String>,
    pub usage_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimings {
    pub index_seconds: f64,
    pub scan_seconds: f64,
    pub find_paths_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningInfo {
    pub hprof_version: String,
    pub identifier_size: usize,
    pub dump_time: Option<String>,
    pub dump_reason: Option<String>,
    pub current_page: Option<String>,
    pub usage_seconds: Option<u64>,
    pub object_count: usize,
    pub gc_root_count: usize,
    pub dropped_gc_roots: usize,
    pub skipped_objects: usize,
    pub dangling_references: usize,
    pub timings: PhaseTimings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    pub reference: String,
    pub reference_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_class: Option<String>,
}

/// Leak paths sharing a signature, represented by the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcPath {
    pub instance_count: usize,
    pub leak_reason: String,
    pub gc_root: String,
    pub signature: String,
    pub path: Vec<PathItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_leak: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_name: String,
    pub instance_count: u64,
    pub leak_instance_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakObject {
    pub class_name: String,
    pub size: u64,
    pub object_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapReport {
    pub running_info: RunningInfo,
    pub gc_paths: Vec<GcPath>,
    pub library_gc_paths: Vec<GcPath>,
    pub class_infos: Vec<ClassInfo>,
    pub leak_objects: Vec<LeakObject>,
    pub analysis_done: bool,
}

impl HeapReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Human readable summary of the leak paths and class counts.
    pub fn render_text(&self) -> String {
        let info = &self.running_info;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}, {} byte identifiers, {} objects",
            info.hprof_version, info.identifier_size, info.object_count
        );
        let _ = writeln!(
            out,
            "{} application leak paths, {} library leak paths",
            self.gc_paths.len(),
            self.library_gc_paths.len()
        );
        let sections = [("application", &self.gc_paths), ("library", &self.library_gc_paths)];
        for (title, paths) in sections {
            for (idx, gc_path) in paths.iter().enumerate() {
                let _ = writeln!(out);
                let _ = writeln!(
                    out,
                    "{title} #{} {} ({} instances)",
                    idx + 1,
                    gc_path.leak_reason,
                    gc_path.instance_count
                );
                if let Some(library_leak) = &gc_path.library_leak {
                    let _ = writeln!(out, "    known leak: {library_leak}");
                }
                let _ = writeln!(out, "    gc root: {}", gc_path.gc_root);
                for item in &gc_path.path {
                    let _ = writeln!(out, "    -> {} ({})", item.reference, item.reference_type);
                }
                if let Some(size) = gc_path.retained_size {
                    let _ = writeln!(out, "    retained {size} bytes");
                }
            }
        }
        if !self.class_infos.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "classes:");
            for class in &self.class_infos {
                let _ = writeln!(
                    out,
                    "    {} {} ({} leaking)",
                    class.class_name, class.instance_count, class.leak_instance_count
                );
            }
        }
        out
    }
}

fn render_reference(reference: &PathReference) -> PathItem {
    let origin = &reference.origin_class_name;
    let text = match reference.reference_type {
        ReferenceType::ArrayEntry => format!("{origin}{}", reference.display_name()),
        _ => format!("{origin}.{}", reference.display_name()),
    };
    let declared_class = Some(reference.declared_class.clone()).filter(|c| !c.is_empty());
    let reference_type = reference.reference_type.as_str().to_string();
    PathItem { reference: text, reference_type, declared_class }
}

/// Digest of the root kind, the first `depth` references and the leaking
/// class. Array indexes are left out.
pub fn leak_signature(path: &LeakPath, depth: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.gc_root.kind.name());
    for reference in path.references.iter().take(depth) {
        hasher.update(b"|");
        hasher.update(&reference.origin_class_name);
        hasher.update(b".");
        hasher.update(reference.generic_name());
    }
    hasher.update(b"|");
    hasher.update(&path.leaking_class_name);
    hex::encode(hasher.finalize())
}

/// Turns leak paths into [`GcPath`]s, grouping those with the same root kind,
/// leading references and leaking class.
pub struct ReportBuilder<'a> {
    graph: &'a HeapGraph,
    config: &'a ReportConfig,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(graph: &'a HeapGraph, config: &'a ReportConfig) -> Self {
        Self { graph, config }
    }

    pub fn build(
        &self,
        scan: &ScanOutcome,
        results: &PathFindingResults,
        context: &RunContext,
        timings: PhaseTimings,
    ) -> HeapReport {
        let mut gc_paths: Vec<GcPath> = vec![];
        let mut library_gc_paths: Vec<GcPath> = vec![];
        let mut groups: FxHashMap<(bool, String), usize> = FxHashMap::default();

        for path in &results.paths {
            let is_library = path.library_leak.is_some();
            let signature = leak_signature(path, self.config.signature_depth);
            let retained_size = results.retained_size(path.leaking_object_id);
            let bucket = if is_library { &mut library_gc_paths } else { &mut gc_paths };
            if let Some(idx) = groups.get(&(is_library, signature.clone())) {
                let group = &mut bucket[*idx];
                group.instance_count += 1;
                if let Some(size) = retained_size {
                    group.retained_size = Some(group.retained_size.unwrap_or(0) + size);
                }
                continue;
            }

            let mut items: Vec<PathItem> = path.references.iter().map(render_reference).collect();
            items.push(PathItem {
                reference: path.leaking_class_name.clone(),
                reference_type: path.leaking_kind.type_name().to_string(),
                declared_class: None,
            });
            groups.insert((is_library, signature.clone()), bucket.len());
            bucket.push(GcPath {
                instance_count: 1,
                leak_reason: scan.reasons.get(&path.leaking_object_id).cloned().unwrap_or_default(),
                gc_root: path.gc_root.kind.description().to_string(),
                signature,
                path: items,
                retained_size,
                library_leak: path.library_leak.as_ref().map(|m| m.pattern().to_string()),
            });
        }

        let header = self.graph.header();
        let running_info = RunningInfo {
            hprof_version: header.version.version_string().to_string(),
            identifier_size: header.identifier_size,
            dump_time: DateTime::from_timestamp_millis(header.timestamp as i64)
                .map(|t| t.to_rfc3339()),
            dump_reason: context.dump_reason.clone(),
            current_page: context.current_page.clone(),
            usage_seconds: context.usage_seconds,
            object_count: self.graph.index().object_count(),
            gc_root_count: self.graph.gc_roots().len(),
            dropped_gc_roots: self.graph.index().dropped_gc_roots(),
            skipped_objects: scan.skipped_objects,
            dangling_references: results.dangling_references,
            timings,
        };
        HeapReport {
            running_info,
            gc_paths,
            library_gc_paths,
            class_infos: scan
                .class_counts
                .iter()
                .map(|c| ClassInfo {
                    class_name: c.class_name.clone(),
                    instance_count: c.instance_count,
                    leak_instance_count: c.leak_count,
                })
                .collect(),
            leak_objects: scan
                .leak_records
                .iter()
                .map(|r| LeakObject {
                    class_name: r.class_name.clone(),
                    size: r.size,
                    object_id: r.object_id,
                    ext_detail: r.detail.clone(),
                })
                .collect(),
            analysis_done: true,
        }
    }
}
