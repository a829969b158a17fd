#![allow(dead_code)]

use auspex::config::GraphConfig;
use auspex::graph::{HeapGraph, HeapValue};
use auspex::hprof::tag::FieldType;
use auspex::hprof::writer::SnapshotBuilder;
use auspex::{BytesSource, HeapReport, PhaseTimings};

/// Defines a class whose fields are all references.
pub fn reference_class(builder: &mut SnapshotBuilder, name: &str, fields: &[&str]) -> u64 {
    let fields: Vec<_> = fields.iter().map(|f| (*f, FieldType::Reference)).collect();
    builder.class(name, None, &fields)
}

/// Instance of a class made by [`reference_class`].
pub fn references(builder: &mut SnapshotBuilder, class_id: u64, targets: &[u64]) -> u64 {
    let mut values: Vec<_> = targets.iter().map(|t| HeapValue::Reference(*t)).collect();
    values.extend(builder.object_super_values());
    builder.instance(class_id, &values)
}

pub fn open(builder: SnapshotBuilder) -> HeapGraph {
    HeapGraph::open(&BytesSource::new(builder.build()), &GraphConfig::default()).unwrap()
}

pub fn without_timings(mut report: HeapReport) -> HeapReport {
    report.running_info.timings = PhaseTimings::default();
    report
}
