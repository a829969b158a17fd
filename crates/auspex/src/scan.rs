//! Structural heuristics picking the objects worth a path search.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::error::Result;
use crate::graph::heap::HeapGraph;
use crate::graph::object::{HeapClass, HeapInstance};

/// An object recorded because of its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakRecord {
    pub object_id: u64,
    pub class_name: String,
    pub size: u64,
    pub reason: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCount {
    pub class_id: u64,
    pub class_name: String,
    pub instance_count: u64,
    pub leak_count: u64,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub suspects: BTreeSet<u64>,
    pub reasons: BTreeMap<u64, String>,
    pub leak_records: Vec<LeakRecord>,
    /// Watched classes and classes over the instance count threshold, by name
    pub class_counts: Vec<ClassCount>,
    /// Instances left out because an expected field was missing
    pub skipped_objects: usize,
    pub scanned_instances: u64,
}

impl ScanOutcome {
    fn flag(&mut self, object_id: u64, reason: String) {
        self.suspects.insert(object_id);
        self.reasons.insert(object_id, reason);
    }
}

/// Ancestor ids of each class, root class first, resolved once per class.
#[derive(Debug, Default)]
pub struct ClassHierarchyCache {
    ancestors: FxHashMap<u64, Vec<u64>>,
}

impl ClassHierarchyCache {
    fn ancestors(&mut self, class: HeapClass<'_>) -> &[u64] {
        self.ancestors.entry(class.id()).or_insert_with(|| {
            let mut ids: Vec<u64> = class.class_hierarchy().map(|c| c.id()).collect();
            ids.reverse();
            ids
        })
    }

    /// Number of super classes above `class`.
    pub fn depth(&mut self, class: HeapClass<'_>) -> usize {
        self.ancestors(class).len().saturating_sub(1)
    }

    /// Ancestor of `class` at `depth`, the root class being at depth 0.
    pub fn ancestor_at(&mut self, class: HeapClass<'_>, depth: usize) -> Option<u64> {
        self.ancestors(class).get(depth).copied()
    }
}

/// A class resolved in the snapshot together with its depth, so that
/// instances of subclasses are recognised with one lookup.
#[derive(Debug, Clone, Copy)]
struct Watched {
    class_id: u64,
    depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Container,
    Component,
    Bitmap,
}

enum Verdict {
    Clean,
    Leak { reason: String, record: Option<LeakRecord> },
    MissingField(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    instances: u64,
    leaks: u64,
}

pub struct LeakScanner<'g> {
    graph: &'g HeapGraph,
    config: &'g ScannerConfig,
    hierarchy: ClassHierarchyCache,
    container: Option<Watched>,
    component: Option<(Watched, &'g str)>,
    bitmap: Option<Watched>,
    counted: Vec<Watched>,
}

impl<'g> LeakScanner<'g> {
    pub fn new(graph: &'g HeapGraph, config: &'g ScannerConfig) -> Self {
        let mut hierarchy = ClassHierarchyCache::default();
        let mut watch = |name: &str| {
            let class = graph.find_class_by_name(name)?;
            Some(Watched { class_id: class.id(), depth: hierarchy.depth(class) })
        };
        let container = watch(&config.container.class_name);
        let component = config
            .component
            .class_names
            .iter()
            .find_map(|name| watch(name).map(|watched| (watched, name.as_str())));
        let bitmap = watch(&config.bitmap.class_name);
        let counted = config.counted_classes.iter().filter_map(|name| watch(name)).collect();
        debug!(
            "watching container: {}, component: {:?}, bitmap: {}",
            container.is_some(),
            component.map(|(_, name)| name),
            bitmap.is_some()
        );
        Self { graph, config, hierarchy, container, component, bitmap, counted }
    }

    fn is_a(&mut self, class: HeapClass<'_>, watched: Option<Watched>) -> bool {
        watched.is_some_and(|w| self.hierarchy.ancestor_at(class, w.depth) == Some(w.class_id))
    }

    pub fn scan(mut self) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut counters: BTreeMap<u64, Counter> = BTreeMap::new();
        let mut totals: FxHashMap<u64, u64> = FxHashMap::default();

        for instance in self.graph.instances() {
            outcome.scanned_instances += 1;
            if instance.is_primitive_wrapper() {
                continue;
            }
            *totals.entry(instance.class_id()).or_default() += 1;
            let Ok(class) = instance.class() else {
                warn!("instance {:#x} has no class dump", instance.id());
                outcome.skipped_objects += 1;
                continue;
            };

            let rule = if self.is_a(class, self.container) {
                Some(Rule::Container)
            } else if self.is_a(class, self.component.map(|(w, _)| w)) {
                Some(Rule::Component)
            } else if self.is_a(class, self.bitmap) {
                Some(Rule::Bitmap)
            } else {
                None
            };
            let Some(rule) = rule else {
                let counted = self.counted.clone();
                if counted.into_iter().any(|w| self.is_a(class, Some(w))) {
                    counters.entry(class.id()).or_default().instances += 1;
                }
                continue;
            };

            let counter = counters.entry(class.id()).or_default();
            counter.instances += 1;
            // instances past the cap are only counted
            if counter.instances > u64::from(self.config.same_class_leak_cap) {
                continue;
            }
            match self.evaluate(rule, instance)? {
                Verdict::Clean => {}
                Verdict::Leak { reason, record } => {
                    counter.leaks += 1;
                    outcome.flag(instance.id(), reason);
                    outcome.leak_records.extend(record);
                }
                Verdict::MissingField(field) => {
                    let class_name = instance.class_name();
                    warn!("{class_name} {:#x} has no field {field}, skipped", instance.id());
                    outcome.skipped_objects += 1;
                }
            }
        }

        self.scan_arrays(&mut outcome);

        let mut class_counts: Vec<ClassCount> = counters
            .iter()
            .map(|(id, counter)| self.class_count(*id, counter.instances, counter.leaks))
            .collect();
        for (class_id, count) in totals {
            if count >= self.config.instance_count_threshold && !counters.contains_key(&class_id) {
                class_counts.push(self.class_count(class_id, count, 0));
            }
        }
        class_counts
            .sort_by(|a, b| a.class_name.cmp(&b.class_name).then(a.class_id.cmp(&b.class_id)));
        outcome.class_counts = class_counts;

        info!(
            "scanned {} instances: {} suspects, {} oversized objects, {} skipped",
            outcome.scanned_instances,
            outcome.suspects.len(),
            outcome.leak_records.len(),
            outcome.skipped_objects
        );
        Ok(outcome)
    }

    fn class_count(&self, class_id: u64, instance_count: u64, leak_count: u64) -> ClassCount {
        let class_name = self.graph.index().class_name(class_id).unwrap_or_default().to_string();
        ClassCount { class_id, class_name, instance_count, leak_count }
    }

    fn evaluate(&self, rule: Rule, instance: HeapInstance<'g>) -> Result<Verdict> {
        match rule {
            Rule::Container => {
                let container = &self.config.container;
                for flag in &container.flag_fields {
                    let field = instance.read_field(&container.class_name, flag)?;
                    match field.and_then(|f| f.value.as_bool()) {
                        Some(true) => {
                            let reason = container.reason.clone();
                            return Ok(Verdict::Leak { reason, record: None });
                        }
                        Some(false) => {}
                        None => return Ok(Verdict::MissingField(flag.clone())),
                    }
                }
                Ok(Verdict::Clean)
            }
            Rule::Component => {
                let component = &self.config.component;
                let Some((_, class_name)) = self.component else {
                    return Ok(Verdict::Clean);
                };
                let manager = instance.read_field(class_name, &component.manager_field)?;
                let Some(manager) = manager else {
                    return Ok(Verdict::MissingField(component.manager_field.clone()));
                };
                if !manager.value.is_null_reference() {
                    return Ok(Verdict::Clean);
                }
                let started = instance.read_field(class_name, &component.started_field)?;
                Ok(match started.and_then(|f| f.value.as_bool()) {
                    Some(true) => Verdict::Leak { reason: component.reason.clone(), record: None },
                    Some(false) => Verdict::Clean,
                    None => Verdict::MissingField(component.started_field.clone()),
                })
            }
            Rule::Bitmap => {
                let bitmap = &self.config.bitmap;
                let read = |field: &str| -> Result<Option<i64>> {
                    let field = instance.read_field(&bitmap.class_name, field)?;
                    Ok(field.and_then(|f| f.value.as_long()))
                };
                let Some(width) = read(&bitmap.width_field)? else {
                    return Ok(Verdict::MissingField(bitmap.width_field.clone()));
                };
                let Some(height) = read(&bitmap.height_field)? else {
                    return Ok(Verdict::MissingField(bitmap.height_field.clone()));
                };
                let pixels = (width.max(0) as u64) * (height.max(0) as u64);
                if pixels < self.config.bitmap_pixel_threshold {
                    return Ok(Verdict::Clean);
                }
                let record = LeakRecord {
                    object_id: instance.id(),
                    class_name: instance.class_name().to_string(),
                    size: pixels,
                    reason: format!("Bitmap Size Over Threshold, {width}x{height}"),
                    detail: Some(format!("{width} x {height}")),
                };
                Ok(Verdict::Leak { reason: record.reason.clone(), record: Some(record) })
            }
        }
    }

    fn scan_arrays(&self, outcome: &mut ScanOutcome) {
        for array in self.graph.primitive_arrays() {
            let size = array.byte_size();
            if size < self.config.primitive_array_byte_threshold {
                continue;
            }
            let reason = format!("Primitive Array Size Over Threshold, {size}");
            outcome.flag(array.id(), reason.clone());
            outcome.leak_records.push(LeakRecord {
                object_id: array.id(),
                class_name: array.array_class_name(),
                size,
                reason,
                detail: None,
            });
        }
        for array in self.graph.object_arrays() {
            let length = u64::from(array.length());
            if length < self.config.object_array_length_threshold {
                continue;
            }
            let reason = format!("Object Array Size Over Threshold, {length}");
            outcome.flag(array.id(), reason.clone());
            outcome.leak_records.push(LeakRecord {
                object_id: array.id(),
                class_name: array.array_class_name().to_string(),
                size: array.byte_size(),
                reason,
                detail: None,
            });
        }
    }
}

pub fn scan(graph: &HeapGraph, config: &ScannerConfig) -> Result<ScanOutcome> {
    LeakScanner::new(graph, config).scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::fields::HeapValue;
    use crate::hprof::header::HprofVersion;
    use crate::hprof::reader::BytesSource;
    use crate::hprof::record::PrimitiveArrayData;
    use crate::hprof::tag::{FieldType, PrimitiveType};
    use crate::hprof::writer::SnapshotBuilder;
    use rstest::rstest;

    const BOOLEAN: FieldType = FieldType::Primitive(PrimitiveType::Boolean);
    const INT: FieldType = FieldType::Primitive(PrimitiveType::Int);
    const ACTIVITY_FLAGS: [(&str, FieldType); 2] =
        [("mDestroyed", BOOLEAN), ("mFinished", BOOLEAN)];

    fn open(builder: SnapshotBuilder) -> HeapGraph {
        HeapGraph::open(&BytesSource::new(builder.build()), &GraphConfig::default()).unwrap()
    }

    fn class_counts(outcome: &ScanOutcome) -> Vec<(&str, u64, u64)> {
        outcome
            .class_counts
            .iter()
            .map(|c| (c.class_name.as_str(), c.instance_count, c.leak_count))
            .collect()
    }

    fn with_object(builder: &SnapshotBuilder, mut values: Vec<HeapValue>) -> Vec<HeapValue> {
        values.extend(builder.object_super_values());
        values
    }

    #[rstest]
    #[case(10, 10)]
    #[case(100, 45)]
    fn test_container_cap(#[case] instances: u64, #[case] flagged: usize) {
        let mut b = SnapshotBuilder::new(HprofVersion::Android, 4);
        let activity = b.class("android.app.Activity", None, &ACTIVITY_FLAGS);
        let main = b.class("com.example.MainActivity", Some(activity), &[]);
        for _ in 0..instances {
            let values = with_object(&b, vec![HeapValue::Boolean(true), HeapValue::Boolean(false)]);
            b.instance(main, &values);
        }
        let graph = open(b);
        let outcome = scan(&graph, &ScannerConfig::default()).unwrap();
        assert_eq!(outcome.suspects.len(), flagged);
        assert!(outcome.reasons.values().all(|r| r == "Activity Leak"));
        let count = &outcome.class_counts[0];
        assert_eq!(count.class_name, "com.example.MainActivity");
        assert_eq!(count.instance_count, instances);
        assert_eq!(count.leak_count, flagged as u64);
    }

    #[test]
    fn test_live_container_is_clean() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let activity = b.class("android.app.Activity", None, &ACTIVITY_FLAGS);
        b.instance(activity, &[HeapValue::Boolean(false), HeapValue::Boolean(false)]);
        let finished = b.instance(activity, &[HeapValue::Boolean(false), HeapValue::Boolean(true)]);
        let graph = open(b);
        let outcome = scan(&graph, &ScannerConfig::default()).unwrap();
        assert_eq!(outcome.suspects, BTreeSet::from([finished]));
    }

    #[test]
    fn test_detached_component() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let fragment = b.class(
            "android.app.Fragment",
            None,
            &[("mFragmentManager", FieldType::Reference), ("mCalled", BOOLEAN)],
        );
        let manager = b.class("android.app.FragmentManager", None, &[]);
        let manager = b.instance(manager, &[]);
        let detached = b.instance(fragment, &[HeapValue::Reference(0), HeapValue::Boolean(true)]);
        b.instance(fragment, &[HeapValue::Reference(0), HeapValue::Boolean(false)]);
        b.instance(fragment, &[HeapValue::Reference(manager), HeapValue::Boolean(true)]);
        let graph = open(b);
        let outcome = scan(&graph, &ScannerConfig::default()).unwrap();
        assert_eq!(outcome.suspects, BTreeSet::from([detached]));
        assert_eq!(outcome.reasons[&detached], "Fragment Leak");
        assert_eq!(outcome.class_counts[0].instance_count, 3);
    }

    #[test]
    fn test_oversized_bitmap() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let bitmap = b.class("android.graphics.Bitmap", None, &[("mWidth", INT), ("mHeight", INT)]);
        let large = b.instance(bitmap, &[HeapValue::Int(1920), HeapValue::Int(1080)]);
        b.instance(bitmap, &[HeapValue::Int(100), HeapValue::Int(100)]);
        let graph = open(b);
        let outcome = scan(&graph, &ScannerConfig::default()).unwrap();
        assert_eq!(outcome.suspects, BTreeSet::from([large]));
        assert_eq!(outcome.reasons[&large], "Bitmap Size Over Threshold, 1920x1080");
        assert_eq!(outcome.leak_records[0].size, 1920 * 1080);
        assert_eq!(outcome.leak_records[0].detail.as_deref(), Some("1920 x 1080"));
    }

    #[rstest]
    #[case::component("android.app.Fragment", "Fragment Leak")]
    #[case::bitmap("android.graphics.Bitmap", "Bitmap Size Over Threshold, 1920x1080")]
    fn test_same_class_cap_per_rule(#[case] base_name: &str, #[case] reason: &str) {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let (fields, values) = if base_name == "android.graphics.Bitmap" {
            let values = vec![HeapValue::Int(1920), HeapValue::Int(1080)];
            (vec![("mWidth", INT), ("mHeight", INT)], values)
        } else {
            (
                vec![("mFragmentManager", FieldType::Reference), ("mCalled", BOOLEAN)],
                vec![HeapValue::Reference(0), HeapValue::Boolean(true)],
            )
        };
        let base = b.class(base_name, None, &fields);
        let concrete = b.class("com.example.Concrete", Some(base), &[]);
        let other = b.class("com.example.Other", Some(base), &[]);
        let flagged: Vec<u64> = (0..5).map(|_| b.instance(concrete, &values)).collect();
        let sibling = b.instance(other, &values);
        let graph = open(b);

        let config = ScannerConfig { same_class_leak_cap: 3, ..ScannerConfig::default() };
        let outcome = scan(&graph, &config).unwrap();
        // the cap is per concrete class, so the sibling class is still evaluated
        let mut expected: BTreeSet<u64> = flagged[..3].iter().copied().collect();
        expected.insert(sibling);
        assert_eq!(outcome.suspects, expected);
        assert!(outcome.reasons.values().all(|r| r == reason));
        let counts = class_counts(&outcome);
        assert_eq!(counts, vec![("com.example.Concrete", 5, 3), ("com.example.Other", 1, 1)]);
        let records = if base_name == "android.graphics.Bitmap" { 4 } else { 0 };
        assert_eq!(outcome.leak_records.len(), records);
    }

    #[test]
    fn test_missing_field_skips_object() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let activity = b.class("android.app.Activity", None, &[("mDestroyed", BOOLEAN)]);
        b.instance(activity, &[HeapValue::Boolean(false)]);
        let graph = open(b);
        let outcome = scan(&graph, &ScannerConfig::default()).unwrap();
        assert!(outcome.suspects.is_empty());
        assert_eq!(outcome.skipped_objects, 1);
    }

    #[test]
    fn test_oversized_arrays() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let big = b.primitive_array(PrimitiveArrayData::Int(vec![0; 64]));
        b.primitive_array(PrimitiveArrayData::Int(vec![0; 8]));
        let objects = b.object_array("java.lang.Object[]", &[0; 20]);
        let graph = open(b);
        let config = ScannerConfig {
            primitive_array_byte_threshold: 256,
            object_array_length_threshold: 20,
            ..ScannerConfig::default()
        };
        let outcome = scan(&graph, &config).unwrap();
        assert_eq!(outcome.suspects, BTreeSet::from([big, objects]));
        assert_eq!(outcome.reasons[&big], "Primitive Array Size Over Threshold, 256");
        assert_eq!(outcome.reasons[&objects], "Object Array Size Over Threshold, 20");
        let classes: Vec<_> = outcome.leak_records.iter().map(|r| r.class_name.as_str()).collect();
        assert_eq!(classes, vec!["int[]", "java.lang.Object[]"]);
    }

    #[test]
    fn test_counted_and_crowded_classes() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let window = b.class("android.view.Window", None, &[]);
        let phone_window = b.class("com.android.internal.policy.PhoneWindow", Some(window), &[]);
        let point = b.class("com.example.Point", None, &[("x", INT)]);
        let boxed = b.class("java.lang.Integer", None, &[("value", INT)]);
        b.instance(phone_window, &[]);
        for i in 0..5 {
            b.instance(point, &[HeapValue::Int(i)]);
            b.instance(boxed, &[HeapValue::Int(i)]);
        }
        let graph = open(b);
        let config = ScannerConfig { instance_count_threshold: 5, ..ScannerConfig::default() };
        let outcome = scan(&graph, &config).unwrap();
        assert!(outcome.suspects.is_empty());
        let counts = class_counts(&outcome);
        assert_eq!(
            counts,
            vec![("com.android.internal.policy.PhoneWindow", 1, 0), ("com.example.Point", 5, 0)]
        );
        assert_eq!(outcome.scanned_instances, 11);
    }

    #[test]
    fn test_hierarchy_cache() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let base = b.class("com.example.Base", None, &[]);
        let child = b.class("com.example.Child", Some(base), &[]);
        let object = b.class_id("java.lang.Object").unwrap();
        let graph = open(b);
        let mut cache = ClassHierarchyCache::default();
        let child = graph.object(child).unwrap().as_class().unwrap();
        assert_eq!(cache.depth(child), 2);
        assert_eq!(cache.ancestor_at(child, 0), Some(object));
        assert_eq!(cache.ancestor_at(child, 1), Some(base));
        assert_eq!(cache.ancestor_at(child, 3), None);
    }
}
