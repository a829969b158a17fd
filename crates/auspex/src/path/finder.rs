use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info, trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::config::PathFinderConfig;
use crate::error::Result;
use crate::graph::heap::HeapGraph;
use crate::graph::object::{HeapClass, HeapInstance, HeapObject, HeapObjectArray};
use crate::hprof::record::GcRoot;
use crate::hprof::tag::GcRootKind;
use crate::path::matcher::{MatcherTable, Matched, ReferenceMatcher};
use crate::path::node::{NodeArena, NodeId, ReferenceName, ReferencePathNode, ReferenceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Class,
    Instance,
    Array,
}

impl ObjectKind {
    pub fn of(object: &HeapObject<'_>) -> Self {
        match object {
            HeapObject::Class(_) => ObjectKind::Class,
            HeapObject::Instance(_) => ObjectKind::Instance,
            HeapObject::ObjectArray(_) | HeapObject::PrimitiveArray(_) => ObjectKind::Array,
        }
    }

    pub const fn type_name(self) -> &'static str {
        match self {
            ObjectKind::Class => "class",
            ObjectKind::Instance => "instance",
            ObjectKind::Array => "array",
        }
    }
}

/// One hop of a leak path, from the object holding the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathReference {
    pub origin_object_id: u64,
    pub origin_class_name: String,
    pub origin_kind: ObjectKind,
    pub reference_type: ReferenceType,
    /// Field name, element index, or empty for locals
    pub name: String,
    pub declared_class: String,
}

impl PathReference {
    pub fn display_name(&self) -> String {
        match self.reference_type {
            ReferenceType::ArrayEntry => format!("[{}]", self.name),
            ReferenceType::Local => "<Java Local>".to_string(),
            ReferenceType::InstanceField | ReferenceType::StaticField => self.name.clone(),
        }
    }

    /// Same as [`Self::display_name`] with array indexes left out, so that
    /// paths differing only by an index compare equal.
    pub fn generic_name(&self) -> String {
        match self.reference_type {
            ReferenceType::ArrayEntry => "[x]".to_string(),
            _ => self.display_name(),
        }
    }
}

/// Shortest path from a GC root to a leaking object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakPath {
    pub gc_root: GcRoot,
    pub references: Vec<PathReference>,
    pub leaking_object_id: u64,
    pub leaking_class_name: String,
    pub leaking_kind: ObjectKind,
    /// Matcher of the first library leak reference on the path
    pub library_leak: Option<ReferenceMatcher>,
}

#[derive(Debug, Default)]
pub struct PathFindingResults {
    /// In the order the leaking objects were reached
    pub paths: Vec<LeakPath>,
    /// Object to its leaking dominator, when dominators are tracked
    pub dominators: Option<FxHashMap<u64, u64>>,
    pub retained_sizes: Option<BTreeMap<u64, u64>>,
    pub dangling_references: usize,
    pub visited_objects: usize,
}

impl PathFindingResults {
    pub fn dominator_of(&self, object_id: u64) -> Option<u64> {
        self.dominators.as_ref().and_then(|d| d.get(&object_id)).copied()
    }

    pub fn retained_size(&self, leaking_object_id: u64) -> Option<u64> {
        self.retained_sizes.as_ref().and_then(|s| s.get(&leaking_object_id)).copied()
    }
}

/// Per run traversal state. Ids promoted out of the deprioritized queue leave
/// a stale node behind, skipped when polled.
#[derive(Default)]
struct Traversal<'g> {
    arena: NodeArena<'g>,
    queue: VecDeque<NodeId>,
    last_queue: VecDeque<NodeId>,
    queued: FxHashSet<u64>,
    last_queued: FxHashSet<u64>,
    visited: FxHashSet<u64>,
    dominated: FxHashMap<u64, u64>,
    enqueued_by_class: FxHashMap<u64, u32>,
    dangling: usize,
}

impl Traversal<'_> {
    fn poll(&mut self) -> Option<NodeId> {
        if let Some(node) = self.queue.pop_front() {
            self.queued.remove(&self.arena.get(node).object_id());
            return Some(node);
        }
        while let Some(node) = self.last_queue.pop_front() {
            if self.last_queued.remove(&self.arena.get(node).object_id()) {
                return Some(node);
            }
        }
        None
    }

    fn is_known(&self, object_id: u64) -> bool {
        self.visited.contains(&object_id)
            || self.queued.contains(&object_id)
            || self.last_queued.contains(&object_id)
    }

    /// Dominators of `object_id`, nearest first, starting with `object_id`.
    fn dominator_chain(&self, object_id: u64) -> Vec<u64> {
        let mut chain = vec![object_id];
        let mut current = object_id;
        while let Some(next) = self.dominated.get(&current) {
            if chain.len() > self.dominated.len() {
                break;
            }
            chain.push(*next);
            current = *next;
        }
        chain
    }
}

/// Breadth first search from the GC roots to a set of leaking objects.
pub struct PathFinder<'g> {
    graph: &'g HeapGraph,
    config: &'g PathFinderConfig,
    matchers: MatcherTable<'g>,
    /// Instances no larger than this hold nothing worth following
    object_baseline: u64,
}

impl<'g> PathFinder<'g> {
    pub fn new(graph: &'g HeapGraph, config: &'g PathFinderConfig) -> Self {
        let header_size = graph.identifier_size() as u64 + 4;
        let object_baseline = graph
            .find_class_by_name("java.lang.Object")
            .and_then(|class| class.fields_byte_size().ok())
            .filter(|size| *size as u64 == header_size)
            .map_or(0, |_| header_size);
        debug!("object baseline size {object_baseline}");
        let matchers = MatcherTable::new(&config.reference_matchers);
        Self { graph, config, matchers, object_baseline }
    }

    pub fn find_paths(&self, leaking: &BTreeSet<u64>) -> Result<PathFindingResults> {
        let compute_retained_size = self.config.compute_retained_size;
        let targets = leaking.iter().filter(|id| self.graph.object_exists(**id)).count();
        info!("finding paths to {targets} leaking objects");

        let mut t = Traversal::default();
        self.enqueue_gc_roots(&mut t, leaking)?;
        debug!("{} roots enqueued, {} deprioritized", t.queue.len(), t.last_queue.len());

        let mut found = vec![];
        while let Some(node_id) = t.poll() {
            let node = *t.arena.get(node_id);
            let object_id = node.object_id();
            if !t.visited.insert(object_id) {
                continue;
            }
            if leaking.contains(&object_id) {
                trace!("reached leaking object {object_id:#x}");
                found.push(node_id);
                if found.len() == targets && !compute_retained_size {
                    break;
                }
            }
            match self.graph.object(object_id) {
                Some(HeapObject::Class(class)) => {
                    self.visit_class(&mut t, class, node_id, leaking)?
                }
                Some(HeapObject::Instance(instance)) => {
                    self.visit_instance(&mut t, instance, node_id, leaking)?
                }
                Some(HeapObject::ObjectArray(array)) => {
                    self.visit_object_array(&mut t, array, node_id, leaking)?
                }
                Some(HeapObject::PrimitiveArray(_)) | None => {}
            }
        }
        if t.dangling > 0 {
            warn!("{} references point to objects missing from the snapshot", t.dangling);
        }
        info!("found {} of {targets} paths, {} objects visited", found.len(), t.visited.len());

        let paths =
            found.iter().map(|node| self.build_path(&t.arena, *node)).collect::<Result<Vec<_>>>()?;
        let retained_sizes =
            compute_retained_size.then(|| self.retained_sizes(&t.dominated, leaking, &paths));
        Ok(PathFindingResults {
            paths,
            dominators: compute_retained_size.then(|| t.dominated.clone()),
            retained_sizes,
            dangling_references: t.dangling,
            visited_objects: t.visited.len(),
        })
    }

    /// Roots with an existing object, by root kind name descending then by
    /// class name, so thread objects come before the locals of their frames.
    fn sorted_gc_roots(&self) -> Vec<(HeapObject<'g>, GcRoot)> {
        let mut roots: Vec<_> = self
            .graph
            .gc_roots()
            .iter()
            .filter_map(|root| self.graph.object(root.id).map(|object| (object, *root)))
            .collect();
        roots.sort_by_cached_key(|(object, root)| (Reverse(root.kind.name()), object.class_name()));
        roots
    }

    fn enqueue_gc_roots(&self, t: &mut Traversal<'g>, leaking: &BTreeSet<u64>) -> Result<()> {
        let mut thread_names: FxHashMap<u64, String> = FxHashMap::default();
        for (object, root) in self.sorted_gc_roots() {
            if self.config.compute_retained_size {
                self.undominate_with_skips(t, root.id, leaking)?;
            }
            let normal =
                ReferencePathNode::Root { object_id: root.id, gc_root: root, library_leak: None };
            match root.kind {
                GcRootKind::JavaFrame => {
                    let thread =
                        root.thread_serial.and_then(|serial| self.graph.thread_object(serial));
                    let Some(thread) = thread else {
                        self.enqueue(t, normal, leaking);
                        continue;
                    };
                    let thread_name = match thread_names.get(&thread.id()) {
                        Some(name) => name.clone(),
                        None => {
                            let name = self.thread_name(thread);
                            thread_names.insert(thread.id(), name.clone());
                            name
                        }
                    };
                    let library_leak = match self.matchers.thread_name(&thread_name) {
                        Some(Matched::Ignored) => continue,
                        Some(Matched::LibraryLeak(idx)) => Some(idx),
                        None => None,
                    };
                    let parent = t.arena.push(ReferencePathNode::Root {
                        object_id: thread.id(),
                        gc_root: root,
                        library_leak: None,
                    });
                    let local = ReferencePathNode::Child {
                        object_id: root.id,
                        parent,
                        reference_type: ReferenceType::Local,
                        name: ReferenceName::Local,
                        declared_class: "",
                        library_leak,
                    };
                    self.enqueue(t, local, leaking);
                }
                GcRootKind::JniGlobal => match self.matchers.native_global(&object.class_name()) {
                    Some(Matched::Ignored) => {}
                    Some(Matched::LibraryLeak(idx)) => {
                        let node = ReferencePathNode::Root {
                            object_id: root.id,
                            gc_root: root,
                            library_leak: Some(idx),
                        };
                        self.enqueue(t, node, leaking);
                    }
                    None => self.enqueue(t, normal, leaking),
                },
                _ => self.enqueue(t, normal, leaking),
            }
        }
        Ok(())
    }

    fn thread_name(&self, thread: HeapInstance<'g>) -> String {
        let name = thread
            .read_field("java.lang.Thread", "name")
            .ok()
            .flatten()
            .and_then(|field| field.value.as_object_id())
            .and_then(|id| self.graph.object(id))
            .and_then(|object| object.as_instance())
            .and_then(|string| string.read_as_java_string().ok().flatten());
        name.unwrap_or_default()
    }

    fn visit_class(
        &self,
        t: &mut Traversal<'g>,
        class: HeapClass<'g>,
        parent: NodeId,
        leaking: &BTreeSet<u64>,
    ) -> Result<()> {
        let class_name = class.name();
        if class_name.starts_with("android.R$") {
            return Ok(());
        }
        for field in class.static_fields()? {
            let Some(target) = field.value.as_object_id() else {
                continue;
            };
            if field.name == "$staticOverhead"
                || field.name == "$classOverhead"
                || field.name.starts_with("$class$")
            {
                continue;
            }
            if !self.graph.object_exists(target) {
                let name = field.name;
                debug!("static field {class_name}.{name} points to missing object {target:#x}");
                t.dangling += 1;
                continue;
            }
            if self.config.compute_retained_size {
                self.undominate_with_skips(t, target, leaking)?;
            }
            let library_leak = match self.matchers.static_field(class_name, field.name) {
                Some(Matched::Ignored) => continue,
                Some(Matched::LibraryLeak(idx)) => Some(idx),
                None => None,
            };
            let node = ReferencePathNode::Child {
                object_id: target,
                parent,
                reference_type: ReferenceType::StaticField,
                name: ReferenceName::Field(field.name),
                declared_class: class_name,
                library_leak,
            };
            self.enqueue(t, node, leaking);
        }
        Ok(())
    }

    fn visit_instance(
        &self,
        t: &mut Traversal<'g>,
        instance: HeapInstance<'g>,
        parent: NodeId,
        leaking: &BTreeSet<u64>,
    ) -> Result<()> {
        // field name to matcher, the nearest declaring class wins
        let mut field_matchers: FxHashMap<&str, Matched> = FxHashMap::default();
        for class in instance.class()?.class_hierarchy() {
            if let Some(matchers) = self.matchers.instance_fields(class.name()) {
                for (field_name, matched) in matchers {
                    field_matchers.entry(*field_name).or_insert(*matched);
                }
            }
        }

        let mut fields: Vec<_> = instance
            .read_fields()?
            .into_iter()
            .filter(|f| f.value.as_object_id().is_some())
            .collect();
        fields.sort_by(|a, b| a.name.cmp(b.name));
        for field in fields {
            let Some(target) = field.value.as_object_id() else {
                continue;
            };
            if !self.graph.object_exists(target) {
                let class_name = instance.class_name();
                debug!("field {class_name}.{} points to missing object {target:#x}", field.name);
                t.dangling += 1;
                continue;
            }
            if self.config.compute_retained_size {
                self.update_dominator_with_skips(t, instance.id(), target, leaking)?;
            }
            let library_leak = match field_matchers.get(field.name) {
                Some(Matched::Ignored) => continue,
                Some(Matched::LibraryLeak(idx)) => Some(*idx),
                None => None,
            };
            let node = ReferencePathNode::Child {
                object_id: target,
                parent,
                reference_type: ReferenceType::InstanceField,
                name: ReferenceName::Field(field.name),
                declared_class: field.declaring_class.name(),
                library_leak,
            };
            self.enqueue(t, node, leaking);
        }
        Ok(())
    }

    fn visit_object_array(
        &self,
        t: &mut Traversal<'g>,
        array: HeapObjectArray<'g>,
        parent: NodeId,
        leaking: &BTreeSet<u64>,
    ) -> Result<()> {
        for (idx, element) in array.read_elements()?.into_iter().enumerate() {
            if element == 0 {
                continue;
            }
            if !self.graph.object_exists(element) {
                debug!("{}[{idx}] points to missing object {element:#x}", array.array_class_name());
                t.dangling += 1;
                continue;
            }
            if self.config.compute_retained_size {
                self.update_dominator_with_skips(t, array.id(), element, leaking)?;
            }
            let node = ReferencePathNode::Child {
                object_id: element,
                parent,
                reference_type: ReferenceType::ArrayEntry,
                name: ReferenceName::Index(idx as u32),
                declared_class: "",
                library_leak: None,
            };
            self.enqueue(t, node, leaking);
        }
        Ok(())
    }

    fn enqueue(&self, t: &mut Traversal<'g>, node: ReferencePathNode<'g>, leaking: &BTreeSet<u64>) {
        let object_id = node.object_id();
        if object_id == 0 || t.visited.contains(&object_id) || t.queued.contains(&object_id) {
            return;
        }
        let visit_last = node.library_leak().is_some()
            || match node {
                ReferencePathNode::Root { gc_root, .. } => gc_root.kind == GcRootKind::ThreadObject,
                ReferencePathNode::Child { parent, .. } => t
                    .arena
                    .get(parent)
                    .gc_root()
                    .is_some_and(|root| root.kind == GcRootKind::JavaFrame),
            };

        if t.last_queued.contains(&object_id) {
            if visit_last {
                return;
            }
            // a shorter path than the deprioritized one
            t.last_queued.remove(&object_id);
            let id = t.arena.push(node);
            t.queue.push_back(id);
            t.queued.insert(object_id);
            return;
        }

        if self.should_skip(t, object_id, leaking) {
            return;
        }
        let id = t.arena.push(node);
        if visit_last {
            t.last_queue.push_back(id);
            t.last_queued.insert(object_id);
        } else {
            t.queue.push_back(id);
            t.queued.insert(object_id);
        }
    }

    fn should_skip(&self, t: &mut Traversal<'g>, object_id: u64, leaking: &BTreeSet<u64>) -> bool {
        let is_leaking = leaking.contains(&object_id);
        match self.graph.object(object_id) {
            Some(HeapObject::Class(_)) => false,
            Some(HeapObject::Instance(instance)) => {
                let trivial = instance.is_primitive_wrapper()
                    || instance.shallow_size() <= self.object_baseline;
                if !is_leaking && trivial {
                    return true;
                }
                self.is_over_enqueue_cap(t, instance)
            }
            Some(HeapObject::ObjectArray(array)) => {
                !is_leaking && array.is_primitive_wrapper_array()
            }
            Some(HeapObject::PrimitiveArray(_)) => !is_leaking,
            None => true,
        }
    }

    /// Counts `instance` against the cap of its class.
    fn is_over_enqueue_cap(&self, t: &mut Traversal<'g>, instance: HeapInstance<'g>) -> bool {
        let Some(cap) = self.config.same_class_enqueue_cap else {
            return false;
        };
        let class_name = instance.class_name();
        let exempt_prefixes = &self.config.enqueue_cap_exempt_prefixes;
        if exempt_prefixes.iter().any(|prefix| class_name.starts_with(prefix.as_str())) {
            return false;
        }
        let count = t.enqueued_by_class.entry(instance.class_id()).or_insert(0);
        if *count >= cap {
            return true;
        }
        *count += 1;
        if *count == cap {
            debug!("enqueue cap of {cap} reached for {class_name}");
        }
        false
    }

    /// Strings and boxed primitive arrays are folded into their parent's
    /// dominator and never enqueued, unless they lead to a leaking object.
    fn folded_objects(
        &self,
        object: &HeapObject<'g>,
        leaking: &BTreeSet<u64>,
    ) -> Result<Option<Vec<u64>>> {
        let mut folded = vec![object.id()];
        match object {
            HeapObject::Instance(instance) if instance.class_name() == "java.lang.String" => {
                folded.extend(string_value(*instance)?);
            }
            HeapObject::ObjectArray(array) if array.is_primitive_wrapper_array() => {
                folded.extend(array.read_elements()?.into_iter().filter(|e| *e != 0));
            }
            _ => return Ok(None),
        }
        if folded.iter().any(|id| leaking.contains(id)) {
            return Ok(None);
        }
        Ok(Some(folded))
    }

    fn update_dominator_with_skips(
        &self,
        t: &mut Traversal<'g>,
        parent: u64,
        object_id: u64,
        leaking: &BTreeSet<u64>,
    ) -> Result<()> {
        let Some(object) = self.graph.object(object_id) else {
            return Ok(());
        };
        if let HeapObject::Class(_) = object {
            undominate(t, object_id, false);
            return Ok(());
        }
        match self.folded_objects(&object, leaking)? {
            Some(folded) => {
                for id in folded {
                    update_dominator(t, parent, id, true, leaking);
                }
            }
            None => update_dominator(t, parent, object_id, false, leaking),
        }
        Ok(())
    }

    fn undominate_with_skips(
        &self,
        t: &mut Traversal<'g>,
        object_id: u64,
        leaking: &BTreeSet<u64>,
    ) -> Result<()> {
        let Some(object) = self.graph.object(object_id) else {
            return Ok(());
        };
        match self.folded_objects(&object, leaking)? {
            Some(folded) => {
                for id in folded {
                    undominate(t, id, true);
                }
            }
            None => undominate(t, object_id, false),
        }
        Ok(())
    }

    fn build_path(&self, arena: &NodeArena<'g>, tip: NodeId) -> Result<LeakPath> {
        let nodes = arena.path_to(tip);
        let root = arena.get(nodes[0]);
        let gc_root =
            root.gc_root().copied().unwrap_or(GcRoot::new(GcRootKind::Unknown, root.object_id()));

        let mut references = Vec::with_capacity(nodes.len() - 1);
        for pair in nodes.windows(2) {
            let origin = self.graph.find_object_by_id(arena.get(pair[0]).object_id())?;
            if let ReferencePathNode::Child { reference_type, name, declared_class, .. } =
                *arena.get(pair[1])
            {
                references.push(PathReference {
                    origin_object_id: origin.id(),
                    origin_class_name: origin.class_name(),
                    origin_kind: ObjectKind::of(&origin),
                    reference_type,
                    name: name.to_name(),
                    declared_class: declared_class.to_string(),
                });
            }
        }

        let leaking = self.graph.find_object_by_id(arena.get(tip).object_id())?;
        let library_leak = nodes
            .iter()
            .find_map(|node| arena.get(*node).library_leak())
            .and_then(|idx| self.matchers.matcher(idx))
            .cloned();
        Ok(LeakPath {
            gc_root,
            references,
            leaking_object_id: leaking.id(),
            leaking_class_name: leaking.class_name(),
            leaking_kind: ObjectKind::of(&leaking),
            library_leak,
        })
    }

    /// Shallow size of each leaking object plus everything it dominates. A
    /// leak dominated by another leak is also added to the outermost one.
    fn retained_sizes(
        &self,
        dominated: &FxHashMap<u64, u64>,
        leaking: &BTreeSet<u64>,
        paths: &[LeakPath],
    ) -> BTreeMap<u64, u64> {
        let shallow = |id: u64| self.graph.object(id).map_or(0, |o| o.shallow_size());
        let mut sizes: BTreeMap<u64, u64> =
            paths.iter().map(|p| (p.leaking_object_id, shallow(p.leaking_object_id))).collect();
        for (object_id, dominator) in dominated {
            if leaking.contains(object_id) {
                continue;
            }
            if let Some(size) = sizes.get_mut(dominator) {
                *size += shallow(*object_id);
            }
        }

        let own = sizes.clone();
        for (leak, size) in &own {
            let mut outermost = None;
            let mut current = *leak;
            let mut steps = 0;
            while let Some(next) = dominated.get(&current) {
                if !sizes.contains_key(next) || steps > dominated.len() {
                    break;
                }
                outermost = Some(*next);
                current = *next;
                steps += 1;
            }
            if let Some(outer) = outermost
                && let Some(total) = sizes.get_mut(&outer)
            {
                *total += size;
            }
        }
        sizes
    }
}

fn string_value(string: HeapInstance<'_>) -> Result<Option<u64>> {
    Ok(string.read_field("java.lang.String", "value")?.and_then(|f| f.value.as_object_id()))
}

fn undominate(t: &mut Traversal<'_>, object_id: u64, never_enqueued: bool) {
    t.dominated.remove(&object_id);
    if never_enqueued {
        t.visited.insert(object_id);
    }
}

/// Moves the dominator of `object_id` to the nearest dominator it shares with
/// `parent`, or drops it when there is none.
fn update_dominator(
    t: &mut Traversal<'_>,
    parent: u64,
    object_id: u64,
    never_enqueued: bool,
    leaking: &BTreeSet<u64>,
) {
    let current = t.dominated.get(&object_id).copied();
    if current.is_none() && t.is_known(object_id) {
        return;
    }
    let parent_is_leaking = leaking.contains(&parent);
    let next_dominator = match t.dominated.get(&parent).copied() {
        _ if parent_is_leaking => parent,
        Some(dominator) => dominator,
        None => {
            // parent was reached without passing through a leak
            if never_enqueued {
                t.visited.insert(object_id);
            }
            t.dominated.remove(&object_id);
            return;
        }
    };
    let Some(current) = current else {
        t.dominated.insert(object_id, next_dominator);
        return;
    };
    let parent_chain = t.dominator_chain(next_dominator);
    let current_chain = t.dominator_chain(current);
    match parent_chain.iter().find(|d| current_chain.contains(d)) {
        Some(shared) => {
            t.dominated.insert(object_id, *shared);
        }
        None => {
            t.dominated.remove(&object_id);
            if never_enqueued {
                t.visited.insert(object_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::fields::HeapValue;
    use crate::hprof::header::HprofVersion;
    use crate::hprof::reader::BytesSource;
    use crate::hprof::record::PrimitiveArrayData;
    use crate::hprof::tag::FieldType;
    use crate::hprof::writer::SnapshotBuilder;
    use crate::path::matcher::ReferencePattern;

    fn open(builder: SnapshotBuilder) -> HeapGraph {
        HeapGraph::open(&BytesSource::new(builder.build()), &GraphConfig::default()).unwrap()
    }

    fn holder(builder: &mut SnapshotBuilder, name: &str, fields: &[&str]) -> u64 {
        let fields: Vec<_> = fields.iter().map(|f| (*f, FieldType::Reference)).collect();
        builder.class(name, None, &fields)
    }

    fn config(matchers: Vec<ReferenceMatcher>) -> PathFinderConfig {
        PathFinderConfig { reference_matchers: matchers, ..PathFinderConfig::default() }
    }

    #[test]
    fn test_fields_and_arrays() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let a = holder(&mut b, "com.example.A", &["items"]);
        let leak = b.primitive_array(PrimitiveArrayData::Byte(vec![0; 16]));
        let array = b.object_array("java.lang.Object[]", &[0, 0xbad, leak]);
        let root = b.instance(a, &[HeapValue::Reference(array)]);
        b.gc_root(GcRoot::new(GcRootKind::JniGlobal, root));
        let graph = open(b);
        let config = config(vec![]);
        let results = PathFinder::new(&graph, &config).find_paths(&BTreeSet::from([leak])).unwrap();

        assert_eq!(results.paths.len(), 1);
        let path = &results.paths[0];
        assert_eq!(path.gc_root.kind, GcRootKind::JniGlobal);
        let hops: Vec<_> = path
            .references
            .iter()
            .map(|r| (r.origin_class_name.as_str(), r.display_name()))
            .collect();
        assert_eq!(
            hops,
            vec![("com.example.A", "items".to_string()), ("java.lang.Object[]", "[2]".to_string())]
        );
        assert_eq!(path.leaking_kind, ObjectKind::Array);
        assert_eq!(path.leaking_class_name, "byte[]");
        assert_eq!(results.dangling_references, 1);
    }

    #[test]
    fn test_static_fields_and_pruned_names() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let leak = b.primitive_array(PrimitiveArrayData::Int(vec![1, 2]));
        let other = b.primitive_array(PrimitiveArrayData::Int(vec![3]));
        let class = b.class_with_statics(
            "com.example.Registry",
            None,
            &[],
            &[
                ("$classOverhead", HeapValue::Reference(other)),
                ("sInstance", HeapValue::Reference(leak)),
            ],
        );
        b.gc_root(GcRoot::new(GcRootKind::StickyClass, class));
        let graph = open(b);
        let config = config(vec![]);
        let finder = PathFinder::new(&graph, &config);

        let results = finder.find_paths(&BTreeSet::from([leak, other])).unwrap();
        assert_eq!(results.paths.len(), 1);
        let reference = &results.paths[0].references[0];
        assert_eq!(reference.reference_type, ReferenceType::StaticField);
        assert_eq!(reference.declared_class, "com.example.Registry");
        assert_eq!(reference.origin_kind, ObjectKind::Class);
    }

    #[test]
    fn test_java_local_on_named_thread() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let leak = b.primitive_array(PrimitiveArrayData::Long(vec![7]));
        b.thread("worker", 5);
        b.gc_root(GcRoot::with_thread(GcRootKind::JavaFrame, leak, 5));
        let graph = open(b);

        let leaks = BTreeSet::from([leak]);
        let plain = config(vec![]);
        let results = PathFinder::new(&graph, &plain).find_paths(&leaks).unwrap();
        let path = &results.paths[0];
        assert_eq!(path.gc_root.kind, GcRootKind::JavaFrame);
        assert_eq!(path.references[0].origin_class_name, "java.lang.Thread");
        assert_eq!(path.references[0].display_name(), "<Java Local>");

        let library = config(vec![ReferenceMatcher::library_leak(
            ReferencePattern::JavaLocal { thread_name: "worker".into() },
            "worker keeps it",
        )]);
        let results = PathFinder::new(&graph, &library).find_paths(&leaks).unwrap();
        assert!(results.paths[0].library_leak.is_some());

        let worker = ReferencePattern::JavaLocal { thread_name: "worker".into() };
        let ignored = config(vec![ReferenceMatcher::ignored(worker)]);
        let results = PathFinder::new(&graph, &ignored).find_paths(&leaks).unwrap();
        assert!(results.paths.is_empty());
    }

    #[test]
    fn test_java_frame_without_thread() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let leak = b.primitive_array(PrimitiveArrayData::Long(vec![7]));
        b.gc_root(GcRoot::with_thread(GcRootKind::JavaFrame, leak, 9));
        let graph = open(b);
        let config = config(vec![]);
        let results = PathFinder::new(&graph, &config).find_paths(&BTreeSet::from([leak])).unwrap();
        assert!(results.paths[0].references.is_empty());
        assert_eq!(results.paths[0].gc_root.id, leak);
    }

    #[test]
    fn test_native_global_library_leak() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let leak = b.primitive_array(PrimitiveArrayData::Char(vec![1]));
        b.gc_root(GcRoot::new(GcRootKind::JniGlobal, leak));
        let graph = open(b);
        let config = config(vec![ReferenceMatcher::library_leak(
            ReferencePattern::NativeGlobalVariable { class_name: "char[]".into() },
            "",
        )]);
        let results = PathFinder::new(&graph, &config).find_paths(&BTreeSet::from([leak])).unwrap();
        assert_eq!(results.paths.len(), 1);
        assert!(results.paths[0].library_leak.is_some());
    }

    #[test]
    fn test_enqueue_cap() {
        let mut b = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let node = holder(&mut b, "com.example.Node", &["next"]);
        let leak = b.primitive_array(PrimitiveArrayData::Byte(vec![1]));
        let mut next = leak;
        for _ in 0..3 {
            next = b.instance(node, &[HeapValue::Reference(next)]);
        }
        b.gc_root(GcRoot::new(GcRootKind::JniGlobal, next));
        let graph = open(b);

        let capped = PathFinderConfig { same_class_enqueue_cap: Some(2), ..config(vec![]) };
        let results = PathFinder::new(&graph, &capped).find_paths(&BTreeSet::from([leak])).unwrap();
        assert!(results.paths.is_empty());

        let enqueue_cap_exempt_prefixes = vec!["com.example.".into()];
        let exempt = PathFinderConfig { enqueue_cap_exempt_prefixes, ..capped };
        let results = PathFinder::new(&graph, &exempt).find_paths(&BTreeSet::from([leak])).unwrap();
        assert_eq!(results.paths[0].references.len(), 3);
    }
}
