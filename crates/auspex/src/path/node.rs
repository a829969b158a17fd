use serde::{Deserialize, Serialize};

use crate::hprof::record::GcRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    InstanceField,
    StaticField,
    Local,
    ArrayEntry,
}

impl ReferenceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReferenceType::InstanceField => "INSTANCE_FIELD",
            ReferenceType::StaticField => "STATIC_FIELD",
            ReferenceType::Local => "LOCAL",
            ReferenceType::ArrayEntry => "ARRAY_ENTRY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceName<'g> {
    Field(&'g str),
    Index(u32),
    Local,
}

impl ReferenceName<'_> {
    pub fn to_name(self) -> String {
        match self {
            ReferenceName::Field(name) => name.to_string(),
            ReferenceName::Index(idx) => idx.to_string(),
            ReferenceName::Local => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

/// A step of a reference path. Children point at their parent, so each node
/// is the tip of exactly one path back to a root. `library_leak` holds the
/// position of the matching library leak matcher.
#[derive(Debug, Clone, Copy)]
pub enum ReferencePathNode<'g> {
    Root {
        object_id: u64,
        gc_root: GcRoot,
        library_leak: Option<usize>,
    },
    Child {
        object_id: u64,
        parent: NodeId,
        reference_type: ReferenceType,
        name: ReferenceName<'g>,
        declared_class: &'g str,
        library_leak: Option<usize>,
    },
}

impl ReferencePathNode<'_> {
    pub fn object_id(&self) -> u64 {
        match self {
            ReferencePathNode::Root { object_id, .. }
            | ReferencePathNode::Child { object_id, .. } => *object_id,
        }
    }

    pub fn library_leak(&self) -> Option<usize> {
        match self {
            ReferencePathNode::Root { library_leak, .. }
            | ReferencePathNode::Child { library_leak, .. } => *library_leak,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        match self {
            ReferencePathNode::Root { .. } => None,
            ReferencePathNode::Child { parent, .. } => Some(*parent),
        }
    }

    pub fn gc_root(&self) -> Option<&GcRoot> {
        match self {
            ReferencePathNode::Root { gc_root, .. } => Some(gc_root),
            ReferencePathNode::Child { .. } => None,
        }
    }
}

/// Owns every node created during one traversal.
#[derive(Debug, Default)]
pub struct NodeArena<'g> {
    nodes: Vec<ReferencePathNode<'g>>,
}

impl<'g> NodeArena<'g> {
    pub fn push(&mut self, node: ReferencePathNode<'g>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &ReferencePathNode<'g> {
        &self.nodes[id.0 as usize]
    }

    /// Nodes from the root down to `tip`.
    pub fn path_to(&self, tip: NodeId) -> Vec<NodeId> {
        let mut path: Vec<_> =
            std::iter::successors(Some(tip), |id| self.get(*id).parent()).collect();
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hprof::tag::GcRootKind;

    #[test]
    fn test_path_to() {
        let mut arena = NodeArena::default();
        let root = arena.push(ReferencePathNode::Root {
            object_id: 1,
            gc_root: GcRoot::new(GcRootKind::StickyClass, 1),
            library_leak: None,
        });
        let child = |parent, object_id, name| ReferencePathNode::Child {
            object_id,
            parent,
            reference_type: ReferenceType::InstanceField,
            name: ReferenceName::Field(name),
            declared_class: "A",
            library_leak: None,
        };
        let a = arena.push(child(root, 2, "a"));
        let b = arena.push(child(a, 3, "b"));
        let c = arena.push(child(root, 4, "c"));
        assert_eq!(arena.path_to(b), vec![root, a, b]);
        assert_eq!(arena.path_to(c), vec![root, c]);
        assert_eq!(arena.path_to(root), vec![root]);
        assert_eq!(arena.get(b).object_id(), 3);
        assert!(arena.get(root).gc_root().is_some());
        assert_eq!(c, NodeId(3));
    }

    #[test]
    fn test_reference_names() {
        assert_eq!(ReferenceName::Field("mView").to_name(), "mView");
        assert_eq!(ReferenceName::Index(7).to_name(), "7");
        assert_eq!(ReferenceName::Local.to_name(), "");
        assert_eq!(ReferenceType::ArrayEntry.as_str(), "ARRAY_ENTRY");
    }
}
