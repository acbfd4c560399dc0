//! Serialized image of the tree.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::BlockStorage;
use crate::node::{Node, NodeKind, NodeType, Permissions};
use crate::tree::VfsTree;

/// One node of a persisted tree image.
///
/// Files carry their content, directories their children in listing
/// order, symlinks their raw target. The same shape stores trash
/// subtrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub name: String,
    pub node_type: NodeType,
    pub created_at: u64,
    pub modified_at: u64,
    pub permissions: Permissions,
    pub content: Option<Vec<u8>>,
    pub target: Option<String>,
    pub children: Vec<SnapshotNode>,
    pub xattrs: IndexMap<String, Vec<u8>>,
}

impl SnapshotNode {
    pub fn from_node(node: &Node) -> Self {
        let (content, target, children) = match &node.kind {
            NodeKind::File(data) => (Some(data.to_bytes()), None, Vec::new()),
            NodeKind::Directory(entries) => {
                (None, None, entries.values().map(Self::from_node).collect())
            }
            NodeKind::Symlink(target) => (None, Some(target.clone()), Vec::new()),
        };
        Self {
            name: node.name.clone(),
            node_type: node.node_type(),
            created_at: node.created_at,
            modified_at: node.modified_at,
            permissions: node.permissions,
            content,
            target,
            children,
            xattrs: node.xattrs.clone(),
        }
    }

    pub fn into_node(self, block_size: usize) -> Node {
        let kind = match self.node_type {
            NodeType::File => NodeKind::File(BlockStorage::from_bytes(
                block_size,
                self.content.as_deref().unwrap_or_default(),
            )),
            NodeType::Directory => NodeKind::Directory(
                self.children
                    .into_iter()
                    .map(|child| (child.name.clone(), child.into_node(block_size)))
                    .collect(),
            ),
            NodeType::Symlink => NodeKind::Symlink(self.target.unwrap_or_default()),
        };
        Node {
            name: self.name,
            created_at: self.created_at,
            modified_at: self.modified_at,
            permissions: self.permissions,
            xattrs: self.xattrs,
            kind,
        }
    }

    /// Sum of file bytes in this subtree; trash accounting.
    pub fn total_file_bytes(&self) -> u64 {
        let own = self.content.as_ref().map_or(0, |c| c.len() as u64);
        own + self.children.iter().map(Self::total_file_bytes).sum::<u64>()
    }
}

pub(crate) fn tree_to_snapshot(tree: &VfsTree) -> SnapshotNode {
    SnapshotNode::from_node(tree.root())
}

pub(crate) fn snapshot_to_tree(
    root: SnapshotNode,
    block_size: usize,
    max_symlink_depth: usize,
) -> VfsTree {
    VfsTree::from_root(root.into_node(block_size), block_size, max_symlink_depth)
}
