//! The in-memory namespace: every node operation, symlink resolution
//! and write-ahead-log replay.
//!
//! The tree is deliberately unlocked. The facade serializes access
//! under its coordinator mutex; nothing here blocks or awaits.

use crate::error::{ErrorKind, Result, VfsError};
use crate::node::{DirEntry, Node, NodeKind, NodeStat, Permissions};
use crate::path;
use crate::persist::wal::WalEntry;

/// In-memory node tree rooted at `/`.
///
/// All paths passed in must already be normalized.
#[derive(Debug, Clone)]
pub struct VfsTree {
    root: Node,
    block_size: usize,
    max_symlink_depth: usize,
}

impl VfsTree {
    pub fn new(block_size: usize, max_symlink_depth: usize) -> Self {
        Self { root: Node::new_dir("/"), block_size, max_symlink_depth }
    }

    pub(crate) fn from_root(root: Node, block_size: usize, max_symlink_depth: usize) -> Self {
        Self { root, block_size, max_symlink_depth }
    }

    pub(crate) fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    /// Literal walk, no symlink traversal.
    fn node(&self, path: &str) -> Result<&Node> {
        let mut current = &self.root;
        for segment in path::segments(path) {
            let children = match current.children() {
                Some(children) => children,
                None => return Err(VfsError::not_directory(path)),
            };
            current = children.get(segment).ok_or_else(|| VfsError::not_found(path))?;
        }
        Ok(current)
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let mut current = &mut self.root;
        for segment in path::segments(path) {
            let children = match current.children_mut() {
                Some(children) => children,
                None => return Err(VfsError::not_directory(path)),
            };
            current = children.get_mut(segment).ok_or_else(|| VfsError::not_found(path))?;
        }
        Ok(current)
    }

    /// Whether a node exists at the literal path.
    pub fn exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    /// Resolves symlinks segment by segment, returning the canonical
    /// path of the final node.
    ///
    /// Intermediate symlinks are always followed; the last segment only
    /// when `follow_last` is set (stat vs lstat). Chains deeper than the
    /// configured cap, including cycles, resolve to `NotFound`.
    pub fn resolve(&self, path: &str, follow_last: bool) -> Result<String> {
        let mut depth = 0;
        self.resolve_inner(path, follow_last, &mut depth)
    }

    fn resolve_inner(&self, path: &str, follow_last: bool, depth: &mut usize) -> Result<String> {
        let segments: Vec<&str> = path::segments(path).collect();
        let mut current = String::from("/");
        for (index, segment) in segments.iter().enumerate() {
            let candidate = path::join(&current, segment);
            let node = self.node(&candidate)?;
            let last = index + 1 == segments.len();
            if let NodeKind::Symlink(target) = &node.kind {
                if !last || follow_last {
                    *depth += 1;
                    if *depth > self.max_symlink_depth {
                        return Err(VfsError::new(
                            ErrorKind::NotFound,
                            "too many levels of symbolic links",
                        )
                        .with_path(path));
                    }
                    let target = path::resolve_relative(&current, target);
                    current = self.resolve_inner(&target, true, depth)?;
                    continue;
                }
            }
            current = candidate;
        }
        Ok(current)
    }

    fn resolved_node(&self, path: &str, follow_last: bool) -> Result<&Node> {
        let resolved = self.resolve(path, follow_last)?;
        self.node(&resolved)
    }

    fn resolved_node_mut(&mut self, path: &str, follow_last: bool) -> Result<&mut Node> {
        let resolved = self.resolve(path, follow_last)?;
        self.node_mut(&resolved)
    }

    fn insert_node(&mut self, path: &str, node: Node, check_perms: bool) -> Result<()> {
        let parent_path = match path::parent(path) {
            Some(parent) => parent,
            None => return Err(VfsError::already_exists("/")),
        };
        let name = path::file_name(path).expect("non-root path has a name");
        let resolved_parent = self.resolve(parent_path, true)?;
        let parent = self.node_mut(&resolved_parent)?;
        if check_perms && !parent.permissions.write {
            return Err(VfsError::permission_denied(parent_path));
        }
        let children = parent.children_mut().ok_or_else(|| VfsError::not_directory(parent_path))?;
        if children.contains_key(name) {
            return Err(VfsError::already_exists(path));
        }
        children.insert(name.to_string(), node);
        parent.touch();
        Ok(())
    }

    pub fn create_file(&mut self, path: &str) -> Result<()> {
        self.insert_node(path, Node::new_file(name_of(path)?, self.block_size), true)
    }

    pub fn create_dir(&mut self, path: &str) -> Result<()> {
        self.insert_node(path, Node::new_dir(name_of(path)?), true)
    }

    /// The target is stored verbatim, not resolved.
    pub fn create_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert_node(path, Node::new_symlink(name_of(path)?, target), true)
    }

    /// Removes the node at `path`. Directories must be empty.
    pub fn delete(&mut self, path: &str) -> Result<Node> {
        let node = self.node(path)?;
        if let Some(children) = node.children() {
            if !children.is_empty() {
                return Err(VfsError::new(ErrorKind::PermissionDenied, "directory not empty")
                    .with_path(path));
            }
        }
        self.remove_subtree(path, true)
    }

    /// Removes the node at `path` with its whole subtree, skipping the
    /// empty-directory check. Used by trash capture and replay.
    pub fn remove_subtree(&mut self, path: &str, check_perms: bool) -> Result<Node> {
        if path == "/" {
            return Err(VfsError::new(ErrorKind::PermissionDenied, "cannot delete the root")
                .with_path("/"));
        }
        let parent_path = path::parent(path).expect("non-root path has a parent");
        let name = path::file_name(path).expect("non-root path has a name");
        let parent = self.node_mut(parent_path)?;
        if check_perms && !parent.permissions.write {
            return Err(VfsError::permission_denied(parent_path));
        }
        let children = parent.children_mut().ok_or_else(|| VfsError::not_directory(parent_path))?;
        let removed = children.shift_remove(name).ok_or_else(|| VfsError::not_found(path))?;
        parent.touch();
        Ok(removed)
    }

    pub fn stat(&self, path: &str) -> Result<NodeStat> {
        let node = self.resolved_node(path, true)?;
        Ok(stat_of(path, node))
    }

    /// Like [`VfsTree::stat`] but reports a final symlink itself,
    /// target populated.
    pub fn lstat(&self, path: &str) -> Result<NodeStat> {
        let node = self.resolved_node(path, false)?;
        Ok(stat_of(path, node))
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let node = self.resolved_node(path, true)?;
        if !node.permissions.read {
            return Err(VfsError::permission_denied(path));
        }
        let children = node.children().ok_or_else(|| VfsError::not_directory(path))?;
        Ok(children
            .values()
            .map(|child| DirEntry { name: child.name.clone(), node_type: child.node_type() })
            .collect())
    }

    pub fn read_link(&self, path: &str) -> Result<String> {
        let node = self.resolved_node(path, false)?;
        match &node.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(VfsError::new(ErrorKind::InvalidPath, "not a symlink").with_path(path)),
        }
    }

    pub fn read_at(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let node = self.resolved_node(path, true)?;
        if !node.permissions.read {
            return Err(VfsError::permission_denied(path));
        }
        match &node.kind {
            NodeKind::File(content) => Ok(content.read(offset, length)),
            _ => Err(VfsError::not_file(path)),
        }
    }

    /// Full current content of a file, permission checks skipped.
    /// Used internally for version capture and trash snapshots.
    pub fn peek_content(&self, path: &str) -> Result<Vec<u8>> {
        let node = self.resolved_node(path, true)?;
        match &node.kind {
            NodeKind::File(content) => Ok(content.to_bytes()),
            _ => Err(VfsError::not_file(path)),
        }
    }

    pub fn write_at(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at_inner(path, offset, data, true)
    }

    fn write_at_inner(
        &mut self,
        path: &str,
        offset: u64,
        data: &[u8],
        check_perms: bool,
    ) -> Result<()> {
        let node = self.resolved_node_mut(path, true)?;
        if check_perms && !node.permissions.write {
            return Err(VfsError::permission_denied(path));
        }
        match &mut node.kind {
            NodeKind::File(content) => {
                content.write(offset, data);
                node.touch();
                Ok(())
            }
            _ => Err(VfsError::not_file(path)),
        }
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let node = self.resolved_node_mut(path, true)?;
        if !node.permissions.write {
            return Err(VfsError::permission_denied(path));
        }
        match &mut node.kind {
            NodeKind::File(content) => {
                content.truncate(size);
                node.touch();
                Ok(())
            }
            _ => Err(VfsError::not_file(path)),
        }
    }

    pub fn set_permissions(&mut self, path: &str, permissions: Permissions) -> Result<()> {
        let node = self.resolved_node_mut(path, true)?;
        node.permissions = permissions;
        node.touch();
        Ok(())
    }

    pub fn set_xattr(&mut self, path: &str, name: &str, value: Vec<u8>) -> Result<()> {
        let node = self.resolved_node_mut(path, true)?;
        node.xattrs.insert(name.to_string(), value);
        node.touch();
        Ok(())
    }

    pub fn get_xattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        let node = self.resolved_node(path, true)?;
        node.xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| VfsError::new(ErrorKind::NotFound, "no such attribute").with_path(path))
    }

    pub fn list_xattrs(&self, path: &str) -> Result<Vec<String>> {
        let node = self.resolved_node(path, true)?;
        Ok(node.xattrs.keys().cloned().collect())
    }

    pub fn remove_xattr(&mut self, path: &str, name: &str) -> Result<()> {
        let node = self.resolved_node_mut(path, true)?;
        if node.xattrs.shift_remove(name).is_none() {
            return Err(VfsError::new(ErrorKind::NotFound, "no such attribute").with_path(path));
        }
        node.touch();
        Ok(())
    }

    /// Creates every missing intermediate directory along `path`.
    /// Returns the paths created, shallowest first. Permission checks
    /// are skipped; this anchors mount points.
    pub fn ensure_dir_path(&mut self, path: &str) -> Result<Vec<String>> {
        let mut created = Vec::new();
        let mut current = String::from("/");
        for segment in path::segments(path) {
            let next = path::join(&current, segment);
            match self.node(&next) {
                Ok(node) if node.is_dir() => {}
                Ok(_) => return Err(VfsError::not_directory(&next)),
                Err(_) => {
                    self.insert_node(&next, Node::new_dir(segment), false)?;
                    created.push(next.clone());
                }
            }
            current = next;
        }
        Ok(created)
    }

    /// Sum of file sizes over the whole tree; quota accounting.
    pub fn total_used_bytes(&self) -> u64 {
        fn walk(node: &Node) -> u64 {
            match &node.kind {
                NodeKind::File(content) => content.len(),
                NodeKind::Directory(children) => children.values().map(walk).sum(),
                NodeKind::Symlink(_) => 0,
            }
        }
        walk(&self.root)
    }

    /// Depth-first match collection under `root`, never descending into
    /// paths listed in `exclude` (active mount points).
    pub fn find<F>(
        &self,
        root: &str,
        max_depth: usize,
        exclude: &[String],
        predicate: F,
    ) -> Result<Vec<(String, NodeStat)>>
    where
        F: Fn(&str, &NodeStat) -> bool,
    {
        let resolved = self.resolve(root, true)?;
        let start = self.node(&resolved)?;
        let mut matches = Vec::new();
        self.find_walk(&resolved, start, 0, max_depth, exclude, &predicate, &mut matches);
        Ok(matches)
    }

    #[allow(clippy::too_many_arguments)]
    fn find_walk<F>(
        &self,
        node_path: &str,
        node: &Node,
        depth: usize,
        max_depth: usize,
        exclude: &[String],
        predicate: &F,
        matches: &mut Vec<(String, NodeStat)>,
    ) where
        F: Fn(&str, &NodeStat) -> bool,
    {
        let stat = stat_of(node_path, node);
        if predicate(node_path, &stat) {
            matches.push((node_path.to_string(), stat));
        }
        if depth >= max_depth || exclude.iter().any(|p| p == node_path) {
            return;
        }
        if let Some(children) = node.children() {
            for child in children.values() {
                let child_path = path::join(node_path, &child.name);
                self.find_walk(
                    &child_path,
                    child,
                    depth + 1,
                    max_depth,
                    exclude,
                    predicate,
                    matches,
                );
            }
        }
    }

    /// Detaches the node at `from` and reattaches it at `to`,
    /// preserving node identity, content and metadata.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if path::is_within(to, from) {
            return Err(VfsError::new(ErrorKind::InvalidPath, "cannot move into own subtree")
                .with_path(from));
        }
        if self.node(to).is_ok() {
            return Err(VfsError::already_exists(to));
        }
        // Validate the destination before detaching, so a failed rename
        // never drops the source node.
        let to_parent = path::parent(to).ok_or_else(|| VfsError::invalid_path(to))?;
        let resolved_to_parent = self.resolve(to_parent, true)?;
        let parent = self.node(&resolved_to_parent)?;
        if parent.children().is_none() {
            return Err(VfsError::not_directory(to_parent));
        }
        if !parent.permissions.write {
            return Err(VfsError::permission_denied(to_parent));
        }
        let mut node = self.remove_subtree(from, true)?;
        node.name = name_of(to)?.to_string();
        self.insert_node(to, node, true)
    }

    /// Deep-copies the node at `from` to `to`.
    pub fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        if path::is_within(to, from) {
            return Err(VfsError::new(ErrorKind::InvalidPath, "cannot copy into own subtree")
                .with_path(from));
        }
        let mut node = self.node(from)?.clone();
        node.name = name_of(to)?.to_string();
        self.insert_node(to, node, true)
    }

    /// Attaches a fully-built node at `path`. The parent must exist and
    /// be a directory, the name vacant. Permission checks are skipped;
    /// this is the restore/replay surface.
    pub(crate) fn graft(&mut self, path: &str, mut node: Node) -> Result<()> {
        node.name = name_of(path)?.to_string();
        self.insert_node(path, node, false)
    }

    /// Re-applies one logged mutation.
    ///
    /// Replay is idempotent: the entry applies itself only when its
    /// structural precondition still holds and no-ops otherwise.
    /// Permission and quota checks do not apply to replay. Trash
    /// entries are reconciled by the loader, not here.
    pub fn apply_wal(&mut self, entry: &WalEntry) {
        let _ = self.apply_wal_inner(entry);
    }

    fn apply_wal_inner(&mut self, entry: &WalEntry) -> Result<()> {
        match entry {
            WalEntry::CreateFile { path } => {
                self.insert_node(path, Node::new_file(name_of(path)?, self.block_size), false)
            }
            WalEntry::CreateDir { path } => {
                self.insert_node(path, Node::new_dir(name_of(path)?), false)
            }
            WalEntry::CreateSymlink { path, target } => {
                self.insert_node(path, Node::new_symlink(name_of(path)?, target), false)
            }
            WalEntry::Delete { path } => self.remove_subtree(path, false).map(|_| ()),
            WalEntry::Write { path, offset, data } => {
                self.write_at_inner(path, *offset, data, false)
            }
            WalEntry::SetPermissions { path, permissions } => {
                let node = self.resolved_node_mut(path, true)?;
                node.permissions = *permissions;
                Ok(())
            }
            WalEntry::SetXattr { path, name, value } => {
                let node = self.resolved_node_mut(path, true)?;
                node.xattrs.insert(name.clone(), value.clone());
                Ok(())
            }
            WalEntry::RemoveXattr { path, name } => {
                let node = self.resolved_node_mut(path, true)?;
                node.xattrs.shift_remove(name);
                Ok(())
            }
            WalEntry::Copy { from, to } => {
                if self.node(to).is_ok() {
                    return Ok(());
                }
                let mut node = self.node(from)?.clone();
                node.name = name_of(to)?.to_string();
                self.insert_node(to, node, false)
            }
            WalEntry::Move { from, to } => {
                if self.node(to).is_ok() {
                    return Ok(());
                }
                let mut node = self.remove_subtree(from, false)?;
                node.name = name_of(to)?.to_string();
                self.insert_node(to, node, false)
            }
            // Handled by the loader, which owns the trash store.
            WalEntry::MoveToTrash { .. } | WalEntry::RestoreFromTrash { .. } => Ok(()),
        }
    }
}

fn name_of(path: &str) -> Result<&str> {
    path::file_name(path).ok_or_else(|| VfsError::invalid_path(path))
}

fn stat_of(path: &str, node: &Node) -> NodeStat {
    NodeStat {
        path: path.to_string(),
        node_type: node.node_type(),
        size: node.size(),
        created_at: node.created_at,
        modified_at: node.modified_at,
        permissions: node.permissions,
        target: match &node.kind {
            NodeKind::Symlink(target) => Some(target.clone()),
            _ => None,
        },
    }
}
