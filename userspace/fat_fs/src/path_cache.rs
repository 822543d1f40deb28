//! Cache of every file handle the volume has materialized, keyed by absolute path.
//!
//! Lookup goes through the hierarchy tree's path-ordered BST; directory listings walk
//! its parent/child links. A handle is only ever dropped through [`PathCache::delete`]
//! or [`PathCache::clear`].

use log::{trace, warn};

use crate::error::{FsError, Result};
use crate::file::FileHandle;
use crate::hierarchy_tree::{Children, HierarchyTree, Keyed, NodeId};

impl Keyed for FileHandle {
    type Key = str;
    fn key(&self) -> &str { self.path() }
}

#[derive(Default)]
pub struct PathCache {
    tree: HierarchyTree<FileHandle>,
}

impl PathCache {
    pub const fn new() -> Self {
        Self { tree: HierarchyTree::new() }
    }

    /// Caches `file` under `parent`. Fails with `Exists` if its path is already cached.
    pub fn insert(&mut self, file: FileHandle, parent: Option<NodeId>) -> Result<NodeId> {
        match self.tree.insert(file, parent) {
            Ok(id) => Ok(id),
            Err(file) => {
                warn!("fat32: {} is already cached", file.path());
                Err(FsError::Exists)
            }
        }
    }

    pub fn search(&self, path: &str) -> Option<NodeId> { self.tree.search(path) }

    pub fn lookup(&self, path: &str) -> Option<&FileHandle> {
        self.search(path).and_then(|id| self.tree.get(id))
    }

    pub fn file(&self, id: NodeId) -> Option<&FileHandle> { self.tree.get(id) }

    pub fn file_mut(&mut self, id: NodeId) -> Option<&mut FileHandle> { self.tree.get_mut(id) }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> { self.tree.parent(id) }

    pub fn children(&self, dir: NodeId) -> Children<'_, FileHandle> { self.tree.children(dir) }

    /// Child ids of `dir`, sized from the directory's slot count.
    pub fn flatten_children(&self, dir: NodeId) -> Vec<NodeId> {
        let capacity = self.tree.get(dir).map_or(0, |d| d.num_entries() as usize);
        let mut out = Vec::with_capacity(capacity);
        self.tree.flatten_children_into(dir, &mut out);
        out
    }

    /// Opening a file pins it and every directory above it.
    pub fn inc_open_count(&mut self, id: NodeId) {
        self.tree.iterate_ancestors(id, |f| f.inc_open_count());
    }

    pub fn dec_open_count(&mut self, id: NodeId) {
        self.tree.iterate_ancestors(id, |f| f.dec_open_count());
    }

    /// Drops the handle cached at `path`. Returns whether one was there.
    pub fn delete(&mut self, path: &str) -> bool {
        match self.tree.delete(path) {
            Some(file) => {
                trace!("fat32: evicted {}", file.path());
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> usize { self.tree.size() }

    pub fn clear(&mut self) { self.tree.clear(); }

    /// Every cached path in lookup order.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.size());
        self.tree.iterate_preorder(|_, f| out.push(f.path().to_string()));
        out
    }
}
