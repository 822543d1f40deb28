//! A binary search tree with a second, independent tree laid over the same nodes.
//!
//! The BST orders nodes by [`Keyed::key`] and is only used for lookup. The hierarchy
//! links (parent, first child, next sibling) record the real parent/child relation and
//! are what enumeration walks. Changing the BST shape never touches hierarchy links.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Ids carry a generation, so an
//! id kept across a delete stops resolving instead of aliasing a reused slot.

use core::borrow::Borrow;
use core::cmp::Ordering;

/// Data stored in a [`HierarchyTree`] exposes the key it is ordered by.
pub trait Keyed {
    type Key: Ord + ?Sized;
    fn key(&self) -> &Self::Key;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index:      u32,
    generation: u32,
}

struct Node<T> {
    data:         T,
    left:         Option<NodeId>,
    right:        Option<NodeId>,
    /// Nodes in the BST subtree rooted here, this one included.
    size:         usize,
    parent:       Option<NodeId>,
    first_child:  Option<NodeId>,
    next_sibling: Option<NodeId>,
}

struct Slot<T> {
    generation: u32,
    node:       Option<Node<T>>,
}

pub struct HierarchyTree<T> {
    slots: Vec<Slot<T>>,
    free:  Vec<u32>,
    root:  Option<NodeId>,
}

impl<T> Default for HierarchyTree<T> {
    fn default() -> Self { Self::new() }
}

impl<T> HierarchyTree<T> {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), root: None }
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation { return None; }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation { return None; }
        slot.node.as_mut()
    }

    /// Internal access for ids that came out of the tree's own links.
    fn at(&self, id: NodeId) -> &Node<T> {
        match self.node(id) {
            Some(node) => node,
            None => unreachable!("dangling link to slot {}", id.index),
        }
    }

    fn at_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.node_mut(id) {
            Some(node) => node,
            None => unreachable!("dangling link to slot {}", id.index),
        }
    }

    fn alloc(&mut self, data: T, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            data, left: None, right: None, size: 1,
            parent, first_child: None, next_sibling: None,
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId { index, generation: slot.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeId { index: self.slots.len() as u32 - 1, generation: 0 }
            }
        }
    }

    fn release(&mut self, id: NodeId) -> T {
        let slot = &mut self.slots[id.index as usize];
        let node = match slot.node.take() {
            Some(node) => node,
            None => unreachable!("releasing empty slot {}", id.index),
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        node.data
    }

    fn subtree_size(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |id| self.at(id).size)
    }

    fn update_size(&mut self, id: NodeId) {
        let node = self.at(id);
        let size = 1 + self.subtree_size(node.left) + self.subtree_size(node.right);
        self.at_mut(id).size = size;
    }

    // ─── Accessors ─────────────────────────────────────────────────────────────

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize { self.subtree_size(self.root) }

    pub fn is_empty(&self) -> bool { self.root.is_none() }

    pub fn contains(&self, id: NodeId) -> bool { self.node(id).is_some() }

    pub fn get(&self, id: NodeId) -> Option<&T> { self.node(id).map(|n| &n.data) }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> { self.node_mut(id).map(|n| &mut n.data) }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> { self.node(id)?.parent }

    /// Direct hierarchy children of `id`, most recently inserted first.
    pub fn children(&self, id: NodeId) -> Children<'_, T> {
        Children { tree: self, next: self.node(id).and_then(|n| n.first_child) }
    }

    // ─── Hierarchy traversal ───────────────────────────────────────────────────

    /// Applies `f` to `id` and then to each hierarchy ancestor up to the root.
    pub fn iterate_ancestors(&mut self, id: NodeId, mut f: impl FnMut(&mut T)) {
        let mut cur = self.node(id).map(|_| id);
        while let Some(id) = cur {
            let node = self.at_mut(id);
            f(&mut node.data);
            cur = node.parent;
        }
    }

    /// Appends the direct children of `id` to `out`, most recently inserted first.
    pub fn flatten_children_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let mut cur = self.node(id).and_then(|n| n.first_child);
        while let Some(child) = cur {
            out.push(child);
            cur = self.at(child).next_sibling;
        }
    }

    pub fn flatten_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.flatten_children_into(id, &mut out);
        out
    }

    fn link_child(&mut self, parent: NodeId, child: NodeId) {
        let head = self.at(parent).first_child;
        self.at_mut(child).next_sibling = head;
        self.at_mut(parent).first_child = Some(child);
    }

    fn unlink_child(&mut self, parent: NodeId, child: NodeId) {
        let after = self.at(child).next_sibling;
        if self.at(parent).first_child == Some(child) {
            self.at_mut(parent).first_child = after;
        } else {
            let mut cur = self.at(parent).first_child;
            while let Some(id) = cur {
                let next = self.at(id).next_sibling;
                if next == Some(child) {
                    self.at_mut(id).next_sibling = after;
                    break;
                }
                cur = next;
            }
        }
        self.at_mut(child).next_sibling = None;
    }

    // ─── BST traversal ─────────────────────────────────────────────────────────

    /// Visits every node in BST preorder (node, left subtree, right subtree).
    pub fn iterate_preorder(&self, mut f: impl FnMut(NodeId, &T)) {
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let node = self.at(id);
            f(id, &node.data);
            stack.extend(node.right);
            stack.extend(node.left);
        }
    }

    pub fn flatten_preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.size());
        self.iterate_preorder(|id, _| out.push(id));
        out
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.root = None;
    }
}

impl<T: Keyed> HierarchyTree<T> {
    /// Adds `data` to the BST and, when `parent` is given, makes it `parent`'s first
    /// child. A duplicate key leaves the tree unchanged and hands `data` back.
    pub fn insert(&mut self, data: T, parent: Option<NodeId>) -> Result<NodeId, T> {
        let parent = parent.filter(|&p| self.contains(p));
        let Some(root) = self.root else {
            let id = self.alloc(data, parent);
            if let Some(p) = parent { self.link_child(p, id); }
            self.root = Some(id);
            return Ok(id);
        };

        // Walk down recording the path so sizes can be fixed on the way back.
        let mut path = Vec::new();
        let mut cur = root;
        let go_left = loop {
            path.push(cur);
            let node = self.at(cur);
            let next = match data.key().cmp(node.data.key()) {
                Ordering::Less    => node.left.ok_or(true),
                Ordering::Greater => node.right.ok_or(false),
                Ordering::Equal   => return Err(data),
            };
            match next {
                Ok(child) => cur = child,
                Err(left) => break left,
            }
        };

        let id = self.alloc(data, parent);
        let leaf_parent = self.at_mut(cur);
        if go_left { leaf_parent.left = Some(id); } else { leaf_parent.right = Some(id); }
        for &p in path.iter().rev() {
            self.at_mut(p).size += 1;
        }
        if let Some(p) = parent { self.link_child(p, id); }
        Ok(id)
    }

    pub fn search<Q>(&self, key: &Q) -> Option<NodeId>
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.at(id);
            cur = match key.cmp(node.data.key().borrow()) {
                Ordering::Less    => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal   => return Some(id),
            };
        }
        None
    }

    /// Removes the node with `key` and returns its data. Its hierarchy children, if any,
    /// are left without a parent.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<T>
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let target = self.search(key)?;

        if let Some(parent) = self.at(target).parent {
            self.unlink_child(parent, target);
        }
        let mut child = self.at(target).first_child;
        while let Some(c) = child {
            let node = self.at_mut(c);
            node.parent = None;
            child = node.next_sibling.take();
        }

        let root = self.root;
        self.root = self.remove_from(root, key);
        Some(self.release(target))
    }

    /// Removes `key` from the subtree at `id`; returns the subtree's new root.
    fn remove_from<Q>(&mut self, id: Option<NodeId>, key: &Q) -> Option<NodeId>
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let id = id?;
        let ordering = key.cmp(self.at(id).data.key().borrow());
        match ordering {
            Ordering::Less => {
                let left = self.at(id).left;
                let left = self.remove_from(left, key);
                self.at_mut(id).left = left;
            }
            Ordering::Greater => {
                let right = self.at(id).right;
                let right = self.remove_from(right, key);
                self.at_mut(id).right = right;
            }
            Ordering::Equal => {
                let node = self.at(id);
                return match (node.left, node.right) {
                    (None, other) | (other, None) => other,
                    (Some(left), Some(right)) => {
                        // The in-order successor takes this node's place.
                        let (right, successor) = self.detach_min(right);
                        let s = self.at_mut(successor);
                        s.left = Some(left);
                        s.right = right;
                        self.update_size(successor);
                        Some(successor)
                    }
                };
            }
        }
        self.update_size(id);
        Some(id)
    }

    /// Unhooks the leftmost node of the subtree at `id`.
    /// Returns the subtree's new root and the detached node.
    fn detach_min(&mut self, id: NodeId) -> (Option<NodeId>, NodeId) {
        match self.at(id).left {
            None => {
                let right = self.at(id).right;
                let node = self.at_mut(id);
                node.right = None;
                node.size = 1;
                (right, id)
            }
            Some(left) => {
                let (new_left, min) = self.detach_min(left);
                self.at_mut(id).left = new_left;
                self.update_size(id);
                (Some(id), min)
            }
        }
    }
}

pub struct Children<'a, T> {
    tree: &'a HierarchyTree<T>,
    next: Option<NodeId>,
}

impl<'a, T> Iterator for Children<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.tree.at(id);
        self.next = node.next_sibling;
        Some((id, &node.data))
    }
}
