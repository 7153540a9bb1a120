// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Arena-backed red-black tree map.
//!
//! Nodes hold parent/child handles indexed by direction (0 = left,
//! 1 = right), so every rebalancing case is written once and mirrored
//! by flipping the direction index.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

use crate::arena::{Arena, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<K, V> {
    parent: Option<NodeId>,
    child: [Option<NodeId>; 2],
    color: Color,
    key: K,
    value: V,
}

/// Returned by [`RbTree::insert`] when the key is already present.
/// Carries the rejected entry back to the caller; the tree is unchanged.
#[derive(Error)]
#[error("key already present in tree")]
pub struct Duplicate<K, V>(pub K, pub V);

// Manual impl: keeps Duplicate usable (and `Error`) without K/V: Debug bounds.
impl<K, V> fmt::Debug for Duplicate<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Duplicate(..)")
    }
}

/// Ordered map over an arena of fixed-size nodes.
///
/// Comparison is the key type's `Ord`; in-order traversal visits entries
/// in strictly ascending key order.
pub struct RbTree<K, V> {
    arena: Arena<Node<K, V>>,
    root: Option<NodeId>,
    len: usize,
}

impl<K: Ord, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> RbTree<K, V> {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            len: 0,
        }
    }

    /// Preallocate `capacity` node slots (pool-style use).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(capacity),
            root: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        self.arena.get(id)
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.arena.get_mut(id)
    }

    /// Which child slot of its parent `n` occupies. `n` must not be the root.
    fn child_dir(&self, n: NodeId) -> usize {
        let p = self.node(n).parent.expect("child_dir on the root");
        usize::from(self.node(p).child[1] == Some(n))
    }

    fn is_red(&self, id: Option<NodeId>) -> bool {
        matches!(id, Some(n) if self.node(n).color == Color::Red)
    }

    /// Point the parent's child slot for `n` (or the root) at `to`.
    fn replace_in_parent(&mut self, n: NodeId, to: Option<NodeId>) {
        match self.node(n).parent {
            Some(p) => {
                let dir = self.child_dir(n);
                self.node_mut(p).child[dir] = to;
            }
            None => self.root = to,
        }
    }

    /// Rotate at `p`: its child opposite `dir` takes `p`'s place and `p`
    /// becomes that child's `dir`-side child.
    fn rotate(&mut self, p: NodeId, dir: usize) {
        let g = self.node(p).parent;
        let s = self.node(p).child[1 - dir].expect("rotation without a pivot child");
        let c = self.node(s).child[dir];

        self.node_mut(p).child[1 - dir] = c;
        if let Some(c) = c {
            self.node_mut(c).parent = Some(p);
        }
        self.node_mut(s).child[dir] = Some(p);
        self.node_mut(p).parent = Some(s);
        self.node_mut(s).parent = g;
        match g {
            Some(g) => {
                let gdir = usize::from(self.node(g).child[1] == Some(p));
                self.node_mut(g).child[gdir] = Some(s);
            }
            None => self.root = Some(s),
        }
    }

    fn find(&self, key: &K) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.node(id);
            current = match key.cmp(&node.key) {
                Ordering::Less => node.child[0],
                Ordering::Greater => node.child[1],
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key).map(|id| &self.node(id).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.find(key).map(|id| &mut self.arena.get_mut(id).value)
    }

    /// Insert a new entry, returning a reference to the stored value.
    ///
    /// An equal key leaves the tree untouched and hands both rejected
    /// values back in [`Duplicate`].
    pub fn insert(&mut self, key: K, value: V) -> Result<&mut V, Duplicate<K, V>> {
        // Descend to the insertion point.
        let mut parent = None;
        let mut dir = 0;
        let mut current = self.root;
        while let Some(id) = current {
            dir = match key.cmp(&self.node(id).key) {
                Ordering::Less => 0,
                Ordering::Greater => 1,
                Ordering::Equal => return Err(Duplicate(key, value)),
            };
            parent = Some(id);
            current = self.node(id).child[dir];
        }

        let n = self.arena.alloc(Node {
            parent,
            child: [None, None],
            color: Color::Red,
            key,
            value,
        });
        self.len += 1;
        match parent {
            Some(p) => {
                self.node_mut(p).child[dir] = Some(n);
                self.insert_fixup(n, p);
            }
            None => self.root = Some(n),
        }
        // The fixup can leave a red root; the invariant wants it black.
        if let Some(root) = self.root {
            self.node_mut(root).color = Color::Black;
        }
        Ok(&mut self.arena.get_mut(n).value)
    }

    /// Restore the red-black invariants upward from freshly linked red `n`.
    fn insert_fixup(&mut self, mut n: NodeId, mut p: NodeId) {
        loop {
            if self.node(p).color == Color::Black {
                return;
            }
            let Some(g) = self.node(p).parent else {
                // Red parent is the root: recolor it and stop.
                self.node_mut(p).color = Color::Black;
                return;
            };
            let pdir = self.child_dir(p);
            let uncle = self.node(g).child[1 - pdir];
            if !self.is_red(uncle) {
                // Black or absent uncle: at most two rotations finish the walk.
                if self.node(p).child[1 - pdir] == Some(n) {
                    // n is an inner child; rotate it out first.
                    self.rotate(p, pdir);
                    p = self.node(g).child[pdir].expect("rotation unlinked the subtree");
                }
                self.rotate(g, 1 - pdir);
                self.node_mut(p).color = Color::Black;
                self.node_mut(g).color = Color::Red;
                return;
            }
            // Red uncle: push the red conflict one level up and continue.
            let u = uncle.expect("red uncle exists");
            self.node_mut(p).color = Color::Black;
            self.node_mut(u).color = Color::Black;
            self.node_mut(g).color = Color::Red;
            n = g;
            match self.node(n).parent {
                Some(np) => p = np,
                None => return,
            }
        }
    }

    /// Remove the entry for `key`, returning its value. Absent keys leave
    /// the tree untouched.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let n = self.find(key)?;

        if self.node(n).child[0].is_some() && self.node(n).child[1].is_some() {
            let s = self.successor(n);
            self.swap_with_successor(n, s);
            // n now sits at the successor's old position with at most a
            // right child; delete it from there.
        }
        debug_assert!(self.node(n).child[0].is_none() || self.node(n).child[1].is_none());

        let node = self.node(n);
        let only_child = node.child[0].or(node.child[1]);
        if let Some(c) = only_child {
            // A node with exactly one child is black with a red child.
            debug_assert_eq!(self.node(n).color, Color::Black);
            debug_assert_eq!(self.node(c).color, Color::Red);
            let parent = self.node(n).parent;
            self.replace_in_parent(n, Some(c));
            self.node_mut(c).parent = parent;
            self.node_mut(c).color = Color::Black;
        } else if self.node(n).color == Color::Red || self.node(n).parent.is_none() {
            // A childless red node, or the root, unlinks outright.
            self.replace_in_parent(n, None);
        } else {
            // Childless black non-root: unlink, then rebalance the deficit.
            let p = self.node(n).parent.expect("checked non-root");
            let dir = self.child_dir(n);
            self.node_mut(p).child[dir] = None;
            self.delete_fixup(p, dir);
        }

        self.len -= 1;
        Some(self.arena.free(n).value)
    }

    /// Smallest node in `n`'s right subtree.
    fn successor(&self, n: NodeId) -> NodeId {
        let mut s = self.node(n).child[1].expect("successor of a node without right child");
        while let Some(left) = self.node(s).child[0] {
            s = left;
        }
        s
    }

    /// Exchange the tree positions of `n` and its in-order successor `s`
    /// by relinking node headers; entries stay in their slots.
    fn swap_with_successor(&mut self, n: NodeId, s: NodeId) {
        let (np, ncolor, nl, nr) = {
            let node = self.node(n);
            (node.parent, node.color, node.child[0], node.child[1])
        };
        let (sp, scolor, sr) = {
            let node = self.node(s);
            debug_assert!(node.child[0].is_none());
            (node.parent, node.color, node.child[1])
        };

        // n's old parent (or the root) adopts s.
        self.replace_in_parent(n, Some(s));

        // Exchange headers. When s is n's own right child its parent
        // pointer would come out equal to n itself; redirect it to s.
        {
            let node = self.node_mut(s);
            node.parent = np;
            node.color = ncolor;
            node.child = [nl, if nr == Some(s) { Some(n) } else { nr }];
        }
        {
            let node = self.node_mut(n);
            node.parent = if sp == Some(n) { Some(s) } else { sp };
            node.color = scolor;
            node.child = [None, sr];
        }

        // s's old parent adopts n, unless that parent was n itself (its
        // child slot was rewritten by the header exchange above). The
        // successor hangs off the left spine of the right subtree.
        if sp != Some(n) {
            let p = sp.expect("successor below n always has a parent");
            self.node_mut(p).child[0] = Some(n);
        }

        // Reattach every moved child to its new parent.
        if let Some(c) = nl {
            self.node_mut(c).parent = Some(s);
        }
        if let Some(r) = nr {
            if r != s {
                self.node_mut(r).parent = Some(s);
            }
        }
        if let Some(c) = sr {
            self.node_mut(c).parent = Some(n);
        }
    }

    /// Rebalance after a black leaf was unlinked from `p`'s `dir` side.
    fn delete_fixup(&mut self, mut p: NodeId, mut dir: usize) {
        loop {
            let mut s = self.node(p).child[1 - dir].expect("black-height invariant broken");
            let mut d = self.node(s).child[1 - dir];
            let mut c = self.node(s).child[dir];

            if self.node(s).color == Color::Red {
                // Red sibling: rotate it above p, then retry against the
                // new (black) sibling.
                self.rotate(p, dir);
                self.node_mut(p).color = Color::Red;
                self.node_mut(s).color = Color::Black;
                s = c.expect("red sibling has two black children");
                d = self.node(s).child[1 - dir];
                if self.is_red(d) {
                    return self.fix_distant(p, s, d.expect("checked red"), dir);
                }
                c = self.node(s).child[dir];
                if self.is_red(c) {
                    return self.fix_close(p, s, c.expect("checked red"), dir);
                }
                // p was just recolored red.
                self.node_mut(s).color = Color::Red;
                self.node_mut(p).color = Color::Black;
                return;
            }
            if self.is_red(d) {
                return self.fix_distant(p, s, d.expect("checked red"), dir);
            }
            if self.is_red(c) {
                return self.fix_close(p, s, c.expect("checked red"), dir);
            }
            if self.node(p).color == Color::Red {
                self.node_mut(s).color = Color::Red;
                self.node_mut(p).color = Color::Black;
                return;
            }
            // Everything local is black: push the deficit one level up.
            self.node_mut(s).color = Color::Red;
            match self.node(p).parent {
                Some(pp) => {
                    dir = self.child_dir(p);
                    p = pp;
                }
                None => return,
            }
        }
    }

    /// Close nephew red: double rotation, first at the sibling. After the
    /// first rotation the close nephew is the sibling and the old sibling
    /// the distant nephew.
    fn fix_close(&mut self, p: NodeId, s: NodeId, c: NodeId, dir: usize) {
        self.rotate(s, 1 - dir);
        self.node_mut(s).color = Color::Red;
        self.node_mut(c).color = Color::Black;
        self.fix_distant(p, c, s, dir);
    }

    /// Distant nephew red: one rotation at p terminates the walk.
    fn fix_distant(&mut self, p: NodeId, s: NodeId, d: NodeId, dir: usize) {
        self.rotate(p, dir);
        let pcolor = self.node(p).color;
        self.node_mut(s).color = pcolor;
        self.node_mut(p).color = Color::Black;
        self.node_mut(d).color = Color::Black;
    }

    /// In-order visit of every entry, ascending by key.
    ///
    /// The `&self` receiver is the no-structural-mutation-during-traversal
    /// contract; callers buffer removals and apply them afterwards.
    pub fn traverse<F: FnMut(&K, &V)>(&self, mut visitor: F) {
        self.visit(self.root, &mut visitor);
    }

    fn visit<F: FnMut(&K, &V)>(&self, id: Option<NodeId>, visitor: &mut F) {
        if let Some(id) = id {
            let node = self.node(id);
            self.visit(node.child[0], visitor);
            visitor(&node.key, &node.value);
            self.visit(node.child[1], visitor);
        }
    }
}
