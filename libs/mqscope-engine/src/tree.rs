//! Hierarchical index over every topic observed so far.
//!
//! Structural changes (new nodes, reset) are serialised by one tree-wide
//! lock. Each node publishes its children as a copy-on-write `Arc<Vec<_>>`:
//! readers clone the reference under a short read lock and walk the
//! snapshot unlocked, so filtering and subtree enumeration never hold a
//! lock across a long traversal. Counters and flags are atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;

use crate::matcher::SEPARATOR;

type Children = Arc<Vec<Arc<TreeNode>>>;

/// One topic level.
pub struct TreeNode {
    name: String,
    path: String,
    own_count: AtomicU64,
    total_count: AtomicU64,
    visible: AtomicBool,
    expanded: AtomicBool,
    /// Sorted by name (case-sensitive). Replaced wholesale on insert.
    children: RwLock<Children>,
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("path", &self.path)
            .field("own_count", &self.message_count())
            .finish()
    }
}

impl TreeNode {
    fn new(name: impl Into<String>, path: impl Into<String>, visible: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            own_count: AtomicU64::new(0),
            total_count: AtomicU64::new(0),
            visible: AtomicBool::new(visible),
            expanded: AtomicBool::new(false),
            children: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full topic path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Messages received on exactly this topic.
    pub fn message_count(&self) -> u64 {
        self.own_count.load(Ordering::Relaxed)
    }

    /// Messages received on this topic and everything below it.
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Relaxed)
    }

    pub fn set_expanded(&self, expanded: bool) {
        self.expanded.store(expanded, Ordering::Relaxed);
    }

    /// Current child list. Stays valid (and unchanged) after later inserts.
    pub fn children(&self) -> Children {
        match self.children.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn child(&self, name: &str) -> Option<Arc<TreeNode>> {
        let children = self.children();
        children
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|i| children[i].clone())
    }

    fn set_children(&self, children: Vec<Arc<TreeNode>>) {
        let mut guard = match self.children.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(children);
    }

    fn snapshot(&self, only_visible: bool) -> NodeSnapshot {
        let children = self
            .children()
            .iter()
            .filter(|c| !only_visible || c.is_visible())
            .map(|c| c.snapshot(only_visible))
            .collect();
        NodeSnapshot {
            name: self.name.clone(),
            path: self.path.clone(),
            message_count: self.message_count(),
            total_count: self.total_count(),
            visible: self.is_visible(),
            expanded: self.is_expanded(),
            children,
        }
    }
}

/// Owned copy of a subtree, for rendering and serialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub path: String,
    pub message_count: u64,
    pub total_count: u64,
    pub visible: bool,
    pub expanded: bool,
    pub children: Vec<NodeSnapshot>,
}

#[derive(Debug)]
pub struct TopicTree {
    root: Arc<TreeNode>,
    /// Serialises node creation and reset.
    structure: Mutex<()>,
    /// Active filter term, lowercased.
    filter: RwLock<Option<String>>,
}

impl Default for TopicTree {
    fn default() -> Self {
        Self {
            root: Arc::new(TreeNode::new("", "", true)),
            structure: Mutex::new(()),
            filter: RwLock::new(None),
        }
    }
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_structure(&self) -> MutexGuard<'_, ()> {
        match self.structure.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic tree lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn active_filter(&self) -> Option<String> {
        match self.filter.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Top-level nodes.
    pub fn roots(&self) -> Children {
        self.root.children()
    }

    /// Walk `topic` top-down, creating missing levels, and optionally count
    /// one message on its leaf. Returns the leaf.
    pub fn update_or_create_node(&self, topic: &str, increment: bool) -> Arc<TreeNode> {
        let mut chain = Vec::new();
        let mut node = self.root.clone();
        let mut created = false;

        for segment in topic.split(SEPARATOR) {
            let next = match node.child(segment) {
                Some(child) => child,
                None => {
                    created = true;
                    self.insert_child(&node, segment)
                }
            };
            chain.push(next.clone());
            node = next;
        }

        if increment {
            node.own_count.fetch_add(1, Ordering::Relaxed);
            self.root.total_count.fetch_add(1, Ordering::Relaxed);
            for n in &chain {
                n.total_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if created {
            // Under the structure lock so a concurrent `apply_filter` sees
            // either none or all of the new chain.
            let _guard = self.lock_structure();
            if let Some(term) = self.active_filter() {
                // A match anywhere on the chain keeps the whole chain navigable.
                if chain.iter().any(|n| n.name.to_lowercase().contains(term.as_str())) {
                    for n in &chain {
                        n.visible.store(true, Ordering::Relaxed);
                    }
                }
            }
        }

        node
    }

    fn insert_child(&self, parent: &Arc<TreeNode>, name: &str) -> Arc<TreeNode> {
        let _guard = self.lock_structure();

        // Lost the race: someone else created it after our unlocked lookup.
        if let Some(existing) = parent.child(name) {
            return existing;
        }

        let path = if Arc::ptr_eq(parent, &self.root) {
            name.to_string()
        } else {
            format!("{}{SEPARATOR}{name}", parent.path)
        };
        let visible = self.active_filter().is_none();
        let node = Arc::new(TreeNode::new(name, path, visible));

        let mut children: Vec<Arc<TreeNode>> = parent.children().as_ref().clone();
        let pos = children
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .unwrap_or_else(|i| i);
        children.insert(pos, node.clone());
        parent.set_children(children);

        node
    }

    /// Show only branches related to `term`; `None` or blank shows everything.
    ///
    /// A node is visible when its name contains the term (ignoring case),
    /// when one of its descendants does, or when one of its ancestors does.
    pub fn apply_filter(&self, term: Option<&str>) {
        let term = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        // Nodes created mid-walk would miss both the old and the new term.
        let _guard = self.lock_structure();
        {
            let mut guard = match self.filter.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = term.clone();
        }

        match term {
            None => {
                let mut stack: Vec<Arc<TreeNode>> = self.roots().iter().cloned().collect();
                while let Some(node) = stack.pop() {
                    node.visible.store(true, Ordering::Relaxed);
                    stack.extend(node.children().iter().cloned());
                }
            }
            Some(term) => {
                for node in self.roots().iter() {
                    filter_node(node, &term, false);
                }
            }
        }
    }

    /// Case-insensitive lookup of a full path; a trailing `/` is ignored.
    ///
    /// An exact-case match always wins. Otherwise the first path in tree
    /// order that matches ignoring case is returned.
    pub fn find_node(&self, path: &str) -> Option<Arc<TreeNode>> {
        let path = path.strip_suffix(SEPARATOR).unwrap_or(path);
        if path.is_empty() {
            return None;
        }
        let segments: Vec<&str> = path.split(SEPARATOR).collect();
        find_in(&self.root, &segments)
    }

    /// Every path in the subtree at `path` (the node itself first) for which
    /// `is_live` holds, depth-first in tree order. An empty path means the
    /// whole tree; an unknown path yields nothing.
    pub fn list_concrete_topics_under(
        &self,
        path: &str,
        is_live: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
        let mut stack: Vec<Arc<TreeNode>> = if trimmed.is_empty() {
            self.roots().iter().rev().cloned().collect()
        } else {
            match self.find_node(trimmed) {
                Some(node) => vec![node],
                None => return Vec::new(),
            }
        };

        let mut topics = Vec::new();
        while let Some(node) = stack.pop() {
            if is_live(&node.path) {
                topics.push(node.path.clone());
            }
            stack.extend(node.children().iter().rev().cloned());
        }
        topics
    }

    /// Forget the message count of one topic (its node stays).
    pub fn reset_count(&self, topic: &str) {
        let mut chain = Vec::new();
        let mut node = self.root.clone();
        for segment in topic.split(SEPARATOR) {
            let Some(next) = node.child(segment) else {
                return;
            };
            chain.push(next.clone());
            node = next;
        }

        let removed = node.own_count.swap(0, Ordering::Relaxed);
        if removed == 0 {
            return;
        }
        saturating_sub(&self.root.total_count, removed);
        for n in &chain {
            saturating_sub(&n.total_count, removed);
        }
    }

    pub fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        match self.find_node(path) {
            Some(node) => {
                node.set_expanded(expanded);
                true
            }
            None => false,
        }
    }

    /// Drop every node.
    pub fn clear(&self) {
        let _guard = self.lock_structure();
        self.root.set_children(Vec::new());
        self.root.own_count.store(0, Ordering::Relaxed);
        self.root.total_count.store(0, Ordering::Relaxed);
    }

    /// Messages counted across the whole tree.
    pub fn total_count(&self) -> u64 {
        self.root.total_count()
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<Arc<TreeNode>> = self.roots().iter().cloned().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children().iter().cloned());
        }
        count
    }

    /// Owned copy of the top-level nodes and everything below them.
    pub fn snapshot(&self, only_visible: bool) -> Vec<NodeSnapshot> {
        self.roots()
            .iter()
            .filter(|n| !only_visible || n.is_visible())
            .map(|n| n.snapshot(only_visible))
            .collect()
    }
}

/// Depth-first over case variants: the exact-case child first, then the
/// others in tree order.
fn find_in(node: &TreeNode, segments: &[&str]) -> Option<Arc<TreeNode>> {
    let (segment, rest) = segments.split_first()?;
    let children = node.children();
    let lower = segment.to_lowercase();
    let exact = children
        .binary_search_by(|c| c.name.as_str().cmp(segment))
        .ok()
        .map(|i| &children[i]);
    let variants = children
        .iter()
        .filter(|c| c.name != *segment && c.name.to_lowercase() == lower);

    for child in exact.into_iter().chain(variants) {
        if rest.is_empty() {
            return Some(child.clone());
        }
        if let Some(found) = find_in(child, rest) {
            return Some(found);
        }
    }
    None
}

/// Returns whether `node` or a descendant matches.
fn filter_node(node: &TreeNode, term: &str, ancestor_matched: bool) -> bool {
    let self_match = node.name.to_lowercase().contains(term);
    let mut descendant_match = false;
    for child in node.children().iter() {
        if filter_node(child, term, ancestor_matched || self_match) {
            descendant_match = true;
        }
    }
    let visible = self_match || ancestor_matched || descendant_match;
    node.visible.store(visible, Ordering::Relaxed);
    self_match || descendant_match
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(n))
    });
}
