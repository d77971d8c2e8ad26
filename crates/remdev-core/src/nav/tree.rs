//! Directory cache feeding a tree view.
//!
//! Nodes live in an arena and refer to their parent by [`NodeId`], so a
//! view can walk upwards without re-fetching and no entry owns another.
//! Only the top level is cached: every expansion lists the directory
//! again and replaces the previous children.

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::fs::entry::RemoteEntry;
use crate::fs::path::join_remote;
use crate::nav::sort::compare_entries;

/// Index of a node in a [`RemoteTree`].
///
/// Ids are reused after a subtree is replaced; holding one across an
/// expansion of an ancestor is a logic error that [`RemoteTree::entry`]
/// reports as `None` or as a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Anything that can list a remote directory.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn list(&self, path: &str) -> CoreResult<Vec<RemoteEntry>>;
}

#[derive(Debug)]
struct Node {
    entry: RemoteEntry,
    children: Vec<NodeId>,
}

/// Arena of remote entries forming the visible tree.
#[derive(Debug, Default)]
pub struct RemoteTree {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    roots: Vec<NodeId>,
    root_path: String,
    generation: u64,
}

impl RemoteTree {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Changes the root directory, dropping every cached node.
    pub fn set_root_path(&mut self, root_path: impl Into<String>) {
        self.root_path = root_path.into();
        self.set_root(Vec::new());
    }

    /// Replaces the top-level entries, sorted directories first.
    ///
    /// Entries without a path get `join(root_path, name)`.
    pub fn set_root(&mut self, entries: Vec<RemoteEntry>) -> Vec<NodeId> {
        for id in std::mem::take(&mut self.roots) {
            self.release(id);
        }
        let mut entries = entries;
        entries.sort_by(compare_entries);
        for mut entry in entries {
            if entry.path.is_empty() {
                entry.path = join_remote(&self.root_path, &entry.name);
            }
            entry.parent = None;
            let id = self.alloc(entry);
            self.roots.push(id);
        }
        self.roots.clone()
    }

    /// Lists the root directory through `source` and caches the result.
    pub async fn load_root<S>(&mut self, source: &S) -> CoreResult<Vec<NodeId>>
    where
        S: DirectorySource + ?Sized,
    {
        let entries = source.list(&self.root_path).await?;
        tracing::debug!(path = %self.root_path, count = entries.len(), "loaded tree root");
        Ok(self.set_root(entries))
    }

    /// Children of `node`, or the cached top level for `None`.
    ///
    /// A directory or symlink is listed afresh on every call; files have no
    /// children and are never listed. On failure the previous children are
    /// kept.
    pub async fn get_children<S>(
        &mut self,
        source: &S,
        node: Option<NodeId>,
    ) -> CoreResult<Vec<NodeId>>
    where
        S: DirectorySource + ?Sized,
    {
        let Some(id) = node else {
            return Ok(self.roots.clone());
        };

        let parent = self.node(id)?;
        if !parent.entry.is_expandable() {
            return Ok(Vec::new());
        }
        let parent_path = parent.entry.path.clone();

        let mut entries = source.list(&parent_path).await?;
        entries.sort_by(compare_entries);

        let old = match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(node) => std::mem::take(&mut node.children),
            None => return Err(unknown(id)),
        };
        for child in old {
            self.release(child);
        }

        let mut children = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.path = join_remote(&parent_path, &entry.name);
            entry.parent = Some(id);
            children.push(self.alloc(entry));
        }
        if let Some(node) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            node.children = children.clone();
        }
        Ok(children)
    }

    pub fn entry(&self, id: NodeId) -> Option<&RemoteEntry> {
        self.slots.get(id.0)?.as_ref().map(|n| &n.entry)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entry(id)?.parent
    }

    /// Children fetched by the last expansion, without listing again.
    pub fn cached_children(&self, id: NodeId) -> &[NodeId] {
        match self.slots.get(id.0).and_then(Option::as_ref) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent(parent);
        }
        chain
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) {
        if let Some(node) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            node.entry.expanded = expanded;
        }
    }

    /// Finds a live node by its remote path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| match slot {
            Some(node) if node.entry.path == path => Some(NodeId(i)),
            _ => None,
        })
    }

    /// Marks the presentation as stale. Nothing is fetched here; the next
    /// expansion lists again.
    pub fn refresh(&mut self) {
        self.generation += 1;
    }

    /// Incremented by every [`RemoteTree::refresh`]; views compare it to
    /// decide whether to redraw.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, id: NodeId) -> CoreResult<&Node> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| unknown(id))
    }

    fn alloc(&mut self, entry: RemoteEntry) -> NodeId {
        let node = Node {
            entry,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Frees `id` and everything below it.
    fn release(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slots.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
                self.free.push(current.0);
            }
        }
    }
}

fn unknown(id: NodeId) -> CoreError {
    CoreError::InvalidPath(format!("tree node {} no longer exists", id.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::EntryKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        dirs: HashMap<String, Vec<(&'static str, EntryKind)>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn with(mut self, path: &str, entries: Vec<(&'static str, EntryKind)>) -> Self {
            self.dirs.insert(path.to_string(), entries);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DirectorySource for FakeSource {
        async fn list(&self, path: &str) -> CoreResult<Vec<RemoteEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entries = self.dirs.get(path).ok_or_else(|| CoreError::List {
                path: path.to_string(),
                cause: "no such directory".to_string(),
                timed_out: false,
            })?;
            Ok(entries
                .iter()
                .map(|(name, kind)| RemoteEntry::new(name, *kind))
                .collect())
        }
    }

    fn names(tree: &RemoteTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|id| tree.entry(*id).unwrap().name.clone())
            .collect()
    }

    fn source() -> FakeSource {
        FakeSource::default()
            .with(
                "/srv",
                vec![
                    ("b.txt", EntryKind::File),
                    ("A", EntryKind::Directory),
                    ("a.txt", EntryKind::File),
                ],
            )
            .with(
                "/srv/A",
                vec![("z", EntryKind::Directory), ("link", EntryKind::Symlink), ("f", EntryKind::File)],
            )
            .with("/srv/A/link", vec![("target.txt", EntryKind::File)])
            .with("/srv/A/z", vec![])
    }

    #[tokio::test]
    async fn root_is_sorted_directories_first() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        assert_eq!(names(&tree, &roots), vec!["A", "a.txt", "b.txt"]);
        assert_eq!(tree.entry(roots[1]).unwrap().path, "/srv/a.txt");
    }

    #[tokio::test]
    async fn implicit_root_returns_cache_without_listing() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        tree.load_root(&src).await.unwrap();
        let before = src.calls();

        let roots = tree.get_children(&src, None).await.unwrap();

        assert_eq!(roots.len(), 3);
        assert_eq!(src.calls(), before);
    }

    #[tokio::test]
    async fn children_get_parent_and_joined_path() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        let dir = roots[0];

        let children = tree.get_children(&src, Some(dir)).await.unwrap();

        assert_eq!(names(&tree, &children), vec!["link", "z", "f"]);
        for child in &children {
            assert_eq!(tree.parent(*child), Some(dir));
        }
        assert_eq!(tree.entry(children[2]).unwrap().path, "/srv/A/f");
    }

    #[tokio::test]
    async fn symlinks_expand_like_directories() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        let children = tree.get_children(&src, Some(roots[0])).await.unwrap();
        let link = children[0];

        let inside = tree.get_children(&src, Some(link)).await.unwrap();

        assert_eq!(names(&tree, &inside), vec!["target.txt"]);
        assert_eq!(tree.entry(link).unwrap().kind, EntryKind::Symlink);
        assert_eq!(tree.ancestors(inside[0]), vec![link, roots[0]]);
    }

    #[tokio::test]
    async fn files_have_no_children_and_are_not_listed() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        let before = src.calls();

        let children = tree.get_children(&src, Some(roots[2])).await.unwrap();

        assert!(children.is_empty());
        assert_eq!(src.calls(), before);
    }

    #[tokio::test]
    async fn every_expansion_refetches_and_replaces_children() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();

        tree.get_children(&src, Some(roots[0])).await.unwrap();
        let nodes_after_first = tree.len();
        let before = src.calls();
        let again = tree.get_children(&src, Some(roots[0])).await.unwrap();

        assert_eq!(src.calls(), before + 1);
        assert_eq!(again.len(), 3);
        assert_eq!(tree.len(), nodes_after_first, "old children are released");
        assert_eq!(tree.cached_children(roots[0]), again.as_slice());
    }

    #[tokio::test]
    async fn failed_expansion_keeps_previous_children() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        let children = tree.get_children(&src, Some(roots[0])).await.unwrap();
        let z = children[1];
        tree.get_children(&src, Some(z)).await.unwrap();

        let broken = FakeSource::default();
        let err = tree.get_children(&broken, Some(roots[0])).await.unwrap_err();

        assert!(matches!(err, CoreError::List { .. }));
        assert_eq!(tree.cached_children(roots[0]), children.as_slice());
    }

    #[tokio::test]
    async fn replacing_root_releases_stale_ids() {
        let src = source();
        let mut tree = RemoteTree::new("/srv");
        let roots = tree.load_root(&src).await.unwrap();
        let children = tree.get_children(&src, Some(roots[0])).await.unwrap();

        tree.set_root_path("/srv/A");
        assert!(tree.is_empty());
        assert!(tree.entry(children[0]).is_none());

        let err = tree.get_children(&src, Some(roots[0])).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath(_)));
    }

    #[test]
    fn refresh_bumps_generation_only() {
        let mut tree = RemoteTree::new("/");
        tree.set_root(vec![RemoteEntry::new("x", EntryKind::File)]);
        tree.refresh();
        tree.refresh();
        assert_eq!(tree.generation(), 2);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn set_root_fills_missing_paths() {
        let mut tree = RemoteTree::new("");
        let ids = tree.set_root(vec![RemoteEntry::new("docs", EntryKind::Directory)]);
        assert_eq!(tree.entry(ids[0]).unwrap().path, "docs");
        assert_eq!(tree.find("docs"), Some(ids[0]));
    }

    #[test]
    fn expanded_flag_is_stored_on_the_entry() {
        let mut tree = RemoteTree::new("/");
        let ids = tree.set_root(vec![RemoteEntry::new("d", EntryKind::Directory)]);
        tree.set_expanded(ids[0], true);
        assert!(tree.entry(ids[0]).unwrap().expanded);
    }

    #[tokio::test]
    async fn session_feeds_the_tree() {
        use crate::config::profile::ServerProfile;
        use crate::config::settings::SessionSettings;
        use crate::remote::session::Session;
        use crate::remote::status::NullObserver;
        use crate::remote::testing::{MockConnector, MockNode};
        use std::sync::Arc;

        let mock = MockConnector::new();
        mock.insert("/home/kim/site", MockNode::dir());
        mock.insert("/home/kim/site/index.html", MockNode::file(b"<html>"));
        mock.insert("/home/kim/notes.md", MockNode::file(b"#"));
        let session = Session::spawn(
            Arc::new(mock.clone()),
            Arc::new(NullObserver),
            SessionSettings::default(),
        );
        session
            .connect(ServerProfile::new("t", "h", 22, "kim", "pw").with_path("/home/kim"))
            .await
            .unwrap();

        let mut tree = RemoteTree::new(session.base_path());
        let roots = tree.load_root(&session).await.unwrap();
        assert_eq!(names(&tree, &roots), vec!["site", "notes.md"]);

        let children = tree.get_children(&session, Some(roots[0])).await.unwrap();
        assert_eq!(
            tree.entry(children[0]).unwrap().path,
            "/home/kim/site/index.html"
        );
    }
}
