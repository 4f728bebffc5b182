use crate::{
    job::Job,
    manager::Manager,
    types::{EntryHandle, GroupHandle, IndexMap, IndexSet, JobFlags, JobHandle, Priority},
};
use core::{fmt, hash::Hash};
use derive_more::{Debug, From};
use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;
use thiserror::Error;

/// Error kind for graph submission failures. Node keys are rendered with
/// their `Debug` form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    #[error("node {0} is referenced by an edge but was never added")]
    UnknownNode(String),
    #[error("node {0} is added twice")]
    DuplicateNode(String),
    #[error("node {0} depends on itself")]
    SelfDependency(String),
    #[error("node {0} is used as a group but is a job")]
    NotAGroup(String),
    /// The provided dependency graph contains cycle(s).
    #[error("graph contains cycle(s)")]
    Cycle,
}

#[derive(Debug)]
enum NodeSpec {
    Job {
        priority: Priority,
        flags: JobFlags,
        job: Box<dyn Job>,
    },
    Group {
        flags: JobFlags,
    },
}

/// Keyed builder for a job graph.
///
/// Nodes and edges are collected first and only turned into manager entries
/// by [`submit`](Self::submit), which checks the whole graph before creating
/// anything:
///
/// ```text
///   load_a   load_b
///       \     /
///        merge
///          |
///        store
/// ```
///
/// ```ignore
/// graph.depends_on("merge", "load_a").depends_on("merge", "load_b");
/// graph.depends_on("store", "merge");
/// ```
#[derive(Debug)]
pub struct JobGraph<K> {
    nodes: IndexMap<K, NodeSpec>,
    /// `(prerequisite, dependent, is_static)`.
    edges: IndexSet<(K, K, bool)>,
    /// First key added twice, reported by `submit`.
    duplicate: Option<K>,
}

impl<K> Default for JobGraph<K> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::default(),
            edges: IndexSet::default(),
            duplicate: None,
        }
    }
}

impl<K> JobGraph<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(
        &mut self,
        key: K,
        priority: Priority,
        flags: JobFlags,
        job: impl Job,
    ) -> &mut Self {
        self.insert(
            key,
            NodeSpec::Job {
                priority,
                flags,
                job: Box::new(job),
            },
        )
    }

    pub fn group(&mut self, key: K, flags: JobFlags) -> &mut Self {
        self.insert(key, NodeSpec::Group { flags })
    }

    /// `dependent` runs only after `prerequisite` has completed.
    pub fn depends_on(&mut self, dependent: K, prerequisite: K) -> &mut Self {
        self.edges.insert((prerequisite, dependent, false));
        self
    }

    /// Register `dependent` in the static table of `group`.
    pub fn group_member(&mut self, group: K, dependent: K) -> &mut Self {
        self.edges.insert((group, dependent, true));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, key: K, node: NodeSpec) -> &mut Self {
        if self.nodes.contains_key(&key) {
            self.duplicate.get_or_insert(key);
        } else {
            self.nodes.insert(key, node);
        }
        self
    }

    /// Create every node in `manager`, wire the edges and schedule every job.
    ///
    /// Entries are created and wired in topological order, so a group without
    /// prerequisites is already complete when its members are attached and
    /// does not hold them back.
    ///
    /// # Errors
    /// If a key is duplicated or unknown, an edge is a self-loop, a static
    /// edge leaves a job, or the graph has a cycle. Nothing is created in
    /// `manager` in that case.
    pub fn submit(self, manager: &Manager) -> Result<SubmittedGraph<K>, GraphError> {
        if let Some(key) = &self.duplicate {
            return Err(GraphError::DuplicateNode(format!("{key:?}")));
        }
        let order = self.topological_order()?;

        let Self {
            nodes, mut edges, ..
        } = self;
        let mut specs: Vec<_> = nodes.into_iter().map(Some).collect();
        let mut handles =
            IndexMap::with_capacity_and_hasher(specs.len(), FxBuildHasher);
        let mut jobs = Vec::new();
        for idx in order {
            let (key, spec) = specs[idx].take().expect("JobGraph::submit: [1]");
            let node = match spec {
                NodeSpec::Job {
                    priority,
                    flags,
                    job,
                } => {
                    let handle = manager.create_boxed_job(flags, priority, job);
                    jobs.push(handle);
                    SubmittedNode::Job(handle)
                }
                NodeSpec::Group { flags } => SubmittedNode::Group(manager.create_group(flags)),
            };
            // Every prerequisite precedes `key` in the order, so its own
            // gates are already in place.
            edges.retain(|(prerequisite, dependent, is_static)| {
                if *dependent != key {
                    return true;
                }
                let from = handles
                    .get(prerequisite)
                    .copied()
                    .expect("JobGraph::submit: [2]");
                match (from, *is_static) {
                    (SubmittedNode::Group(group), true) => {
                        manager.add_static_dependency(group, node);
                    }
                    (from, _) => manager.add_dependency(from, node),
                }
                false
            });
            handles.insert(key, node);
        }
        debug_assert!(edges.is_empty(), "JobGraph::submit: [3]");
        for &job in &jobs {
            manager.schedule(job);
        }
        Ok(SubmittedGraph { handles })
    }

    /// Kahn's algorithm over node indices. Also validates the edges.
    fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let index_of = |key: &K| {
            self.nodes
                .get_index_of(key)
                .ok_or_else(|| GraphError::UnknownNode(format!("{key:?}")))
        };
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut children = vec![Vec::new(); self.nodes.len()];
        for (prerequisite, dependent, is_static) in &self.edges {
            let from = index_of(prerequisite)?;
            let to = index_of(dependent)?;
            if from == to {
                return Err(GraphError::SelfDependency(format!("{dependent:?}")));
            }
            if *is_static && !matches!(self.nodes[from], NodeSpec::Group { .. }) {
                return Err(GraphError::NotAGroup(format!("{prerequisite:?}")));
            }
            in_degree[to] += 1;
            children[from].push(to);
        }

        let mut ready: VecDeque<_> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &child in &children[idx] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push_back(child);
                }
            }
        }
        // Nodes on a cycle never reach in-degree zero.
        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(GraphError::Cycle)
        }
    }
}

/// Manager handle of a submitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
pub enum SubmittedNode {
    Job(JobHandle),
    Group(GroupHandle),
}

impl From<SubmittedNode> for EntryHandle {
    fn from(node: SubmittedNode) -> Self {
        match node {
            SubmittedNode::Job(handle) => handle.into(),
            SubmittedNode::Group(handle) => handle.into(),
        }
    }
}

/// Handles of a submitted graph, in topological order.
#[derive(Debug)]
pub struct SubmittedGraph<K> {
    handles: IndexMap<K, SubmittedNode>,
}

impl<K: Hash + Eq> SubmittedGraph<K> {
    #[must_use]
    pub fn node(&self, key: &K) -> Option<SubmittedNode> {
        self.handles.get(key).copied()
    }

    #[must_use]
    pub fn job(&self, key: &K) -> Option<JobHandle> {
        match self.node(key)? {
            SubmittedNode::Job(handle) => Some(handle),
            SubmittedNode::Group(_) => None,
        }
    }

    #[must_use]
    pub fn group(&self, key: &K) -> Option<GroupHandle> {
        match self.node(key)? {
            SubmittedNode::Group(handle) => Some(handle),
            SubmittedNode::Job(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, SubmittedNode)> {
        self.handles.iter().map(|(key, node)| (key, *node))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether every node of the graph has completed.
    #[must_use]
    pub fn is_completed(&self, manager: &Manager) -> bool {
        self.handles
            .values()
            .all(|&node| manager.is_completed(node))
    }
}
