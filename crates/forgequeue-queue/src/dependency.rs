//! Dependency graph: DAG validation, cycle detection, and completion cascade.

use crate::error::TaskQueueError;
use crate::job::{JobId, JobStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

/// Directed acyclic graph over job ids. Two adjacency maps (parents and
/// children) plus a status mirror so cascade decisions don't need to consult
/// the job store.
#[derive(Default)]
pub struct DependencyGraph {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// `deps[id]` = set of ids `id` depends on (its parents).
    deps: HashMap<JobId, HashSet<JobId>>,
    /// `dependents[id]` = set of ids that depend on `id` (its children).
    dependents: HashMap<JobId, HashSet<JobId>>,
    status: HashMap<JobId, JobStatus>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` with the given parent set and initial status. Validates
    /// first; on a cycle, no mutation is made.
    pub fn add_job(
        &self,
        id: JobId,
        depends_on: Vec<JobId>,
        status: JobStatus,
    ) -> Result<(), TaskQueueError> {
        self.validate(&id, &depends_on)?;

        let mut inner = self.inner.write();
        for parent in &depends_on {
            inner
                .dependents
                .entry(parent.clone())
                .or_default()
                .insert(id.clone());
        }
        inner.deps.insert(id.clone(), depends_on.into_iter().collect());
        inner.status.insert(id, status);
        Ok(())
    }

    /// Validates that adding `id -> depends_on` would not create a cycle, by
    /// running DFS from `id` over the hypothetical merged edge set. Returns
    /// the cycle path (starting and ending at the same id) on failure.
    pub fn validate(&self, id: &JobId, depends_on: &[JobId]) -> Result<(), TaskQueueError> {
        let inner = self.inner.read();

        let mut visiting = HashSet::new();
        let mut path = Vec::new();

        fn dfs(
            node: &JobId,
            target: &JobId,
            inner: &Inner,
            extra_edges: &HashMap<JobId, Vec<JobId>>,
            visiting: &mut HashSet<JobId>,
            path: &mut Vec<JobId>,
        ) -> Option<Vec<JobId>> {
            if node == target {
                path.push(node.clone());
                return Some(path.clone());
            }
            if !visiting.insert(node.clone()) {
                return None;
            }
            path.push(node.clone());

            let parents = inner.deps.get(node);
            let extra = extra_edges.get(node);
            let all_parents = parents
                .into_iter()
                .flatten()
                .chain(extra.into_iter().flatten());

            for parent in all_parents {
                if let Some(cycle) = dfs(parent, target, inner, extra_edges, visiting, path) {
                    return Some(cycle);
                }
            }

            path.pop();
            visiting.remove(node);
            None
        }

        let mut extra_edges = HashMap::new();
        extra_edges.insert(id.clone(), depends_on.to_vec());

        for parent in depends_on {
            if let Some(cycle) = dfs(
                parent,
                id,
                &inner,
                &extra_edges,
                &mut visiting,
                &mut path,
            ) {
                let mut full = vec![id.clone()];
                full.extend(cycle);
                return Err(TaskQueueError::circular_dependency(
                    full.into_iter().map(|j| j.to_string()).collect(),
                ));
            }
        }

        Ok(())
    }

    /// Marks `id` completed and returns the ids of children whose every
    /// parent is now COMPLETED (newly runnable).
    pub fn mark_completed(&self, id: &JobId) -> Vec<JobId> {
        let mut inner = self.inner.write();
        inner.status.insert(id.clone(), JobStatus::Completed);

        let children: Vec<JobId> = inner
            .dependents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        children
            .into_iter()
            .filter(|child| {
                inner
                    .deps
                    .get(child)
                    .map(|parents| {
                        parents
                            .iter()
                            .all(|p| inner.status.get(p) == Some(&JobStatus::Completed))
                    })
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Marks `id` failed and returns all direct children, which cascade to
    /// FAILED. The caller (coordinator) is responsible for propagating the
    /// cascade transitively.
    pub fn mark_failed(&self, id: &JobId) -> Vec<JobId> {
        let mut inner = self.inner.write();
        inner.status.insert(id.clone(), JobStatus::Failed);
        inner
            .dependents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Completely removes `id` from the graph: its own parent/child edges
    /// and its reference from every parent's dependents set. Used to roll
    /// back a submission that failed after the edge was added.
    pub fn remove_job(&self, id: &JobId) {
        let mut inner = self.inner.write();
        if let Some(parents) = inner.deps.remove(id) {
            for parent in parents {
                if let Some(children) = inner.dependents.get_mut(&parent) {
                    children.remove(id);
                }
            }
        }
        inner.dependents.remove(id);
        inner.status.remove(id);
    }

    /// True if any parent of `id` is not yet COMPLETED.
    pub fn has_unmet_dependencies(&self, id: &JobId) -> bool {
        let inner = self.inner.read();
        inner
            .deps
            .get(id)
            .map(|parents| {
                parents
                    .iter()
                    .any(|p| inner.status.get(p) != Some(&JobStatus::Completed))
            })
            .unwrap_or(false)
    }

    /// Kahn's algorithm topological sort over all registered ids. Ties (equal
    /// in-degree) are broken by ascending id for determinism.
    pub fn topological_sort(&self) -> Result<Vec<JobId>, TaskQueueError> {
        let inner = self.inner.read();

        let mut in_degree: HashMap<JobId, usize> = inner
            .deps
            .keys()
            .map(|id| (id.clone(), inner.deps.get(id).map(|s| s.len()).unwrap_or(0)))
            .collect();

        let mut ready: Vec<JobId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();
        let mut queue: VecDeque<JobId> = ready.into();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());

            let mut newly_ready: Vec<JobId> = Vec::new();
            if let Some(children) = inner.dependents.get(&id) {
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(child.clone());
                        }
                    }
                }
            }
            newly_ready.sort();
            for child in newly_ready {
                queue.push_back(child);
            }
        }

        if order.len() != in_degree.len() {
            return Err(TaskQueueError::Internal(
                "topological_sort: graph contains a cycle despite add_job validation".to_string(),
            ));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::from(s)
    }

    #[test]
    fn adding_an_acyclic_edge_succeeds() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("b"), vec![id("a")], JobStatus::Pending)
            .unwrap();
        assert!(graph.has_unmet_dependencies(&id("b")));
    }

    #[test]
    fn cyclic_edge_is_rejected_with_path() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("b"), vec![id("a")], JobStatus::Pending)
            .unwrap();
        let err = graph.validate(&id("a"), &[id("b")]).unwrap_err();
        assert!(matches!(err, TaskQueueError::CircularDependency { .. }));
    }

    #[test]
    fn remove_job_clears_parent_and_child_references() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("b"), vec![id("a")], JobStatus::Pending)
            .unwrap();

        graph.remove_job(&id("b"));
        assert!(graph.add_job(id("b"), vec![id("a")], JobStatus::Pending).is_ok());

        graph.remove_job(&id("a"));
        // "a" is gone; "b" no longer has an unmet dependency on it.
        assert!(!graph.has_unmet_dependencies(&id("b")));
    }

    #[test]
    fn mark_completed_unblocks_children_with_all_parents_done() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph.add_job(id("b"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("c"), vec![id("a"), id("b")], JobStatus::Pending)
            .unwrap();

        assert!(graph.mark_completed(&id("a")).is_empty());
        let unblocked = graph.mark_completed(&id("b"));
        assert_eq!(unblocked, vec![id("c")]);
        assert!(!graph.has_unmet_dependencies(&id("c")));
    }

    #[test]
    fn mark_failed_returns_direct_children() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("b"), vec![id("a")], JobStatus::Pending)
            .unwrap();
        assert_eq!(graph.mark_failed(&id("a")), vec![id("b")]);
    }

    #[test]
    fn topological_sort_orders_dependencies_before_dependents() {
        let graph = DependencyGraph::new();
        graph.add_job(id("a"), vec![], JobStatus::Pending).unwrap();
        graph.add_job(id("b"), vec![], JobStatus::Pending).unwrap();
        graph
            .add_job(id("c"), vec![id("a"), id("b")], JobStatus::Pending)
            .unwrap();

        let order = graph.topological_sort().unwrap();
        let pos_a = order.iter().position(|x| *x == id("a")).unwrap();
        let pos_b = order.iter().position(|x| *x == id("b")).unwrap();
        let pos_c = order.iter().position(|x| *x == id("c")).unwrap();
        assert!(pos_a < pos_c);
        assert!(pos_b < pos_c);
    }
}
