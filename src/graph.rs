//! Roadmap graph engine.
//!
//! Owns the per-project DAG of plan nodes and dependency edges. The three
//! invariants enforced here:
//! - the edge set stays acyclic, checked at edge-creation time by walking
//!   reachability from `to` back to `from` before anything is written;
//! - a node activates only when every prerequisite is done, via the
//!   idempotent [`GraphEngine::activate_ready_nodes`] sweep;
//! - a decision node reaches done only through
//!   [`GraphEngine::resolve_decision`], which may materialize new branch
//!   nodes wired as successors of the decision.
//!
//! All graph mutation for one project runs under that project's async
//! mutex, so two concurrent resolutions cannot race the cycle or
//! ready-state checks. Unrelated projects stay fully concurrent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{DecisionOption, NodeKind, NodeStatus, RoadmapEdge, RoadmapNode};
use crate::store::Store;

/// Nodes and edges created by one decision resolution.
#[derive(Debug, Clone, Default)]
pub struct BranchExpansion {
    pub nodes: Vec<RoadmapNode>,
    pub edges: Vec<RoadmapEdge>,
}

pub struct GraphEngine {
    store: Arc<dyn Store>,
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GraphEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create_node(
        &self,
        project_id: &str,
        kind: NodeKind,
        title: &str,
        options: Vec<DecisionOption>,
    ) -> Result<RoadmapNode> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("node title is empty".into()));
        }
        match kind {
            NodeKind::Decision if options.is_empty() => {
                return Err(EngineError::Validation(
                    "decision node needs at least one option".into(),
                ));
            }
            NodeKind::Task | NodeKind::Milestone if !options.is_empty() => {
                return Err(EngineError::Validation(format!(
                    "{} node cannot carry decision options",
                    kind.as_str()
                )));
            }
            _ => {}
        }

        let now = Utc::now().timestamp();
        let node = RoadmapNode {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            kind,
            title: title.to_string(),
            status: NodeStatus::Pending,
            options,
            chosen_option: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_node(&node).await?;
        tracing::debug!(node_id = %node.id, kind = kind.as_str(), "node created");
        Ok(node)
    }

    /// Add a dependency edge. Fails with the `cycle` kind, writing nothing,
    /// if `from` is reachable from `to` over the existing edges.
    pub async fn create_edge(&self, project_id: &str, from: &str, to: &str) -> Result<RoadmapEdge> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let from_node = self.store.get_node(from).await?;
        let to_node = self.store.get_node(to).await?;
        if from_node.project_id != project_id || to_node.project_id != project_id {
            return Err(EngineError::Validation(
                "edge endpoints belong to another project".into(),
            ));
        }

        let edges = self.store.edges_for_project(project_id).await?;
        if from == to || reachable(&edges, to, from) {
            return Err(EngineError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let edge = RoadmapEdge {
            project_id: project_id.to_string(),
            from_node: from.to_string(),
            to_node: to.to_string(),
        };
        self.store.insert_edge(&edge).await?;
        Ok(edge)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<RoadmapNode> {
        self.store.get_node(node_id).await
    }

    pub async fn nodes(&self, project_id: &str) -> Result<Vec<RoadmapNode>> {
        self.store.nodes_for_project(project_id).await
    }

    /// Move a node through its status machine.
    ///
    /// Allowed: pending → active/blocked/abandoned, active → done/blocked/
    /// abandoned, blocked → active/abandoned. Done and abandoned are
    /// terminal. A decision node cannot be set done here; that path goes
    /// through [`Self::resolve_decision`].
    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<RoadmapNode> {
        let mut node = self.store.get_node(node_id).await?;
        let lock = self.project_lock(&node.project_id).await;
        let _guard = lock.lock().await;
        // Re-read under the lock; another mutation may have won the race.
        node = self.store.get_node(node_id).await?;

        if node.kind == NodeKind::Decision && status == NodeStatus::Done {
            return Err(EngineError::Validation(format!(
                "decision node {} is completed by resolving it, not by a status update",
                node_id
            )));
        }

        let allowed = matches!(
            (node.status, status),
            (NodeStatus::Pending, NodeStatus::Active)
                | (NodeStatus::Pending, NodeStatus::Blocked)
                | (NodeStatus::Pending, NodeStatus::Abandoned)
                | (NodeStatus::Active, NodeStatus::Done)
                | (NodeStatus::Active, NodeStatus::Blocked)
                | (NodeStatus::Active, NodeStatus::Abandoned)
                | (NodeStatus::Blocked, NodeStatus::Active)
                | (NodeStatus::Blocked, NodeStatus::Abandoned)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                from: node.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        node.status = status;
        node.updated_at = Utc::now().timestamp();
        self.store.update_node(&node).await?;
        Ok(node)
    }

    /// Choose an option on a decision node.
    ///
    /// Marks the decision done, records the chosen option, and materializes
    /// the option's branch as pending task nodes depending on the decision.
    /// Existing nodes and edges are never removed. Finishes with an
    /// activation sweep so newly unblocked successors go active in the same
    /// serialized section.
    pub async fn resolve_decision(&self, node_id: &str, option: &str) -> Result<BranchExpansion> {
        let node = self.store.get_node(node_id).await?;
        let lock = self.project_lock(&node.project_id).await;
        let _guard = lock.lock().await;
        let mut node = self.store.get_node(node_id).await?;

        if node.kind != NodeKind::Decision {
            return Err(EngineError::Validation(format!(
                "node {} is a {}, not a decision",
                node_id,
                node.kind.as_str()
            )));
        }
        if matches!(node.status, NodeStatus::Done | NodeStatus::Abandoned) {
            return Err(EngineError::InvalidTransition {
                from: node.status.as_str().to_string(),
                to: NodeStatus::Done.as_str().to_string(),
            });
        }
        let chosen = node
            .options
            .iter()
            .find(|o| o.label == option)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "decision option",
                id: option.to_string(),
            })?;

        node.chosen_option = Some(chosen.label.clone());
        node.status = NodeStatus::Done;
        node.updated_at = Utc::now().timestamp();
        self.store.update_node(&node).await?;

        let mut expansion = BranchExpansion::default();
        let now = Utc::now().timestamp();
        for title in &chosen.branch {
            let task = RoadmapNode {
                id: Uuid::new_v4().to_string(),
                project_id: node.project_id.clone(),
                kind: NodeKind::Task,
                title: title.clone(),
                status: NodeStatus::Pending,
                options: Vec::new(),
                chosen_option: None,
                created_at: now,
                updated_at: now,
            };
            self.store.insert_node(&task).await?;
            let edge = RoadmapEdge {
                project_id: node.project_id.clone(),
                from_node: node.id.clone(),
                to_node: task.id.clone(),
            };
            self.store.insert_edge(&edge).await?;
            expansion.nodes.push(task);
            expansion.edges.push(edge);
        }

        tracing::info!(
            node_id = %node.id,
            option = %chosen.label,
            branch_nodes = expansion.nodes.len(),
            "decision resolved"
        );
        self.sweep(&node.project_id).await?;
        Ok(expansion)
    }

    /// Promote every pending node whose prerequisites are all done.
    /// Idempotent; a second call with no intervening change activates
    /// nothing.
    pub async fn activate_ready_nodes(&self, project_id: &str) -> Result<Vec<String>> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;
        self.sweep(project_id).await
    }

    async fn sweep(&self, project_id: &str) -> Result<Vec<String>> {
        let nodes = self.store.nodes_for_project(project_id).await?;
        let edges = self.store.edges_for_project(project_id).await?;
        let done: HashSet<&str> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Done)
            .map(|n| n.id.as_str())
            .collect();

        let mut activated = Vec::new();
        for node in &nodes {
            if node.status != NodeStatus::Pending {
                continue;
            }
            let ready = edges
                .iter()
                .filter(|e| e.to_node == node.id)
                .all(|e| done.contains(e.from_node.as_str()));
            if ready {
                let mut updated = node.clone();
                updated.status = NodeStatus::Active;
                updated.updated_at = Utc::now().timestamp();
                self.store.update_node(&updated).await?;
                activated.push(node.id.clone());
            }
        }
        if !activated.is_empty() {
            tracing::debug!(project_id, count = activated.len(), "nodes activated");
        }
        Ok(activated)
    }
}

/// Is `target` reachable from `start` following edge direction?
fn reachable(edges: &[RoadmapEdge], start: &str, target: &str) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.from_node.as_str())
            .or_default()
            .push(edge.to_node.as_str());
    }

    let mut stack = vec![start];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == target {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            stack.extend(next.iter().copied());
        }
    }
    false
}
