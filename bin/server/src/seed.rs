//! Loads flow definitions from a JSON file into the store.
//!
//! ```json
//! {
//!   "flows": [{
//!     "name": "greet",
//!     "uid": "u1",
//!     "nodes": [
//!       {"node_id": "t", "type": "trigger", "bot": "dev", "rule_id": "ping"},
//!       {"node_id": "a", "type": "action", "bot": "dev", "rule_id": "log",
//!        "parameters": {"message": "hello {{name}}"}}
//!     ],
//!     "edges": [{"source_node": "t", "target_node": "a"}],
//!     "rate_limits": [{"window_size": 1, "window_unit": "minute", "limit_value": 10}]
//!   }]
//! }
//! ```

use crate::error::SeedError;
use flowbot_core::FlowId;
use flowbot_flows::{Flow, FlowEdge, FlowGraph, FlowNode, FlowStore, RateLimit};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// A seed document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub flows: Vec<SeedFlow>,
}

/// One flow with its graph and rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedFlow {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
}

fn default_enabled() -> bool {
    true
}

impl SeedFile {
    /// Reads and parses a seed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|e| SeedError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| SeedError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes every flow into the store and returns the assigned IDs.
    ///
    /// Each flow's graph is checked before anything is written for it.
    ///
    /// # Errors
    ///
    /// Returns an error if an edge references an unknown node or the store
    /// rejects a row.
    pub async fn apply(self, store: &dyn FlowStore) -> Result<Vec<FlowId>, SeedError> {
        let mut ids = Vec::with_capacity(self.flows.len());
        for seed in self.flows {
            ids.push(seed.apply(store).await?);
        }
        Ok(ids)
    }
}

impl SeedFlow {
    fn check_graph(&self) -> Result<(), SeedError> {
        let mut graph = FlowGraph::new();
        for node in &self.nodes {
            if !graph.add_node(node.clone()) {
                warn!(flow = %self.name, node_id = %node.node_id, "duplicate node id in seed");
            }
        }
        for edge in &self.edges {
            if !graph.add_edge(edge.clone()) {
                return Err(SeedError::DanglingEdge {
                    flow: self.name.clone(),
                    source_node: edge.source_node.clone(),
                    target_node: edge.target_node.clone(),
                });
            }
        }
        if graph.has_cycle() {
            warn!(flow = %self.name, "seeded flow contains a cycle; executions reaching it will fail");
        }
        Ok(())
    }

    async fn apply(self, store: &dyn FlowStore) -> Result<FlowId, SeedError> {
        self.check_graph()?;

        let mut flow = Flow::new(self.uid, self.topic, self.name);
        flow.description = self.description;
        if !self.enabled {
            flow.disable();
        }
        let flow = store.create_flow(flow).await?;

        for mut node in self.nodes {
            node.flow_id = flow.id;
            store.create_node(node).await?;
        }
        for mut edge in self.edges {
            edge.flow_id = flow.id;
            store.create_edge(edge).await?;
        }
        for mut rule in self.rate_limits {
            rule.flow_id = Some(flow.id);
            store.create_rate_limit(rule).await?;
        }

        info!(flow_id = %flow.id, name = %flow.name, enabled = flow.enabled, "flow seeded");
        Ok(flow.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbot_flows::{MemoryStore, NodeType, WindowUnit};
    use std::io::Write;

    fn write_seed(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const GREET: &str = r#"{
        "flows": [{
            "name": "greet",
            "uid": "u1",
            "nodes": [
                {"node_id": "t", "type": "trigger", "bot": "dev", "rule_id": "ping"},
                {"node_id": "a", "type": "action", "bot": "dev", "rule_id": "log",
                 "parameters": {"message": "hello {{name}}"}}
            ],
            "edges": [{"source_node": "t", "target_node": "a"}],
            "rate_limits": [{"window_size": 1, "window_unit": "minute", "limit_value": 10}]
        }, {
            "name": "off",
            "enabled": false
        }]
    }"#;

    #[tokio::test]
    async fn loads_and_applies_flows() {
        let file = write_seed(GREET);
        let seed = SeedFile::load(file.path()).unwrap();
        assert_eq!(seed.flows.len(), 2);

        let store = MemoryStore::new();
        let ids = seed.apply(&store).await.unwrap();
        assert_eq!(ids.len(), 2);

        let greet = store.get_flow(ids[0]).await.unwrap().unwrap();
        assert!(greet.enabled);
        assert_eq!(greet.uid, "u1");
        let nodes = store.list_nodes(ids[0]).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_type, NodeType::Trigger);
        assert!(nodes.iter().all(|n| n.flow_id == ids[0]));
        assert_eq!(store.list_edges(ids[0]).await.unwrap().len(), 1);

        let rules = store.list_rate_limits(ids[0], "").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].flow_id, Some(ids[0]));
        assert_eq!(rules[0].window_unit, WindowUnit::Minute);

        let off = store.get_flow(ids[1]).await.unwrap().unwrap();
        assert!(!off.enabled);
    }

    #[tokio::test]
    async fn dangling_edge_is_rejected_before_writing() {
        let file = write_seed(
            r#"{"flows": [{
                "name": "broken",
                "nodes": [{"node_id": "t", "type": "trigger", "bot": "dev", "rule_id": "ping"}],
                "edges": [{"source_node": "t", "target_node": "missing"}]
            }]}"#,
        );
        let store = MemoryStore::new();
        let err = SeedFile::load(file.path())
            .unwrap()
            .apply(&store)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::DanglingEdge { ref target_node, .. } if target_node == "missing"));
        assert!(store.list_flows("", "").await.unwrap().is_empty());
    }

    #[test]
    fn read_and_parse_errors() {
        let missing = Path::new("/nonexistent/flowbot/seed.json");
        assert!(matches!(
            SeedFile::load(missing),
            Err(SeedError::Read { .. })
        ));

        let file = write_seed("{not json");
        assert!(matches!(
            SeedFile::load(file.path()),
            Err(SeedError::Parse { .. })
        ));
    }
}
