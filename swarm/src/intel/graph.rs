//! Wallet relationship graph: in-memory adjacency for BFS clustering, with
//! edges mirrored to the KV store under a 7 day expiry so restarts and other
//! nodes can rebuild context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use anyhow::{Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const EDGE_TTL_SECONDS: i64 = 7 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    FundedBy,
    TransferredTo,
    DeployedFrom,
    Associated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub tx_count: u64,
}

/// The adjacency structure itself; no I/O.
#[derive(Default)]
pub struct AdjacencyGraph {
    graph: DiGraph<String, WalletEdge>,
    nodes: HashMap<String, NodeIndex>,
}

impl AdjacencyGraph {
    fn node_index(&mut self, wallet: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(wallet) {
            return idx;
        }
        let idx = self.graph.add_node(wallet.to_string());
        self.nodes.insert(wallet.to_string(), idx);
        idx
    }

    /// Upsert; a repeat observation bumps `tx_count` and `last_seen`.
    pub fn upsert_edge(&mut self, from: &str, to: &str, edge_type: EdgeType) -> WalletEdge {
        let a = self.node_index(from);
        let b = self.node_index(to);

        if let Some(existing) = self.graph.find_edge(a, b) {
            let weight = &mut self.graph[existing];
            weight.tx_count += 1;
            weight.last_seen_ms = aegis_core::now_ms();
            return weight.clone();
        }

        let now = aegis_core::now_ms();
        let edge = WalletEdge {
            from: from.to_string(),
            to: to.to_string(),
            edge_type,
            first_seen_ms: now,
            last_seen_ms: now,
            tx_count: 1,
        };
        self.graph.add_edge(a, b, edge.clone());
        edge
    }

    pub fn get_edge(&self, from: &str, to: &str) -> Option<WalletEdge> {
        let a = *self.nodes.get(from)?;
        let b = *self.nodes.get(to)?;
        self.graph.find_edge(a, b).map(|e| self.graph[e].clone())
    }

    /// Iterative BFS over in- and out-neighbors up to `max_depth`, excluding
    /// the root itself.
    pub fn cluster(&self, root: &str, max_depth: usize) -> Vec<String> {
        let Some(&start) = self.nodes.get(root) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut cluster = Vec::new();
        let mut frontier = VecDeque::from([(start, 0usize)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth == max_depth {
                continue;
            }
            for neighbor in self.graph.neighbors_undirected(node) {
                if visited.insert(neighbor) {
                    cluster.push(self.graph[neighbor].clone());
                    frontier.push_back((neighbor, depth + 1));
                }
            }
        }
        cluster
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

pub struct WalletGraph {
    inner: Mutex<AdjacencyGraph>,
    conn: MultiplexedConnection,
    prefix: String,
}

impl WalletGraph {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self { inner: Mutex::new(AdjacencyGraph::default()), conn, prefix: prefix.to_string() }
    }

    pub async fn add_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<()> {
        let edge = self.inner.lock().unwrap().upsert_edge(from, to, edge_type);

        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&edge)?;
        let edge_key = format!("{}:graph:edge:{}:{}", self.prefix, from, to);
        let _: () = conn
            .set_ex(edge_key, json, EDGE_TTL_SECONDS as u64)
            .await
            .context("persisting wallet edge")?;

        let out_key = format!("{}:graph:out:{}", self.prefix, from);
        let in_key = format!("{}:graph:in:{}", self.prefix, to);
        let _: () = conn.sadd(&out_key, to).await?;
        let _: () = conn.expire(&out_key, EDGE_TTL_SECONDS).await?;
        let _: () = conn.sadd(&in_key, from).await?;
        let _: () = conn.expire(&in_key, EDGE_TTL_SECONDS).await?;
        Ok(())
    }

    pub fn get_edge(&self, from: &str, to: &str) -> Option<WalletEdge> {
        self.inner.lock().unwrap().get_edge(from, to)
    }

    pub fn get_cluster(&self, root: &str, max_depth: usize) -> Vec<String> {
        self.inner.lock().unwrap().cluster(root, max_depth)
    }

    pub fn cluster_size(&self, root: &str, max_depth: usize) -> usize {
        self.get_cluster(root, max_depth).len()
    }

    pub fn are_connected(&self, a: &str, b: &str, max_depth: usize) -> bool {
        self.get_cluster(a, max_depth).iter().any(|w| w == b)
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().unwrap().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.lock().unwrap().edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfs_respects_depth_and_excludes_root() {
        let mut g = AdjacencyGraph::default();
        // chain: A -> B -> C -> D, plus E funding A
        g.upsert_edge("A", "B", EdgeType::TransferredTo);
        g.upsert_edge("B", "C", EdgeType::TransferredTo);
        g.upsert_edge("C", "D", EdgeType::TransferredTo);
        g.upsert_edge("E", "A", EdgeType::FundedBy);

        let depth1 = g.cluster("A", 1);
        assert_eq!(depth1.len(), 2); // B and E, both directions count
        assert!(!depth1.contains(&"A".to_string()));

        assert_eq!(g.cluster("A", 2).len(), 3); // + C
        assert_eq!(g.cluster("A", 3).len(), 4); // + D
    }

    #[test]
    fn connectivity_is_symmetric_over_directions() {
        let mut g = AdjacencyGraph::default();
        g.upsert_edge("Funder", "Deployer", EdgeType::FundedBy);
        g.upsert_edge("Deployer", "Mint", EdgeType::DeployedFrom);

        assert!(g.cluster("Funder", 2).contains(&"Mint".to_string()));
        assert!(g.cluster("Mint", 2).contains(&"Funder".to_string()));
        assert!(!g.cluster("Funder", 1).contains(&"Mint".to_string()));
    }

    #[test]
    fn repeat_edges_bump_tx_count() {
        let mut g = AdjacencyGraph::default();
        g.upsert_edge("A", "B", EdgeType::TransferredTo);
        g.upsert_edge("A", "B", EdgeType::TransferredTo);
        let edge = g.upsert_edge("A", "B", EdgeType::TransferredTo);
        assert_eq!(edge.tx_count, 3);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn unknown_root_yields_empty_cluster() {
        let g = AdjacencyGraph::default();
        assert!(g.cluster("Nobody", 3).is_empty());
    }

    #[test]
    fn visited_set_survives_cycles() {
        let mut g = AdjacencyGraph::default();
        g.upsert_edge("A", "B", EdgeType::Associated);
        g.upsert_edge("B", "C", EdgeType::Associated);
        g.upsert_edge("C", "A", EdgeType::Associated);

        let cluster = g.cluster("A", 10);
        assert_eq!(cluster.len(), 2);
    }
}
