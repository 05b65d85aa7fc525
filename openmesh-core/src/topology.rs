//! Derived network topology
//!
//! Connections are a visualization/estimation artifact computed from
//! reported geolocation, not actual radio routes. Everything here is a
//! pure function of its inputs and is recomputed on every request; no
//! adjacency is ever cached or persisted, so there is no staleness to
//! manage.

use crate::geo::{bounding_box_area_km2, haversine_km};
use crate::types::{Connection, NeighborLink, Node, NodeStatus};

/// Map-graph edge threshold in kilometers
pub const MAP_EDGE_THRESHOLD_KM: f64 = 5.0;

/// Neighbor search threshold in kilometers
pub const NEIGHBOR_THRESHOLD_KM: f64 = 10.0;

/// Maximum neighbors returned per node
pub const NEIGHBOR_LIMIT: usize = 10;

/// Build the map graph over all active nodes
///
/// Considers each unordered pair once (i < j), so the result carries no
/// self-edges and no duplicates. Edge strength falls off linearly:
/// `max(0, 100 - distance * 10)`.
pub fn build_map_graph(nodes: &[Node], threshold_km: f64) -> Vec<Connection> {
    let active: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .collect();

    let mut connections = Vec::new();
    for i in 0..active.len() {
        for j in (i + 1)..active.len() {
            let a = active[i];
            let b = active[j];
            let distance = haversine_km(
                a.position.lat,
                a.position.lng,
                b.position.lat,
                b.position.lng,
            );
            if distance <= threshold_km {
                connections.push(Connection {
                    from: a.node_id.clone(),
                    to: b.node_id.clone(),
                    distance_km: distance,
                    strength: (100.0 - distance * 10.0).max(0.0),
                });
            }
        }
    }
    connections
}

/// Nearby active nodes for one node, closest first
///
/// Excludes the node itself, keeps candidates within `threshold_km`,
/// and truncates to `limit`. Signal strength estimate:
/// `max(0, 100 - distance * 2)`.
pub fn build_node_neighbors(
    node: &Node,
    candidates: &[Node],
    threshold_km: f64,
    limit: usize,
) -> Vec<NeighborLink> {
    let mut neighbors: Vec<NeighborLink> = candidates
        .iter()
        .filter(|c| c.node_id != node.node_id && c.status == NodeStatus::Active)
        .map(|c| {
            let distance = haversine_km(
                node.position.lat,
                node.position.lng,
                c.position.lat,
                c.position.lng,
            );
            NeighborLink {
                node_id: c.node_id.clone(),
                name: c.name.clone(),
                distance_km: distance,
                signal_strength: (100.0 - distance * 2.0).max(0.0),
                position: c.position.clone(),
            }
        })
        .filter(|link| link.distance_km <= threshold_km)
        .collect();

    neighbors.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    neighbors.truncate(limit);
    neighbors
}

/// Bounding-box coverage estimate over all node positions, in km²
pub fn estimate_coverage_area(nodes: &[Node]) -> f64 {
    let coords: Vec<(f64, f64)> = nodes
        .iter()
        .map(|n| (n.position.lat, n.position.lng))
        .collect();
    bounding_box_area_km2(&coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hardware, PerformanceMetrics, Position};
    use chrono::Utc;

    fn node_at(node_id: &str, lat: f64, lng: f64, status: NodeStatus) -> Node {
        let now = Utc::now();
        Node {
            node_id: node_id.to_string(),
            owner_id: "owner-1".to_string(),
            name: format!("{} AP", node_id),
            description: None,
            position: Position {
                lat,
                lng,
                city: "Test".to_string(),
                country: "US".to_string(),
            },
            hardware: Hardware {
                kind: "test".to_string(),
                specs: String::new(),
                capabilities: vec![],
            },
            status,
            metrics: PerformanceMetrics::default(),
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
        }
    }

    #[test]
    fn test_map_graph_close_pair() {
        // ~0.015 km apart in San Francisco
        let nodes = vec![
            node_at("a", 37.7749, -122.4194, NodeStatus::Active),
            node_at("b", 37.7750, -122.4195, NodeStatus::Active),
        ];

        let graph = build_map_graph(&nodes, MAP_EDGE_THRESHOLD_KM);
        assert_eq!(graph.len(), 1);
        let edge = &graph[0];
        assert_eq!(edge.from, "a");
        assert_eq!(edge.to, "b");
        assert!(edge.distance_km < 0.05);
        assert!(
            (edge.strength - 99.85).abs() < 0.1,
            "strength was {}",
            edge.strength
        );
    }

    #[test]
    fn test_map_graph_distant_pair_has_no_edge() {
        // Roughly 20 km apart
        let nodes = vec![
            node_at("a", 37.7749, -122.4194, NodeStatus::Active),
            node_at("b", 37.9549, -122.4194, NodeStatus::Active),
        ];

        let graph = build_map_graph(&nodes, 5.0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_map_graph_no_self_or_duplicate_edges() {
        let nodes: Vec<Node> = (0..4)
            .map(|i| {
                node_at(
                    &format!("n{}", i),
                    37.7749 + i as f64 * 0.001,
                    -122.4194,
                    NodeStatus::Active,
                )
            })
            .collect();

        let graph = build_map_graph(&nodes, 5.0);
        // 4 nodes all within range: C(4,2) = 6 edges
        assert_eq!(graph.len(), 6);

        for edge in &graph {
            assert_ne!(edge.from, edge.to);
        }
        let mut pairs: Vec<(String, String)> = graph
            .iter()
            .map(|e| {
                let mut pair = [e.from.clone(), e.to.clone()];
                pair.sort();
                (pair[0].clone(), pair[1].clone())
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 6);
    }

    #[test]
    fn test_map_graph_ignores_non_active_nodes() {
        let nodes = vec![
            node_at("a", 37.7749, -122.4194, NodeStatus::Active),
            node_at("b", 37.7750, -122.4195, NodeStatus::Maintenance),
            node_at("c", 37.7751, -122.4196, NodeStatus::Inactive),
        ];

        let graph = build_map_graph(&nodes, 5.0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_neighbors_sorted_and_truncated() {
        let center = node_at("center", 37.7749, -122.4194, NodeStatus::Active);
        let mut candidates = vec![center.clone()];
        for i in 1..=15 {
            candidates.push(node_at(
                &format!("n{}", i),
                37.7749 + i as f64 * 0.002,
                -122.4194,
                NodeStatus::Active,
            ));
        }

        let neighbors =
            build_node_neighbors(&center, &candidates, NEIGHBOR_THRESHOLD_KM, NEIGHBOR_LIMIT);
        assert_eq!(neighbors.len(), NEIGHBOR_LIMIT);
        // Ascending by distance, self excluded
        assert_eq!(neighbors[0].node_id, "n1");
        for pair in neighbors.windows(2) {
            assert!(pair[0].distance_km <= pair[1].distance_km);
        }
        assert!(neighbors.iter().all(|n| n.node_id != "center"));
    }

    #[test]
    fn test_neighbors_respects_threshold() {
        let center = node_at("center", 37.7749, -122.4194, NodeStatus::Active);
        let candidates = vec![
            center.clone(),
            node_at("near", 37.7750, -122.4194, NodeStatus::Active),
            // Far north, hundreds of km away
            node_at("far", 45.0, -122.4194, NodeStatus::Active),
        ];

        let neighbors = build_node_neighbors(&center, &candidates, 10.0, 10);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].node_id, "near");
        assert!(neighbors[0].signal_strength > 99.0);
    }

    #[test]
    fn test_coverage_degenerate() {
        assert_eq!(estimate_coverage_area(&[]), 0.0);
        let single = vec![node_at("a", 37.0, -122.0, NodeStatus::Active)];
        assert_eq!(estimate_coverage_area(&single), 0.0);
    }

    #[test]
    fn test_coverage_spread() {
        let nodes = vec![
            node_at("a", 37.0, -122.0, NodeStatus::Active),
            node_at("b", 38.0, -121.0, NodeStatus::Active),
        ];
        let area = estimate_coverage_area(&nodes);
        assert!((area - 111.0 * 111.0).abs() < 1e-6);
    }
}
