// tests/unit_settings_test.rs

use opalite::config::{NodeSettings, Settings};
use std::time::Duration;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.operation_timeout(), Duration::from_secs(7));
    assert_eq!(settings.reconnection_delay(), Duration::from_millis(500));
    assert_eq!(settings.heartbeat_interval(), Duration::from_millis(500));
    assert_eq!(settings.heartbeat_timeout(), Duration::from_millis(1500));
    assert_eq!(settings.max_reconnections, 10);
    assert_eq!(settings.max_operation_retries, 10);
    assert_eq!(settings.max_operation_queue_size, 5_000);
    assert!(settings.require_master);
    assert!(!settings.ssl.enabled);
    assert!(settings.ssl.validate_server_cert);
    assert!(settings.credentials.is_none());
    assert!(settings.validate().is_ok());
}

#[test]
fn test_single_node_constructor() {
    let settings = Settings::single_node("db.internal", 1113);
    match &settings.node {
        NodeSettings::Static(static_nodes) => {
            assert_eq!(static_nodes.nodes.len(), 1);
            assert_eq!(static_nodes.nodes[0].host, "db.internal");
            assert_eq!(static_nodes.nodes[0].port, 1113);
            assert_eq!(static_nodes.nodes[0].secure_port, None);
        }
        other => panic!("Expected static node settings, got {other:?}"),
    }
    assert!(settings.validate().is_ok());
}

#[test]
fn test_validation_rejects_zero_operation_timeout() {
    let mut settings = Settings::default();
    settings.operation_timeout_ms = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn test_validation_rejects_empty_node_list() {
    let mut settings = Settings::default();
    if let NodeSettings::Static(static_nodes) = &mut settings.node {
        static_nodes.nodes.clear();
    }
    assert!(settings.validate().is_err());
}

#[test]
fn test_validation_rejects_zero_queue_size() {
    let mut settings = Settings::default();
    settings.max_operation_queue_size = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn test_settings_deserialize_static_node() {
    let json = r#"{
        "node": {
            "mode": "static",
            "nodes": [{"host": "127.0.0.1", "port": 1113, "secure_port": 1115}]
        },
        "operation_timeout_ms": 2000
    }"#;

    let settings: Settings = serde_json::from_str(json).unwrap();
    assert_eq!(settings.operation_timeout(), Duration::from_secs(2));
    match &settings.node {
        NodeSettings::Static(static_nodes) => {
            assert_eq!(static_nodes.nodes[0].secure_port, Some(1115));
        }
        other => panic!("Expected static node settings, got {other:?}"),
    }
}

#[test]
fn test_settings_deserialize_cluster_node() {
    let json = r#"{
        "node": {
            "mode": "cluster",
            "cluster_dns": "nodes.db.internal",
            "gossip_port": 2113
        }
    }"#;

    let settings: Settings = serde_json::from_str(json).unwrap();
    match &settings.node {
        NodeSettings::Cluster(cluster) => {
            assert_eq!(cluster.cluster_dns, "nodes.db.internal");
            assert_eq!(cluster.gossip_port, 2113);
            assert_eq!(cluster.max_discover_attempts, 10);
        }
        other => panic!("Expected cluster settings, got {other:?}"),
    }
}
