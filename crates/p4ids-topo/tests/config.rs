//! Loading topology files from disk.

use std::fs;
use std::path::PathBuf;

use p4ids_net::config::ConfigError;
use p4ids_net::topology::SwitchMode;
use p4ids_net::TopologyConfig;

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("p4ids-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_external_switch_topology() {
    let path = temp_file(
        "external.toml",
        r#"
            [[switches]]
            name = "s1"
            protocols = "P4Runtime"
            mode = "external"
        "#,
    );
    let cfg = TopologyConfig::from_path(&path).unwrap();
    fs::remove_file(&path).unwrap();

    let topo = cfg.build().unwrap();
    assert_eq!(topo.switches()[0].mode, SwitchMode::External);
    assert_eq!(topo.switches()[0].protocols, "P4Runtime");
    // hosts and links keep the default IDS layout
    assert_eq!(topo.hosts().len(), 2);
    assert_eq!(topo.default_intf("h2").as_deref(), Some("h2-eth1"));
}

#[test]
fn missing_file_names_the_path() {
    let path = std::env::temp_dir().join("p4ids-does-not-exist.toml");
    let err = TopologyConfig::from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("p4ids-does-not-exist.toml"));
}

#[test]
fn link_to_unknown_node_is_rejected() {
    let path = temp_file(
        "unknown.toml",
        r#"
            [[links]]
            node1 = "h1"
            port1 = 1
            node2 = "s9"
            port2 = 1
        "#,
    );
    let cfg = TopologyConfig::from_path(&path).unwrap();
    fs::remove_file(&path).unwrap();

    let err = cfg.build().unwrap_err();
    assert_eq!(err.to_string(), "link references unknown node \"s9\"");
}

#[test]
fn topology_serializes_for_print() {
    let topo = TopologyConfig::default().build().unwrap();
    let json = serde_json::to_value(&topo).unwrap();
    assert_eq!(json["controller"]["port"], 6653);
    assert_eq!(json["hosts"][1]["ip"], "192.168.1.2/24");
    assert_eq!(json["switches"][0]["mode"], "bridge");
}
