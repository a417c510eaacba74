use std::fs;
use std::sync::Arc;

use kintrail::{ConfigError, InMemoryGateway, TrailConfig, TrailFollower, TrailRequest, HARD_SEARCH_CEILING};

#[test]
fn load_config_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kintrail.toml");
    fs::write(
        &path,
        r#"
workers = 2
queue_capacity = 16
search_timeout_ms = 2500
search_ceiling = 1000
name_threshold = 0.92
"#,
    )
    .unwrap();

    let config = TrailConfig::load(&path).unwrap();
    assert_eq!(config.workers, 2);
    assert_eq!(config.queue_capacity, 16);
    assert_eq!(config.search_timeout_ms, 2500);
    assert_eq!(config.effective_search_ceiling(), HARD_SEARCH_CEILING);
    assert!((config.name_threshold - 0.92).abs() < 1e-6);
    assert!((config.corroboration_bonus - 0.10).abs() < 1e-6);
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "corroboration_bonus = -0.5\n").unwrap();
    assert!(matches!(TrailConfig::load(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, "workers = \"many\"\n").unwrap();
    assert!(matches!(TrailConfig::load(&path), Err(ConfigError::Parse(_))));

    let missing = dir.path().join("missing.toml");
    let err = TrailConfig::load(&missing).unwrap_err();
    assert!(err.to_string().contains("missing.toml"));
}

#[test]
fn fixture_file_drives_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixtures.json");
    fs::write(
        &path,
        r#"{
  "responses": [
    {
      "name": "John Smith",
      "records": [
        {"name": "John Smith", "address": "123 Main St", "source": "fixture"},
        {"name": "Mary Smith", "address": "123 Main Street Apt 2", "source": "fixture"},
        {"name": "Acme Holdings", "source": "sos", "kind": "business", "listing": "llc-1"}
      ]
    },
    {"name": "Mary Smith", "failure": "timeout"}
  ]
}"#,
    )
    .unwrap();

    let gateway = InMemoryGateway::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
    let config = TrailConfig::from_toml_str("workers = 1").unwrap();
    let follower = TrailFollower::new(Arc::new(gateway), config).unwrap();
    let report = follower.run(&TrailRequest::new("John Smith").max_depth(1)).unwrap();

    assert_eq!(report.all_persons.len(), 3);
    assert_eq!(report.graph.edges.len(), 1);
    assert_eq!(report.search_trail.len(), 2);
    assert_eq!(report.search_trail[1].reason, "timeout");
}
