use harvestd::config::ManifestConfig;
use harvestd::error::HarvestError;
use harvestd::registry::{Registry, RestartPolicy, StopSignal};

fn manifest(raw: &str) -> ManifestConfig {
    toml::from_str(raw).expect("manifest should parse")
}

fn load_err(raw: &str) -> String {
    match Registry::load(&manifest(raw)) {
        Err(HarvestError::Config(msg)) => msg,
        Err(other) => panic!("expected ConfigError, got {other}"),
        Ok(_) => panic!("expected ConfigError, load succeeded"),
    }
}

#[test]
fn test_load_valid_manifest() {
    let registry = Registry::load(&manifest(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        timeout_secs = 36000
        cooldown_secs = 21600

        [[job]]
        id = "bga"
        command = ["harvester", "bga"]
        stop_signal = "term"
        restart = "never"
        "#,
    ))
    .unwrap();

    assert_eq!(registry.len(), 2);
    assert!(!registry.is_empty());

    // Manifest order is preserved
    let ids: Vec<&str> = registry.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["bgg", "bga"]);

    let bgg = registry.get("bgg").unwrap();
    assert_eq!(bgg.timeout.as_secs(), 36000);
    assert_eq!(bgg.cooldown.as_secs(), 21600);
    assert_eq!(bgg.stop_signal, StopSignal::Int);
    assert_eq!(bgg.restart, RestartPolicy::UnlessStopped);

    let bga = registry.get("bga").unwrap();
    assert_eq!(bga.stop_signal, StopSignal::Term);
    assert_eq!(bga.restart, RestartPolicy::Never);

    assert!(registry.get("luding").is_none());
}

#[test]
fn test_duplicate_job_id_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]

        [[job]]
        id = "bgg"
        command = ["harvester", "bgg-again"]
        "#,
    );
    assert!(msg.contains("duplicate job id"), "{msg}");
}

#[test]
fn test_duplicate_diagnostic_port_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        [job.diagnostic]
        port = 6023
        username = "ops"
        password = "secret"

        [[job]]
        id = "bga"
        command = ["harvester", "bga"]
        [job.diagnostic]
        port = 6023
        username = "ops"
        password = "secret"
        "#,
    );
    assert!(msg.contains("diagnostic port 6023"), "{msg}");
}

#[test]
fn test_negative_durations_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        cooldown_secs = -60
        "#,
    );
    assert!(msg.contains("cooldown_secs"), "{msg}");

    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        grace_period_secs = -1
        "#,
    );
    assert!(msg.contains("grace_period_secs"), "{msg}");
}

#[test]
fn test_zero_timeout_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        timeout_secs = 0
        "#,
    );
    assert!(msg.contains("timeout_secs"), "{msg}");
}

#[test]
fn test_malformed_command_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = []
        "#,
    );
    assert!(msg.contains("malformed command"), "{msg}");

    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["  "]
        "#,
    );
    assert!(msg.contains("malformed command"), "{msg}");
}

#[test]
fn test_overlapping_output_dirs_rejected() {
    // Identical paths
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        output_dir = "/data/feeds/bgg"

        [[job]]
        id = "bga"
        command = ["harvester", "bga"]
        output_dir = "/data/feeds/bgg"
        "#,
    );
    assert!(msg.contains("overlaps"), "{msg}");

    // Nested paths
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        output_dir = "/data/feeds"

        [[job]]
        id = "bga"
        command = ["harvester", "bga"]
        output_dir = "/data/feeds/bga"
        "#,
    );
    assert!(msg.contains("overlaps"), "{msg}");
}

#[test]
fn test_console_without_credentials_rejected() {
    let msg = load_err(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        [job.diagnostic]
        port = 6023
        username = "ops"
        password = ""
        "#,
    );
    assert!(msg.contains("credentials"), "{msg}");
}

#[test]
fn test_distinct_output_dirs_accepted() {
    let registry = Registry::load(&manifest(
        r#"
        [[job]]
        id = "bgg"
        command = ["harvester", "bgg"]
        output_dir = "/data/feeds/bgg"

        [[job]]
        id = "bga"
        command = ["harvester", "bga"]
        output_dir = "/data/feeds/bga"
        "#,
    ))
    .unwrap();
    assert_eq!(registry.len(), 2);
}
