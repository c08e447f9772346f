use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tempfile::tempdir;
use tonehub_config::{ConfigSource, IndexerSettings};
use tonehub_model::FormatCategory;

const SAMPLE_TOML: &str = r#"
[indexer]
poll_interval_ms = 60000
orphan_grace_secs = 3600

[indexer.watch]
enabled = false

[database]
url = "postgres://tonehub@localhost/tonehub"

[[sources]]
id = "01939f5e-7a51-7c3a-9d0e-2b1c8a4f6e10"
path = "/srv/audiobooks"
format = "audiobook"

[[sources]]
path = "/srv/music"
enabled = false
"#;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn defaults_when_nothing_is_configured() {
    let dir = tempdir().unwrap();
    let (settings, origin) = IndexerSettings::load(env(&[]), dir.path()).unwrap();
    assert_eq!(origin, ConfigSource::Default);
    assert_eq!(settings, IndexerSettings::default());
    assert!(settings.database_url().is_none());
}

#[test]
fn explicit_path_wins_over_inline_and_default_files() {
    let dir = tempdir().unwrap();
    let explicit = write(dir.path(), "custom/indexer.toml", SAMPLE_TOML);
    write(dir.path(), "tonehub.toml", "[indexer]\nbatch_size = 99\nqueue_capacity = 99\n");

    let path = explicit.to_string_lossy().into_owned();
    let (settings, origin) = IndexerSettings::load(
        env(&[
            ("TONEHUB_CONFIG_PATH", path.as_str()),
            ("TONEHUB_CONFIG_JSON", r#"{"indexer": {"batch_size": 3}}"#),
        ]),
        dir.path(),
    )
    .unwrap();

    assert_eq!(origin, ConfigSource::EnvPath(explicit));
    assert_eq!(settings.indexer.poll_interval_ms, 60_000);
    assert_eq!(settings.indexer.batch_size, 10);
    assert!(!settings.indexer.watch.enabled);
    assert_eq!(settings.sources.len(), 2);
    assert_eq!(settings.sources[0].format, FormatCategory::Audiobook);
    assert!(settings.sources[0].id.is_some());
    assert!(!settings.sources[1].enabled);
}

#[test]
fn inline_json_is_used_without_a_path() {
    let dir = tempdir().unwrap();
    write(dir.path(), "tonehub.toml", SAMPLE_TOML);
    let (settings, origin) = IndexerSettings::load(
        env(&[
            ("TONEHUB_CONFIG_PATH", "  "),
            (
                "TONEHUB_CONFIG_JSON",
                r#"{"indexer": {"batch_size": 4}, "sources": [{"path": "/data"}]}"#,
            ),
        ]),
        dir.path(),
    )
    .unwrap();
    assert_eq!(origin, ConfigSource::EnvInline);
    assert_eq!(settings.indexer.batch_size, 4);
    assert!(settings.sources[0].enabled);
}

#[test]
fn default_files_are_searched_in_order() {
    let dir = tempdir().unwrap();
    let nested = write(dir.path(), "config/tonehub.toml", "[indexer]\nbatch_size = 2\n");
    let (_, origin) = IndexerSettings::load(env(&[]), dir.path()).unwrap();
    assert_eq!(origin, ConfigSource::File(nested));

    let json = write(dir.path(), "tonehub.json", r#"{"indexer": {"batch_size": 5}}"#);
    let (settings, origin) = IndexerSettings::load(env(&[]), dir.path()).unwrap();
    assert_eq!(origin, ConfigSource::File(json));
    assert_eq!(settings.indexer.batch_size, 5);
}

#[test]
fn database_url_env_overrides_the_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "tonehub.toml", SAMPLE_TOML);
    let (settings, _) = IndexerSettings::load(
        env(&[("DATABASE_URL", "postgres://other/db")]),
        dir.path(),
    )
    .unwrap();
    assert_eq!(settings.database_url(), Some("postgres://other/db"));
}

#[test]
fn extensionless_files_accept_toml_or_json() {
    let dir = tempdir().unwrap();
    let toml = write(dir.path(), "indexer", "[indexer]\nbatch_size = 7\n");
    let json = write(dir.path(), "indexer-json", r#"{"indexer": {"batch_size": 8}}"#);
    assert_eq!(IndexerSettings::load_from_file(&toml).unwrap().indexer.batch_size, 7);
    assert_eq!(IndexerSettings::load_from_file(&json).unwrap().indexer.batch_size, 8);

    let broken = write(dir.path(), "broken", "not = [valid");
    let err = IndexerSettings::load_from_file(&broken).unwrap_err();
    assert!(err.to_string().contains("toml error"));
}

#[test]
fn invalid_settings_are_rejected() {
    let dir = tempdir().unwrap();
    for raw in [
        r#"{"indexer": {"batch_size": 0}}"#,
        r#"{"indexer": {"batch_size": 20, "queue_capacity": 10}}"#,
        r#"{"sources": [{"path": "relative/dir"}]}"#,
        r#"{"sources": [{"path": "/a"}, {"path": "/a"}]}"#,
        r#"{"database": {"max_connections": 0}}"#,
    ] {
        let result = IndexerSettings::load(env(&[("TONEHUB_CONFIG_JSON", raw)]), dir.path());
        assert!(result.is_err(), "{raw} should be rejected");
    }
}
