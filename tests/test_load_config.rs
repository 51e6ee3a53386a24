use std::env;
use std::fs::write;
use std::path::PathBuf;

use docmirror::config::{PublicationMap, DEFAULT_RAW_HOST};
use serial_test::serial;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

fn clear_env() {
    env::remove_var("DOCMIRROR_RAW_HOST");
    env::remove_var("DOCMIRROR_OUTPUT_DIR");
}

/// A full config file is normalised into directories, site values and rules.
#[tokio::test]
#[serial]
async fn test_load_config_reads_every_section() {
    clear_env();
    let config_yaml = r#"
source: ./notes
mirror: ./build/markdown
output: ./build/site
repository: github.com/example/handbook/
site:
  title: Handbook
  name: Example Handbook
  stylesheet: ./static/site.css
  sidebar: true
markdown:
  footnotes: true
templates:
  .html: ./templates/page.html
publications:
  - pattern: github.com/example
    update: true
    map:
      graphscript: libraries/graphscript
      docs: libraries/docs
  - pattern: example.org/specs
    extension: .md
    map: specs
"#;
    let file = config_file(config_yaml);
    let config = docmirror::load_config::load_config(file.path()).expect("Config should load");

    assert_eq!(config.source_dir, PathBuf::from("./notes"));
    assert_eq!(config.mirror_dir, PathBuf::from("./build/markdown"));
    assert_eq!(config.output_dir, PathBuf::from("./build/site"));
    assert_eq!(config.repository.as_deref(), Some("github.com/example/handbook"));
    assert_eq!(config.raw_host, DEFAULT_RAW_HOST);
    assert_eq!(config.site.title.as_deref(), Some("Handbook"));
    assert!(config.site.sidebar);
    assert!(config.markdown.footnotes);
    assert!(config.markdown.tables);
    assert_eq!(
        config.templates.get("html"),
        Some(&PathBuf::from("./templates/page.html"))
    );

    // Two configured rules plus the implicit pattern-less one.
    assert_eq!(config.publications.len(), 3);
    let first = &config.publications[0];
    assert_eq!(first.pattern.as_deref(), Some("github.com/example"));
    assert!(first.update);
    assert_eq!(first.extension, ".md");
    match &first.map {
        Some(PublicationMap::Segments(map)) => {
            assert_eq!(map.get("graphscript").map(String::as_str), Some("libraries/graphscript"));
        }
        other => panic!("expected a segment map, got {other:?}"),
    }
    assert_eq!(
        config.publications[1].map,
        Some(PublicationMap::Single("specs".to_string()))
    );
    assert!(config.publications[2].pattern.is_none());
}

/// `pattern: destination` pairs are accepted as a shorthand.
#[tokio::test]
#[serial]
async fn test_load_config_accepts_pattern_shorthand() {
    clear_env();
    let file = config_file(
        r#"
publications:
  github.com/example/graphscript: libraries/graphscript
"#,
    );
    let config = docmirror::load_config::load_config(file.path()).expect("Config should load");

    assert_eq!(config.source_dir, PathBuf::from("source"));
    assert_eq!(config.mirror_dir, PathBuf::from("compiled"));
    assert_eq!(config.output_dir, PathBuf::from("docs"));
    assert_eq!(config.publications.len(), 2);
    assert_eq!(
        config.publications[0].pattern.as_deref(),
        Some("github.com/example/graphscript")
    );
}

/// Environment variables override the file.
#[tokio::test]
#[serial]
async fn test_load_config_env_overrides_file() {
    clear_env();
    let file = config_file("raw_host: https://raw.example.org/\noutput: ./site\n");

    env::set_var("DOCMIRROR_RAW_HOST", "http://127.0.0.1:9000/");
    env::set_var("DOCMIRROR_OUTPUT_DIR", "/tmp/docmirror-out");
    let config = docmirror::load_config::load_config(file.path()).expect("Config should load");
    clear_env();

    assert_eq!(config.raw_host, "http://127.0.0.1:9000");
    assert_eq!(config.output_dir, PathBuf::from("/tmp/docmirror-out"));
}

/// This test ensures that if the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    clear_env();
    let file = config_file("source: [unterminated\n");

    let err = docmirror::load_config::load_config(file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Error should mention parse or YAML, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    clear_env();
    let err = docmirror::load_config::load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_source_as_mirror() {
    clear_env();
    let file = config_file("source: ./same\nmirror: ./same\n");
    let err = docmirror::load_config::load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("must differ"));
}
