//! Layered config loading: defaults, TOML file and environment overrides.

use std::io::Write;

use ringtank::settings::{load_store_config, load_store_config_with_prefix};
use ringtank::StoreError;
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file() {
    let cfg = load_store_config_with_prefix(None, "RINGTANK_TEST_DEFAULTS").unwrap();
    assert_eq!(cfg.chunk_span, 120);
    assert_eq!(cfg.num_chunks, 5);
}

#[test]
fn file_overrides_defaults() {
    let file = toml_file("chunk_span = 7200\nnum_chunks = 12\n");
    let cfg = load_store_config_with_prefix(Some(file.path()), "RINGTANK_TEST_FILE").unwrap();
    assert_eq!(cfg.chunk_span, 7200);
    assert_eq!(cfg.num_chunks, 12);
}

#[test]
fn env_overrides_file() {
    let file = toml_file("chunk_span = 7200\nnum_chunks = 12\n");
    std::env::set_var("RINGTANK_TEST_ENV_NUM_CHUNKS", "3");
    let cfg = load_store_config_with_prefix(Some(file.path()), "RINGTANK_TEST_ENV").unwrap();
    std::env::remove_var("RINGTANK_TEST_ENV_NUM_CHUNKS");
    assert_eq!(cfg.chunk_span, 7200);
    assert_eq!(cfg.num_chunks, 3);
}

#[test]
fn env_alone_overrides_defaults() {
    std::env::set_var("RINGTANK_TEST_ENV_ONLY_CHUNK_SPAN", "7200");
    let cfg = load_store_config_with_prefix(None, "RINGTANK_TEST_ENV_ONLY").unwrap();
    std::env::remove_var("RINGTANK_TEST_ENV_ONLY_CHUNK_SPAN");
    assert_eq!(cfg.chunk_span, 7200);
    assert_eq!(cfg.num_chunks, 5);
}

#[test]
fn missing_file_is_an_error() {
    let err = load_store_config(Some(std::path::Path::new("/definitely/not/here.toml"))).unwrap_err();
    assert!(matches!(err, StoreError::Config(ref msg) if msg.contains("not found")), "{}", err);
}

#[test]
fn zero_span_fails_validation() {
    let file = toml_file("chunk_span = 0\n");
    let err = load_store_config_with_prefix(Some(file.path()), "RINGTANK_TEST_ZERO").unwrap_err();
    assert!(matches!(err, StoreError::Config(_)), "{}", err);
}

#[test]
fn malformed_value_is_reported() {
    let file = toml_file("num_chunks = \"many\"\n");
    let err = load_store_config_with_prefix(Some(file.path()), "RINGTANK_TEST_BAD").unwrap_err();
    assert!(matches!(err, StoreError::Config(_)), "{}", err);
}
