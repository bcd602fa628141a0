//! Data folder resolution priority tests
//!
//! Tests that touch NEON_TEST_DATA_FOLDER are marked #[serial] so they do not
//! race on the process environment.

use neon_common::config::{default_data_folder, resolve_data_folder};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const ENV_VAR: &str = "NEON_TEST_DATA_FOLDER";

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(ENV_VAR, "/tmp/from-env");

    let resolved = resolve_data_folder(Some(Path::new("/tmp/from-cli")), ENV_VAR);
    assert_eq!(resolved, PathBuf::from("/tmp/from-cli"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var(ENV_VAR, "/tmp/from-env");

    let resolved = resolve_data_folder(None, ENV_VAR);
    assert_eq!(resolved, PathBuf::from("/tmp/from-env"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_empty_environment_value_is_ignored() {
    env::set_var(ENV_VAR, "");

    let resolved = resolve_data_folder(None, ENV_VAR);
    assert_ne!(resolved, PathBuf::from(""));

    env::remove_var(ENV_VAR);
}

#[test]
fn test_default_data_folder_is_named_for_app() {
    let folder = default_data_folder();
    assert!(folder.to_string_lossy().contains("neon"));
}
