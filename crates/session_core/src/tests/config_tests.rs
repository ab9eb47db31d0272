use super::*;

use std::{
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_config_path(tag: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    env::temp_dir().join(format!("session_core_{tag}_{suffix}.toml"))
}

#[test]
fn missing_file_yields_defaults() {
    let config = SessionConfig::load(temp_config_path("missing")).expect("load");
    assert_eq!(config.server, DEFAULT_SIGNIN_SERVER);
    assert_eq!(config.page_size, 50);
    assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
    assert!(config.session_token.is_none());
}

#[test]
fn file_values_override_defaults() {
    let path = temp_config_path("values");
    fs::write(
        &path,
        r#"
server = "https://signin.example.test/"
account_email = "alice@example.com"
device_token = "device-1"
session_token = "token-1"
page_size = 10
log_wire_bodies = true
"#,
    )
    .expect("write config");

    let config = SessionConfig::load(&path).expect("load");
    assert_eq!(config.server, "https://signin.example.test/");
    assert_eq!(config.account_email, "alice@example.com");
    assert_eq!(config.device_token, "device-1");
    assert_eq!(config.session_token.as_deref(), Some("token-1"));
    assert_eq!(config.page_size, 10);
    assert!(config.log_wire_bodies);

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn blank_session_token_is_treated_as_absent() {
    let path = temp_config_path("blank_token");
    fs::write(&path, "session_token = \"  \"\nserver = \"\"\n").expect("write config");

    let config = SessionConfig::load(&path).expect("load");
    assert!(config.session_token.is_none());
    assert_eq!(config.server, DEFAULT_SIGNIN_SERVER);

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn invalid_numeric_value_is_an_error() {
    let path = temp_config_path("invalid");
    fs::write(&path, "page_size = \"lots\"\n").expect("write config");

    assert!(SessionConfig::load(&path).is_err());

    fs::remove_file(path).expect("cleanup");
}
