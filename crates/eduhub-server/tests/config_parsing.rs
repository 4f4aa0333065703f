use std::sync::Mutex;
use std::time::Duration;
use std::{env, fs};

use eduhub_server::config::loader::load_config;

const TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 4096
cors_allowed_origins = ["https://app.eduhub.example"]

[logging]
level = "debug"

[redis]
enabled = false
url = "redis://cache.internal:6379"

[auth]
issuer = "https://eduhub.example"
api_path = "/api"
trusted_proxies = ["10.20.0.0/16", "203.0.113.7"]

[auth.tokens]
access_token_lifetime = "5m"
refresh_token_lifetime = "1d"

[auth.cookies]
secure = true
same_site = "Lax"

[auth.rate_limiting]
window = "30s"
limit = 10
burst = 2

[auth.permission_cache]
ttl = "10m"

[[bootstrap.accounts]]
username = "m.keller"
password = "change-me"
roles = ["teacher"]
permissions = ["course:read", "grade:write"]

[[bootstrap.accounts]]
username = "old.admin"
password = "change-me"
legacy = true
"#;

// Environment overrides are process-wide.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config(content: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("eduhub.toml");
    fs::write(&path, content).expect("write toml");
    let path = path.to_str().expect("utf-8 path").to_string();
    (dir, path)
}

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let (_dir, path) = write_config(TOML);

    // 1) Valid config parses
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.cors_allowed_origins.len(), 1);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.auth.issuer, "https://eduhub.example");
    assert_eq!(
        cfg.auth.tokens.access_token_lifetime,
        Duration::from_secs(300)
    );
    assert_eq!(
        cfg.auth.tokens.refresh_token_lifetime,
        Duration::from_secs(86_400)
    );
    assert_eq!(cfg.auth.cookies.same_site, "Lax");
    assert_eq!(cfg.auth.rate_limiting.window, Duration::from_secs(30));
    assert_eq!(cfg.auth.rate_limiting.burst, 2);
    assert_eq!(cfg.auth.trusted_proxies.len(), 2);
    assert_eq!(cfg.auth.permission_cache.ttl, Duration::from_secs(600));
    assert_eq!(cfg.bootstrap.accounts.len(), 2);
    assert!(cfg.bootstrap.accounts[0].enabled);
    assert!(cfg.bootstrap.accounts[1].legacy);
    // Unset sections keep their defaults
    assert_eq!(cfg.auth.signing.algorithm, "ES384");
    assert_eq!(cfg.auth.store.timeout, Duration::from_millis(250));

    // 2) Env overrides win over the file
    unsafe {
        env::set_var("EDUHUB__AUTH__RATE_LIMITING__LIMIT", "5");
        env::set_var("EDUHUB__AUTH__COOKIES__SECURE", "false");
    }
    let cfg_env = load_config(Some(&path)).expect("should parse config with env overrides");
    assert_eq!(cfg_env.auth.rate_limiting.limit, 5);
    assert!(!cfg_env.auth.cookies.secure);

    // 3) Invalid env value fails validation
    unsafe {
        env::set_var("EDUHUB__AUTH__RATE_LIMITING__LIMIT", "0");
    }
    let err = load_config(Some(&path)).expect_err("limit 0 must be rejected");
    assert!(err.contains("rate_limiting.limit"), "{err}");

    unsafe {
        env::remove_var("EDUHUB__AUTH__RATE_LIMITING__LIMIT");
        env::remove_var("EDUHUB__AUTH__COOKIES__SECURE");
    }
}

#[test]
fn missing_file_yields_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.auth.api_path, "/api");
    assert!(!cfg.redis.enabled);
    assert!(cfg.bootstrap.accounts.is_empty());
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let cases = [
        ("[auth.cookies]\nsecure = false\nsame_site = \"None\"\n", "same_site"),
        ("[auth]\ntrusted_proxies = [\"not-a-network\"]\n", "trusted proxy"),
        ("[auth.signing]\nprivate_key_path = \"/tmp/key.pem\"\n", "public_key_path"),
        ("[auth.tokens]\naccess_token_lifetime = \"0s\"\n", "lifetimes"),
        ("[logging]\nlevel = \"loud\"\n", "logging.level"),
        (
            "[[bootstrap.accounts]]\nusername = \"a\"\npassword = \"\"\n",
            "password",
        ),
    ];

    for (content, expected) in cases {
        let (_dir, path) = write_config(content);
        let err = load_config(Some(&path)).expect_err(content);
        assert!(err.contains(expected), "{content}: {err}");
    }
}

#[test]
fn malformed_duration_is_a_deserialize_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let (_dir, path) = write_config("[auth.rate_limiting]\nwindow = \"soon\"\n");
    let err = load_config(Some(&path)).expect_err("bad duration");
    assert!(err.contains("deserialize"), "{err}");
}
