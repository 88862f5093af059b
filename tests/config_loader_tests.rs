use crawler_scheduler::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        env::remove_var("CRAWLER_PROFILE");
        env::remove_var("CRAWLER_API_BIND_ADDR");
        env::remove_var("CRAWLER_WORKER_CONCURRENCY");
        env::remove_var("CRAWLER_OPERATOR_TOKEN");
        env::remove_var("CRAWLER_OPERATOR_TOKENS");
        env::remove_var("CRAWLER_RATE_LIMIT_REQUESTS_PER_MINUTE");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_from_empty_directory() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.worker.concurrency, 4);
    assert_eq!(cfg.maintenance.aging_threshold_seconds, 3600);
    assert_eq!(cfg.maintenance.stuck_threshold_seconds, 1800);
    assert_eq!(cfg.retry_policy.base_seconds, 60);
    assert_eq!(cfg.rate_limit.requests_per_minute, 60);
    assert!(cfg.operator_tokens.is_empty());
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "CRAWLER_API_BIND_ADDR=127.0.0.1:3000\nCRAWLER_WORKER_CONCURRENCY=8\n",
    );
    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "CRAWLER_PROFILE=test\nCRAWLER_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test",
        "CRAWLER_API_BIND_ADDR=192.168.0.10:5000\nCRAWLER_WORKER_CONCURRENCY=2\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "CRAWLER_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.worker.concurrency, 2);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "CRAWLER_WORKER_CONCURRENCY=8\nCRAWLER_RATE_LIMIT_REQUESTS_PER_MINUTE=30\n",
    );

    unsafe {
        env::set_var("CRAWLER_WORKER_CONCURRENCY", "6");
    }

    let cfg = loader(&temp_dir).load().expect("config loads");
    assert_eq!(cfg.worker.concurrency, 6);
    assert_eq!(cfg.rate_limit.requests_per_minute, 30);
    clear_env();
}

#[test]
fn unparsable_values_name_the_variable() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CRAWLER_WORKER_CONCURRENCY=lots\n");

    match loader(&temp_dir).load() {
        Err(ConfigError::InvalidValue { key, value }) => {
            assert_eq!(key, "CRAWLER_WORKER_CONCURRENCY");
            assert_eq!(value, "lots");
        }
        other => panic!("expected InvalidValue, got {:?}", other.map(|c| c.profile)),
    }
    clear_env();
}

#[test]
fn non_local_profiles_require_operator_tokens() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CRAWLER_PROFILE=production\n");

    assert!(matches!(
        loader(&temp_dir).load(),
        Err(ConfigError::MissingOperatorTokens)
    ));

    write_env_file(
        &temp_dir,
        ".env.production",
        "CRAWLER_OPERATOR_TOKENS=alpha, beta ,\n",
    );
    let cfg = loader(&temp_dir).load().expect("tokens satisfy production");
    assert_eq!(cfg.operator_tokens, vec!["alpha", "beta"]);
    clear_env();
}

#[test]
fn invalid_bind_address_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CRAWLER_API_BIND_ADDR=not-an-address\n");

    assert!(matches!(
        loader(&temp_dir).load(),
        Err(ConfigError::InvalidBindAddr { .. })
    ));
    clear_env();
}
