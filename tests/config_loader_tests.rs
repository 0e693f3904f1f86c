use fleet_telemetry::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const MANAGED_VARS: [&str; 8] = [
    "FLEET_PROFILE",
    "FLEET_API_BIND_ADDR",
    "FLEET_LOG_LEVEL",
    "FLEET_PROVIDER_BASE_URL",
    "FLEET_SYNC_INTERVAL_SECONDS",
    "FLEET_SYNC_ENABLED",
    "FLEET_BACKFILL_MAX_WINDOWS_PER_RUN",
    "FLEET_BACKFILL_HISTORICAL_START",
];

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
    for key in MANAGED_VARS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.sync.interval_seconds, 300);
    assert!(cfg.sync.enabled);
    assert_eq!(cfg.backfill.max_windows_per_run, 48);
    assert_eq!(cfg.backfill.window_seconds, 300);
    assert!(cfg.backfill.historical_start.is_none());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "FLEET_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "FLEET_API_BIND_ADDR=192.168.0.10:5000\nFLEET_SYNC_INTERVAL_SECONDS=120\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "FLEET_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "FLEET_PROFILE=test\nFLEET_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.sync.interval_seconds, 120);
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
        "FLEET_API_BIND_ADDR=127.0.0.1:3000\nFLEET_BACKFILL_MAX_WINDOWS_PER_RUN=10\n",
    );

    unsafe {
        env::set_var("FLEET_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("FLEET_BACKFILL_MAX_WINDOWS_PER_RUN", "96");
        env::set_var("FLEET_SYNC_ENABLED", "off");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.backfill.max_windows_per_run, 96);
    assert!(!cfg.sync.enabled);

    clear_env();
}

#[test]
fn historical_start_parses_rfc3339() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("FLEET_BACKFILL_HISTORICAL_START", "2025-01-01T00:00:00Z");
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads");
    let start = cfg.backfill.historical_start.expect("start set");
    assert_eq!(start.to_rfc3339(), "2025-01-01T00:00:00+00:00");

    unsafe {
        env::set_var("FLEET_BACKFILL_HISTORICAL_START", "yesterday");
    }
    let err = loader.load().expect_err("non-rfc3339 start should fail");
    assert!(format!("{err}").contains("BACKFILL_HISTORICAL_START"));

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("FLEET_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn out_of_range_interval_is_rejected() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("FLEET_SYNC_INTERVAL_SECONDS", "5");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("interval below bound should fail");
    assert!(format!("{err}").contains("sync interval"));

    clear_env();
}
