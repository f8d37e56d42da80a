use std::io::Write;

use crewsheet::config::Config;
use crewsheet::error::Error;

const VARS: [&str; 5] = [
    "CREWSHEET_CONFIG",
    "CREWSHEET_DB",
    "CREWSHEET_WORKSPACE",
    "OTEL_ENDPOINT",
    "LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

// The environment is process-wide, so every case runs in one test.
#[test]
fn config_from_env() {
    clear_env();
    let config = Config::from_env().unwrap();
    assert_eq!(config.db_path.to_str(), Some("crewsheet.db"));
    assert_eq!(config.workspace_path.to_str(), Some("workspace.json"));
    assert_eq!(config.log_level, "info");
    assert!(config.otel_endpoint.is_none());
    assert_eq!(config.settings.runner.budget_ms, 240_000);

    // Blank values count as unset.
    unsafe {
        std::env::set_var("CREWSHEET_DB", "/tmp/roster.db");
        std::env::set_var("OTEL_ENDPOINT", "  ");
        std::env::set_var("LOG_LEVEL", "crewsheet=debug");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.db_path.to_str(), Some("/tmp/roster.db"));
    assert!(config.otel_endpoint.is_none());
    assert_eq!(config.log_level, "crewsheet=debug");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "utc_offset_minutes = 0\n\n[runner]\nbudget_ms = 30000\n\n[folders]\nmain = \"Crew Root\""
    )
    .unwrap();
    unsafe { std::env::set_var("CREWSHEET_CONFIG", file.path()) };
    let config = Config::from_env().unwrap();
    assert_eq!(config.settings.runner.budget_ms, 30_000);
    assert_eq!(config.settings.folders.main, "Crew Root");
    assert_eq!(config.settings.folders.individuals, "Individuals");
    assert_eq!(config.settings.utc_offset_minutes, 0);

    // Lease shorter than the budget.
    let mut bad = tempfile::NamedTempFile::new().unwrap();
    writeln!(bad, "[runner]\nbudget_ms = 30000\nlease_ttl_ms = 1000").unwrap();
    unsafe { std::env::set_var("CREWSHEET_CONFIG", bad.path()) };
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    unsafe { std::env::set_var("CREWSHEET_CONFIG", "/nonexistent/crewsheet.toml") };
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    clear_env();
}
