use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use underwrite_cli::commands::{config, doctor, migrate, seed};
use underwrite_core::config::LoadOptions;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("UNDERWRITE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("applied"));
    });
}

#[test]
fn migrate_returns_config_failure_for_openai_without_key() {
    with_env(
        &[("UNDERWRITE_DATABASE_URL", "sqlite::memory:"), ("UNDERWRITE_LLM_PROVIDER", "openai")],
        || {
            let result = migrate::run(LoadOptions::default());
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_loads_the_demo_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("seed.db").display());
    with_env(&[("UNDERWRITE_DATABASE_URL", &url)], || {
        let result = seed::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("demo dataset loaded:"));
        assert!(message.contains("failure scores"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("seed.db").display());
    with_env(&[("UNDERWRITE_DATABASE_URL", &url)], || {
        let first = seed::run(LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);

        let second = seed::run(LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn config_reports_env_sources_and_redacts_keys() {
    with_env(
        &[
            ("UNDERWRITE_LLM_PROVIDER", "openai"),
            ("UNDERWRITE_LLM_API_KEY", "sk-secret-value"),
            ("UNDERWRITE_AGENT_MAX_STEPS", "5"),
        ],
        || {
            let output = config::run(&LoadOptions::default());

            assert!(output
                .contains("- llm.api_key = sk-*** (source: env (UNDERWRITE_LLM_API_KEY))"));
            assert!(output
                .contains("- agent.max_steps = 5 (source: env (UNDERWRITE_AGENT_MAX_STEPS))"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
            assert!(!output.contains("secret-value"));
        },
    );
}

#[test]
fn config_reports_validation_failures() {
    with_env(&[("UNDERWRITE_AGENT_MAX_STEPS", "0")], || {
        let output = config::run(&LoadOptions::default());
        assert!(output.starts_with("config validation failed:"));
    });
}

#[test]
fn doctor_passes_with_heuristic_scoring_and_migrated_db() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("doctor.db").display());
    with_env(&[("UNDERWRITE_DATABASE_URL", &url)], || {
        let migrated = migrate::run(LoadOptions::default());
        assert_eq!(migrated.exit_code, 0);

        let output = doctor::run(LoadOptions::default(), true);
        let report = parse_payload(&output);

        assert_eq!(report["overall_status"], "pass", "{output}");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .filter_map(|c| c["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "llm_readiness",
                "scoring_readiness",
                "database_connectivity",
                "migration_status"
            ]
        );
    });
}

#[test]
fn doctor_flags_pending_migrations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("fresh.db").display());
    with_env(&[("UNDERWRITE_DATABASE_URL", &url)], || {
        let output = doctor::run(LoadOptions::default(), false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] migration_status:"));
        assert!(output.contains("run `underwrite migrate`"));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("UNDERWRITE_SCORING_MODE", "remote")], || {
        let output = doctor::run(LoadOptions::default(), true);
        let report = parse_payload(&output);

        assert_eq!(report["overall_status"], "fail");
        let statuses: Vec<&str> = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .filter_map(|c| c["status"].as_str())
            .collect();
        assert_eq!(statuses, vec!["fail", "skipped", "skipped", "skipped", "skipped"]);
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "UNDERWRITE_DATABASE_URL",
        "UNDERWRITE_DATABASE_MAX_CONNECTIONS",
        "UNDERWRITE_DATABASE_TIMEOUT_SECS",
        "UNDERWRITE_LLM_PROVIDER",
        "UNDERWRITE_LLM_API_KEY",
        "UNDERWRITE_LLM_BASE_URL",
        "UNDERWRITE_LLM_MODEL",
        "UNDERWRITE_SCORING_MODE",
        "UNDERWRITE_SCORING_BASE_URL",
        "UNDERWRITE_SCORING_API_KEY",
        "UNDERWRITE_AGENT_MAX_STEPS",
        "UNDERWRITE_AGENT_TOOL_TIMEOUT_SECS",
        "UNDERWRITE_SERVER_BIND_ADDRESS",
        "UNDERWRITE_SERVER_PORT",
        "UNDERWRITE_LOGGING_LEVEL",
        "UNDERWRITE_LOGGING_FORMAT",
        "UNDERWRITE_LOG_LEVEL",
        "UNDERWRITE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
