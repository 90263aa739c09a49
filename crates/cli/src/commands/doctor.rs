use serde::Serialize;
use underwrite_agent::llm::OpenAiCompatibleClient;
use underwrite_agent::scoring::scoring_from_config;
use underwrite_core::config::{AppConfig, LoadOptions, ScoringMode};
use underwrite_db::{connect_from_config, migrations};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["llm_readiness", "scoring_readiness", "database_connectivity", "migration_status"];

pub fn run(options: LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm(&config));
            checks.push(check_scoring(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.iter().map(|&name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "{} model `{}` via {}",
                config.llm.provider.as_str(),
                config.llm.model,
                client.endpoint()
            ),
        },
        Err(error) => DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_scoring(config: &AppConfig) -> DoctorCheck {
    match scoring_from_config(&config.scoring) {
        Ok(_) => DoctorCheck {
            name: "scoring_readiness",
            status: CheckStatus::Pass,
            details: match config.scoring.mode {
                ScoringMode::Heuristic => "heuristic risk and premium models".to_string(),
                ScoringMode::Remote => format!(
                    "remote endpoints `{}` and `{}`",
                    config.scoring.risk_endpoint, config.scoring.premium_endpoint
                ),
            },
        },
        Err(error) => DoctorCheck {
            name: "scoring_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped_migrations(),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped_migrations(),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let migration = match migrations::status(&pool).await {
            Ok(status) if status.is_current() => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Pass,
                details: format!("{}/{} migrations applied", status.applied, status.known),
            },
            Ok(status) => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Fail,
                details: format!(
                    "{}/{} migrations applied; run `underwrite migrate`",
                    status.applied, status.known
                ),
            },
            Err(error) => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Fail,
                details: format!("could not read migration state: {error}"),
            },
        };
        pool.close().await;
        vec![connectivity, migration]
    })
}

fn skipped_migrations() -> DoctorCheck {
    DoctorCheck {
        name: "migration_status",
        status: CheckStatus::Skipped,
        details: "skipped because the database is unreachable".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
