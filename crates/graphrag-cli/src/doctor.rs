//! Health checks for `graphrag doctor`

use graphrag_core::config::Config;
use graphrag_core::knowledge::Neo4jStore;

/// Health check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Ok,
    Skipped,
    Error,
}

impl HealthStatus {
    pub fn marker(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "[OK]",
            HealthStatus::Skipped => "[--]",
            HealthStatus::Error => "[!!]",
        }
    }
}

impl HealthCheck {
    fn new(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("{} {}: {}", self.status.marker(), self.name, self.message)
    }
}

/// Run every check; later checks are skipped when the configuration cannot be loaded
pub async fn run_checks() -> Vec<HealthCheck> {
    let mut checks = vec![check_config_file()];

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            checks.push(HealthCheck::new("Configuration", HealthStatus::Error, e.to_string()));
            return checks;
        }
    };

    checks.push(check_config(&config));
    checks.push(check_api_key(&config));
    checks.push(check_graph(&config).await);
    checks
}

/// Worst status across all checks
pub fn overall(checks: &[HealthCheck]) -> HealthStatus {
    checks
        .iter()
        .map(|c| c.status)
        .filter(|s| *s != HealthStatus::Skipped)
        .max()
        .unwrap_or(HealthStatus::Ok)
}

fn check_config_file() -> HealthCheck {
    match Config::config_path() {
        Ok(path) if path.exists() => HealthCheck::new("Config file", HealthStatus::Ok, path.display().to_string()),
        Ok(path) => HealthCheck::new(
            "Config file",
            HealthStatus::Skipped,
            format!("{} (using defaults)", path.display()),
        ),
        Err(e) => HealthCheck::new("Config file", HealthStatus::Error, e.to_string()),
    }
}

fn check_config(config: &Config) -> HealthCheck {
    match config.validate() {
        Ok(()) => HealthCheck::new(
            "Configuration",
            HealthStatus::Ok,
            format!("model {}", config.llm.default_model),
        ),
        Err(e) => HealthCheck::new("Configuration", HealthStatus::Error, e.to_string()),
    }
}

fn check_api_key(config: &Config) -> HealthCheck {
    match config.llm.redacted_api_key() {
        Ok(Some(redacted)) => HealthCheck::new("API Key", HealthStatus::Ok, format!("Configured ({})", redacted)),
        Ok(None) => HealthCheck::new(
            "API Key",
            HealthStatus::Error,
            "Not configured. Set GRAPHRAG_API_KEY or OPENAI_API_KEY",
        ),
        Err(e) => HealthCheck::new("API Key", HealthStatus::Error, e.to_string()),
    }
}

async fn check_graph(config: &Config) -> HealthCheck {
    let connection = match config.graph.resolve() {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            return HealthCheck::new(
                "Graph database",
                HealthStatus::Skipped,
                "Not configured (retrieval route unavailable)",
            );
        }
        Err(e) => return HealthCheck::new("Graph database", HealthStatus::Error, e.to_string()),
    };

    match Neo4jStore::probe(&connection).await {
        Ok(()) => HealthCheck::new("Graph database", HealthStatus::Ok, format!("Connected to {}", connection.uri)),
        Err(e) => HealthCheck::new(
            "Graph database",
            HealthStatus::Error,
            format!("{} unreachable: {}", connection.uri, e),
        ),
    }
}
