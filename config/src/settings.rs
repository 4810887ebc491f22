//! Typed view over the environment variables the service reads.
//!
//! Call [`crate::load_and_apply`] first so `.env`/XDG values are in the
//! environment, then snapshot with [`Settings::from_env`].

/// Environment snapshot for wiring the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub fireworks_api_key: Option<String>,
    /// Ollama base URL; the driver default applies when unset.
    pub ollama_base_url: Option<String>,
    /// Jan local server base URL; Jan is skipped when unset.
    pub jan_base_url: Option<String>,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub bind_port: u16,
    /// Default per-user daily budget in USD; 0 disables budget creation.
    pub daily_budget_usd: f64,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub const DEFAULT_BIND_PORT: u16 = 8080;

    /// Reads the current process environment.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            fireworks_api_key: var("FIREWORKS_API_KEY"),
            ollama_base_url: var("OLLAMA_BASE_URL"),
            jan_base_url: var("JAN_BASE_URL"),
            redis_url: var("REDIS_URL"),
            database_url: var("DATABASE_URL"),
            bind_port: var("STRATA_BIND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_BIND_PORT),
            daily_budget_usd: var("STRATA_DAILY_BUDGET")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        }
    }

    /// True when at least one provider backend is configured.
    pub fn any_provider(&self) -> bool {
        self.anthropic_api_key.is_some()
            || self.openai_api_key.is_some()
            || self.fireworks_api_key.is_some()
            || self.ollama_base_url.is_some()
            || self.jan_base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_when_unset() {
        env::remove_var("STRATA_BIND_PORT");
        env::remove_var("STRATA_DAILY_BUDGET");
        let s = Settings::from_env();
        assert_eq!(s.bind_port, Settings::DEFAULT_BIND_PORT);
        assert_eq!(s.daily_budget_usd, 0.0);
    }

    #[test]
    fn blank_values_read_as_unset() {
        env::set_var("CONFIG_SETTINGS_BLANK", "   ");
        assert_eq!(var("CONFIG_SETTINGS_BLANK"), None);
        env::remove_var("CONFIG_SETTINGS_BLANK");
    }

    #[test]
    fn bind_port_parses() {
        env::set_var("STRATA_BIND_PORT", "9999");
        let s = Settings::from_env();
        assert_eq!(s.bind_port, 9999);
        env::remove_var("STRATA_BIND_PORT");
    }
}
