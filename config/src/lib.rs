//! Load configuration from XDG `config.toml` and project `.env`, then
//! apply to the process environment with priority:
//! **existing env > .env > XDG**.
//!
//! [`Settings`] then gives the service typed access to the applied
//! variables (API keys, backend URLs, bind port).

mod dotenv;
mod settings;
mod xdg_toml;

pub use settings::Settings;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from the project `.env` and the XDG
/// `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table, applying
/// sources from highest to lowest priority. A variable the process
/// environment already defines is never touched, and a `.env` entry
/// shadows the XDG one.
///
/// * `app_name`: e.g. `"strata"`, used for the XDG path
///   `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` there instead of
///   `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    apply_missing(dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?);
    apply_missing(xdg_toml::load_env_map(app_name)?);
    Ok(())
}

/// Exports each pair into the process environment unless the variable is
/// already defined. Called once per source, highest priority first, so
/// earlier sources shadow later ones.
fn apply_missing(pairs: HashMap<String, String>) {
    for (name, val) in pairs {
        if std::env::var_os(&name).is_none() {
            std::env::set_var(&name, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn process_env_takes_priority() {
        env::set_var("CONFIG_TEST_EXISTING", "from_env");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CONFIG_TEST_EXISTING=from_dotenv\n").unwrap();
        load_and_apply("config-crate-nonexistent-app-xyz", Some(dir.path())).unwrap();
        assert_eq!(env::var("CONFIG_TEST_EXISTING").as_deref(), Ok("from_env"));
        env::remove_var("CONFIG_TEST_EXISTING");
    }

    #[test]
    fn missing_sources_are_fine() {
        let r = load_and_apply("config-crate-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_fills_unset_variable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CONFIG_TEST_FROM_DOTENV=set\n").unwrap();
        env::remove_var("CONFIG_TEST_FROM_DOTENV");
        load_and_apply("config-crate-nonexistent-app-xyz", Some(dir.path())).unwrap();
        assert_eq!(env::var("CONFIG_TEST_FROM_DOTENV").as_deref(), Ok("set"));
        env::remove_var("CONFIG_TEST_FROM_DOTENV");
    }

    #[test]
    fn apply_missing_skips_defined_names() {
        env::set_var("CONFIG_TEST_DEFINED", "kept");
        let mut pairs = HashMap::new();
        pairs.insert("CONFIG_TEST_DEFINED".to_string(), "overwritten".to_string());
        pairs.insert("CONFIG_TEST_FRESH".to_string(), "applied".to_string());
        apply_missing(pairs);
        assert_eq!(env::var("CONFIG_TEST_DEFINED").as_deref(), Ok("kept"));
        assert_eq!(env::var("CONFIG_TEST_FRESH").as_deref(), Ok("applied"));
        env::remove_var("CONFIG_TEST_DEFINED");
        env::remove_var("CONFIG_TEST_FRESH");
    }
}
