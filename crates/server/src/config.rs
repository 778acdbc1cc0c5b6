use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/workspaces.db".into(),
        }
    }
}

/// Defaults, overridden by an optional `server.toml` in the working
/// directory, overridden in turn by environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
        }
    }

    env_override(&mut settings.server_bind, &["SERVER_BIND", "APP__BIND_ADDR"]);
    env_override(
        &mut settings.database_url,
        &["DATABASE_URL", "APP__DATABASE_URL"],
    );

    settings
}

fn env_override(slot: &mut String, keys: &[&str]) {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            *slot = value;
        }
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

/// Accepts bare file paths, `sqlite:`-prefixed paths and full URLs; everything
/// comes out in the `sqlite://` form the pool expects. Blank input falls back
/// to the default.
fn normalize_database_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }
    let path = raw.strip_prefix("sqlite:").unwrap_or(raw);
    format!("sqlite://{}", path.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    if let Some(parent) = sqlite_path(database_url).as_deref().and_then(Path::parent) {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create directory '{}' for database url '{database_url}'",
                parent.display()
            )
        })?;
    }
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn plain_file_paths_become_sqlite_urls() {
        assert_eq!(
            normalize_database_url("./state/app.db"),
            "sqlite://./state/app.db"
        );
        assert_eq!(
            normalize_database_url("state\\app.db"),
            "sqlite://state/app.db"
        );
    }

    #[test]
    fn urls_and_the_memory_form_pass_through() {
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url("sqlite://./state/app.db"),
            "sqlite://./state/app.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:state/app.db"),
            "sqlite://state/app.db"
        );
        assert_eq!(normalize_database_url("   "), Settings::default().database_url);
    }

    #[test]
    fn query_suffix_is_not_part_of_the_path() {
        assert_eq!(
            sqlite_path("sqlite://./state/app.db?mode=rwc"),
            Some(PathBuf::from("./state/app.db"))
        );
        assert_eq!(sqlite_path("sqlite::memory:"), None);
        assert_eq!(sqlite_path("postgres://host/db"), None);
    }

    #[test]
    fn preparing_a_relative_url_creates_the_parent_dir() {
        let temp_root = tempfile::tempdir().expect("temp dir");
        let original_dir = env::current_dir().expect("cwd");
        env::set_current_dir(temp_root.path()).expect("set cwd");

        let prepared = prepare_database_url("./state/app.db").expect("prepare db url");
        assert_eq!(prepared, "sqlite://./state/app.db");
        assert!(temp_root.path().join("state").exists());

        env::set_current_dir(original_dir).expect("restore cwd");
    }
}
