//! Server configuration, read from the environment (and `.env`) at startup.

use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown INBOX_STORE '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    /// Postgres connection string, credentials included.
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    /// Where human replies are forwarded. Forwarding is skipped when unset.
    pub automation_webhook_url: Option<String>,
    pub automation_timeout: Duration,
    /// Capacity of the change-feed broadcast buffer.
    pub realtime_buffer: usize,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store = match get("INBOX_STORE") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Postgres,
        };

        let automation_webhook_url = get("AUTOMATION_WEBHOOK_URL").or_else(|| get("N8N_SEND_WEBHOOK_URL"));

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", 4000)?,
            store,
            database_url: resolve_database_url(&get),
            db_max_connections: parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10)?,
            run_migrations: parse_flag(get("RUN_MIGRATIONS"), true),
            automation_webhook_url,
            automation_timeout: Duration::from_secs(parse_or(
                get("AUTOMATION_TIMEOUT_SECS"),
                "AUTOMATION_TIMEOUT_SECS",
                10,
            )?),
            realtime_buffer: parse_or::<usize>(get("REALTIME_BUFFER"), "REALTIME_BUFFER", 256)?.max(1),
            log_json: parse_flag(get("LOG_JSON"), false),
        })
    }
}

fn resolve_database_url(get: &dyn Fn(&str) -> Option<String>) -> String {
    if let Some(url) = get("DATABASE_URL") {
        return url;
    }
    let host = get("POSTGRES_HOST")
        .or_else(|| get("PGHOST"))
        .unwrap_or_else(|| "localhost".to_string());
    let port = get("POSTGRES_PORT")
        .or_else(|| get("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = get("POSTGRES_USER")
        .or_else(|| get("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let password = get("POSTGRES_PASSWORD")
        .or_else(|| get("PGPASSWORD"))
        .unwrap_or_else(|| "postgres".to_string());
    let db = get("POSTGRES_DB")
        .or_else(|| get("PGDATABASE"))
        .unwrap_or_else(|| "inbox".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, String> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| format!("{key} has an invalid value '{value}'")),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
