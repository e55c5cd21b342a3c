use std::env;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read an env var, treating unset and empty as absent.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read and parse an env var. Unset or empty keeps `default`; set but
/// unparseable keeps `default` with a warning.
pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_opt(key) {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable env override");
                default
            }
        },
    }
}
