//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::sync::Once;

static INIT: Once = Once::new();

/// Name of the single env var selecting the target database.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
        // We intentionally avoid mutating process env at runtime; connection
        // tuning lives where we construct connect options.
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Database DSN from the one configured env var.
pub fn database_url() -> anyhow::Result<String> {
    env_req(DATABASE_URL_VAR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_req_reports_the_missing_key() {
        std::env::remove_var("SILO_TEST_REQ");
        let err = env_req("SILO_TEST_REQ").unwrap_err();
        assert!(err.to_string().contains("SILO_TEST_REQ"));

        std::env::set_var("SILO_TEST_REQ", "x");
        assert_eq!(env_req("SILO_TEST_REQ").unwrap(), "x");
        std::env::remove_var("SILO_TEST_REQ");
    }
}
