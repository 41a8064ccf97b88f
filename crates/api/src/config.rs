//! Server configuration

/// Environment-derived configuration for the API server.
///
/// Stripe settings are loaded separately by the billing crate so the two
/// halves can be configured and rotated independently.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Comma-separated CORS origin allowlist.
    pub allowed_origins: Vec<String>,
    /// PEM-encoded RSA public key the identity provider signs session
    /// tokens with.
    pub clerk_jwt_public_key: String,
    /// Expected `iss` claim; token issuer is not checked when unset.
    pub clerk_issuer: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require("DATABASE_URL")?;
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let clerk_jwt_public_key = require("CLERK_JWT_PUBLIC_KEY")?;
        let clerk_issuer = std::env::var("CLERK_ISSUER").ok().filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            clerk_jwt_public_key,
            clerk_issuer,
        })
    }
}

fn require(key: &str) -> anyhow::Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} must be set", key))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_vars() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/platewise_test");
        std::env::set_var("CLERK_JWT_PUBLIC_KEY", "-----BEGIN PUBLIC KEY-----");
    }

    #[test]
    #[serial]
    fn from_env_applies_defaults() {
        set_required_vars();
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("ALLOWED_ORIGINS");
        std::env::remove_var("CLERK_ISSUER");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.clerk_issuer.is_none());
    }

    #[test]
    #[serial]
    fn from_env_fails_without_database_url() {
        set_required_vars();
        std::env::remove_var("DATABASE_URL");

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn allowed_origins_are_split_and_trimmed() {
        set_required_vars();
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://app.platewise.com , https://staging.platewise.com",
        );

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.allowed_origins,
            vec![
                "https://app.platewise.com".to_string(),
                "https://staging.platewise.com".to_string(),
            ]
        );

        std::env::remove_var("ALLOWED_ORIGINS");
    }
}
