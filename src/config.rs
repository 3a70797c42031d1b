//! # Runtime configuration
//!
//! | Variable | Fallback | Default |
//! |----------|----------|---------|
//! | `BECOINS_API_URL` | `EXPO_PUBLIC_API_URL` | required |
//! | `BECOINS_WS_URL` | `EXPO_PUBLIC_WS_URL` | the API URL |
//! | `BECOINS_USE_DEMO_MODE` | `EXPO_PUBLIC_USE_DEMO_MODE` | `false` |
//! | `BECOINS_USD_RATE` | | `1.0` |
//! | `BECOINS_AMOUNT_SCALE` | | `legacy` |
//! | `BECOINS_TIMEOUT_MS` | | `15000` |
//! | `AUTH0_DOMAIN`, `AUTH0_CLIENT_ID`, `AUTH0_AUDIENCE`, `AUTH0_REDIRECT_URI` | `EXPO_PUBLIC_` prefixed | unset |

use std::env;
use std::time::Duration;

use tracing::debug;

use crate::balance::AmountScale;
use crate::errors::{BeCoinError, Result};
use crate::pricing::DEFAULT_BECOINS_PER_USD;

const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Hosted login settings. Only needed for `open_hosted_login()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth0Config {
    pub domain: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub demo_mode: bool,
    pub becoins_per_usd: f64,
    pub amount_scale: AmountScale,
    pub timeout: Duration,
    pub auth0: Option<Auth0Config>,
}

impl Config {
    /// A config pointing at `api_url` with every other value defaulted.
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            ws_url: api_url.trim_end_matches('/').to_string(),
            demo_mode: false,
            becoins_per_usd: DEFAULT_BECOINS_PER_USD,
            amount_scale: AmountScale::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            auth0: None,
        }
    }

    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(&format!("BECOINS_{key}"))
                .or_else(|| lookup(&format!("EXPO_PUBLIC_{key}")))
                .filter(|v| !v.trim().is_empty())
        };
        // SDK-only settings have no EXPO_PUBLIC_ twin.
        let read_own = |key: &str| {
            lookup(&format!("BECOINS_{key}")).filter(|v| !v.trim().is_empty())
        };

        let api_url = read("API_URL")
            .ok_or_else(|| BeCoinError::Config("BECOINS_API_URL is not set".to_string()))?;
        let mut config = Config::new(&api_url);

        if let Some(ws_url) = read("WS_URL") {
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }

        if let Some(demo) = read("USE_DEMO_MODE") {
            config.demo_mode = parse_bool("USE_DEMO_MODE", &demo)?;
        }

        if let Some(rate) = read_own("USD_RATE") {
            config.becoins_per_usd = rate
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite() && *r > 0.0)
                .ok_or_else(|| BeCoinError::Config(format!("BECOINS_USD_RATE: invalid rate {rate:?}")))?;
        }

        if let Some(scale) = read_own("AMOUNT_SCALE") {
            config.amount_scale = match scale.trim().to_ascii_lowercase().as_str() {
                "legacy" => AmountScale::LegacyHeuristic,
                "decimal" => AmountScale::Decimal,
                other => {
                    return Err(BeCoinError::Config(format!(
                        "BECOINS_AMOUNT_SCALE: expected legacy or decimal, got {other:?}"
                    )))
                }
            };
        }

        if let Some(timeout) = read_own("TIMEOUT_MS") {
            let ms = timeout.trim().parse::<u64>().map_err(|_| {
                BeCoinError::Config(format!("BECOINS_TIMEOUT_MS: invalid value {timeout:?}"))
            })?;
            config.timeout = Duration::from_millis(ms);
        }

        let auth0 = |key: &str| {
            lookup(&format!("AUTH0_{key}"))
                .or_else(|| lookup(&format!("EXPO_PUBLIC_AUTH0_{key}")))
                .filter(|v| !v.trim().is_empty())
        };
        if let (Some(domain), Some(client_id)) = (auth0("DOMAIN"), auth0("CLIENT_ID")) {
            config.auth0 = Some(Auth0Config {
                domain,
                client_id,
                audience: auth0("AUDIENCE"),
                redirect_uri: auth0("REDIRECT_URI"),
            });
        }

        debug!(
            api_url = %config.api_url,
            ws_url = %config.ws_url,
            demo_mode = config.demo_mode,
            "loaded configuration"
        );
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BeCoinError::Config(format!(
            "{name}: expected a boolean, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn api_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, BeCoinError::Config(_)));
    }

    #[test]
    fn expo_names_are_accepted_and_ws_defaults_to_api() {
        let config = Config::from_lookup(lookup(&[(
            "EXPO_PUBLIC_API_URL",
            "https://api.becoins.app/",
        )]))
        .unwrap();
        assert_eq!(config.api_url, "https://api.becoins.app");
        assert_eq!(config.ws_url, "https://api.becoins.app");
        assert!(!config.demo_mode);
        assert_eq!(config.amount_scale, AmountScale::LegacyHeuristic);
        assert!(config.auth0.is_none());
    }

    #[test]
    fn prefixed_names_win_over_expo_names() {
        let config = Config::from_lookup(lookup(&[
            ("EXPO_PUBLIC_API_URL", "https://old.example"),
            ("BECOINS_API_URL", "https://new.example"),
            ("BECOINS_USE_DEMO_MODE", "true"),
            ("BECOINS_AMOUNT_SCALE", "decimal"),
            ("BECOINS_USD_RATE", "2.5"),
            ("EXPO_PUBLIC_AUTH0_DOMAIN", "becoins.us.auth0.com"),
            ("AUTH0_CLIENT_ID", "abc"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://new.example");
        assert!(config.demo_mode);
        assert_eq!(config.amount_scale, AmountScale::Decimal);
        assert_eq!(config.becoins_per_usd, 2.5);
        assert_eq!(config.auth0.unwrap().domain, "becoins.us.auth0.com");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("BECOINS_USE_DEMO_MODE", "maybe"),
            ("BECOINS_USD_RATE", "-1"),
            ("BECOINS_AMOUNT_SCALE", "cents"),
            ("BECOINS_TIMEOUT_MS", "soon"),
        ] {
            let result = Config::from_lookup(lookup(&[
                ("BECOINS_API_URL", "https://api.example"),
                (key, value),
            ]));
            assert!(result.is_err(), "{key}={value} should fail");
        }
    }

    #[test]
    fn sdk_settings_ignore_expo_names() {
        let config = Config::from_lookup(lookup(&[
            ("BECOINS_API_URL", "https://api.example"),
            ("EXPO_PUBLIC_USD_RATE", "3"),
            ("EXPO_PUBLIC_AMOUNT_SCALE", "decimal"),
            ("EXPO_PUBLIC_TIMEOUT_MS", "soon"),
        ]))
        .unwrap();
        assert_eq!(config.becoins_per_usd, DEFAULT_BECOINS_PER_USD);
        assert_eq!(config.amount_scale, AmountScale::LegacyHeuristic);
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }
}
