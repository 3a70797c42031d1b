use std::fmt;
use std::sync::{Arc, Once};

use reqwest::blocking::RequestBuilder;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use tracing_subscriber::EnvFilter;

use super::session::{SessionStore, AUTH_TOKEN_KEY};
use crate::balance::AmountScale;
use crate::config::Config;
use crate::errors::{BeCoinError, Result};

/// BeCoins Client. Used to interact with the BeCoins API.
///
/// Build one at startup and share it by reference; it holds the HTTP
/// connection pool and the session store.
pub struct Client {
    pub config: Config,
    /// Whether the SDK installs a debug log subscriber.
    pub debug: bool,
    base_url: Url,
    http: reqwest::blocking::Client,
    session: Arc<dyn SessionStore>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("debug", &self.debug)
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// BeCoins Client options. Pass this into the `new()` function of the BeCoins Client.
pub struct ClientOptions {
    pub config: Config,
    /// Where the token, user and wallet id are kept between runs.
    pub session: Arc<dyn SessionStore>,
    /// Whether the SDK should print debug statements.
    pub debug: bool,
}

/// The three list shapes the backend returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    /// `[row, row, ...]`
    Bare(Vec<T>),
    /// `[[row, row, ...], total]`, the `findAndCount` convention.
    Counted(Vec<T>, u64),
    /// `{ "data": [...] }`, also accepted as `items` or `rows`.
    Wrapped {
        #[serde(alias = "items", alias = "rows")]
        data: Vec<T>,
    },
}

impl<T> ListResponse<T> {
    pub fn total(&self) -> usize {
        match self {
            ListResponse::Bare(rows) | ListResponse::Wrapped { data: rows } => rows.len(),
            ListResponse::Counted(_, total) => *total as usize,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Bare(rows)
            | ListResponse::Counted(rows, _)
            | ListResponse::Wrapped { data: rows } => rows,
        }
    }
}

static LOGGING: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG`. Does nothing if one is already set.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("becoins_client=debug"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

impl Client {
    /// Creates a new BeCoins client.
    pub fn new(options: ClientOptions) -> Result<Self> {
        if options.debug {
            init_logging();
        }

        let base_url = Url::parse(&format!("{}/", options.config.api_url.trim_end_matches('/')))
            .map_err(|_| BeCoinError::InvalidBaseUrl(options.config.api_url.clone()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BeCoinError::InvalidBaseUrl(options.config.api_url.clone()));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(options.config.timeout)
            .build()
            .map_err(|_| BeCoinError::RequestFailed)?;

        debug!(base_url = %base_url, demo_mode = options.config.demo_mode, "client created");

        Ok(Self {
            config: options.config,
            debug: options.debug,
            base_url,
            http,
            session: options.session,
        })
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    pub fn amount_scale(&self) -> AmountScale {
        self.config.amount_scale
    }

    /// The stored auth token, if any.
    pub fn token(&self) -> Result<Option<String>> {
        self.session.get(AUTH_TOKEN_KEY)
    }

    /// The stored auth token, or `NotAuthenticated`.
    pub fn require_token(&self) -> Result<String> {
        self.token()?.ok_or(BeCoinError::NotAuthenticated)
    }

    /// Resolves an API path against the base URL.
    pub fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|_| BeCoinError::InvalidBaseUrl(path.to_string()))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        self.api_call::<T, ()>(Method::GET, path, params, None)
    }

    pub fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.api_call(Method::POST, path, &[], Some(body))
    }

    pub fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.api_call(Method::PATCH, path, &[], Some(body))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.api_call::<Value, ()>(Method::DELETE, path, &[], None)
            .map(|_| ())
    }

    /// Fetches a list endpoint, whatever shape it answers with.
    pub fn get_list<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<T>> {
        self.get::<ListResponse<T>>(path, params)
            .map(ListResponse::into_vec)
    }

    /// Query an endpoint from the BeCoins API.
    #[instrument(skip(self, method, params, body), fields(method = %method))]
    pub fn api_call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.endpoint(path, params)?;

        let mut request: RequestBuilder = self.http.request(method, url);
        if let Some(token) = self.token()? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().map_err(|e| {
            warn!(error = %e, "request failed");
            BeCoinError::RequestFailed
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "api returned an error");
            return Err(BeCoinError::from_status(status));
        }

        let text = response.text().map_err(|_| BeCoinError::FailedToDecode)?;
        decode_body(&text)
    }
}

/// Decodes a response body. An empty body decodes as JSON `null`.
pub(crate) fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str::<Value>(text).map_err(|e| {
            debug!(error = %e, "response is not json");
            BeCoinError::FailedToDecode
        })?
    };
    serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "response has an unexpected shape");
        BeCoinError::FailedToDecode
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::session::MemoryStore;
    use serde_json::json;

    fn client(api_url: &str) -> Result<Client> {
        Client::new(ClientOptions {
            config: Config::new(api_url),
            session: Arc::new(MemoryStore::new()),
            debug: false,
        })
    }

    #[test]
    fn list_response_accepts_every_shape() {
        let bare: ListResponse<u32> = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(bare.total(), 3);
        assert_eq!(bare.into_vec(), vec![1, 2, 3]);

        let counted: ListResponse<u32> = serde_json::from_value(json!([[1, 2], 40])).unwrap();
        assert_eq!(counted.total(), 40);
        assert_eq!(counted.into_vec(), vec![1, 2]);

        let wrapped: ListResponse<u32> = serde_json::from_value(json!({ "data": [5] })).unwrap();
        assert_eq!(wrapped.into_vec(), vec![5]);

        let items: ListResponse<u32> = serde_json::from_value(json!({ "items": [6, 7] })).unwrap();
        assert_eq!(items.into_vec(), vec![6, 7]);
    }

    #[test]
    fn endpoints_resolve_under_base_path() {
        let client = client("https://api.becoins.app/v1/").unwrap();
        let url = client.endpoint("/products", &[("category", "3")]).unwrap();
        assert_eq!(url.as_str(), "https://api.becoins.app/v1/products?category=3");
    }

    #[test]
    fn invalid_base_urls_are_rejected() {
        assert!(matches!(client("not a url"), Err(BeCoinError::InvalidBaseUrl(_))));
        assert!(matches!(client("ftp://files.example"), Err(BeCoinError::InvalidBaseUrl(_))));
    }

    #[test]
    fn empty_bodies_decode_as_unit() {
        decode_body::<()>("").unwrap();
        assert!(matches!(decode_body::<Vec<u32>>(""), Err(BeCoinError::FailedToDecode)));
        assert!(matches!(decode_body::<u32>("<html>"), Err(BeCoinError::FailedToDecode)));
    }

    #[test]
    fn debug_output_leaves_out_the_session() {
        let client = client("https://api.becoins.app").unwrap();
        client.session().set(crate::AUTH_TOKEN_KEY, "secret-token").unwrap();
        let printed = format!("{client:?}");
        assert!(printed.contains("https://api.becoins.app/"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn missing_token_is_reported() {
        let client = client("https://api.becoins.app").unwrap();
        assert!(matches!(client.require_token(), Err(BeCoinError::NotAuthenticated)));
    }
}
