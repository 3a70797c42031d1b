use base64::prelude::*;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::client::Client;
use super::lenient_id;
use super::session::{AUTH_TOKEN_KEY, AUTH_USER_KEY};
use crate::errors::{BeCoinError, Result};

/// What the user is allowed to do in the app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserRole {
    /// A shop that sells products and accepts BeCoins.
    Commerce,
    /// A recycler that runs pickups.
    Collector,
    Admin,
    #[default]
    User,
    /// A role this SDK does not know about, kept verbatim.
    Other(String),
}

impl From<String> for UserRole {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "commerce" | "comercio" | "merchant" => UserRole::Commerce,
            "collector" | "recolector" | "reciclador" => UserRole::Collector,
            "admin" | "administrador" => UserRole::Admin,
            "user" | "usuario" | "customer" | "cliente" => UserRole::User,
            _ => UserRole::Other(value),
        }
    }
}

impl From<UserRole> for String {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Commerce => "commerce".to_string(),
            UserRole::Collector => "collector".to_string(),
            UserRole::Admin => "admin".to_string(),
            UserRole::User => "user".to_string(),
            UserRole::Other(other) => other,
        }
    }
}

/// User object which gets returned from `login()` and `profile()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub email: String,
    /// Display name. The backend leaves it out for accounts created from the web.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_commerce(&self) -> bool {
        self.role == UserRole::Commerce
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    token: String,
    user: AuthUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterParams {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

/// Reads the `exp` claim of a JWT. The signature is not checked; the backend does that.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

impl Client {
    /// Signs in and stores the token and user in the session.
    #[instrument(skip(self, password))]
    pub fn login(&self, email: &str, password: &str) -> Result<AuthUser> {
        let response: LoginResponse = self.post(
            "/auth/login",
            &json!({ "email": email, "password": password }),
        )?;
        self.store_login(response)
    }

    /// Creates an account and signs in with it.
    #[instrument(skip(self, params), fields(email = %params.email))]
    pub fn register(&self, params: &RegisterParams) -> Result<AuthUser> {
        let response: LoginResponse = self.post("/auth/register", params)?;
        self.store_login(response)
    }

    fn store_login(&self, response: LoginResponse) -> Result<AuthUser> {
        let user_json =
            serde_json::to_string(&response.user).map_err(|e| BeCoinError::Storage(e.to_string()))?;
        self.session().set(AUTH_TOKEN_KEY, &response.token)?;
        self.session().set(AUTH_USER_KEY, &user_json)?;
        info!(user_id = %response.user.id, "signed in");
        Ok(response.user)
    }

    /// Fetches the signed-in user's profile and refreshes the stored copy.
    pub fn profile(&self) -> Result<AuthUser> {
        self.require_token()?;
        let user: AuthUser = self.get("/auth/profile", &[])?;
        let user_json =
            serde_json::to_string(&user).map_err(|e| BeCoinError::Storage(e.to_string()))?;
        self.session().set(AUTH_USER_KEY, &user_json)?;
        Ok(user)
    }

    /// The user stored at sign-in, if any.
    pub fn current_user(&self) -> Result<Option<AuthUser>> {
        match self.session().get(AUTH_USER_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| BeCoinError::Storage(format!("stored user is unreadable: {e}"))),
            None => Ok(None),
        }
    }

    /// Like `current_user()`, but a missing user is `NotAuthenticated`.
    pub fn require_user(&self) -> Result<AuthUser> {
        self.current_user()?.ok_or(BeCoinError::NotAuthenticated)
    }

    /// Drops the token, user and wallet id.
    pub fn logout(&self) -> Result<()> {
        self.session().clear_session()?;
        info!("signed out");
        Ok(())
    }

    pub fn token_expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.token()?.as_deref().and_then(token_expiry))
    }

    /// True when there is no token or its `exp` is in the past.
    /// Tokens without an `exp` claim never expire.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.token()? {
            None => true,
            Some(token) => token_expiry(&token).is_some_and(|exp| exp <= now),
        })
    }

    /// The hosted login page for the configured Auth0 tenant.
    pub fn hosted_login_url(&self) -> Result<Url> {
        let auth0 = self
            .config
            .auth0
            .as_ref()
            .ok_or_else(|| BeCoinError::Config("AUTH0_DOMAIN and AUTH0_CLIENT_ID are not set".to_string()))?;

        let domain = auth0.domain.trim_start_matches("https://").trim_end_matches('/');
        let mut url = Url::parse(&format!("https://{domain}/authorize"))
            .map_err(|_| BeCoinError::InvalidBaseUrl(auth0.domain.clone()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "token");
            query.append_pair("client_id", &auth0.client_id);
            query.append_pair("scope", "openid profile email");
            if let Some(audience) = &auth0.audience {
                query.append_pair("audience", audience);
            }
            if let Some(redirect_uri) = &auth0.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
        }
        Ok(url)
    }

    /// Opens the hosted login page in the user's default browser.
    pub fn open_hosted_login(&self) -> Result<()> {
        let url = self.hosted_login_url()?;
        debug!(%url, "opening hosted login");
        open::that(url.as_str()).map_err(|_| BeCoinError::BrowserLaunch)
    }
}
