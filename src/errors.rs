use reqwest::StatusCode;
use thiserror::Error;

/// BeCoins SDK Errors.
#[derive(Debug, Error)]
pub enum BeCoinError {
    /// The configured API or websocket URL could not be parsed.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// A configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No auth token is stored. Call `login()` first.
    #[error("Not authenticated.")]
    NotAuthenticated,

    /// Failed to send a request to the BeCoins API.
    #[error("Failed to send a request to the BeCoins API.")]
    RequestFailed,

    /// Failed to decode a BeCoins API response.
    #[error("Failed to decode BeCoins API response.")]
    FailedToDecode,

    /// Reading or writing the session store failed.
    #[error("Session storage error: {0}")]
    Storage(String),

    /// The realtime socket could not be opened or written to.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The operation's scope was cancelled before its result could be applied.
    #[error("Operation cancelled.")]
    Cancelled,

    /// The system browser could not be opened.
    #[error("Failed to open the browser.")]
    BrowserLaunch,

    /// The BeCoins API returned a 400: Bad Request status code.
    #[error("Bad request.")]
    BadRequest,
    /// The BeCoins API returned a 401: Unauthorized status code.
    /// The stored token is missing, expired or revoked.
    #[error("Unauthorized.")]
    Unauthorized,
    /// The BeCoins API returned a 403: Forbidden status code.
    /// The user's role does not allow this action.
    #[error("Forbidden.")]
    Forbidden,
    /// The BeCoins API returned a 404: Not Found status code.
    #[error("Not found.")]
    NotFound,
    /// The BeCoins API returned a 409: Conflict status code.
    /// Usually insufficient stock or an already redeemed ticket.
    #[error("Conflict.")]
    Conflict,
    /// The BeCoins API returned a 429: Too Many Requests status code.
    #[error("You are being rate limited.")]
    RateLimited,
    /// The BeCoins API returned a 503: Service Unavailable status code.
    #[error("The service is unavailable.")]
    ServiceUnavailable,
    /// The BeCoins API returned a server error.
    /// This is a catch-all for unusual error cases.
    #[error("Server error.")]
    ServerError,
}

impl BeCoinError {
    /// Maps a non-success HTTP status onto an error variant.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => BeCoinError::BadRequest,
            StatusCode::UNAUTHORIZED => BeCoinError::Unauthorized,
            StatusCode::FORBIDDEN => BeCoinError::Forbidden,
            StatusCode::NOT_FOUND => BeCoinError::NotFound,
            StatusCode::CONFLICT => BeCoinError::Conflict,
            StatusCode::TOO_MANY_REQUESTS => BeCoinError::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE => BeCoinError::ServiceUnavailable,
            _ => BeCoinError::ServerError,
        }
    }

    /// The message shown to the user by the app screens.
    pub fn user_message(&self) -> &'static str {
        match self {
            BeCoinError::NotAuthenticated | BeCoinError::Unauthorized => {
                "Tu sesión expiró. Inicia sesión nuevamente."
            }
            BeCoinError::Forbidden => "No tienes permiso para realizar esta acción.",
            BeCoinError::NotFound => "No se encontró el recurso solicitado.",
            BeCoinError::Conflict => "No hay stock suficiente o el recurso ya fue canjeado.",
            BeCoinError::RateLimited => "Demasiadas solicitudes. Intenta más tarde.",
            BeCoinError::RequestFailed
            | BeCoinError::ServiceUnavailable
            | BeCoinError::Socket(_) => "No se pudo conectar con el servidor.",
            BeCoinError::Cancelled => "La operación fue cancelada.",
            _ => "Ocurrió un error inesperado.",
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, BeCoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_variants() {
        assert!(matches!(
            BeCoinError::from_status(StatusCode::NOT_FOUND),
            BeCoinError::NotFound
        ));
        assert!(matches!(
            BeCoinError::from_status(StatusCode::CONFLICT),
            BeCoinError::Conflict
        ));
        assert!(matches!(
            BeCoinError::from_status(StatusCode::BAD_GATEWAY),
            BeCoinError::ServerError
        ));
    }

    #[test]
    fn user_messages_are_spanish() {
        assert_eq!(
            BeCoinError::RequestFailed.user_message(),
            "No se pudo conectar con el servidor."
        );
        assert_eq!(
            BeCoinError::Unauthorized.user_message(),
            BeCoinError::NotAuthenticated.user_message()
        );
    }
}
