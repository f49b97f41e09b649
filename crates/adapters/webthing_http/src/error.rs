//! Web Thing adapter errors.

use tokio_tungstenite::tungstenite;

use thingrules_domain::error::PropertyValueError;

/// A call to a remote thing failed.
#[derive(Debug, thiserror::Error)]
pub enum WebthingError {
    #[error("http request failed")]
    Http(#[from] reqwest::Error),

    #[error("invalid url")]
    Url(#[from] url::ParseError),

    #[error("unable to decode message")]
    Json(#[from] serde_json::Error),

    #[error("websocket failure")]
    WebSocket(#[source] Box<tungstenite::Error>),

    #[error("unsupported property value")]
    Value(#[from] PropertyValueError),

    #[error("unexpected payload, expected {0}")]
    Payload(&'static str),

    #[error("thing description has no websocket link")]
    NoPushEndpoint,
}

impl From<tungstenite::Error> for WebthingError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
