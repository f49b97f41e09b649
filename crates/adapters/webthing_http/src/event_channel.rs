//! WebSocket push channel of a Web Thing.
//!
//! The endpoint is taken from the thing description (first link whose
//! `href` starts with `ws`) and cached once resolved. The channel
//! reconnects after a fixed [`RECONNECT_DELAY`] until cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use thingrules_domain::property::{PropertyMap, properties_from_json};

use crate::error::WebthingError;
use crate::remote_device::DeviceState;

pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(7);

const PROPERTY_STATUS: &str = "propertyStatus";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, PartialEq)]
enum PushMessage {
    PropertyStatus(PropertyMap),
    Other(String),
}

fn decode(text: &str) -> Result<PushMessage, WebthingError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.message_type != PROPERTY_STATUS {
        return Ok(PushMessage::Other(envelope.message_type));
    }
    match envelope.data {
        serde_json::Value::Object(object) => {
            Ok(PushMessage::PropertyStatus(properties_from_json(object)))
        }
        _ => Err(WebthingError::Payload("an object in data")),
    }
}

fn push_endpoint(description: &serde_json::Value) -> Option<String> {
    description
        .get("links")?
        .as_array()?
        .iter()
        .filter_map(|link| link.get("href").and_then(serde_json::Value::as_str))
        .find(|href| href.starts_with("ws"))
        .map(str::to_string)
}

struct EventChannel {
    device: Arc<DeviceState>,
    endpoint: Option<String>,
}

impl EventChannel {
    async fn endpoint(&mut self) -> Result<String, WebthingError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let description = self.device.fetch(self.device.uri()).await?;
        let endpoint = push_endpoint(&description).ok_or(WebthingError::NoPushEndpoint)?;
        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    fn on_message(&self, text: &str) {
        match decode(text) {
            Ok(PushMessage::PropertyStatus(properties)) => {
                self.device.on_property_changed(properties);
            }
            Ok(PushMessage::Other(kind)) => {
                tracing::warn!(device = %self.device.name(), %kind, "unknown message type received");
            }
            Err(err) => {
                tracing::warn!(%err, device = %self.device.name(), message = text, "unable to decode push message");
            }
        }
    }

    /// Open one connection and read until it ends or `cancel` fires.
    async fn connect_and_read(&mut self, cancel: &CancellationToken) -> Result<(), WebthingError> {
        let endpoint = self.endpoint().await?;
        tracing::info!(device = %self.device.name(), %endpoint, "opening push stream");
        let (mut stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_message(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(err)) => return Err(err.into()),
                    // ping replies are handled by tungstenite
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

/// Keep the push channel of `device` open until `cancel` fires.
pub(crate) async fn run(device: Arc<DeviceState>, cancel: CancellationToken) {
    let name = device.name().to_string();
    let mut channel = EventChannel {
        device,
        endpoint: None,
    };
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = channel.connect_and_read(&cancel) => match result {
                Ok(()) => tracing::info!(device = %name, "push stream ended"),
                Err(err) => tracing::warn!(%err, device = %name, "push stream failed"),
            },
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    tracing::debug!(device = %name, "push channel stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use serde_json::json;
    use thingrules_domain::property::PropertyValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn should_pick_first_websocket_link() {
        let description = json!({
            "title": "lamp",
            "links": [
                { "rel": "properties", "href": "/things/lamp/properties" },
                { "rel": "alternate", "href": "/things/lamp" },
                { "rel": "alternate", "href": "ws://10.0.0.1/things/lamp" },
                { "rel": "alternate", "href": "wss://10.0.0.1/things/lamp" },
            ],
        });
        assert_eq!(
            push_endpoint(&description).as_deref(),
            Some("ws://10.0.0.1/things/lamp")
        );
    }

    #[test]
    fn should_find_no_endpoint_without_websocket_link() {
        assert_eq!(push_endpoint(&json!({ "title": "lamp" })), None);
        assert_eq!(
            push_endpoint(&json!({ "links": [{ "href": "/things/lamp" }] })),
            None
        );
    }

    #[test]
    fn should_decode_property_status() {
        let message = decode(r#"{"messageType":"propertyStatus","data":{"on":true,"level":2}}"#)
            .unwrap();
        assert_eq!(
            message,
            PushMessage::PropertyStatus(PropertyMap::from([
                ("level".to_string(), PropertyValue::Number(2.0)),
                ("on".to_string(), PropertyValue::Bool(true)),
            ]))
        );
    }

    #[test]
    fn should_report_other_message_types() {
        let message = decode(r#"{"messageType":"event","data":{"overheated":{}}}"#).unwrap();
        assert_eq!(message, PushMessage::Other("event".to_string()));
    }

    #[test]
    fn should_fail_on_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"messageType":"propertyStatus","data":[1]}"#).is_err());
    }

    #[tokio::test]
    async fn should_forward_pushed_properties_to_device() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            for text in [
                r#"{"messageType":"event","data":{}}"#,
                "not json",
                r#"{"messageType":"propertyStatus","data":{"on":true}}"#,
            ] {
                ws.send(Message::text(text)).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/lamp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "lamp",
                "links": [{ "rel": "alternate", "href": format!("ws://{address}/things/lamp") }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let device = Arc::new(DeviceState::new("lamp", &format!("{}/things/lamp", server.uri())));
        let mut rx = device.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&device), cancel.clone()));

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.device, "lamp");
        assert_eq!(
            change.properties,
            PropertyMap::from([("on".to_string(), PropertyValue::Bool(true))])
        );

        cancel.cancel();
        task.await.unwrap();
    }
}
