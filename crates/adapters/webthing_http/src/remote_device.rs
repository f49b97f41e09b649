//! Remote Web Thing exposed through the [`Device`] port.
//!
//! Values are cached per property together with the instant they were
//! loaded. A value younger than [`FRESHNESS`] is served from the cache;
//! anything older is fetched again. A background loop reloads the full
//! property set every [`REFRESH_INTERVAL`] and the push channel folds
//! `propertyStatus` messages in between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use thingrules_app::change_bus::{ChangeBus, DEFAULT_CAPACITY};
use thingrules_app::ports::{Device, PropertyChange};
use thingrules_domain::property::{
    PropertyMap, PropertyValue, changed_entries, properties_from_json,
};

use crate::error::WebthingError;
use crate::event_channel;

/// A cached value younger than this is served without a request.
pub const FRESHNESS: Duration = Duration::from_secs(180);

/// Period of the full property reload.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(13 * 60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_client() -> reqwest::Client {
    client_or_default(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build())
}

fn client_or_default(built: reqwest::Result<reqwest::Client>) -> reqwest::Client {
    built.unwrap_or_else(|err| {
        tracing::warn!(%err, "unable to build http client, falling back to one without timeout");
        reqwest::Client::new()
    })
}

#[derive(Default)]
struct Cache {
    values: PropertyMap,
    loaded_at: HashMap<String, Instant>,
}

/// State shared between the device handle and its background tasks.
pub(crate) struct DeviceState {
    name: String,
    uri: String,
    client: Mutex<reqwest::Client>,
    cache: Mutex<Cache>,
    bus: ChangeBus,
}

impl DeviceState {
    pub(crate) fn new(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.trim_end_matches('/').to_string(),
            client: Mutex::new(build_client()),
            cache: Mutex::new(Cache::default()),
            bus: ChangeBus::new(name, DEFAULT_CAPACITY),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.bus.subscribe()
    }

    fn client(&self) -> reqwest::Client {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn renew_client(&self) {
        tracing::info!(device = %self.name, "renewing http client");
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = build_client();
    }

    fn property_url(&self, name: &str) -> String {
        format!("{}/properties/{name}", self.uri)
    }

    fn fresh(&self, name: &str) -> Option<PropertyValue> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let loaded_at = cache.loaded_at.get(name)?;
        if loaded_at.elapsed() >= FRESHNESS {
            return None;
        }
        cache.values.get(name).cloned()
    }

    /// GET `url` and decode the body as JSON.
    pub(crate) async fn fetch(&self, url: &str) -> Result<serde_json::Value, WebthingError> {
        let response = self.client().get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Merge `properties` into the cache and publish the entries that
    /// actually changed. Returns `true` when something was published.
    fn merge(&self, properties: PropertyMap) -> bool {
        let now = Instant::now();
        let changed = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = changed_entries(&cache.values, &properties);
            for (name, value) in properties {
                cache.loaded_at.insert(name.clone(), now);
                cache.values.insert(name, value);
            }
            changed
        };
        if changed.is_empty() {
            return false;
        }
        tracing::debug!(device = %self.name, ?changed, "properties changed");
        self.bus.publish(changed)
    }

    pub(crate) fn on_property_changed(&self, properties: PropertyMap) {
        self.merge(properties);
    }

    async fn load_property(&self, name: &str) -> Option<PropertyValue> {
        let url = self.property_url(name);
        let loaded = match self.fetch(&url).await {
            Ok(payload) => property_from(payload, name),
            Err(err) => Err(err),
        };
        match loaded {
            Ok(value) => {
                self.merge(PropertyMap::from([(name.to_string(), value.clone())]));
                Some(value)
            }
            Err(err) => {
                tracing::warn!(%err, device = %self.name, %url, "unable to load property");
                self.renew_client();
                None
            }
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue, reason: &str) {
        if self.load_property(name).await.as_ref() == Some(&value) {
            tracing::debug!(device = %self.name, property = name, %value, reason, "value unchanged, skipping write");
            return;
        }

        let url = self.property_url(name);
        let mut body = serde_json::Map::new();
        body.insert(name.to_string(), value.to_json());

        match self.client().put(&url).json(&body).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!(device = %self.name, property = name, %value, reason, "property updated");
                self.merge(PropertyMap::from([(name.to_string(), value)]));
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(device = %self.name, property = name, %value, reason, %status, body = %text, "property update rejected");
                self.bus
                    .publish(PropertyMap::from([(name.to_string(), value)]));
            }
            Err(err) => {
                tracing::warn!(%err, device = %self.name, %url, "unable to update property");
                self.renew_client();
            }
        }
    }

    /// Reload every property of the thing.
    pub(crate) async fn refresh(&self) {
        let url = format!("{}/properties", self.uri);
        match self.fetch(&url).await {
            Ok(serde_json::Value::Object(object)) => {
                self.merge(properties_from_json(object));
            }
            Ok(_) => {
                tracing::warn!(device = %self.name, %url, "unexpected properties payload");
            }
            Err(err) => {
                tracing::warn!(%err, device = %self.name, %url, "unable to load properties");
                self.renew_client();
            }
        }
    }
}

fn property_from(payload: serde_json::Value, name: &str) -> Result<PropertyValue, WebthingError> {
    let serde_json::Value::Object(mut object) = payload else {
        return Err(WebthingError::Payload("a JSON object"));
    };
    let raw = object
        .remove(name)
        .ok_or(WebthingError::Payload("the requested property"))?;
    Ok(PropertyValue::try_from(raw)?)
}

async fn refresh_loop(state: Arc<DeviceState>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => state.refresh().await,
        }
    }
    tracing::debug!(device = %state.name(), "refresh loop stopped");
}

/// Client for one Web Thing.
pub struct RemoteDevice {
    state: Arc<DeviceState>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteDevice {
    /// Create an idle device; nothing is requested until it is used or
    /// [`start`](Device::start)ed. A trailing `/` on `uri` is dropped.
    #[must_use]
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            state: Arc::new(DeviceState::new(name, uri)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        self.state.uri()
    }

    /// Fold reported values into the cache, publishing only real changes.
    pub fn on_property_changed(&self, properties: PropertyMap) {
        self.state.on_property_changed(properties);
    }

    /// Reload every property now.
    pub async fn refresh(&self) {
        self.state.refresh().await;
    }
}

impl std::fmt::Debug for RemoteDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDevice")
            .field("name", &self.state.name())
            .field("uri", &self.state.uri())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Device for RemoteDevice {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn property_names(&self) -> Vec<String> {
        self.state
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .keys()
            .cloned()
            .collect()
    }

    async fn get_property(&self, name: &str, force_load: bool) -> Option<PropertyValue> {
        if !force_load && let Some(value) = self.state.fresh(name) {
            return Some(value);
        }
        self.state.load_property(name).await
    }

    async fn set_property(&self, name: &str, value: PropertyValue, reason: &str) {
        self.state.write_property(name, value, reason).await;
    }

    fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.state.subscribe()
    }

    async fn start(&self) {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let refresh = tokio::spawn(refresh_loop(Arc::clone(&self.state), self.cancel.clone()));
        let push = tokio::spawn(event_channel::run(
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([refresh, push]);
        tracing::info!(device = %self.state.name(), uri = %self.state.uri(), "device started");
    }

    async fn close(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.state.bus.close();
        tracing::info!(device = %self.state.name(), uri = %self.state.uri(), "device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn on(value: bool) -> PropertyMap {
        PropertyMap::from([("on".to_string(), PropertyValue::Bool(value))])
    }

    async fn lamp_server(on: bool, expected_reads: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/lamp/properties/on"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "on": on })))
            .expect(expected_reads)
            .mount(&server)
            .await;
        server
    }

    fn lamp(server: &MockServer) -> RemoteDevice {
        RemoteDevice::new("lamp", &format!("{}/things/lamp/", server.uri()))
    }

    #[test]
    fn should_strip_trailing_slash_from_uri() {
        let device = RemoteDevice::new("lamp", "http://10.0.0.1/things/lamp/");
        assert_eq!(device.uri(), "http://10.0.0.1/things/lamp");
    }

    #[tokio::test]
    async fn should_serve_fresh_value_from_cache_unless_forced() {
        let server = lamp_server(true, 2).await;
        let device = lamp(&server);

        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(true)));
        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(true)));
        assert_eq!(device.get_property("on", true).await, Some(PropertyValue::Bool(true)));
        assert_eq!(device.property_names(), vec!["on".to_string()]);
    }

    #[tokio::test]
    async fn should_fetch_once_after_freshness_expires() {
        let server = lamp_server(false, 1).await;
        let device = lamp(&server);
        device.on_property_changed(on(true));
        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(true)));

        tokio::time::pause();
        tokio::time::advance(FRESHNESS + Duration::from_secs(1)).await;
        tokio::time::resume();

        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(false)));
        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(false)));
    }

    #[test]
    fn should_fall_back_to_default_client_when_builder_fails() {
        let failure = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();

        let client = client_or_default(Err(failure));

        assert!(client.get("http://10.0.0.1/things/lamp").build().is_ok());
    }

    #[tokio::test]
    async fn should_publish_loaded_value_only_when_new_or_changed() {
        let server = lamp_server(true, 2).await;
        let device = lamp(&server);
        let mut rx = device.subscribe();

        device.get_property("on", true).await;
        device.get_property("on", true).await;

        assert_eq!(rx.recv().await.unwrap().properties, on(true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_return_none_when_thing_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/lamp/properties/on"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let device = lamp(&server);

        assert_eq!(device.get_property("on", false).await, None);
        assert_eq!(
            device.get_property_or("on", PropertyValue::Bool(false)).await,
            PropertyValue::Bool(false)
        );
    }

    #[tokio::test]
    async fn should_not_write_when_value_is_equal() {
        let server = lamp_server(true, 1).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let device = lamp(&server);

        device.set_property("on", PropertyValue::Bool(true), "test").await;
    }

    #[tokio::test]
    async fn should_write_and_publish_when_thing_accepts() {
        let server = lamp_server(false, 1).await;
        Mock::given(method("PUT"))
            .and(path("/things/lamp/properties/on"))
            .and(body_json(json!({ "on": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "on": true })))
            .expect(1)
            .mount(&server)
            .await;
        let device = lamp(&server);
        let mut rx = device.subscribe();

        device.set_property("on", PropertyValue::Bool(true), "test").await;

        assert_eq!(rx.recv().await.unwrap().properties, on(false));
        assert_eq!(rx.recv().await.unwrap().properties, on(true));
        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(true)));
    }

    #[tokio::test]
    async fn should_publish_attempted_value_when_thing_rejects_write() {
        let server = lamp_server(false, 1).await;
        Mock::given(method("PUT"))
            .and(path("/things/lamp/properties/on"))
            .respond_with(ResponseTemplate::new(400).set_body_string("read only"))
            .expect(1)
            .mount(&server)
            .await;
        let device = lamp(&server);
        let mut rx = device.subscribe();

        device.set_property("on", PropertyValue::Bool(true), "test").await;

        assert_eq!(rx.recv().await.unwrap().properties, on(false));
        assert_eq!(rx.recv().await.unwrap().properties, on(true));
        // cache keeps the value the thing reported
        assert_eq!(device.get_property("on", false).await, Some(PropertyValue::Bool(false)));
    }

    #[tokio::test]
    async fn should_publish_only_changed_pushed_values() {
        let device = RemoteDevice::new("lamp", "http://127.0.0.1:9/things/lamp");
        let mut rx = device.subscribe();

        device.on_property_changed(on(false));
        device.on_property_changed(on(false));
        device.on_property_changed(on(true));

        assert_eq!(rx.recv().await.unwrap().properties, on(false));
        assert_eq!(rx.recv().await.unwrap().properties, on(true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_publish_delta_of_full_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/lamp/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "on": true,
                "brightness": 40,
                "color": { "r": 255 },
            })))
            .mount(&server)
            .await;
        let device = lamp(&server);
        device.on_property_changed(on(true));
        let mut rx = device.subscribe();

        device.refresh().await;

        let change = rx.recv().await.unwrap();
        assert_eq!(
            change.properties,
            PropertyMap::from([("brightness".to_string(), PropertyValue::Number(40.0))])
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_end_subscriptions_when_closed() {
        let device = RemoteDevice::new("lamp", "http://127.0.0.1:9/things/lamp");
        let mut rx = device.subscribe();

        device.close().await;

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        device.on_property_changed(on(true));
    }
}
