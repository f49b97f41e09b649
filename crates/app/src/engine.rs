//! Rule engine: wires the registry, the processors and the rule loader
//! together and owns their start/stop order.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::info;

use thingrules_domain::device_config::ReloadPolicy;

use crate::function::FunctionCatalog;
use crate::ports::{
    CronEvaluator, DeviceConfigSource, DeviceFactory, DeviceHandle, FileEvent, RuleModuleSource,
};
use crate::processors::{
    CronProcessor, LoadedProcessor, PropertyChangeProcessor, TriggerProcessor,
};
use crate::registry::DeviceRegistry;
use crate::rule::Rule;
use crate::rule_loader::RuleLoader;

/// Everything the engine needs from the outside.
pub struct EngineParts<S> {
    /// The `db` device.
    pub store: DeviceHandle,
    pub device_source: Arc<dyn DeviceConfigSource>,
    pub device_factory: Arc<dyn DeviceFactory>,
    pub reload_policy: ReloadPolicy,
    pub cron: Arc<dyn CronEvaluator>,
    pub rule_source: S,
    pub catalog: FunctionCatalog,
}

pub struct RuleEngine<S> {
    registry: Arc<DeviceRegistry>,
    processors: Vec<Arc<dyn TriggerProcessor>>,
    loader: Arc<RuleLoader<S>>,
}

impl<S: RuleModuleSource + 'static> RuleEngine<S> {
    #[must_use]
    pub fn new(parts: EngineParts<S>) -> Self {
        let registry = Arc::new(DeviceRegistry::new(
            parts.store,
            parts.device_source,
            parts.device_factory,
            parts.reload_policy,
        ));
        let processors: Vec<Arc<dyn TriggerProcessor>> = vec![
            Arc::new(LoadedProcessor::new(Arc::clone(&registry))),
            Arc::new(CronProcessor::new(Arc::clone(&registry), parts.cron)),
            Arc::new(PropertyChangeProcessor::new(Arc::clone(&registry))),
        ];
        let loader = Arc::new(RuleLoader::new(
            parts.rule_source,
            parts.catalog,
            processors.clone(),
        ));
        Self {
            registry,
            processors,
            loader,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Every registered rule across processors, sorted by fingerprint.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Arc<Rule>> = self
            .processors
            .iter()
            .flat_map(|processor| processor.rules())
            .collect();
        rules.sort();
        rules
    }

    /// Load devices, start processors, load rule modules, then follow both
    /// event streams.
    ///
    /// Every later device-configuration reload is reported to the
    /// processors, so property declarations on newly declared devices get
    /// registered. Rule modules are not reloaded.
    pub async fn start(
        &self,
        rule_events: mpsc::Receiver<FileEvent>,
        config_events: mpsc::Receiver<FileEvent>,
    ) {
        info!("starting rule engine");
        self.registry.reload_configuration().await;
        self.registry.watch(config_events);
        for processor in &self.processors {
            processor.start();
        }
        self.loader.start(rule_events).await;

        let processors: Vec<Weak<dyn TriggerProcessor>> =
            self.processors.iter().map(Arc::downgrade).collect();
        self.registry.add_listener(Arc::new(move || {
            let processors: Vec<_> = processors.iter().filter_map(Weak::upgrade).collect();
            tokio::spawn(async move {
                for processor in processors {
                    processor.on_devices_reloaded().await;
                }
            });
        }));
        info!(
            devices = self.registry.names().len(),
            rules = self.rules().len(),
            "rule engine started"
        );
    }

    /// Stop the rule directory watch, then the registry and its devices,
    /// then the processors.
    pub async fn stop(&self) {
        info!("stopping rule engine");
        self.loader.close();
        self.registry.close().await;
        for processor in &self.processors {
            processor.stop();
        }
        info!("rule engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use thingrules_domain::property::PropertyValue;

    use super::*;
    use crate::function::{INITIATOR, RuleFunction};
    use crate::testing::{
        FakeConfigSource, FakeCron, FakeFactory, InMemoryRuleSource, memory_store_device,
    };

    struct Fixture {
        engine: RuleEngine<Arc<InMemoryRuleSource>>,
        config: Arc<FakeConfigSource>,
        factory: Arc<FakeFactory>,
        rules: Arc<InMemoryRuleSource>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(FakeConfigSource::with([("lamp", "http://10.0.0.5")]));
        let factory = Arc::new(FakeFactory::default());
        let rules = Arc::new(InMemoryRuleSource::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let catalog = FunctionCatalog::new().with(RuleFunction::new(
            "record",
            &[INITIATOR],
            move |args| {
                recorded.lock().unwrap().push(args.initiator().to_string());
                async { Ok(()) }
            },
        ));
        let engine = RuleEngine::new(EngineParts {
            store: memory_store_device(),
            device_source: Arc::clone(&config) as Arc<dyn DeviceConfigSource>,
            device_factory: Arc::clone(&factory) as Arc<dyn DeviceFactory>,
            reload_policy: ReloadPolicy::AddOnly,
            cron: Arc::new(FakeCron::default()),
            rule_source: Arc::clone(&rules),
            catalog,
        });
        Fixture {
            engine,
            config,
            factory,
            rules,
            calls,
        }
    }

    async fn wait_for_calls(calls: &Arc<Mutex<Vec<String>>>, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn should_load_devices_before_rules() {
        let f = fixture();
        f.rules.put(
            "evening",
            &[("record", &["rule loaded", "property lamp#on changed"])],
        );
        let (_rule_tx, rule_rx) = mpsc::channel(8);
        let (_config_tx, config_rx) = mpsc::channel(8);

        f.engine.start(rule_rx, config_rx).await;

        assert_eq!(f.engine.rules().len(), 2);
        assert_eq!(*f.calls.lock().unwrap(), vec!["rule loaded".to_string()]);

        f.factory
            .created("lamp")
            .unwrap()
            .push([("on", PropertyValue::Bool(true))]);
        wait_for_calls(&f.calls, 2).await;
        assert_eq!(f.calls.lock().unwrap()[1], "on");

        f.engine.stop().await;
    }

    #[tokio::test]
    async fn should_register_rules_for_devices_declared_later() {
        let f = fixture();
        f.rules
            .put("heating", &[("record", &["property heater#on changed"])]);
        let (_rule_tx, rule_rx) = mpsc::channel(8);
        let (config_tx, config_rx) = mpsc::channel(8);
        f.engine.start(rule_rx, config_rx).await;
        assert!(f.engine.rules().is_empty());

        f.config
            .set([("lamp", "http://10.0.0.5"), ("heater", "http://10.0.0.6")]);
        config_tx
            .send(FileEvent::Modified(PathBuf::from("/conf/webthings.yml")))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.engine.rules().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        f.factory
            .created("heater")
            .unwrap()
            .push([("on", PropertyValue::Bool(true))]);
        wait_for_calls(&f.calls, 1).await;

        f.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_run_loaded_rule_once_across_device_reloads() {
        let f = fixture();
        f.rules.put(
            "startup",
            &[("record", &["rule loaded", "property heater#on changed"])],
        );
        let (_rule_tx, rule_rx) = mpsc::channel(8);
        let (config_tx, config_rx) = mpsc::channel(8);
        f.engine.start(rule_rx, config_rx).await;
        assert_eq!(f.engine.rules().len(), 1);

        f.config
            .set([("lamp", "http://10.0.0.5"), ("heater", "http://10.0.0.6")]);
        config_tx
            .send(FileEvent::Modified(PathBuf::from("/conf/webthings.yml")))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.engine.rules().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(31)).await;
            assert!(f.engine.registry().device("ghost").await.is_none());
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(*f.calls.lock().unwrap(), vec!["rule loaded".to_string()]);
        f.engine.stop().await;
    }

    #[tokio::test]
    async fn should_close_devices_and_ignore_rule_events_after_stop() {
        let f = fixture();
        let (rule_tx, rule_rx) = mpsc::channel(8);
        let (_config_tx, config_rx) = mpsc::channel(8);
        f.engine.start(rule_rx, config_rx).await;

        f.engine.stop().await;

        assert!(f.factory.created("lamp").unwrap().is_closed());
        f.rules.put("late", &[("record", &["rule loaded"])]);
        let _ = rule_tx
            .send(FileEvent::Created(PathBuf::from("/rules/late.toml")))
            .await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(f.calls.lock().unwrap().is_empty());
    }
}
