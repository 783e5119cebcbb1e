//! Host bridge: the facade the embedding application talks to.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::channel::{BootstrapLoader, HostEndpoint, ScriptChannel, ScriptCommand};
use super::config::BridgeConfig;
use super::correlation::{CorrelationId, CorrelationStats, CorrelationTable};
use super::dispatch;
use super::error::BridgeError;
use super::handle::HandleId;
use super::link::{self, HostLink};
use super::registry::{InterfaceDef, InterfaceManifest, InterfaceRegistry};
use super::wire::Answer;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Host side of a bridge session.
///
/// Interfaces are added with [`Bridge::add_interface`], published with
/// [`Bridge::init`], and the script side reaches the host through the
/// [`HostEndpoint`] methods.
pub struct Bridge {
    config: BridgeConfig,
    registry: InterfaceRegistry,
    link: Arc<HostLink>,
    bootstrap: Option<Box<dyn BootstrapLoader>>,
    initialized: AtomicBool,
    closed: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, channel: Arc<dyn ScriptChannel>) -> Result<Self, BridgeError> {
        config.validate()?;
        let correlations = CorrelationTable::spawn(config.correlation_timeout())?;
        let link = Arc::new(HostLink::new(channel, correlations, config.limits()));
        Ok(Self {
            config,
            registry: InterfaceRegistry::new(),
            link,
            bootstrap: None,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Prepend a bootstrap script to the initialization command.
    pub fn with_bootstrap_loader<L>(mut self, loader: L) -> Self
    where
        L: BootstrapLoader + 'static,
    {
        self.bootstrap = Some(Box::new(loader));
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Register an interface. After `init`, the script side receives the
    /// updated interface table.
    pub fn add_interface(&self, def: InterfaceDef) -> Result<(), BridgeError> {
        self.registry.add(def)?;
        if self.is_initialized() {
            self.link.send(ScriptCommand::UpdateInterfaces {
                interfaces: self.registry.manifest(),
            })?;
        }
        Ok(())
    }

    pub fn interfaces(&self) -> Vec<InterfaceManifest> {
        self.registry.manifest()
    }

    /// Publish the bridge to the script side.
    pub fn init(&self) -> Result<(), BridgeError> {
        let bootstrap = match &self.bootstrap {
            Some(loader) => Some(loader.load_bootstrap_script()?),
            None => None,
        };
        self.initialized.store(true, Ordering::SeqCst);
        tracing::debug!(
            target: "jsbridge::host",
            bridge = %self.config.bridge_name,
            interfaces = self.registry.len(),
            "Initializing bridge"
        );
        self.link.send(ScriptCommand::Initialize {
            bridge_name: self.config.bridge_name.clone(),
            bootstrap,
            interfaces: self.registry.manifest(),
        })
    }

    /// Run `listener` every time the script side reports readiness.
    pub fn add_after_initialize_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Handle a serialized Call from the script side.
    pub fn dispatch(&self, call: &str) -> String {
        dispatch::dispatch(&self.registry, &self.link, call).to_json()
    }

    /// Deliver the serialized Answer for a pending host-to-script call.
    pub fn complete_correlation(&self, correlation: CorrelationId, answer: &str) -> Result<(), BridgeError> {
        match Answer::from_json(answer) {
            Ok(answer) => link::complete_correlation(&self.link, correlation, answer),
            Err(err) => {
                self.link.correlations().cancel(correlation, err.clone())?;
                Err(err)
            }
        }
    }

    pub fn notify_ready(&self) {
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        tracing::debug!(
            target: "jsbridge::host",
            listeners = listeners.len(),
            "Script side is ready"
        );
        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener())) {
                tracing::error!(
                    target: "jsbridge::host",
                    "Error in after-initialize listener: {}",
                    BridgeError::from_panic(payload)
                );
            }
        }
    }

    /// IDs of script functions adopted and not yet released.
    pub fn outstanding_handles(&self) -> Vec<HandleId> {
        self.link.outstanding_handles()
    }

    pub fn pending_correlations(&self) -> usize {
        self.link.correlations().len()
    }

    pub fn correlation_stats(&self) -> CorrelationStats {
        self.link.correlations().stats()
    }

    /// End the session: report leaks and fail pending calls with
    /// `ChannelClosed`. Called on drop if not called before.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outstanding = self.outstanding_handles();
        if self.config.warn_on_leaks && !outstanding.is_empty() {
            tracing::warn!(
                target: "jsbridge::host",
                handles = ?outstanding,
                "{} function handles not released before shutdown",
                outstanding.len()
            );
        }
        let cancelled = self.link.correlations().cancel_all(BridgeError::ChannelClosed);
        if cancelled > 0 {
            tracing::warn!(
                target: "jsbridge::host",
                "{} pending calls cancelled at shutdown",
                cancelled
            );
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl HostEndpoint for Bridge {
    fn dispatch(&self, call: &str) -> String {
        Bridge::dispatch(self, call)
    }

    fn complete_correlation(&self, correlation: CorrelationId, answer: &str) -> Result<(), BridgeError> {
        Bridge::complete_correlation(self, correlation, answer)
    }

    fn notify_ready(&self) {
        Bridge::notify_ready(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::RecordingChannel;
    use crate::bridge::registry::CallType;
    use std::sync::atomic::AtomicUsize;

    struct StaticBootstrap;

    impl BootstrapLoader for StaticBootstrap {
        fn load_bootstrap_script(&self) -> Result<String, BridgeError> {
            Ok("var bootstrap=true".to_string())
        }
    }

    struct MissingBootstrap;

    impl BootstrapLoader for MissingBootstrap {
        fn load_bootstrap_script(&self) -> Result<String, BridgeError> {
            Err(BridgeError::Bootstrap("init.min.js not found".to_string()))
        }
    }

    fn bridge() -> (Arc<RecordingChannel>, Bridge) {
        let channel = Arc::new(RecordingChannel::default());
        let bridge = Bridge::new(BridgeConfig::default(), channel.clone()).unwrap();
        (channel, bridge)
    }

    fn ping() -> InterfaceDef {
        InterfaceDef::new("Ping").function(CallType::FullSync, "ping", || "pong")
    }

    #[test]
    fn test_rejects_invalid_config() {
        let channel = Arc::new(RecordingChannel::default());
        let config = BridgeConfig::default().with_max_depth(0);
        assert!(matches!(
            Bridge::new(config, channel),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_init_publishes_interfaces() {
        let channel = Arc::new(RecordingChannel::default());
        let bridge = Bridge::new(BridgeConfig::default().with_bridge_name("App"), channel.clone())
            .unwrap()
            .with_bootstrap_loader(StaticBootstrap);
        bridge.add_interface(ping()).unwrap();
        assert!(channel.sent().is_empty());

        bridge.init().unwrap();
        assert!(bridge.is_initialized());
        assert_eq!(
            channel.sent(),
            vec![ScriptCommand::Initialize {
                bridge_name: "App".into(),
                bootstrap: Some("var bootstrap=true".into()),
                interfaces: bridge.interfaces(),
            }]
        );
    }

    #[test]
    fn test_bootstrap_failure() {
        let channel = Arc::new(RecordingChannel::default());
        let bridge = Bridge::new(BridgeConfig::default(), channel.clone())
            .unwrap()
            .with_bootstrap_loader(MissingBootstrap);
        assert!(matches!(bridge.init(), Err(BridgeError::Bootstrap(_))));
        assert!(!bridge.is_initialized());
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_add_interface_after_init_republishes() {
        let (channel, bridge) = bridge();
        bridge.init().unwrap();
        bridge.add_interface(ping()).unwrap();
        match channel.last() {
            Some(ScriptCommand::UpdateInterfaces { interfaces }) => {
                assert_eq!(interfaces.len(), 1);
                assert_eq!(interfaces[0].name, "Ping");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_through_endpoint() {
        let (_channel, bridge) = bridge();
        bridge.add_interface(ping()).unwrap();
        let endpoint: &dyn HostEndpoint = &bridge;
        let answer = endpoint.dispatch(r#"{"interfaceName":"Ping","functionName":"ping","arguments":[]}"#);
        let answer = Answer::from_json(&answer).unwrap();
        assert_eq!(answer.into_remote_result(), Ok(Some(serde_json::json!("pong"))));
    }

    #[test]
    fn test_after_initialize_listeners() {
        let (_channel, bridge) = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bridge.add_after_initialize_listener(|| panic!("listener failure"));
        bridge.add_after_initialize_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bridge.notify_ready();
        bridge.notify_ready();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_correlation() {
        let (_channel, bridge) = bridge();
        assert_eq!(
            bridge.complete_correlation(99, r#"{"hasError":false}"#),
            Err(BridgeError::NoSuchCorrelation(99))
        );
        assert_eq!(
            bridge.complete_correlation(99, "not json"),
            Err(BridgeError::NoSuchCorrelation(99))
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_channel, bridge) = bridge();
        bridge.close();
        bridge.close();
        assert_eq!(bridge.pending_correlations(), 0);
        assert_eq!(bridge.correlation_stats().total_registered, 0);
    }
}
