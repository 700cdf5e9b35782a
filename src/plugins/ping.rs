//! Ping Plugin
//!
//! Subscribes to the zero-argument `Ping` signal of the device's ping
//! interface and re-emits it as [`DeviceEvent::PingReceived`] on the owning
//! device.

use crate::channel::{PropertiesChanged, Signal, SubscriptionSet, PING_INTERFACE};
use crate::device::DeviceEvent;
use crate::error::Result;
use crate::plugins::{Capability, Plugin, PluginContext, PluginState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Ping signal name
pub const PING_SIGNAL: &str = "Ping";

/// Ping counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingStats {
    /// Pings received since the plugin was constructed
    pub pings_received: u64,
}

/// Ping plugin
pub struct PingPlugin {
    subscriptions: Option<SubscriptionSet>,
    pings_received: Arc<AtomicU64>,
}

impl PingPlugin {
    /// Create the plugin and subscribe to `Ping`
    pub fn new(ctx: &PluginContext) -> Result<Self> {
        debug!("PingPlugin::new({})", ctx.device_address());

        let pings_received = Arc::new(AtomicU64::new(0));
        let mut subscriptions = SubscriptionSet::new(ctx.open_channel()?);

        let events = ctx.events();
        let counter = Arc::clone(&pings_received);
        let address = ctx.device_address().to_string();
        subscriptions.subscribe(
            PING_INTERFACE,
            PING_SIGNAL,
            Arc::new(move |_: &Signal| {
                let total = counter.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Received ping from {} (total: {})", address, total);

                if let Some(events) = events.upgrade() {
                    events.emit(&DeviceEvent::PingReceived);
                }
            }),
        )?;

        Ok(Self {
            subscriptions: Some(subscriptions),
            pings_received,
        })
    }

    /// Number of pings received
    pub fn pings_received(&self) -> u64 {
        self.pings_received.load(Ordering::SeqCst)
    }
}

impl Plugin for PingPlugin {
    fn capability(&self) -> Capability {
        Capability::Ping
    }

    fn state(&self) -> PluginState {
        PluginState::Ping(PingStats {
            pings_received: self.pings_received(),
        })
    }

    fn properties_changed(&mut self, _change: &PropertiesChanged) -> Option<DeviceEvent> {
        // No mirrored properties
        None
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.as_ref().map_or(0, SubscriptionSet::len)
    }

    fn destroy(&mut self) {
        if let Some(mut subscriptions) = self.subscriptions.take() {
            let released = subscriptions.release_all();
            debug!(
                "Ping plugin for {} destroyed, released {} subscription(s) (received: {})",
                subscriptions.channel().path(),
                released,
                self.pings_received()
            );
        }
    }

    fn is_destroyed(&self) -> bool {
        self.subscriptions.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryBus;
    use crate::channel::BusContext;
    use crate::config::ModelConfig;
    use crate::events::EventEmitter;
    use parking_lot::Mutex;

    fn ping() -> Signal {
        Signal::new(PING_INTERFACE, PING_SIGNAL, vec![])
    }

    fn setup(bus: &MemoryBus) -> (Arc<EventEmitter<DeviceEvent>>, PingPlugin) {
        let emitter = Arc::new(EventEmitter::new());
        let ctx = PluginContext::new(
            BusContext::new(Arc::new(bus.clone()), ModelConfig::default()),
            "/dev/0",
            Arc::downgrade(&emitter),
        );
        let plugin = PingPlugin::new(&ctx).unwrap();
        (emitter, plugin)
    }

    #[test]
    fn test_ping_reemitted_on_device() {
        let bus = MemoryBus::new();
        let (emitter, plugin) = setup(&bus);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        emitter.connect(move |event: &DeviceEvent| sink.lock().push(event.clone()));

        bus.emit("/dev/0", &ping());
        bus.emit("/dev/0", &ping());

        assert_eq!(*seen.lock(), vec![DeviceEvent::PingReceived; 2]);
        assert_eq!(plugin.pings_received(), 2);
        assert_eq!(
            plugin.state(),
            PluginState::Ping(PingStats { pings_received: 2 })
        );
    }

    #[test]
    fn test_destroy_releases_subscription() {
        let bus = MemoryBus::new();
        let (_emitter, mut plugin) = setup(&bus);
        assert_eq!(plugin.subscription_count(), 1);
        assert_eq!(bus.subscription_count(), 1);

        plugin.destroy();
        assert!(plugin.is_destroyed());
        assert_eq!(plugin.subscription_count(), 0);
        assert_eq!(bus.subscription_count(), 0);

        // Stale signal reaches nobody
        assert_eq!(bus.emit("/dev/0", &ping()), 0);
        assert_eq!(plugin.pings_received(), 0);
    }

    #[test]
    fn test_ping_after_emitter_dropped() {
        let bus = MemoryBus::new();
        let (emitter, plugin) = setup(&bus);
        drop(emitter);

        bus.emit("/dev/0", &ping());
        assert_eq!(plugin.pings_received(), 1);
    }

    #[test]
    fn test_subscribe_failure_propagates() {
        let bus = MemoryBus::new();
        bus.set_offline(true);
        let emitter = Arc::new(EventEmitter::new());
        let ctx = PluginContext::new(
            BusContext::new(Arc::new(bus.clone()), ModelConfig::default()),
            "/dev/0",
            Arc::downgrade(&emitter),
        );

        assert!(PingPlugin::new(&ctx).is_err());
    }
}
