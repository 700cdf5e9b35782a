//! Plugin trait definition
//!
//! Defines the interface every capability wrapper implements.
//!
//! ## Plugin Architecture
//!
//! A plugin wraps one capability interface of a remote device object:
//! - mirrors the capability's properties
//! - subscribes to the capability's own signals
//! - re-emits capability events on its owning device
//!
//! The owning [`Device`](crate::device::Device) holds the plugin exclusively.
//! The plugin only keeps a weak handle to the device's event emitter, so a
//! late signal can never keep a torn-down device alive.
//!
//! ## Lifecycle
//!
//! 1. **Construction**: [`Capability::instantiate`](crate::plugins::Capability::instantiate)
//!    opens the plugin's channel, snapshots properties and subscribes
//! 2. **Operation**: the device forwards properties-changed notifications
//!    for the plugin's interface to [`Plugin::properties_changed`]
//! 3. **Destruction**: [`Plugin::destroy`] releases every subscription, then the channel

use crate::channel::{BusContext, PropertiesChanged, RemoteChannel};
use crate::device::DeviceEvent;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::plugins::battery::BatteryState;
use crate::plugins::ping::PingStats;
use crate::plugins::Capability;
use serde::Serialize;
use std::sync::{Arc, Weak};

/// Plugin trait for capability wrappers
///
/// Plugins must be `Send + Sync`: signal handlers may run on the channel's
/// dispatch thread.
pub trait Plugin: Send + Sync {
    /// Capability this plugin wraps
    fn capability(&self) -> Capability;

    /// Short name, matching the capability identifier without its prefix
    fn name(&self) -> &'static str {
        self.capability().as_str()
    }

    /// Current mirrored values
    fn state(&self) -> PluginState;

    /// Handle a properties-changed notification for this plugin's interface
    ///
    /// Returns the event the owning device should re-emit, if any.
    fn properties_changed(&mut self, change: &PropertiesChanged) -> Option<DeviceEvent>;

    /// Number of live signal subscriptions
    fn subscription_count(&self) -> usize;

    /// Release every subscription and the channel
    ///
    /// Calling it more than once is a no-op.
    fn destroy(&mut self);

    /// Whether [`destroy`](Self::destroy) has run
    fn is_destroyed(&self) -> bool;
}

/// Snapshot of a plugin's mirrored values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "plugin", rename_all = "lowercase")]
pub enum PluginState {
    /// Battery level and charging flag
    Battery(BatteryState),
    /// Ping counters
    Ping(PingStats),
}

/// Everything a plugin needs from its owning device
#[derive(Debug, Clone)]
pub struct PluginContext {
    bus: BusContext,
    device_address: String,
    events: Weak<EventEmitter<DeviceEvent>>,
}

impl PluginContext {
    /// Create a context for the device at `device_address`
    pub fn new(
        bus: BusContext,
        device_address: impl Into<String>,
        events: Weak<EventEmitter<DeviceEvent>>,
    ) -> Self {
        Self {
            bus,
            device_address: device_address.into(),
            events,
        }
    }

    /// Bus address of the owning device
    pub fn device_address(&self) -> &str {
        &self.device_address
    }

    /// Open a fresh channel to the device object
    pub fn open_channel(&self) -> Result<Arc<dyn RemoteChannel>> {
        self.bus.open(&self.device_address)
    }

    /// Non-owning handle to the device's event emitter
    pub fn events(&self) -> Weak<EventEmitter<DeviceEvent>> {
        self.events.clone()
    }
}
