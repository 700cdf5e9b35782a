//! Device model
//!
//! Local mirror of one remote `org.mconnect.Device` object.
//!
//! ## Lifecycle
//!
//! 1. [`Device::new`] opens a channel to the device's bus address and
//!    snapshots every device property once
//! 2. It subscribes to the object's generic properties-changed signal
//! 3. It derives its plugin set from `OutgoingCapabilities`
//! 4. Change notifications update the mirror and re-emit typed
//!    [`DeviceEvent`]s; a change to either capability list re-derives the
//!    plugin set
//! 5. [`Device::destroy`] (or drop) destroys every plugin, releases the
//!    subscription and channel, then detaches all observers
//!
//! Mirrored fields are only refreshed by a change notification that names
//! them, and always from a fresh read of the remote property.

use crate::channel::value::{
    bool_or_default, string_list_or_default, string_or_default, u32_or_default,
};
use crate::channel::{
    BusContext, PropertiesChanged, RemoteChannel, Signal, SubscriptionSet, DEVICE_INTERFACE,
    PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
};
use crate::error::Result;
use crate::events::{EventEmitter, HandlerId};
use crate::plugins::battery::BatteryState;
use crate::plugins::{Capability, Plugin, PluginContext, PluginState};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Device interface properties, in the order change notifications are applied
pub const DEVICE_PROPERTIES: [&str; 10] = [
    "Id",
    "Name",
    "DeviceType",
    "ProtocolVersion",
    "Address",
    "IsPaired",
    "Allowed",
    "IsActive",
    "IncomingCapabilities",
    "OutgoingCapabilities",
];

/// Events emitted by a [`Device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Display name changed
    NameChanged(String),
    /// Trust (`Allowed`) changed
    TrustedChanged(bool),
    /// Active state changed
    ActiveChanged(bool),
    /// Battery plugin reported new values
    BatteryChanged {
        /// Charge level (0-100)
        level: u32,
        /// Whether the device is charging
        charging: bool,
    },
    /// Plugin set was rebuilt
    PluginsChanged,
    /// Ping signal received
    PingReceived,
}

/// Snapshot of a device's mirrored properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Remote device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Device type ("phone", "tablet", ...)
    pub device_type: String,
    /// Protocol version reported by the device
    pub protocol_version: u32,
    /// Network address the daemon reaches the device at
    pub network_address: String,
    /// Whether the device is paired
    pub is_paired: bool,
    /// Whether the device is allowed to communicate
    pub is_trusted: bool,
    /// Paired, trusted and connected
    pub is_active: bool,
    /// Capabilities the device accepts
    pub incoming_capabilities: Vec<String>,
    /// Capabilities the device provides
    pub outgoing_capabilities: Vec<String>,
}

/// Outcome of applying one re-read property
enum FieldUpdate {
    Event(DeviceEvent),
    Capabilities,
    Silent,
}

impl DeviceInfo {
    /// Build from a `GetAll` snapshot of the device interface
    pub fn from_properties(props: &Map<String, Value>) -> Self {
        let mut info = Self::default();
        for property in DEVICE_PROPERTIES {
            info.apply(property, props.get(property));
        }
        info
    }

    fn apply(&mut self, property: &str, value: Option<&Value>) -> FieldUpdate {
        match property {
            "Id" => self.id = string_or_default(property, value),
            "Name" => {
                self.name = string_or_default(property, value);
                return FieldUpdate::Event(DeviceEvent::NameChanged(self.name.clone()));
            }
            "DeviceType" => self.device_type = string_or_default(property, value),
            "ProtocolVersion" => self.protocol_version = u32_or_default(property, value),
            "Address" => self.network_address = string_or_default(property, value),
            "IsPaired" => self.is_paired = bool_or_default(property, value),
            "Allowed" => {
                self.is_trusted = bool_or_default(property, value);
                return FieldUpdate::Event(DeviceEvent::TrustedChanged(self.is_trusted));
            }
            "IsActive" => {
                self.is_active = bool_or_default(property, value);
                return FieldUpdate::Event(DeviceEvent::ActiveChanged(self.is_active));
            }
            "IncomingCapabilities" => {
                self.incoming_capabilities = string_list_or_default(property, value);
                return FieldUpdate::Capabilities;
            }
            "OutgoingCapabilities" => {
                self.outgoing_capabilities = string_list_or_default(property, value);
                return FieldUpdate::Capabilities;
            }
            _ => {}
        }
        FieldUpdate::Silent
    }
}

struct DeviceState {
    channel: Option<Arc<dyn RemoteChannel>>,
    subscriptions: Option<SubscriptionSet>,
    info: DeviceInfo,
    plugins: HashMap<Capability, Box<dyn Plugin>>,
    destroyed: bool,
}

struct DeviceShared {
    address: String,
    bus: BusContext,
    events: Arc<EventEmitter<DeviceEvent>>,
    state: Mutex<DeviceState>,
}

impl DeviceShared {
    fn on_signal(&self, signal: &Signal) {
        match PropertiesChanged::from_signal(signal) {
            Ok(change) => self.handle_properties_changed(&change),
            Err(e) => warn!("Ignoring notification on {}: {}", self.address, e),
        }
    }

    fn handle_properties_changed(&self, change: &PropertiesChanged) {
        let mut events = Vec::new();
        let mut capabilities_changed = false;

        {
            let mut state = self.state.lock();
            if state.destroyed {
                debug!("Notification for destroyed device {} dropped", self.address);
                return;
            }

            if change.interface == DEVICE_INTERFACE {
                let Some(channel) = state.channel.clone() else {
                    return;
                };

                for property in DEVICE_PROPERTIES {
                    if !change.touches(property) {
                        continue;
                    }

                    let value = match channel.get_property(DEVICE_INTERFACE, property) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(
                                "Failed to re-read {} on {}, keeping stale value: {}",
                                property, self.address, e
                            );
                            continue;
                        }
                    };

                    match state.info.apply(property, Some(&value)) {
                        FieldUpdate::Event(event) => events.push(event),
                        FieldUpdate::Capabilities => capabilities_changed = true,
                        FieldUpdate::Silent => {}
                    }
                }
            } else if let Some(capability) = Capability::from_interface(&change.interface) {
                match state.plugins.get_mut(&capability) {
                    Some(plugin) => events.extend(plugin.properties_changed(change)),
                    None => debug!(
                        "No {} plugin on {}, ignoring change",
                        capability, self.address
                    ),
                }
            } else {
                debug!(
                    "Ignoring change on unknown interface {} for {}",
                    change.interface, self.address
                );
            }
        }

        for event in &events {
            self.events.emit(event);
        }

        if capabilities_changed {
            if let Err(e) = self.derive_capabilities() {
                warn!("Failed to re-derive plugins for {}: {}", self.address, e);
            }
        }
    }

    fn derive_capabilities(&self) -> Result<()> {
        debug!("Deriving plugins for {}", self.address);

        let ctx = PluginContext::new(
            self.bus.clone(),
            self.address.clone(),
            Arc::downgrade(&self.events),
        );

        // Old plugins leave the map before any of them is torn down, so two
        // plugin sets never coexist
        let (old, outgoing) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Ok(());
            }
            let old: Vec<_> = state.plugins.drain().collect();
            (old, state.info.outgoing_capabilities.clone())
        };
        destroy_plugins(&self.address, old);

        let plugins = match self.build_plugins(&ctx, &outgoing) {
            Ok(plugins) => plugins,
            Err(e) => {
                self.events.emit(&DeviceEvent::PluginsChanged);
                return Err(e);
            }
        };

        info!(
            "Device {} has {} plugin(s) from {} capability(ies)",
            self.address,
            plugins.len(),
            outgoing.len()
        );

        let stale = {
            let mut state = self.state.lock();
            if state.destroyed {
                plugins
            } else {
                std::mem::replace(&mut state.plugins, plugins)
            }
        };
        destroy_plugins(&self.address, stale);

        self.events.emit(&DeviceEvent::PluginsChanged);
        Ok(())
    }

    /// Instantiate one plugin per recognized capability; a later duplicate
    /// replaces (and destroys) an earlier one
    fn build_plugins(
        &self,
        ctx: &PluginContext,
        outgoing: &[String],
    ) -> Result<HashMap<Capability, Box<dyn Plugin>>> {
        let config = self.bus.config();
        let mut plugins: HashMap<Capability, Box<dyn Plugin>> = HashMap::new();

        for identifier in outgoing {
            let Some(short_name) = config.short_capability_name(identifier) else {
                debug!(
                    "Skipping '{}' outside prefix '{}'",
                    identifier, config.capability_prefix
                );
                continue;
            };

            let Some(capability) = Capability::from_short_name(short_name) else {
                debug!("No plugin for capability '{}'", short_name);
                continue;
            };

            match capability.instantiate(ctx) {
                Ok(plugin) => {
                    if let Some(mut replaced) = plugins.insert(capability, plugin) {
                        debug!("Duplicate capability '{}', last one wins", capability);
                        replaced.destroy();
                    }
                }
                Err(e) => {
                    for (_, mut plugin) in plugins.drain() {
                        plugin.destroy();
                    }
                    return Err(e);
                }
            }
        }

        Ok(plugins)
    }
}

/// Destroy detached plugins; callers must not hold the device state lock
fn destroy_plugins(
    address: &str,
    plugins: impl IntoIterator<Item = (Capability, Box<dyn Plugin>)>,
) {
    for (capability, mut plugin) in plugins {
        debug!("Destroying {} plugin on {}", capability, address);
        plugin.destroy();
    }
}

/// Mirror of one remote device
///
/// Owns its plugins exclusively. Dropping the device destroys it.
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Connect to the device at `address`, snapshot it and build its plugins
    ///
    /// # Errors
    ///
    /// - `ModelError::Channel` - the channel could not be opened, the
    ///   snapshot failed, or a plugin could not subscribe
    pub fn new(bus: &BusContext, address: &str) -> Result<Self> {
        debug!("Device::new({})", address);

        let channel = bus.open(address)?;
        let info = DeviceInfo::from_properties(&channel.get_all(DEVICE_INTERFACE)?);

        let shared = Arc::new(DeviceShared {
            address: address.to_string(),
            bus: bus.clone(),
            events: Arc::new(EventEmitter::new()),
            state: Mutex::new(DeviceState {
                channel: Some(Arc::clone(&channel)),
                subscriptions: None,
                info,
                plugins: HashMap::new(),
                destroyed: false,
            }),
        });

        let mut subscriptions = SubscriptionSet::new(channel);
        let weak = Arc::downgrade(&shared);
        subscriptions.subscribe(
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED,
            Arc::new(move |signal: &Signal| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_signal(signal);
                }
            }),
        )?;
        shared.state.lock().subscriptions = Some(subscriptions);

        let device = Device { shared };
        device.shared.derive_capabilities()?;

        info!("Device {} ready ({})", device.address(), device.name());
        Ok(device)
    }

    /// Bus address; stable for the device's lifetime
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Snapshot of every mirrored property
    pub fn info(&self) -> DeviceInfo {
        self.shared.state.lock().info.clone()
    }

    /// Display name
    pub fn name(&self) -> String {
        self.shared.state.lock().info.name.clone()
    }

    /// Whether the device is paired
    pub fn is_paired(&self) -> bool {
        self.shared.state.lock().info.is_paired
    }

    /// Whether the device is trusted (`Allowed`)
    pub fn is_trusted(&self) -> bool {
        self.shared.state.lock().info.is_trusted
    }

    /// Whether the device is paired, trusted and connected
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().info.is_active
    }

    /// Outgoing capability identifiers as last read
    pub fn outgoing_capabilities(&self) -> Vec<String> {
        self.shared.state.lock().info.outgoing_capabilities.clone()
    }

    /// Names of the active plugins, sorted
    ///
    /// Names are the lowercase [`Capability::as_str`] forms whatever the
    /// case the device advertised (`x.y.Battery` yields `"battery"`).
    /// [`has_plugin`](Self::has_plugin) and
    /// [`plugin_state`](Self::plugin_state) accept either case.
    pub fn plugin_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .shared
            .state
            .lock()
            .plugins
            .keys()
            .map(Capability::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of active plugins
    pub fn plugin_count(&self) -> usize {
        self.shared.state.lock().plugins.len()
    }

    /// Check if a plugin is active
    pub fn has_plugin(&self, name: &str) -> bool {
        Capability::from_short_name(name)
            .map_or(false, |cap| self.shared.state.lock().plugins.contains_key(&cap))
    }

    /// Mirrored values of one plugin
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        let capability = Capability::from_short_name(name)?;
        self.shared
            .state
            .lock()
            .plugins
            .get(&capability)
            .map(|plugin| plugin.state())
    }

    /// Battery state, if the battery plugin is active
    pub fn battery(&self) -> Option<BatteryState> {
        match self.plugin_state(Capability::Battery.as_str())? {
            PluginState::Battery(state) => Some(state),
            _ => None,
        }
    }

    /// Live signal subscriptions held by the device and its plugins
    pub fn subscription_count(&self) -> usize {
        let state = self.shared.state.lock();
        let own = state.subscriptions.as_ref().map_or(0, SubscriptionSet::len);
        own + state
            .plugins
            .values()
            .map(|plugin| plugin.subscription_count())
            .sum::<usize>()
    }

    /// Register an observer
    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.shared.events.connect(handler)
    }

    /// Remove an observer
    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.shared.events.disconnect(id)
    }

    /// Receive events through a channel; closes when the device is destroyed
    pub fn subscribe(&self) -> (HandlerId, mpsc::UnboundedReceiver<DeviceEvent>) {
        self.shared.events.subscribe_channel()
    }

    /// Number of connected observers
    pub fn observer_count(&self) -> usize {
        self.shared.events.observer_count()
    }

    /// Rebuild the plugin set from the current outgoing capabilities
    ///
    /// Every existing plugin is destroyed first. Emits
    /// [`DeviceEvent::PluginsChanged`]. No-op once destroyed.
    pub fn derive_capabilities(&self) -> Result<()> {
        self.shared.derive_capabilities()
    }

    /// Destroy plugins, release the subscription and channel, detach observers
    ///
    /// Later calls are no-ops.
    pub fn destroy(&self) {
        let (plugins, subscriptions) = {
            let mut state = self.shared.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.channel = None;
            let plugins: Vec<_> = state.plugins.drain().collect();
            (plugins, state.subscriptions.take())
        };

        // A bus binding may run pending handlers while unsubscribing, and
        // those handlers take the state lock
        destroy_plugins(&self.shared.address, plugins);
        if let Some(mut subscriptions) = subscriptions {
            subscriptions.release_all();
        }

        self.shared.events.disconnect_all();
        info!("Device {} destroyed", self.shared.address);
    }

    /// Whether [`destroy`](Self::destroy) has run
    pub fn is_destroyed(&self) -> bool {
        self.shared.state.lock().destroyed
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Device")
            .field("address", &self.shared.address)
            .field("info", &state.info)
            .field("plugins", &state.plugins.keys().collect::<Vec<_>>())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
