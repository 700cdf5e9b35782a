//! Remote channel layer
//!
//! Abstraction over the session-bus connection to one remote object. The
//! model never touches the bus directly: it asks a [`ChannelFactory`] for a
//! [`RemoteChannel`] bound to an object path and then reads properties,
//! calls methods and subscribes to signals through it.
//!
//! Wire values are modelled as [`serde_json::Value`]; a bus binding maps
//! its variant type onto JSON the same way the daemon's JSON packets do.
//!
//! ## Components
//!
//! - [`RemoteChannel`] - property/method/signal access to one object
//! - [`ChannelFactory`] - opens channels by object path
//! - [`BusContext`] - factory plus configuration, handed to every constructor
//! - [`SubscriptionSet`] - tracks signal subscriptions so they can be released together
//! - [`PropertiesChanged`] - parsed `org.freedesktop.DBus.Properties.PropertiesChanged`
//! - [`memory::MemoryBus`] - in-process implementation used by tests

pub mod memory;
pub mod value;

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// DeviceManager interface
pub const MANAGER_INTERFACE: &str = "org.mconnect.DeviceManager";

/// Device interface
pub const DEVICE_INTERFACE: &str = "org.mconnect.Device";

/// Battery capability interface
pub const BATTERY_INTERFACE: &str = "org.mconnect.Device.Battery";

/// Ping capability interface
pub const PING_INTERFACE: &str = "org.mconnect.Device.Ping";

/// Standard properties interface
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Generic change notification emitted on [`PROPERTIES_INTERFACE`]
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Identifier of one signal subscription on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a channel-assigned id
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription#{}", self.0)
    }
}

/// A signal as delivered by the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Interface the signal belongs to
    pub interface: String,

    /// Signal name
    pub member: String,

    /// Positional arguments
    pub args: Vec<Value>,
}

impl Signal {
    /// Create a new signal
    pub fn new(interface: impl Into<String>, member: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }

    /// Check interface and member
    pub fn is(&self, interface: &str, member: &str) -> bool {
        self.interface == interface && self.member == member
    }
}

/// Callback invoked for every matching signal
pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Capability-typed access to one remote object
///
/// Calls are blocking; signal handlers run on the channel's dispatch thread
/// and must not assume anything about the subscriber still being alive.
pub trait RemoteChannel: Send + Sync {
    /// Object path this channel is bound to
    fn path(&self) -> &str;

    /// Read one property
    fn get_property(&self, interface: &str, name: &str) -> Result<Value>;

    /// Snapshot every property of `interface`
    fn get_all(&self, interface: &str) -> Result<Map<String, Value>>;

    /// Call a method and return its reply (`Value::Null` for no reply)
    fn call(&self, interface: &str, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Subscribe to `interface.member` signals on this object
    fn subscribe(&self, interface: &str, member: &str, handler: SignalHandler)
        -> Result<SubscriptionId>;

    /// Release a subscription; unknown ids are an error
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Opens channels to remote objects
pub trait ChannelFactory: Send + Sync {
    /// Open a channel bound to `path`
    fn open(&self, path: &str) -> Result<Arc<dyn RemoteChannel>>;
}

/// Explicit connection context passed into every constructor
#[derive(Clone)]
pub struct BusContext {
    factory: Arc<dyn ChannelFactory>,
    config: Arc<ModelConfig>,
}

impl BusContext {
    /// Create a context from a factory and configuration
    pub fn new(factory: Arc<dyn ChannelFactory>, config: ModelConfig) -> Self {
        Self {
            factory,
            config: Arc::new(config),
        }
    }

    /// Open a channel to `path`
    pub fn open(&self, path: &str) -> Result<Arc<dyn RemoteChannel>> {
        debug!("Opening channel to {}", path);
        self.factory.open(path)
    }

    /// Active configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl fmt::Debug for BusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Signal subscriptions opened on one channel
///
/// Every subscription is released by [`release_all`](Self::release_all) or,
/// failing that, when the set is dropped.
pub struct SubscriptionSet {
    channel: Arc<dyn RemoteChannel>,
    ids: Vec<SubscriptionId>,
}

impl SubscriptionSet {
    /// Create an empty set for `channel`
    pub fn new(channel: Arc<dyn RemoteChannel>) -> Self {
        Self {
            channel,
            ids: Vec::new(),
        }
    }

    /// Subscribe and track the resulting id
    pub fn subscribe(
        &mut self,
        interface: &str,
        member: &str,
        handler: SignalHandler,
    ) -> Result<SubscriptionId> {
        let id = self.channel.subscribe(interface, member, handler)?;
        debug!(
            "Subscribed to {}.{} on {} ({})",
            interface,
            member,
            self.channel.path(),
            id
        );
        self.ids.push(id);
        Ok(id)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no subscription is live
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Channel the subscriptions live on
    pub fn channel(&self) -> &Arc<dyn RemoteChannel> {
        &self.channel
    }

    /// Release every tracked subscription, returning how many were released
    ///
    /// Failures are logged; the id is forgotten either way.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for id in self.ids.drain(..) {
            match self.channel.unsubscribe(id) {
                Ok(()) => released += 1,
                Err(e) => warn!(
                    "Failed to release {} on {}: {}",
                    id,
                    self.channel.path(),
                    e
                ),
            }
        }
        released
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            self.release_all();
        }
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("path", &self.channel.path())
            .field("ids", &self.ids)
            .finish()
    }
}

/// Parsed properties-changed notification
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertiesChanged {
    /// Interface whose properties changed
    pub interface: String,

    /// Changed properties with their new values
    pub changed: Map<String, Value>,

    /// Properties whose value must be re-read
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    /// Create a notification for `interface`
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Builder: Add a changed property
    pub fn with_changed(mut self, name: impl Into<String>, value: Value) -> Self {
        self.changed.insert(name.into(), value);
        self
    }

    /// Builder: Add an invalidated property
    pub fn with_invalidated(mut self, name: impl Into<String>) -> Self {
        self.invalidated.push(name.into());
        self
    }

    /// Parse `PropertiesChanged(s interface, a{sv} changed, as invalidated)`
    pub fn from_signal(signal: &Signal) -> Result<Self> {
        if !signal.is(PROPERTIES_INTERFACE, PROPERTIES_CHANGED) {
            return Err(ModelError::invalid_signal(format!(
                "expected {}.{}, got {}.{}",
                PROPERTIES_INTERFACE, PROPERTIES_CHANGED, signal.interface, signal.member
            )));
        }

        let interface = signal
            .args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::invalid_signal("missing interface name"))?
            .to_string();

        let changed = match signal.args.get(1) {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(ModelError::invalid_signal(format!(
                    "changed properties must be a map, got {}",
                    other
                )))
            }
        };

        let invalidated = match signal.args.get(2) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            interface,
            changed,
            invalidated,
        })
    }

    /// Encode back into a bus signal
    pub fn to_signal(&self) -> Signal {
        Signal::new(
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED,
            vec![
                Value::String(self.interface.clone()),
                Value::Object(self.changed.clone()),
                Value::Array(
                    self.invalidated
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            ],
        )
    }

    /// Whether `property` was changed or invalidated
    pub fn touches(&self, property: &str) -> bool {
        self.changed.contains_key(property) || self.invalidated.iter().any(|p| p == property)
    }

    /// Names of every changed or invalidated property
    pub fn property_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.changed.keys().map(String::as_str).collect();
        for name in &self.invalidated {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// Group property snapshots by interface, for channels backed by plain maps
pub(crate) type InterfaceProperties = HashMap<String, Map<String, Value>>;
