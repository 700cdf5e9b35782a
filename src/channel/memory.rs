//! In-process bus
//!
//! [`MemoryBus`] implements [`ChannelFactory`] and [`RemoteChannel`] over
//! plain maps so the model can be driven without a running daemon. Tests
//! script remote objects (properties, method replies, failures), emit
//! signals and then inspect the call log and live subscriptions.
//!
//! ## Example
//!
//! ```rust
//! use mconnect_core::channel::memory::MemoryBus;
//! use mconnect_core::channel::{ChannelFactory, DEVICE_INTERFACE};
//! use serde_json::json;
//!
//! let bus = MemoryBus::new();
//! bus.set_property("/dev/0", DEVICE_INTERFACE, "Name", json!("Pixel"));
//!
//! let channel = bus.open("/dev/0").unwrap();
//! assert_eq!(channel.get_property(DEVICE_INTERFACE, "Name").unwrap(), json!("Pixel"));
//! ```

use super::{
    ChannelFactory, InterfaceProperties, PropertiesChanged, RemoteChannel, Signal, SignalHandler,
    SubscriptionId,
};
use crate::error::{ModelError, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Scripted reply for a method
#[derive(Debug, Clone)]
enum MethodReply {
    Value(Value),
    Error(String),
}

/// A method call recorded by the bus
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Object path
    pub path: String,
    /// Interface name
    pub interface: String,
    /// Method name
    pub method: String,
    /// Arguments
    pub args: Vec<Value>,
}

#[derive(Default)]
struct RemoteObject {
    properties: InterfaceProperties,
    methods: HashMap<(String, String), MethodReply>,
}

struct Subscription {
    path: String,
    interface: String,
    member: String,
    handler: SignalHandler,
}

#[derive(Default)]
struct BusState {
    objects: HashMap<String, RemoteObject>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_subscription: u64,
    calls: Vec<MethodCall>,
    offline: bool,
}

impl BusState {
    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(ModelError::channel("bus is offline"));
        }
        Ok(())
    }

    fn object(&self, path: &str) -> Result<&RemoteObject> {
        self.objects
            .get(path)
            .ok_or_else(|| ModelError::channel(format!("No such object: {}", path)))
    }
}

/// Shared in-process bus; clones refer to the same bus
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one property, creating the object if needed
    pub fn set_property(&self, path: &str, interface: &str, name: &str, value: Value) {
        let mut state = self.state.lock();
        state
            .objects
            .entry(path.to_string())
            .or_default()
            .properties
            .entry(interface.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Set every entry of a JSON object as a property of `interface`
    pub fn set_properties(&self, path: &str, interface: &str, properties: Value) {
        if let Value::Object(map) = properties {
            for (name, value) in map {
                self.set_property(path, interface, &name, value);
            }
        }
    }

    /// Script a successful method reply
    pub fn reply(&self, path: &str, interface: &str, method: &str, value: Value) {
        self.script(path, interface, method, MethodReply::Value(value));
    }

    /// Script a failing method
    pub fn fail(&self, path: &str, interface: &str, method: &str, message: impl Into<String>) {
        self.script(path, interface, method, MethodReply::Error(message.into()));
    }

    fn script(&self, path: &str, interface: &str, method: &str, reply: MethodReply) {
        let mut state = self.state.lock();
        state
            .objects
            .entry(path.to_string())
            .or_default()
            .methods
            .insert((interface.to_string(), method.to_string()), reply);
    }

    /// Make every call fail as if the bus went away
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Every method call made so far
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls made to `method`
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    /// Live subscriptions on the whole bus
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Live subscriptions on one object
    pub fn subscription_count_for(&self, path: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.path == path)
            .count()
    }

    /// Deliver `signal` to every matching subscriber, returning how many ran
    pub fn emit(&self, path: &str, signal: &Signal) -> usize {
        let handlers: Vec<SignalHandler> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| {
                sub.path == path && sub.interface == signal.interface && sub.member == signal.member
            })
            .map(|sub| Arc::clone(&sub.handler))
            .collect();

        debug!(
            "Emitting {}.{} on {} to {} subscriber(s)",
            signal.interface,
            signal.member,
            path,
            handlers.len()
        );

        for handler in &handlers {
            handler(signal);
        }
        handlers.len()
    }

    /// Apply `change` to the stored properties, then emit it
    ///
    /// Mirrors the daemon: the new values are readable by the time
    /// subscribers see the notification.
    pub fn emit_properties_changed(&self, path: &str, change: &PropertiesChanged) -> usize {
        for (name, value) in &change.changed {
            self.set_property(path, &change.interface, name, value.clone());
        }
        self.emit(path, &change.to_signal())
    }
}

impl ChannelFactory for MemoryBus {
    fn open(&self, path: &str) -> Result<Arc<dyn RemoteChannel>> {
        self.state.lock().check_online()?;
        Ok(Arc::new(MemoryChannel {
            bus: self.clone(),
            path: path.to_string(),
        }))
    }
}

/// Channel to one object on a [`MemoryBus`]
pub struct MemoryChannel {
    bus: MemoryBus,
    path: String,
}

impl RemoteChannel for MemoryChannel {
    fn path(&self) -> &str {
        &self.path
    }

    fn get_property(&self, interface: &str, name: &str) -> Result<Value> {
        let state = self.bus.state.lock();
        state.check_online()?;
        state
            .object(&self.path)?
            .properties
            .get(interface)
            .and_then(|props| props.get(name))
            .cloned()
            .ok_or_else(|| {
                ModelError::channel(format!("No such property: {}.{}", interface, name))
            })
    }

    fn get_all(&self, interface: &str) -> Result<Map<String, Value>> {
        let state = self.bus.state.lock();
        state.check_online()?;
        Ok(state
            .object(&self.path)?
            .properties
            .get(interface)
            .cloned()
            .unwrap_or_default())
    }

    fn call(&self, interface: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut state = self.bus.state.lock();
        state.check_online()?;
        state.calls.push(MethodCall {
            path: self.path.clone(),
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        });

        let reply = state
            .object(&self.path)?
            .methods
            .get(&(interface.to_string(), method.to_string()))
            .cloned();

        match reply {
            Some(MethodReply::Value(value)) => Ok(value),
            Some(MethodReply::Error(message)) => Err(ModelError::channel(message)),
            None => Err(ModelError::channel(format!(
                "No such method: {}.{}",
                interface, method
            ))),
        }
    }

    fn subscribe(
        &self,
        interface: &str,
        member: &str,
        handler: SignalHandler,
    ) -> Result<SubscriptionId> {
        let mut state = self.bus.state.lock();
        state.check_online()?;
        state.next_subscription += 1;
        let id = SubscriptionId::new(state.next_subscription);
        state.subscriptions.insert(
            id,
            Subscription {
                path: self.path.clone(),
                interface: interface.to_string(),
                member: member.to_string(),
                handler,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.bus
            .state
            .lock()
            .subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ModelError::channel(format!("Unknown {}", id)))
    }
}

/// Bus binding that delivers a pending notification while unsubscribing
#[cfg(test)]
pub(crate) mod draining {
    use super::*;
    use crate::channel::DEVICE_INTERFACE;

    struct DrainingChannel {
        inner: Arc<dyn RemoteChannel>,
        bus: MemoryBus,
    }

    impl RemoteChannel for DrainingChannel {
        fn path(&self) -> &str {
            self.inner.path()
        }

        fn get_property(&self, interface: &str, name: &str) -> Result<Value> {
            self.inner.get_property(interface, name)
        }

        fn get_all(&self, interface: &str) -> Result<Map<String, Value>> {
            self.inner.get_all(interface)
        }

        fn call(&self, interface: &str, method: &str, args: Vec<Value>) -> Result<Value> {
            self.inner.call(interface, method, args)
        }

        fn subscribe(
            &self,
            interface: &str,
            member: &str,
            handler: SignalHandler,
        ) -> Result<SubscriptionId> {
            self.inner.subscribe(interface, member, handler)
        }

        fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
            // The handler reads back whatever Name currently holds
            let change = PropertiesChanged::new(DEVICE_INTERFACE).with_invalidated("Name");
            self.bus.emit(self.inner.path(), &change.to_signal());
            self.inner.unsubscribe(id)
        }
    }

    /// [`MemoryBus`] whose channels flush a `Name` change before unsubscribing
    pub(crate) struct DrainingBus(MemoryBus);

    impl DrainingBus {
        pub(crate) fn new(bus: MemoryBus) -> Self {
            Self(bus)
        }
    }

    impl ChannelFactory for DrainingBus {
        fn open(&self, path: &str) -> Result<Arc<dyn RemoteChannel>> {
            Ok(Arc::new(DrainingChannel {
                inner: self.0.open(path)?,
                bus: self.0.clone(),
            }))
        }
    }
}
