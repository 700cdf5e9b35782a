//! Device Manager
//!
//! Registry of every device the daemon knows about, keyed by bus address.
//!
//! ## Responsibilities
//!
//! - Initial enumeration through `ListDevices`
//! - Device registration and removal, with cascading teardown
//! - Trust operations, delegated to the daemon
//! - [`ManagerEvent`] emission on membership changes
//!
//! Trust changes are never applied locally: the device mirror picks them up
//! from the daemon's next properties-changed notification.
//!
//! ## Example
//!
//! ```rust
//! use mconnect_core::channel::memory::MemoryBus;
//! use mconnect_core::channel::{BusContext, MANAGER_INTERFACE};
//! use mconnect_core::config::{ModelConfig, DEFAULT_MANAGER_PATH};
//! use mconnect_core::manager::{DeviceManager, ManagerEvent};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let bus = MemoryBus::new();
//! bus.reply(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "ListDevices", json!([]));
//!
//! let context = BusContext::new(Arc::new(bus), ModelConfig::default());
//! let manager = DeviceManager::builder(&context)
//!     .on_event(|event: &ManagerEvent| println!("{:?}", event))
//!     .build()
//!     .unwrap();
//!
//! assert!(manager.is_empty());
//! ```

use crate::channel::value::string_list;
use crate::channel::{BusContext, RemoteChannel, MANAGER_INTERFACE};
use crate::device::Device;
use crate::error::{ModelError, Result};
use crate::events::{EventEmitter, HandlerId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted by the [`DeviceManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A device was registered
    DeviceAdded {
        /// Bus address of the device
        address: String,
    },
    /// A device was destroyed and unregistered
    DeviceRemoved {
        /// Bus address of the device
        address: String,
    },
}

impl ManagerEvent {
    /// Address the event refers to
    pub fn address(&self) -> &str {
        match self {
            ManagerEvent::DeviceAdded { address } | ManagerEvent::DeviceRemoved { address } => {
                address
            }
        }
    }
}

/// Outcome of an operation that may be intentionally unimplemented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The operation ran
    Completed,
    /// The operation is recognized but has no effect yet
    NotImplemented,
}

/// Builder for [`DeviceManager`]
///
/// Observers registered here see the `DeviceAdded` events of the initial
/// enumeration.
pub struct ManagerBuilder {
    bus: BusContext,
    events: EventEmitter<ManagerEvent>,
}

impl ManagerBuilder {
    /// Start building a manager on `bus`
    pub fn new(bus: &BusContext) -> Self {
        Self {
            bus: bus.clone(),
            events: EventEmitter::new(),
        }
    }

    /// Builder: Register an observer before enumeration
    pub fn on_event<F>(self, handler: F) -> Self
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.events.connect(handler);
        self
    }

    /// Connect to the manager object and register every listed device
    ///
    /// # Errors
    ///
    /// Fails as a whole if the manager object cannot be reached, the listing
    /// fails, or any single device cannot be constructed. Devices created
    /// before the failure are destroyed.
    pub fn build(self) -> Result<DeviceManager> {
        let manager_path = self.bus.config().manager_path.clone();
        info!("Creating DeviceManager on {}", manager_path);

        let channel = self.bus.open(&manager_path)?;
        let manager = DeviceManager {
            bus: self.bus,
            channel: Mutex::new(Some(channel)),
            devices: Mutex::new(HashMap::new()),
            events: self.events,
        };

        if let Err(e) = manager.populate() {
            warn!("DeviceManager construction failed: {}", e);
            // Partial managers are never observable
            manager.events.disconnect_all();
            return Err(e);
        }

        info!("DeviceManager ready with {} device(s)", manager.len());
        Ok(manager)
    }
}

/// Registry of remote devices
pub struct DeviceManager {
    bus: BusContext,
    channel: Mutex<Option<Arc<dyn RemoteChannel>>>,
    devices: Mutex<HashMap<String, Arc<Device>>>,
    events: EventEmitter<ManagerEvent>,
}

impl DeviceManager {
    /// Create a manager with no observers attached yet
    pub fn new(bus: &BusContext) -> Result<Self> {
        ManagerBuilder::new(bus).build()
    }

    /// Start a [`ManagerBuilder`]
    pub fn builder(bus: &BusContext) -> ManagerBuilder {
        ManagerBuilder::new(bus)
    }

    fn populate(&self) -> Result<()> {
        for address in self.list_devices()? {
            self.add_device(&address)?;
        }
        Ok(())
    }

    fn channel(&self) -> Result<Arc<dyn RemoteChannel>> {
        self.channel
            .lock()
            .clone()
            .ok_or_else(|| ModelError::channel("device manager has been destroyed"))
    }

    /// Addresses of every device the daemon knows, unfiltered
    pub fn list_devices(&self) -> Result<Vec<String>> {
        let reply = self
            .channel()?
            .call(MANAGER_INTERFACE, "ListDevices", Vec::new())?;
        let addresses = string_list("ListDevices reply", &reply)?;
        debug!("ListDevices returned {} address(es)", addresses.len());
        Ok(addresses)
    }

    /// Ask the daemon to allow the device at `address`
    ///
    /// Local state is left alone; `Device::is_trusted` follows once the
    /// daemon reports the change.
    pub fn trust(&self, address: &str) -> Result<()> {
        info!("Trusting device {}", address);
        self.channel()?
            .call(MANAGER_INTERFACE, "AllowDevice", vec![json!(address)])?;
        Ok(())
    }

    /// Revoke trust; not implemented by the daemon
    ///
    /// Issues no remote call and changes nothing.
    pub fn untrust(&self, address: &str) -> OperationStatus {
        warn!(
            "{}",
            ModelError::unsupported(format!("untrust({}) is not implemented", address))
        );
        OperationStatus::NotImplemented
    }

    /// Construct and register the device at `address`
    ///
    /// Registering an address that is already known is a no-op.
    pub fn add_device(&self, address: &str) -> Result<()> {
        if self.devices.lock().contains_key(address) {
            debug!("Device {} already registered", address);
            return Ok(());
        }

        let device = Arc::new(Device::new(&self.bus, address)?);
        self.devices.lock().insert(address.to_string(), device);

        info!("Device added: {}", address);
        self.events.emit(&ManagerEvent::DeviceAdded {
            address: address.to_string(),
        });
        Ok(())
    }

    /// Destroy and unregister the device at `address`
    ///
    /// # Errors
    ///
    /// - `ModelError::DeviceNotFound` - the address is not registered
    pub fn remove_device(&self, address: &str) -> Result<()> {
        let device = self
            .device(address)
            .ok_or_else(|| ModelError::DeviceNotFound(address.to_string()))?;

        // Destroyed before the entry goes away, without holding the registry
        device.destroy();
        self.devices.lock().remove(address);

        info!("Device removed: {}", address);
        self.events.emit(&ManagerEvent::DeviceRemoved {
            address: address.to_string(),
        });
        Ok(())
    }

    /// Look up a device
    pub fn device(&self, address: &str) -> Option<Arc<Device>> {
        self.devices.lock().get(address).cloned()
    }

    /// Every registered device, ordered by address
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self.devices.lock().values().cloned().collect();
        devices.sort_by(|a, b| a.address().cmp(b.address()));
        devices
    }

    /// Every registered address, sorted
    pub fn device_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.devices.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Whether no device is registered
    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Register an observer
    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.events.connect(handler)
    }

    /// Remove an observer
    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.events.disconnect(id)
    }

    /// Receive events through a channel; closes when the manager is destroyed
    pub fn subscribe(&self) -> (HandlerId, mpsc::UnboundedReceiver<ManagerEvent>) {
        self.events.subscribe_channel()
    }

    /// Name the daemon announces for this machine: `user@hostname`
    pub fn local_name() -> String {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        format!("{}@{}", user, host)
    }

    /// Remove every device, then release the manager channel
    ///
    /// Later calls are no-ops. Operations that need the daemon fail once
    /// the manager is destroyed.
    pub fn destroy(&self) {
        if self.channel.lock().is_none() {
            return;
        }

        for address in self.device_addresses() {
            if let Err(e) = self.remove_device(&address) {
                warn!("Failed to remove {} during teardown: {}", address, e);
            }
        }

        self.channel.lock().take();
        self.events.disconnect_all();
        info!("DeviceManager destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has run
    pub fn is_destroyed(&self) -> bool {
        self.channel.lock().is_none()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.device_addresses())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::draining::DrainingBus;
    use crate::channel::memory::MemoryBus;
    use crate::channel::{PropertiesChanged, DEVICE_INTERFACE};
    use crate::config::{ModelConfig, DEFAULT_MANAGER_PATH};
    use crate::device::DeviceEvent;
    use serde_json::Value;

    fn seed_device(bus: &MemoryBus, path: &str, outgoing: Value) {
        bus.set_properties(
            path,
            DEVICE_INTERFACE,
            json!({
                "Name": format!("device {}", path),
                "Allowed": false,
                "OutgoingCapabilities": outgoing,
            }),
        );
    }

    fn setup(paths: &[&str]) -> (MemoryBus, BusContext) {
        let bus = MemoryBus::new();
        bus.reply(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "ListDevices", json!(paths));
        bus.reply(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "AllowDevice", Value::Null);
        for path in paths {
            seed_device(&bus, path, json!(["kdeconnect.ping"]));
        }
        let context = BusContext::new(Arc::new(bus.clone()), ModelConfig::default());
        (bus, context)
    }

    fn recorded(builder: ManagerBuilder) -> (Arc<Mutex<Vec<ManagerEvent>>>, Result<DeviceManager>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let result = builder
            .on_event(move |event: &ManagerEvent| sink.lock().push(event.clone()))
            .build();
        (events, result)
    }

    #[test]
    fn test_construction_registers_listed_devices() {
        let (_bus, context) = setup(&["/dev/0", "/dev/1"]);
        let (events, manager) = recorded(DeviceManager::builder(&context));
        let manager = manager.unwrap();

        assert_eq!(manager.device_addresses(), vec!["/dev/0", "/dev/1"]);
        assert_eq!(events.lock().len(), 2);
        for device in manager.devices() {
            assert!(device.has_plugin("ping"));
        }
    }

    #[test]
    fn test_duplicate_listing_registers_once() {
        let (_bus, context) = setup(&["/dev/0", "/dev/0"]);
        let (events, manager) = recorded(DeviceManager::builder(&context));
        let manager = manager.unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(
            *events.lock(),
            vec![ManagerEvent::DeviceAdded {
                address: "/dev/0".to_string()
            }]
        );
    }

    #[test]
    fn test_listing_failure_fails_construction() {
        let bus = MemoryBus::new();
        bus.fail(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "ListDevices", "no daemon");
        let context = BusContext::new(Arc::new(bus), ModelConfig::default());

        assert!(matches!(
            DeviceManager::new(&context),
            Err(ModelError::Channel(_))
        ));
    }

    #[test]
    fn test_malformed_listing_fails_construction() {
        let bus = MemoryBus::new();
        bus.reply(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "ListDevices", json!("/dev/0"));
        let context = BusContext::new(Arc::new(bus), ModelConfig::default());

        assert!(DeviceManager::new(&context).is_err());
    }

    #[test]
    fn test_one_bad_device_fails_construction() {
        let (bus, context) = setup(&["/dev/0"]);
        bus.reply(
            DEFAULT_MANAGER_PATH,
            MANAGER_INTERFACE,
            "ListDevices",
            json!(["/dev/0", "/dev/missing"]),
        );

        let (events, manager) = recorded(DeviceManager::builder(&context));
        assert!(manager.is_err());
        // /dev/0 was built and then torn down with the manager
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_trust_delegates_without_local_change() {
        let (bus, context) = setup(&["/dev/0"]);
        let manager = DeviceManager::new(&context).unwrap();

        manager.trust("/dev/0").unwrap();

        let calls = bus.calls();
        let allow = calls.iter().find(|c| c.method == "AllowDevice").unwrap();
        assert_eq!(allow.path, DEFAULT_MANAGER_PATH);
        assert_eq!(allow.args, vec![json!("/dev/0")]);
        assert!(!manager.device("/dev/0").unwrap().is_trusted());
    }

    #[test]
    fn test_trust_then_notification_updates_mirror() {
        let (bus, context) = setup(&["/dev/0"]);
        let manager = DeviceManager::new(&context).unwrap();
        let device = manager.device("/dev/0").unwrap();

        let trusted = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&trusted);
        device.connect(move |event| {
            if let DeviceEvent::TrustedChanged(value) = event {
                *slot.lock() = Some(*value);
            }
        });

        manager.trust("/dev/0").unwrap();
        bus.emit_properties_changed(
            "/dev/0",
            &PropertiesChanged::new(DEVICE_INTERFACE).with_changed("Allowed", json!(true)),
        );

        assert_eq!(*trusted.lock(), Some(true));
        assert!(device.is_trusted());
    }

    #[test]
    fn test_trust_failure_surfaces() {
        let (bus, context) = setup(&["/dev/0"]);
        bus.fail(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "AllowDevice", "denied");
        let manager = DeviceManager::new(&context).unwrap();

        assert!(matches!(manager.trust("/dev/0"), Err(ModelError::Channel(_))));
    }

    #[test]
    fn test_untrust_is_a_no_op() {
        let (bus, context) = setup(&["/dev/0"]);
        let manager = DeviceManager::new(&context).unwrap();
        let calls_before = bus.calls().len();

        assert_eq!(manager.untrust("/dev/0"), OperationStatus::NotImplemented);
        assert_eq!(manager.untrust("/unknown"), OperationStatus::NotImplemented);

        assert_eq!(bus.calls().len(), calls_before);
        assert!(!manager.device("/dev/0").unwrap().is_trusted());
    }

    #[test]
    fn test_add_and_remove_device() {
        let (bus, context) = setup(&[]);
        let manager = DeviceManager::new(&context).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.connect(move |event| sink.lock().push(event.clone()));

        seed_device(&bus, "/dev/7", json!(["kdeconnect.ping"]));
        manager.add_device("/dev/7").unwrap();
        let device = manager.device("/dev/7").unwrap();
        assert_eq!(device.address(), "/dev/7");

        manager.remove_device("/dev/7").unwrap();
        assert!(device.is_destroyed());
        assert!(manager.device("/dev/7").is_none());
        assert_eq!(bus.subscription_count(), 0);

        assert_eq!(
            *events.lock(),
            vec![
                ManagerEvent::DeviceAdded {
                    address: "/dev/7".to_string()
                },
                ManagerEvent::DeviceRemoved {
                    address: "/dev/7".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_remove_device_with_draining_channel() {
        let (bus, _context) = setup(&["/dev/0"]);
        let context = BusContext::new(
            Arc::new(DrainingBus::new(bus.clone())),
            ModelConfig::default(),
        );
        let manager = DeviceManager::new(&context).unwrap();
        let device = manager.device("/dev/0").unwrap();

        manager.remove_device("/dev/0").unwrap();

        assert!(device.is_destroyed());
        assert!(manager.is_empty());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_remove_unknown_device() {
        let (_bus, context) = setup(&[]);
        let manager = DeviceManager::new(&context).unwrap();

        assert!(matches!(
            manager.remove_device("/dev/9"),
            Err(ModelError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_destroy_cascades() {
        let (bus, context) = setup(&["/dev/0", "/dev/1"]);
        let manager = DeviceManager::new(&context).unwrap();
        let devices = manager.devices();

        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        manager.connect(move |event| sink.lock().push(event.address().to_string()));

        manager.destroy();

        assert!(manager.is_destroyed());
        assert!(manager.is_empty());
        assert!(devices.iter().all(|d| d.is_destroyed()));
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(*removed.lock(), vec!["/dev/0", "/dev/1"]);

        manager.destroy();
        assert!(manager.list_devices().is_err());
        assert!(manager.trust("/dev/0").is_err());
    }

    #[test]
    fn test_local_name() {
        let name = DeviceManager::local_name();
        let (user, host) = name.split_once('@').unwrap();
        assert!(!user.is_empty());
        assert!(!host.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_channel() {
        let (bus, context) = setup(&[]);
        let manager = DeviceManager::new(&context).unwrap();
        let (_id, mut rx) = manager.subscribe();

        seed_device(&bus, "/dev/3", json!([]));
        manager.add_device("/dev/3").unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ManagerEvent::DeviceAdded {
                address: "/dev/3".to_string()
            })
        );

        manager.destroy();
        assert_eq!(
            rx.recv().await,
            Some(ManagerEvent::DeviceRemoved {
                address: "/dev/3".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
    }
}
