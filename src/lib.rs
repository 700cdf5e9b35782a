//! mconnect-core
//!
//! Client-side model of the devices managed by the mconnect daemon.
//!
//! ## Architecture
//!
//! The daemon exposes a DeviceManager object, one object per device and one
//! interface per device capability on the session bus. This crate mirrors
//! that graph locally and keeps it consistent through property reads and
//! change notifications.
//!
//! ### Modules
//!
//! - `manager`: DeviceManager registry (enumeration, trust, membership events)
//! - `device`: Per-device mirror and plugin derivation
//! - `plugins`: Capability registry and wrappers (Battery, Ping)
//! - `channel`: Remote channel abstraction and the in-process test bus
//! - `events`: Typed observer registry
//! - `launcher`: Daemon and preferences UI launch
//! - `config`, `logging`, `error`: Ambient support
//!
//! ## Example
//!
//! ```rust
//! use mconnect_core::channel::memory::MemoryBus;
//! use mconnect_core::channel::{BusContext, DEVICE_INTERFACE, MANAGER_INTERFACE};
//! use mconnect_core::config::{ModelConfig, DEFAULT_MANAGER_PATH};
//! use mconnect_core::DeviceManager;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let bus = MemoryBus::new();
//! bus.reply(DEFAULT_MANAGER_PATH, MANAGER_INTERFACE, "ListDevices", json!(["/dev/0"]));
//! bus.set_properties("/dev/0", DEVICE_INTERFACE, json!({
//!     "Name": "Pixel",
//!     "OutgoingCapabilities": ["kdeconnect.ping", "kdeconnect.sms"],
//! }));
//!
//! let context = BusContext::new(Arc::new(bus), ModelConfig::default());
//! let manager = DeviceManager::new(&context).unwrap();
//!
//! let device = manager.device("/dev/0").unwrap();
//! assert_eq!(device.name(), "Pixel");
//! assert_eq!(device.plugin_names(), vec!["ping"]);
//! ```

// Re-export commonly used types
pub use channel::{BusContext, ChannelFactory, RemoteChannel};
pub use config::ModelConfig;
pub use device::{Device, DeviceEvent, DeviceInfo};
pub use error::{ModelError, Result};
pub use manager::{DeviceManager, ManagerBuilder, ManagerEvent, OperationStatus};
pub use plugins::Capability;

// Public modules
pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod launcher;
pub mod logging;
pub mod manager;
pub mod plugins;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
