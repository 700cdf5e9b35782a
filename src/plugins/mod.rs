//! Plugin system module
//!
//! Capability wrappers instantiated per device.
//!
//! ## Architecture
//!
//! A device advertises capability identifiers such as `kdeconnect.battery`
//! in its `OutgoingCapabilities`. The device strips the configured prefix,
//! looks the short name up in the closed [`Capability`] registry and calls
//! [`Capability::instantiate`] to build the matching [`Plugin`]. Unknown
//! capabilities are skipped.
//!
//! ## Components
//!
//! - [`Plugin`](trait@Plugin) - Trait every capability wrapper implements
//! - [`Capability`] - Registry of known capabilities and their constructors
//! - [`PluginContext`] - What a plugin receives from its owning device
//! - [`PluginState`] - Typed snapshot of a plugin's mirrored values
//!
//! ## Built-in Plugins
//!
//! - [`battery`] - Battery level and charging state
//! - [`ping`] - Ping signal
//!
//! ## Example Usage
//!
//! ```rust
//! use mconnect_core::plugins::Capability;
//!
//! assert_eq!(Capability::from_short_name("battery"), Some(Capability::Battery));
//! assert_eq!(Capability::from_short_name("telephony"), None);
//! ```

pub mod r#trait;
pub mod registry;

pub mod battery;
pub mod ping;

pub use r#trait::{Plugin, PluginContext, PluginState};
pub use registry::Capability;
