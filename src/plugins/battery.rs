//! Battery Plugin
//!
//! Mirrors the remote device's battery interface.
//!
//! ## Properties
//!
//! - `Level` (uint32, 0-100): read once when the plugin is constructed and
//!   re-read whenever the device forwards a properties-changed notification
//!   for the battery interface
//! - `Charging` (boolean): read live on every access; any non-boolean wire
//!   value is treated as `false`
//!
//! The battery interface has no signals of its own; changes arrive through
//! the device's generic properties-changed subscription.

use crate::channel::value::{bool_or_default, u32_or_default};
use crate::channel::{PropertiesChanged, RemoteChannel, BATTERY_INTERFACE};
use crate::device::DeviceEvent;
use crate::error::Result;
use crate::plugins::{Capability, Plugin, PluginContext, PluginState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Battery level considered low when not charging
pub const LOW_BATTERY_THRESHOLD: u32 = 15;

/// Battery state information
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatteryState {
    /// Charge level (0-100)
    pub level: u32,

    /// Whether the device is charging
    pub charging: bool,
}

impl BatteryState {
    /// Create a new battery state, clamping the level to 0-100
    pub fn new(level: u32, charging: bool) -> Self {
        Self {
            level: level.min(100),
            charging,
        }
    }

    /// Check if battery is low (< 15% and not charging)
    pub fn is_low(&self) -> bool {
        self.level < LOW_BATTERY_THRESHOLD && !self.charging
    }
}

/// Battery plugin
pub struct BatteryPlugin {
    /// Channel to the device object; `None` once destroyed
    channel: Option<Arc<dyn RemoteChannel>>,

    /// Mirrored level
    level: u32,
}

impl BatteryPlugin {
    /// Create the plugin and snapshot the battery level
    pub fn new(ctx: &PluginContext) -> Result<Self> {
        debug!("BatteryPlugin::new({})", ctx.device_address());

        let channel = ctx.open_channel()?;
        let level = read_level(channel.as_ref());

        info!("Battery plugin for {} at {}%", ctx.device_address(), level);

        Ok(Self {
            channel: Some(channel),
            level,
        })
    }

    /// Mirrored charge level
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Charging flag, re-read from the remote side
    pub fn charging(&self) -> bool {
        let Some(channel) = &self.channel else {
            return false;
        };

        match channel.get_property(BATTERY_INTERFACE, "Charging") {
            Ok(value) => bool_or_default("Charging", Some(&value)),
            Err(e) => {
                warn!("Failed to read Charging on {}: {}", channel.path(), e);
                false
            }
        }
    }

    /// Current battery state
    pub fn battery_state(&self) -> BatteryState {
        BatteryState::new(self.level, self.charging())
    }

    fn refresh_level(&mut self) {
        if let Some(channel) = &self.channel {
            self.level = read_level(channel.as_ref());
        }
    }
}

fn read_level(channel: &dyn RemoteChannel) -> u32 {
    match channel.get_property(BATTERY_INTERFACE, "Level") {
        Ok(value) => u32_or_default("Level", Some(&value)).min(100),
        Err(e) => {
            warn!("Failed to read Level on {}: {}", channel.path(), e);
            0
        }
    }
}

impl Plugin for BatteryPlugin {
    fn capability(&self) -> Capability {
        Capability::Battery
    }

    fn state(&self) -> PluginState {
        PluginState::Battery(self.battery_state())
    }

    fn properties_changed(&mut self, change: &PropertiesChanged) -> Option<DeviceEvent> {
        if self.channel.is_none() {
            return None;
        }

        debug!(
            "Battery properties changed: {:?}",
            change.property_names()
        );

        self.refresh_level();
        let state = self.battery_state();

        if state.is_low() {
            warn!("Remote device battery is low: {}%", state.level);
        }

        Some(DeviceEvent::BatteryChanged {
            level: state.level,
            charging: state.charging,
        })
    }

    fn subscription_count(&self) -> usize {
        // Change notifications arrive through the device's subscription
        0
    }

    fn destroy(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Battery plugin for {} destroyed", channel.path());
        }
    }

    fn is_destroyed(&self) -> bool {
        self.channel.is_none()
    }
}
