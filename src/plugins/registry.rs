//! Capability registry
//!
//! Closed set of capabilities this crate knows how to wrap. Deciding which
//! plugins a device gets is a lookup from a capability short name to a
//! [`Capability`] variant, followed by [`Capability::instantiate`].
//!
//! Adding a capability means adding a variant here plus its plugin module.

use crate::channel::{BATTERY_INTERFACE, PING_INTERFACE};
use crate::error::Result;
use crate::plugins::battery::BatteryPlugin;
use crate::plugins::ping::PingPlugin;
use crate::plugins::{Plugin, PluginContext};
use serde::Serialize;
use std::fmt;

/// A capability with a plugin implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Battery status (`Level`, `Charging`)
    Battery,
    /// Ping signal
    Ping,
}

impl Capability {
    /// Every known capability
    pub const ALL: [Capability; 2] = [Capability::Battery, Capability::Ping];

    /// Short name as it appears after the capability prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Battery => "battery",
            Capability::Ping => "ping",
        }
    }

    /// Bus interface of the capability object
    pub fn interface_name(&self) -> &'static str {
        match self {
            Capability::Battery => BATTERY_INTERFACE,
            Capability::Ping => PING_INTERFACE,
        }
    }

    /// Look up a short name; matching ignores ASCII case
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str().eq_ignore_ascii_case(name))
    }

    /// Look up a bus interface name
    pub fn from_interface(interface: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.interface_name() == interface)
    }

    /// Construct the plugin for this capability
    pub fn instantiate(self, ctx: &PluginContext) -> Result<Box<dyn Plugin>> {
        Ok(match self {
            Capability::Battery => Box::new(BatteryPlugin::new(ctx)?),
            Capability::Ping => Box::new(PingPlugin::new(ctx)?),
        })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_lookup() {
        assert_eq!(Capability::from_short_name("battery"), Some(Capability::Battery));
        assert_eq!(Capability::from_short_name("Battery"), Some(Capability::Battery));
        assert_eq!(Capability::from_short_name("ping"), Some(Capability::Ping));
        assert_eq!(Capability::from_short_name("Custom"), None);
        assert_eq!(Capability::from_short_name(""), None);
    }

    #[test]
    fn test_interface_lookup() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_interface(cap.interface_name()), Some(cap));
        }
        assert_eq!(Capability::from_interface("org.mconnect.Device"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Capability::Battery.to_string(), "battery");
    }
}
