use serde::{Deserialize, Serialize};
use spm_core::types::{MacAddr, MatchMode, RadioBand, RadioBandwidth, MAX_RADIOS, MAX_SSID_LEN};

use crate::error::{PluginError, PluginResult};

/// One link of a multi-link WLAN rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub band: RadioBand,
    #[serde(default)]
    pub channel: u8,
    pub bandwidth: RadioBandwidth,
}

/// WLAN parameters carried by a SAWF rule.
///
/// These are opaque to the rule engine; only the wireless plugin interprets
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WlanParams {
    /// Transmitter address
    pub ta_mac: MacAddr,
    /// Receiver address
    pub ra_mac: MacAddr,
    pub radios: Vec<RadioConfig>,
    pub band_mode: MatchMode,
    pub channel_mode: MatchMode,
    pub bandwidth_mode: MatchMode,
    pub bssid: MacAddr,
    pub ssid: String,
    pub access_class: u8,
    pub priority: u8,
}

impl WlanParams {
    /// Checks the size limits every plugin relies on.
    pub fn validate(&self) -> PluginResult<()> {
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(PluginError::InvalidMetadata(format!(
                "SSID is {} bytes, limit is {}",
                self.ssid.len(),
                MAX_SSID_LEN
            )));
        }

        if self.radios.len() > MAX_RADIOS {
            return Err(PluginError::InvalidMetadata(format!(
                "{} radios configured, limit is {}",
                self.radios.len(),
                MAX_RADIOS
            )));
        }

        Ok(())
    }
}

/// Everything handed to a wireless plugin callback.
///
/// Built from a rule's [`WlanParams`]; on the query path the destination
/// MAC, DSCP, PCP and destination device of the flow being classified are
/// filled in as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiMetadata {
    pub params: WlanParams,
    pub dest_mac: MacAddr,
    pub dscp: u8,
    /// VLAN PCP of the flow, absent for untagged traffic
    pub pcp: Option<u8>,
    /// Name of the egress device
    pub netdev: Option<String>,
}

impl WifiMetadata {
    /// Metadata for install-time validation.
    pub fn for_rule(params: &WlanParams) -> Self {
        Self {
            params: params.clone(),
            ..Default::default()
        }
    }

    /// Metadata for a classification-time query.
    pub fn for_flow(
        params: &WlanParams,
        dest_mac: MacAddr,
        dscp: u8,
        pcp: Option<u8>,
        netdev: Option<&str>,
    ) -> Self {
        Self {
            params: params.clone(),
            dest_mac,
            dscp,
            pcp,
            netdev: netdev.map(str::to_string),
        }
    }

    /// Legacy validity bitmap: bit 0 set when `pcp` carries a value.
    pub fn valid_flags(&self) -> u8 {
        u8::from(self.pcp.is_some())
    }

    /// Returns the radio configured for `band`, if any.
    pub fn radio(&self, band: RadioBand) -> Option<&RadioConfig> {
        self.params.radios.iter().find(|r| r.band == band)
    }
}
