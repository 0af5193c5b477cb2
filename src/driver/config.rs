use std::fmt;

use serde::{Deserialize, Serialize};

/// Driver selection plus the opaque settings handed to the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    /// Display name used in result file names.
    pub name: String,
    /// Registry key of the driver implementation.
    pub driver: String,
    pub product: Option<String>,
    pub sku: Option<String>,
    pub protocol: Option<String>,
    /// `key=value` lines, one per property.
    #[serde(alias = "producer_config")]
    pub producer_config: String,
    #[serde(alias = "consumer_config")]
    pub consumer_config: String,
    #[serde(alias = "common_config")]
    pub common_config: String,
    #[serde(alias = "namespace_metadata")]
    pub namespace_metadata: Option<NamespaceMetadata>,
    /// Driver-specific options, e.g. `delivery_delay_ms` for the loopback
    /// driver.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl DriverConfig {
    #[must_use]
    pub fn producer_property(&self, key: &str) -> Option<String> {
        property_value(&self.producer_config, key)
    }
}

/// Looks up `key` in a properties text (`key=value` or `key: value` lines,
/// `#`/`!` comments).
#[must_use]
pub fn property_value(text: &str, key: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| line.split_once(['=', ':']))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim().to_owned())
}

/// Management-plane coordinates of the broker namespace under test.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespaceMetadata {
    #[serde(alias = "namespace_name")]
    pub namespace_name: String,
    #[serde(alias = "subscription_id")]
    pub subscription_id: String,
    #[serde(alias = "resource_group")]
    pub resource_group: String,
    pub region: String,
    #[serde(alias = "sas_key_name")]
    pub sas_key_name: Option<String>,
    #[serde(alias = "sas_key_value")]
    pub sas_key_value: Option<String>,
}

impl fmt::Debug for NamespaceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceMetadata")
            .field("namespace_name", &self.namespace_name)
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("region", &self.region)
            .field("sas_key_name", &self.sas_key_name)
            .field(
                "sas_key_value",
                &self.sas_key_value.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
