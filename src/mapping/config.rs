use crate::core::Result;
use serde::{Deserialize, Serialize};

/// Mapper behaviour switches
///
/// Settings are plain data so they can be kept next to the rest of an
/// application's configuration and loaded with [`MapperSettings::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    /// Match source and destination members ignoring ASCII case
    /// (`ID` on a payload fills `id` on an entity).
    pub case_insensitive_members: bool,

    /// Fail the build when a destination member has no source counterpart
    /// instead of logging a warning.
    pub assert_configuration_is_valid: bool,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            case_insensitive_members: true,
            assert_configuration_is_valid: false,
        }
    }
}

impl MapperSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set case-insensitive member matching
    pub fn case_insensitive_members(mut self, enabled: bool) -> Self {
        self.case_insensitive_members = enabled;
        self
    }

    /// Set strict validation of unmapped destination members
    pub fn assert_configuration_is_valid(mut self, enabled: bool) -> Self {
        self.assert_configuration_is_valid = enabled;
        self
    }

    /// Parse settings from a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
