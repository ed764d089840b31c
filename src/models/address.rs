//! Catalog identity key

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one catalog entry: `(standard, vendor, message type)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationAddress {
    pub standard: String,
    pub vendor: String,
    pub message_type: String,
}

impl ConfigurationAddress {
    pub fn new(
        standard: impl Into<String>,
        vendor: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            standard: standard.into(),
            vendor: vendor.into(),
            message_type: message_type.into(),
        }
    }

    /// Same address with a different vendor
    pub fn with_vendor(&self, vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ConfigurationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.standard, self.vendor, self.message_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_equality() {
        let a = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let b = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_display() {
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        assert_eq!(address.to_string(), "HL7v23/Epic/ADT^A01");
        assert_eq!(address.with_vendor("Cerner").vendor, "Cerner");
    }
}
