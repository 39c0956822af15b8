//! Managed object references
//!
//! Audit types recorded in `ConfigurationStatus.managedObjects` so operators
//! can see which objects the controller applied on behalf of a Configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object applied by the configuration controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Group, version and kind of the referenced object
    pub gvk: GroupVersionKind,
    /// Object name
    pub name: String,
}

/// Group, version and kind triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GroupVersionKind {
    /// API group, empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
}

impl GroupVersionKind {
    /// The `group/version` string, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_handles_core_group() {
        let core = GroupVersionKind {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Service".to_string(),
        };
        assert_eq!(core.api_version(), "v1");

        let apps = GroupVersionKind {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
        };
        assert_eq!(apps.api_version(), "apps/v1");
    }
}
