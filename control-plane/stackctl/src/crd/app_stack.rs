use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stackctl_runtime::Object;

use super::ServiceType;

/// User-declared application: one Deployment plus the Service in front
/// of it.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "platform.stackctl.dev",
    version = "v1alpha1",
    kind = "AppStack",
    plural = "appstacks",
    namespaced,
    status = "AppStackStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct AppStackSpec {
    pub deployment_config: DeploymentConfig,
    pub service_config: ServiceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentConfig {
    /// Optional infix for the generated Deployment name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    pub image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Optional infix for the generated Service name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: ServiceType,
    /// Required; zero means unset.
    #[serde(default)]
    pub port: i32,
    /// Defaults to `port` when zero.
    #[serde(default, alias = "target_port")]
    pub target_port: i32,
    #[serde(default, alias = "node_port")]
    pub node_port: i32,
}

/// What happens to the children when the AppStack is deleted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum DeletionPolicy {
    /// Children are left behind.
    Delete,
    /// Children carry a controller reference and are garbage collected
    /// together with the AppStack.
    WipeOut,
    /// Unrecognised value; handled like `Delete`.
    #[serde(other)]
    Other,
}

impl DeletionPolicy {
    pub fn owns_children(self) -> bool {
        self == DeletionPolicy::WipeOut
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppStackStatus {
    #[serde(default)]
    pub available_replicas: i32,
}

impl AppStackSpec {
    /// Deletion policy with the unset case resolved to `WipeOut`.
    pub fn effective_deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy.unwrap_or(DeletionPolicy::WipeOut)
    }
}

impl AppStack {
    /// Observed available replicas, 0 before the first status write.
    pub fn available_replicas(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.available_replicas)
    }
}

impl Object for AppStack {
    fn has_status_subresource() -> bool {
        true
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}
