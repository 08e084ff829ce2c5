pub mod app_stack;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use app_stack::{
    AppStack, AppStackSpec, AppStackStatus, DeletionPolicy, DeploymentConfig,
    ServiceConfig,
};

/// How the generated Service is exposed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

impl ServiceType {
    /// Value of `spec.type` on the Service.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ExternalName => "ExternalName",
        }
    }
}
