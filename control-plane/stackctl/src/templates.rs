//! Desired child objects for an AppStack, their names, and the
//! predicates that decide whether an existing child has drifted.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::{AppStack, DeletionPolicy};

pub const APP_LABEL: &str = "app";
pub const OWNER_LABEL: &str = "stackctl.dev/owner";
pub const CONTAINER_NAME: &str = "app";

/// `<parent>-<override>-<ts>`, or `<parent>-<ts>` without an override.
///
/// The timestamp keeps names unique across delete/recreate cycles of a
/// parent with the same name.
pub fn child_name(parent: &str, override_name: &str, created_unix: i64) -> String {
    if override_name.is_empty() {
        format!("{parent}-{created_unix}")
    } else {
        format!("{parent}-{override_name}-{created_unix}")
    }
}

pub fn labels_for(stack: &AppStack) -> BTreeMap<String, String> {
    let name = stack.name_any();
    BTreeMap::from([
        (APP_LABEL.to_string(), name.clone()),
        (OWNER_LABEL.to_string(), name),
    ])
}

fn child_meta(stack: &AppStack, name: &str, policy: DeletionPolicy) -> ObjectMeta {
    let owner_references = if policy.owns_children() {
        stack.controller_owner_ref(&()).map(|r| vec![r])
    } else {
        None
    };
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: stack.metadata.namespace.clone(),
        labels: Some(labels_for(stack)),
        owner_references,
        ..Default::default()
    }
}

pub fn new_deployment(stack: &AppStack, name: &str, policy: DeletionPolicy) -> Deployment {
    let labels = Some(labels_for(stack));
    let port = stack.spec.service_config.port;
    Deployment {
        metadata: child_meta(stack, name, policy),
        spec: Some(DeploymentSpec {
            replicas: stack.spec.deployment_config.replicas,
            selector: LabelSelector {
                match_labels: labels.clone(),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(stack.spec.deployment_config.image.clone()),
                        ports: (port != 0).then(|| {
                            vec![ContainerPort {
                                container_port: port,
                                ..Default::default()
                            }]
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn new_service(
    stack: &AppStack,
    name: &str,
    target_port: i32,
    policy: DeletionPolicy,
) -> Service {
    let svc = &stack.spec.service_config;
    Service {
        metadata: child_meta(stack, name, policy),
        spec: Some(ServiceSpec {
            type_: Some(svc.type_.as_str().to_string()),
            selector: Some(labels_for(stack)),
            ports: Some(vec![ServicePort {
                port: svc.port,
                target_port: Some(IntOrString::Int(target_port)),
                node_port: (svc.node_port != 0).then_some(svc.node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn deployment_replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

/// Image of the managed container, empty when there is none.
pub fn deployment_image(deployment: &Deployment) -> &str {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.as_deref())
        .unwrap_or("")
}

pub fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Port of the first (and only managed) port entry, 0 when absent.
pub fn service_port(service: &Service) -> i32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|p| p.first())
        .map_or(0, |p| p.port)
}

/// Target port for this pass; falls back to `port` when unset.
pub fn effective_target_port(stack: &AppStack) -> i32 {
    match stack.spec.service_config.target_port {
        0 => stack.spec.service_config.port,
        p => p,
    }
}

// Each predicate only fires when the desired side is actually set.

pub fn replicas_changed(desired: Option<i32>, current: Option<i32>) -> bool {
    match desired {
        Some(d) if d != 0 => current != Some(d),
        _ => false,
    }
}

pub fn name_changed(desired: &str, current: &str) -> bool {
    !desired.is_empty() && desired != current
}

pub fn image_changed(desired: &str, current: &str) -> bool {
    !desired.is_empty() && desired != current
}

pub fn port_changed(desired: i32, current: i32) -> bool {
    desired != 0 && desired != current
}
