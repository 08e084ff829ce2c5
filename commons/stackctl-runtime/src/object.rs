use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::key::ResourceKey;

/// A kind stored in the backing store and watched by informers.
pub trait Object: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static {
    /// Whether status is written through a dedicated status endpoint.
    /// Kinds that return true ignore status on regular updates.
    fn has_status_subresource() -> bool {
        false
    }

    /// Copy the status block of `other` onto `self`.
    fn copy_status_from(&mut self, _other: &Self) {}
}

impl Object for Deployment {
    fn has_status_subresource() -> bool {
        true
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl Object for Service {
    fn has_status_subresource() -> bool {
        true
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

pub trait ObjectExt: Object {
    /// Namespace, empty for cluster-scoped objects.
    fn ns(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or("")
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.ns(), &self.name_any())
    }

    /// Creation time in whole seconds since the epoch, 0 when unset.
    fn creation_unix(&self) -> i64 {
        self.meta()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.timestamp())
            .unwrap_or(0)
    }

    /// The owner reference flagged as controller, if any.
    fn controller_of(&self) -> Option<&OwnerReference> {
        self.owner_references()
            .iter()
            .find(|r| r.controller == Some(true))
    }

    /// Controller reference whose kind and group match `O` and whose uid
    /// is the owner's.
    fn is_controlled_by<O: Object>(&self, owner: &O) -> bool {
        let Some(owner_uid) = owner.meta().uid.as_deref() else {
            return false;
        };
        self.controller_of().is_some_and(|r| {
            r.kind == O::kind(&())
                && r.api_version == O::api_version(&())
                && r.uid == owner_uid
        })
    }
}

impl<K: Object> ObjectExt for K {}
