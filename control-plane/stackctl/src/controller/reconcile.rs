use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use stackctl_runtime::{
    ClientError, Object, ObjectClient, ObjectExt, Recorder, ResourceKey, Store,
};
use tracing::{debug, info, instrument, warn};

use super::events::{
    MESSAGE_SYNCED, REASON_INVALID_SPEC, REASON_RESOURCE_EXISTS, REASON_SYNCED,
    emit_event, resource_exists_message,
};
use super::{ControllerContext, ReconcileErr, status};
use crate::crd::{AppStack, DeletionPolicy};
use crate::templates::{
    child_name, deployment_image, deployment_replicas, effective_target_port,
    image_changed, name_changed, new_deployment, new_service, port_changed,
    replicas_changed, service_port,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Children and status match the AppStack.
    Synced,
    /// The AppStack was deleted; nothing to do.
    ParentGone,
    /// The AppStack cannot be converged until its author fixes it.
    InvalidSpec(String),
}

/// One converge pass for the AppStack behind `key`.
///
/// Children are read from the informer caches and the AppStack is read
/// back from the store once its Deployment is in place. Every write is
/// gated by a change predicate so an unchanged world produces no writes.
#[instrument(skip_all, fields(key = %key))]
pub async fn reconcile(
    ctx: &ControllerContext,
    key: &str,
) -> Result<Outcome, ReconcileErr> {
    let ResourceKey { namespace: ns, name } = ResourceKey::parse(key)?;

    let Some(stack) = ctx.stack_cache.get_namespaced(&ns, &name).await else {
        debug!(%ns, %name, "reconcile: AppStack no longer exists");
        ctx.invalid_specs.clear(key);
        return Ok(Outcome::ParentGone);
    };
    let policy = stack.spec.effective_deletion_policy();
    let created = stack.creation_unix();
    let mut wrote = false;

    let deployment_name =
        child_name(&name, &stack.spec.deployment_config.name, created);
    let desired = new_deployment(&stack, &deployment_name, policy);
    let (deployment, changed) = converge(
        ctx.deployments.as_ref(),
        &ctx.deployment_cache,
        ctx.recorder.as_ref(),
        &stack,
        policy,
        desired,
        deployment_drifted,
    )
    .await?;
    wrote |= changed;

    // The cache may lag behind writes made while the Deployment was
    // converged; the Service and the status are built from the stored copy.
    let stack = match ctx.stacks.get(&ns, &name).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => {
            debug!(%ns, %name, "reconcile: AppStack deleted mid-pass");
            ctx.invalid_specs.clear(key);
            return Ok(Outcome::ParentGone);
        }
        Err(e) => return Err(e.into()),
    };

    let port = stack.spec.service_config.port;
    if port == 0 {
        let reason = "serviceConfig.port is required".to_string();
        let version = stack.resource_version().unwrap_or_default();
        if ctx.invalid_specs.first_report(key, &version) {
            warn!(%ns, %name, %reason, "reconcile: invalid spec; skipping service");
            emit_event(
                ctx.recorder.as_ref(),
                &stack,
                EventType::Warning,
                REASON_INVALID_SPEC,
                "Reconcile",
                Some(reason.clone()),
            )
            .await;
        } else {
            debug!(%ns, %name, %version, "reconcile: invalid spec already reported");
        }
        return Ok(Outcome::InvalidSpec(reason));
    }
    ctx.invalid_specs.clear(key);

    let service_name =
        child_name(&name, &stack.spec.service_config.name, created);
    let desired = new_service(
        &stack,
        &service_name,
        effective_target_port(&stack),
        policy,
    );
    let (_, changed) = converge(
        ctx.services.as_ref(),
        &ctx.service_cache,
        ctx.recorder.as_ref(),
        &stack,
        policy,
        desired,
        service_drifted,
    )
    .await?;
    wrote |= changed;

    if let Some(update) =
        status::with_status(&stack, status::from_deployment(&deployment))
    {
        write_status(ctx.stacks.as_ref(), &update).await?;
        info!(
            %ns,
            %name,
            available_replicas = update.available_replicas(),
            "reconcile: status updated"
        );
        wrote = true;
    }

    if wrote {
        emit_event(
            ctx.recorder.as_ref(),
            &stack,
            EventType::Normal,
            REASON_SYNCED,
            "Reconcile",
            Some(MESSAGE_SYNCED.to_string()),
        )
        .await;
    }
    Ok(Outcome::Synced)
}

fn deployment_drifted(desired: &Deployment, current: &Deployment) -> bool {
    replicas_changed(deployment_replicas(desired), deployment_replicas(current))
        || name_changed(&desired.name_any(), &current.name_any())
        || image_changed(deployment_image(desired), deployment_image(current))
}

fn service_drifted(desired: &Service, current: &Service) -> bool {
    name_changed(&desired.name_any(), &current.name_any())
        || port_changed(service_port(desired), service_port(current))
}

/// Make sure the child `desired` describes exists and has not drifted.
/// Returns the child as last seen and whether it was written.
async fn converge<C: Object>(
    client: &dyn ObjectClient<C>,
    cache: &Store<C>,
    recorder: &dyn Recorder,
    stack: &AppStack,
    policy: DeletionPolicy,
    desired: C,
    drifted: fn(&C, &C) -> bool,
) -> Result<(C, bool), ReconcileErr> {
    let ns = stack.ns();
    let child = desired.name_any();

    let existing = match cache.get_namespaced(ns, &child).await {
        Some(cached) => (*cached).clone(),
        None => match client.create(ns, &desired).await {
            Ok(created) => {
                info!(%ns, kind = %C::kind(&()), %child, "reconcile: created");
                return Ok((created, true));
            }
            // the cache has not caught up with an earlier create yet
            Err(e) if e.is_already_exists() => client.get(ns, &child).await?,
            Err(e) => return Err(e.into()),
        },
    };

    if policy.owns_children() && !existing.is_controlled_by(stack) {
        let msg = resource_exists_message(&child);
        warn!(%ns, kind = %C::kind(&()), %child, "reconcile: {msg}");
        emit_event(
            recorder,
            stack,
            EventType::Warning,
            REASON_RESOURCE_EXISTS,
            "Reconcile",
            Some(msg.clone()),
        )
        .await;
        return Err(ReconcileErr::ResourceExists(msg));
    }

    if !drifted(&desired, &existing) {
        return Ok((existing, false));
    }

    let mut update = desired;
    update.meta_mut().resource_version = existing.meta().resource_version.clone();
    let updated = client.update(ns, &update).await?;
    info!(%ns, kind = %C::kind(&()), %child, "reconcile: updated");
    Ok((updated, true))
}

/// Status-only write, falling back to a full update when the store has
/// no status endpoint for AppStacks.
async fn write_status(
    client: &dyn ObjectClient<AppStack>,
    stack: &AppStack,
) -> Result<(), ClientError> {
    match client.update_status(stack.ns(), stack).await {
        Ok(_) => Ok(()),
        Err(ClientError::Unsupported(_)) => {
            client.update(stack.ns(), stack).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}
