use k8s_openapi::api::apps::v1::Deployment;

use crate::crd::{AppStack, AppStackStatus};
use crate::templates::available_replicas;

pub fn from_deployment(deployment: &Deployment) -> AppStackStatus {
    AppStackStatus {
        available_replicas: available_replicas(deployment),
    }
}

/// Copy of `stack` carrying the new status, or `None` when nothing
/// would change.
pub fn with_status(stack: &AppStack, status: AppStackStatus) -> Option<AppStack> {
    if stack.status.clone().unwrap_or_default() == status {
        return None;
    }
    let mut copy = stack.clone();
    copy.status = Some(status);
    Some(copy)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    use super::*;
    use crate::crd::AppStackSpec;

    #[test]
    fn unset_status_equals_zero_available() {
        let stack = AppStack::new("a", AppStackSpec::default());
        assert!(with_status(&stack, AppStackStatus::default()).is_none());

        let rolled_out = Deployment {
            status: Some(DeploymentStatus {
                available_replicas: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = with_status(&stack, from_deployment(&rolled_out)).unwrap();
        assert_eq!(update.available_replicas(), 3);
        assert!(with_status(&update, from_deployment(&rolled_out)).is_none());
    }
}
