//! Labels stamped onto every Kubernetes object emitted by this operator.
use std::collections::BTreeMap;

use const_format::concatcp;

/// The well-known Kubernetes app key prefix.
const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";

/// The well-known Kubernetes app name key `app.kubernetes.io/name`. It is used
/// to label the application with a name, e.g. `tracehouse`.
pub const K8S_APP_NAME_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "name");

/// The well-known Kubernetes app instance key `app.kubernetes.io/instance`. It
/// is used to identify the instance of an application, e.g. the stack name.
pub const K8S_APP_INSTANCE_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "instance");

/// The well-known Kubernetes app component key `app.kubernetes.io/component`.
/// It is used to specify the component within the architecture, e.g. `query`.
pub const K8S_APP_COMPONENT_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "component");

/// The well-known Kubernetes app managed-by key `app.kubernetes.io/managed-by`.
/// It is used to indicate what tool is being used to manage the operation of
/// an application.
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

/// The app name all emitted objects are labeled with.
pub const APP_NAME: &str = "tracehouse";

/// The value of the `app.kubernetes.io/managed-by` label.
pub const OPERATOR_NAME: &str = "tracehouse-operator";

/// Returns the recommended set of labels for objects owned by a stack.
///
/// The returned map is deterministic, so repeated calls with the same inputs
/// produce byte-identical metadata.
pub fn recommended_labels(stack_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_APP_NAME_KEY.to_string(), APP_NAME.to_string()),
        (K8S_APP_INSTANCE_KEY.to_string(), stack_name.to_string()),
        (K8S_APP_COMPONENT_KEY.to_string(), component.to_string()),
        (K8S_APP_MANAGED_BY_KEY.to_string(), OPERATOR_NAME.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_identify_stack_and_component() {
        let labels = recommended_labels("dev", "query");

        assert_eq!(labels.get(K8S_APP_NAME_KEY).unwrap(), "tracehouse");
        assert_eq!(labels.get(K8S_APP_INSTANCE_KEY).unwrap(), "dev");
        assert_eq!(labels.get(K8S_APP_COMPONENT_KEY).unwrap(), "query");
        assert_eq!(
            labels.get(K8S_APP_MANAGED_BY_KEY).unwrap(),
            "tracehouse-operator"
        );
    }
}
