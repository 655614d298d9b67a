//! The certificate rotation engine.
//!
//! Once per reconciliation the reconciler hands [`rotate_all`] the declared
//! component set and the previously materialized credential secrets, and gets
//! back the complete desired set of credential objects: the CA secret, the
//! trust bundle and one TLS secret per component. All rotation decisions are
//! derived from four tracking annotations stamped onto every object at
//! issuance ([`annotations`]). The credential object itself is the rotation
//! ledger, there is no other persistent state.
//!
//! Independently of the build pipeline, [`audit_expiry`] scans the persisted
//! objects for hard expiry on a timer and reports every affected entity, so
//! the reconciler can mark the owning stack for operator attention.
//!
//! The engine performs no I/O and never reads the wall clock. Every entry
//! point takes the caller's `now`, which makes rotation behavior fully
//! deterministic and lets tests simulate arbitrary boundaries.
use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;
use tracing::instrument;

mod annotations;
mod audit;
mod authority;
mod bundle;
mod leaf;
mod policy;

pub use annotations::*;
pub use audit::*;
pub use authority::*;
pub use bundle::*;
pub use leaf::*;
pub use policy::*;

/// One internal service component which needs a serving/client certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentCertificate {
    /// The component name, e.g. `query` or `collector`.
    pub name: String,

    /// The DNS names the certificate must be valid for.
    pub hostnames: BTreeSet<String>,
}

/// The desired state one rotation pass works towards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationRequest {
    pub stack_name: String,
    pub namespace: String,

    /// The declared components, in the order their credentials appear in the
    /// output.
    pub components: Vec<ComponentCertificate>,
}

/// The previously materialized credential objects, fetched from the cluster
/// by the reconciler. Absent entries mean "first run" for that credential.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExistingCredentials {
    pub ca: Option<Secret>,

    /// Leaf secrets keyed by component name.
    pub leaves: BTreeMap<String, Secret>,
}

/// One credential object to be applied with create-or-update semantics.
#[derive(Clone, Debug, PartialEq)]
pub enum CertificateResource {
    Secret(Secret),
    ConfigMap(ConfigMap),
}

/// Defines all error variants which can occur during one rotation pass.
#[derive(Debug, Snafu)]
pub enum RotateCertificatesError {
    #[snafu(display("failed to resolve the signing authority"))]
    ResolveSigningAuthority { source: CreateSigningAuthorityError },

    #[snafu(display("failed to build the trust bundle"))]
    BuildTrustBundle { source: BuildTrustBundleError },

    #[snafu(display("failed to resolve the leaf credential for component {component:?}"))]
    ResolveLeafCredential {
        source: CreateLeafCredentialError,
        component: String,
    },
}

/// Runs one full rotation pass and returns the complete desired credential
/// set.
///
/// The output order is fixed: the CA secret, the trust bundle, then one leaf
/// secret per component in declared order. Credentials without a rotation
/// trigger are returned byte-identical to their input, so applying the
/// output of an unrotated pass is a no-op.
///
/// A single failure aborts the whole pass. A partial credential set would
/// leave some services untrusted, so none is ever emitted.
#[instrument(name = "rotate_certificates", skip(request, existing, policy), fields(stack = %request.stack_name))]
pub fn rotate_all(
    request: &RotationRequest,
    existing: &ExistingCredentials,
    policy: &RotationPolicy,
    now: OffsetDateTime,
) -> Result<Vec<CertificateResource>, RotateCertificatesError> {
    let authority = SigningAuthority::resolve(
        &request.stack_name,
        &request.namespace,
        existing.ca.as_ref(),
        policy,
        now,
    )
    .context(ResolveSigningAuthoritySnafu)?;

    let bundle = build_trust_bundle(&request.stack_name, &request.namespace, &authority)
        .context(BuildTrustBundleSnafu)?;

    let mut resources = Vec::with_capacity(request.components.len() + 2);
    resources.push(CertificateResource::Secret(authority.secret().clone()));
    resources.push(CertificateResource::ConfigMap(bundle));

    for component in &request.components {
        let leaf = resolve_leaf_credential(
            &request.stack_name,
            &request.namespace,
            component,
            existing.leaves.get(&component.name),
            &authority,
            policy,
            now,
        )
        .with_context(|_| ResolveLeafCredentialSnafu {
            component: component.name.clone(),
        })?;

        resources.push(CertificateResource::Secret(leaf));
    }

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;

    const ISSUED_AT: i64 = 1_700_000_000;

    fn policy() -> RotationPolicy {
        RotationPolicy {
            ca_validity: Duration::from_minutes_unchecked(10),
            ca_refresh: Duration::from_minutes_unchecked(5),
            cert_validity: Duration::from_minutes_unchecked(2),
            cert_refresh: Duration::from_minutes_unchecked(1),
        }
    }

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ISSUED_AT + offset_secs).unwrap()
    }

    fn request(component_names: &[&str]) -> RotationRequest {
        RotationRequest {
            stack_name: "dev".to_string(),
            namespace: "ns".to_string(),
            components: component_names
                .iter()
                .map(|name| ComponentCertificate {
                    name: (*name).to_string(),
                    hostnames: BTreeSet::from([
                        format!("dev-{name}.ns.svc.cluster.local"),
                        format!("dev-{name}"),
                    ]),
                })
                .collect(),
        }
    }

    /// Rebuilds the `existing` map of the next pass from the output of the
    /// previous one, the way the reconciler would after applying it.
    fn existing_from(request: &RotationRequest, resources: &[CertificateResource]) -> ExistingCredentials {
        let mut existing = ExistingCredentials::default();

        for resource in resources {
            let CertificateResource::Secret(secret) = resource else {
                continue;
            };
            let name = secret.metadata.name.as_deref().unwrap_or_default();

            if name == ca_secret_name(&request.stack_name) {
                existing.ca = Some(secret.clone());
                continue;
            }
            for component in &request.components {
                if name == leaf_secret_name(&request.stack_name, &component.name) {
                    existing.leaves.insert(component.name.clone(), secret.clone());
                }
            }
        }

        existing
    }

    #[test]
    fn fresh_pass_emits_ca_bundle_and_one_leaf_per_component() {
        let names = [
            "c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9",
        ];
        let request = request(&names);

        let resources = rotate_all(
            &request,
            &ExistingCredentials::default(),
            &policy(),
            at(0),
        )
        .unwrap();

        // 1 CA secret + 1 trust bundle + 10 leaf secrets.
        assert_eq!(resources.len(), 12);

        let CertificateResource::Secret(ca) = &resources[0] else {
            panic!("first resource must be the CA secret");
        };
        assert_eq!(ca.metadata.name.as_deref(), Some("dev-internal-ca"));

        let CertificateResource::ConfigMap(bundle) = &resources[1] else {
            panic!("second resource must be the trust bundle");
        };
        assert_eq!(bundle.metadata.name.as_deref(), Some("dev-ca-bundle"));

        for (resource, name) in resources[2..].iter().zip(names) {
            let CertificateResource::Secret(leaf) = resource else {
                panic!("leaf resources must be secrets");
            };
            assert_eq!(
                leaf.metadata.name.as_deref(),
                Some(format!("dev-{name}-tls").as_str())
            );

            let annotations = leaf.metadata.annotations.as_ref().unwrap();
            assert!(!annotations.get(ISSUER_ANNOTATION_KEY).unwrap().is_empty());
            assert!(!annotations.get(NOT_BEFORE_ANNOTATION_KEY).unwrap().is_empty());
            assert!(!annotations.get(NOT_AFTER_ANNOTATION_KEY).unwrap().is_empty());
        }
    }

    #[test]
    fn unrotated_pass_is_idempotent() {
        let request = request(&["collector", "query"]);
        let policy = policy();

        let first = rotate_all(&request, &ExistingCredentials::default(), &policy, at(0)).unwrap();
        let existing = existing_from(&request, &first);

        // 30 seconds later no threshold has been crossed.
        let second = rotate_all(&request, &existing, &policy, at(30)).unwrap();

        assert_eq!(second, first);
    }

    #[test]
    fn ca_rotation_cascades_to_every_leaf() {
        let request = request(&["collector", "query"]);
        let policy = RotationPolicy {
            ca_validity: Duration::from_minutes_unchecked(10),
            ca_refresh: Duration::from_minutes_unchecked(5),
            cert_validity: Duration::from_minutes_unchecked(8),
            cert_refresh: Duration::from_minutes_unchecked(1),
        };

        let first = rotate_all(&request, &ExistingCredentials::default(), &policy, at(0)).unwrap();
        let existing = existing_from(&request, &first);

        // 5 minutes in, the CA enters its refresh window while both leaves
        // are still well outside their own (which opens at 7 minutes).
        let second = rotate_all(&request, &existing, &policy, at(300)).unwrap();

        for (before, after) in first.iter().zip(&second) {
            assert_ne!(after, before);
        }
    }

    #[test]
    fn six_fresh_components_share_one_issuer() {
        let request = request(&[
            "collector",
            "compactor",
            "distributor",
            "ingester",
            "querier",
            "query-frontend",
        ]);
        let now = at(0);

        let resources = rotate_all(&request, &ExistingCredentials::default(), &policy(), now)
            .unwrap();
        let leaves: Vec<&Secret> = resources[2..]
            .iter()
            .map(|resource| match resource {
                CertificateResource::Secret(secret) => secret,
                CertificateResource::ConfigMap(_) => panic!("leaf resources must be secrets"),
            })
            .collect();

        assert_eq!(leaves.len(), 6);

        let issuers: BTreeSet<&String> = leaves
            .iter()
            .map(|leaf| {
                leaf.metadata
                    .annotations
                    .as_ref()
                    .unwrap()
                    .get(ISSUER_ANNOTATION_KEY)
                    .unwrap()
            })
            .collect();
        assert_eq!(issuers.len(), 1);

        for leaf in leaves {
            assert!(expiry_from_secret(leaf).unwrap() > now);
        }
    }
}
