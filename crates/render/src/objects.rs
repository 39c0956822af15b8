//! Managed object kinds and the renderer boundary.
//!
//! Apply order across kinds is a first-class invariant: schema definitions
//! must exist before the workloads that depend on them, and RBAC must exist
//! before the service accounts it binds are used. [`ObjectKind::ORDERED`]
//! encodes that order explicitly.

use std::fs;
use std::path::PathBuf;

use fabric_api::Configuration;
use kube::api::ApiResource;
use kube::core::GroupVersionKind;
use serde::Deserialize;
use tracing::warn;

use crate::RenderError;

/// Kinds of objects managed on behalf of a Configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Schema definitions, applied first and drained last
    CustomResourceDefinition,
    /// TLS material and credentials
    Secret,
    /// Workload identities
    ServiceAccount,
    /// Namespaced RBAC bindings
    RoleBinding,
    /// Cluster-wide RBAC roles
    ClusterRole,
    /// Cluster-wide RBAC bindings
    ClusterRoleBinding,
    /// Component configuration
    ConfigMap,
    /// Central database and controller workloads
    Deployment,
    /// Per-node agent workloads
    DaemonSet,
    /// Database and controller endpoints
    Service,
}

impl ObjectKind {
    /// All managed kinds in apply order. Deletion relies on the platform
    /// garbage collector except for CustomResourceDefinition, which is
    /// drained explicitly before removal.
    pub const ORDERED: [ObjectKind; 10] = [
        ObjectKind::CustomResourceDefinition,
        ObjectKind::Secret,
        ObjectKind::ServiceAccount,
        ObjectKind::RoleBinding,
        ObjectKind::ClusterRole,
        ObjectKind::ClusterRoleBinding,
        ObjectKind::ConfigMap,
        ObjectKind::Deployment,
        ObjectKind::DaemonSet,
        ObjectKind::Service,
    ];

    /// Group, version and kind of this object kind.
    pub fn gvk(&self) -> GroupVersionKind {
        match self {
            ObjectKind::CustomResourceDefinition => GroupVersionKind::gvk(
                "apiextensions.k8s.io",
                "v1",
                "CustomResourceDefinition",
            ),
            ObjectKind::Secret => GroupVersionKind::gvk("", "v1", "Secret"),
            ObjectKind::ServiceAccount => GroupVersionKind::gvk("", "v1", "ServiceAccount"),
            ObjectKind::RoleBinding => {
                GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "RoleBinding")
            }
            ObjectKind::ClusterRole => {
                GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRole")
            }
            ObjectKind::ClusterRoleBinding => {
                GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding")
            }
            ObjectKind::ConfigMap => GroupVersionKind::gvk("", "v1", "ConfigMap"),
            ObjectKind::Deployment => GroupVersionKind::gvk("apps", "v1", "Deployment"),
            ObjectKind::DaemonSet => GroupVersionKind::gvk("apps", "v1", "DaemonSet"),
            ObjectKind::Service => GroupVersionKind::gvk("", "v1", "Service"),
        }
    }

    /// Dynamic API resource descriptor for this kind.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }

    /// Whether objects of this kind live inside a namespace. Namespaced
    /// objects are owned by the Configuration, cluster-scoped ones by the
    /// synthetic owner namespace.
    pub fn namespaced(&self) -> bool {
        !matches!(
            self,
            ObjectKind::CustomResourceDefinition
                | ObjectKind::ClusterRole
                | ObjectKind::ClusterRoleBinding
        )
    }

    /// Parses a manifest `kind` field.
    pub fn from_kind(kind: &str) -> Option<ObjectKind> {
        ObjectKind::ORDERED
            .into_iter()
            .find(|k| k.gvk().kind == kind)
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.gvk().kind)
    }
}

/// A rendered object body ready to be applied.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    /// Kind of the object
    pub kind: ObjectKind,
    /// Object name, taken from `metadata.name`
    pub name: String,
    /// Full object body including `apiVersion` and `kind`
    pub body: serde_json::Value,
}

impl ManagedObject {
    /// Wraps a rendered body, extracting the object name.
    pub fn from_body(kind: ObjectKind, body: serde_json::Value) -> Result<Self, RenderError> {
        let name = body
            .pointer("/metadata/name")
            .and_then(|n| n.as_str())
            .ok_or(RenderError::MissingField("metadata.name"))?
            .to_string();
        Ok(ManagedObject { kind, name, body })
    }

    /// Namespace declared in the body, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.body.pointer("/metadata/namespace").and_then(|n| n.as_str())
    }
}

/// Produces the managed object bodies for one kind from a Configuration.
///
/// Implemented externally by the templating engine; [`DirRenderer`] is the
/// deployment shipped with the operator, test doubles implement it in-memory.
pub trait Renderer: Send + Sync {
    /// Renders all objects of `kind` for the given Configuration.
    fn generate_objects(
        &self,
        config: &Configuration,
        kind: ObjectKind,
    ) -> Result<Vec<ManagedObject>, RenderError>;
}

/// Loads pre-rendered multi-document YAML manifests from a mounted directory.
///
/// Documents whose `kind` is not a managed kind are skipped with a warning so
/// a manifest bundle can carry auxiliary documents without breaking the apply
/// loop. Files are re-read on every call; the mounted bundle is the source of
/// truth for the current `spec.version`.
#[derive(Debug, Clone)]
pub struct DirRenderer {
    dir: PathBuf,
}

impl DirRenderer {
    /// Creates a renderer reading from the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirRenderer { dir: dir.into() }
    }

    fn load_documents(&self) -> Result<Vec<serde_json::Value>, RenderError> {
        let mut documents = Vec::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        // deterministic apply order within a kind
        entries.sort();

        for path in entries {
            let raw = fs::read_to_string(&path)?;
            for document in serde_yaml::Deserializer::from_str(&raw) {
                let value = serde_yaml::Value::deserialize(document)?;
                if value.is_null() {
                    continue;
                }
                let json = serde_json::to_value(&value)
                    .map_err(|_| RenderError::MissingField("manifest is not an object"))?;
                documents.push(json);
            }
        }
        Ok(documents)
    }
}

impl Renderer for DirRenderer {
    fn generate_objects(
        &self,
        _config: &Configuration,
        kind: ObjectKind,
    ) -> Result<Vec<ManagedObject>, RenderError> {
        let mut objects = Vec::new();
        for body in self.load_documents()? {
            let Some(document_kind) = body.get("kind").and_then(|k| k.as_str()) else {
                return Err(RenderError::MissingField("kind"));
            };
            match ObjectKind::from_kind(document_kind) {
                Some(k) if k == kind => objects.push(ManagedObject::from_body(kind, body)?),
                Some(_) => {}
                None => warn!(kind = document_kind, "skipping unmanaged manifest kind"),
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ordering_places_schemas_first_and_services_last() {
        let ordered = ObjectKind::ORDERED;
        assert_eq!(ordered[0], ObjectKind::CustomResourceDefinition);
        assert_eq!(ordered[9], ObjectKind::Service);

        let crd_index = ordered
            .iter()
            .position(|k| *k == ObjectKind::CustomResourceDefinition)
            .unwrap();
        let deployment_index = ordered
            .iter()
            .position(|k| *k == ObjectKind::Deployment)
            .unwrap();
        assert!(crd_index < deployment_index);
    }

    #[test]
    fn scope_classification() {
        assert!(!ObjectKind::CustomResourceDefinition.namespaced());
        assert!(!ObjectKind::ClusterRole.namespaced());
        assert!(!ObjectKind::ClusterRoleBinding.namespaced());
        assert!(ObjectKind::Deployment.namespaced());
        assert!(ObjectKind::Secret.namespaced());
    }

    #[test]
    fn kind_parsing_round_trips() {
        for kind in ObjectKind::ORDERED {
            assert_eq!(ObjectKind::from_kind(&kind.gvk().kind), Some(kind));
        }
        assert_eq!(ObjectKind::from_kind("NetworkPolicy"), None);
    }

    #[test]
    fn managed_object_requires_a_name() {
        let body = serde_json::json!({"kind": "Service", "metadata": {}});
        assert!(ManagedObject::from_body(ObjectKind::Service, body).is_err());
    }

    #[test]
    fn dir_renderer_filters_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("bundle.yaml")).unwrap();
        writeln!(
            file,
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: fabric-nb\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: fabric-central\n  namespace: kube-system\n"
        )
        .unwrap();

        let renderer = DirRenderer::new(dir.path());
        let config = Configuration::new("fabric", Default::default());

        let services = renderer
            .generate_objects(&config, ObjectKind::Service)
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "fabric-nb");
        assert_eq!(services[0].namespace(), None);

        let deployments = renderer
            .generate_objects(&config, ObjectKind::Deployment)
            .unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].namespace(), Some("kube-system"));

        let daemonsets = renderer
            .generate_objects(&config, ObjectKind::DaemonSet)
            .unwrap();
        assert!(daemonsets.is_empty());
    }

    #[test]
    fn dir_renderer_skips_unmanaged_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("extra.yml")).unwrap();
        writeln!(
            file,
            "apiVersion: v1\nkind: LimitRange\nmetadata:\n  name: ignored\n"
        )
        .unwrap();

        let renderer = DirRenderer::new(dir.path());
        let config = Configuration::new("fabric", Default::default());
        for kind in ObjectKind::ORDERED {
            assert!(renderer.generate_objects(&config, kind).unwrap().is_empty());
        }
    }
}
