//! Hierarchical resource identifiers
//!
//! Paths look like
//! `/subscriptions/{sub}/resourceGroups/{group}/providers/{namespace}/{collection}/{name}`
//! with an optional child `/{childCollection}/{childName}` pair. The remote API
//! is inconsistent about the case of the resource-group segment, so identity
//! equality ignores case on that segment (and only that segment).

use crate::error::{CloudError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

/// A parsed resource path of any kind
#[derive(Debug, Clone)]
pub struct ResourceId {
    subscription_id: String,
    resource_group: String,
    provider: Option<String>,
    /// Collection/name pairs after the provider, outermost first
    segments: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse a slash-delimited path into its key/value pairs
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(CloudError::malformed(path, "path is empty"));
        }

        let components: Vec<&str> = trimmed.split('/').collect();
        if components.len() % 2 != 0 {
            return Err(CloudError::malformed(
                path,
                "expected an even number of key/value segments",
            ));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut segments: Vec<(String, String)> = Vec::new();

        for pair in components.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() {
                return Err(CloudError::malformed(path, "found an empty segment key"));
            }
            if value.is_empty() {
                return Err(CloudError::malformed(
                    path,
                    format!("segment `{key}` has an empty value"),
                ));
            }

            if key == SUBSCRIPTIONS {
                subscription_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case(RESOURCE_GROUPS) {
                resource_group = Some(value.to_string());
            } else if key == PROVIDERS {
                provider = Some(value.to_string());
            } else if segments.iter().any(|(k, _)| k == key) {
                return Err(CloudError::malformed(
                    path,
                    format!("segment `{key}` appears more than once"),
                ));
            } else {
                segments.push((key.to_string(), value.to_string()));
            }
        }

        let subscription_id = subscription_id
            .ok_or_else(|| CloudError::malformed(path, "missing the `subscriptions` segment"))?;
        let resource_group = resource_group
            .ok_or_else(|| CloudError::malformed(path, "missing the `resourceGroups` segment"))?;

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            segments,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Value of a collection segment such as `virtualMachines`
    pub fn get(&self, collection: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k == collection)
            .map(|(_, v)| v.as_str())
    }

    /// Collection/name pairs after the provider, outermost first
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = (&str, &str)> {
        self.segments.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/{SUBSCRIPTIONS}/{}/{RESOURCE_GROUPS}/{}",
            self.subscription_id, self.resource_group
        )?;
        if let Some(provider) = &self.provider {
            write!(f, "/{PROVIDERS}/{provider}")?;
        }
        for (key, value) in &self.segments {
            write!(f, "/{key}/{value}")?;
        }
        Ok(())
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.subscription_id == other.subscription_id
            && self.resource_group.eq_ignore_ascii_case(&other.resource_group)
            && self.provider == other.provider
            && self.segments == other.segments
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subscription_id.hash(state);
        self.resource_group.to_ascii_lowercase().hash(state);
        self.provider.hash(state);
        self.segments.hash(state);
    }
}

/// Shape a typed identifier must match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// Human-readable name used in error messages
    pub display: &'static str,
    /// Collection segment holding the resource name
    pub collection: &'static str,
    /// Collection segment holding the parent name, for nested resources
    pub parent: Option<&'static str>,
}

/// A resource path validated against a [`ResourceKind`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    id: ResourceId,
    kind: ResourceKind,
}

impl Hash for ResourceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.collection.hash(state);
        self.parent.hash(state);
    }
}

impl ResourceIdentity {
    pub fn parse(path: &str, kind: ResourceKind) -> Result<Self> {
        let id = ResourceId::parse(path)?;
        let mut trailing = id.segments().rev();

        match trailing.next() {
            Some((key, _)) if key == kind.collection => {}
            Some((key, _)) => {
                return Err(CloudError::malformed(
                    path,
                    format!(
                        "{} ID must end with the `{}` element, found `{key}`",
                        kind.display, kind.collection
                    ),
                ));
            }
            None => {
                return Err(CloudError::malformed(
                    path,
                    format!(
                        "{} ID was missing the `{}` element",
                        kind.display, kind.collection
                    ),
                ));
            }
        }

        // a nested resource sits directly under its parent, a top-level one under nothing
        match (kind.parent, trailing.next()) {
            (Some(parent), Some((key, _))) if key == parent => {}
            (Some(parent), _) => {
                return Err(CloudError::malformed(
                    path,
                    format!(
                        "{} ID was missing the `{parent}` element before `{}`",
                        kind.display, kind.collection
                    ),
                ));
            }
            (None, Some((key, _))) => {
                return Err(CloudError::malformed(
                    path,
                    format!(
                        "{} ID has an unexpected `{key}` element",
                        kind.display
                    ),
                ));
            }
            (None, None) => {}
        }
        if trailing.next().is_some() {
            return Err(CloudError::malformed(
                path,
                format!("{} ID has unexpected leading elements", kind.display),
            ));
        }

        drop(trailing);
        Ok(Self { id, kind })
    }

    pub fn resource_group(&self) -> &str {
        self.id.resource_group()
    }

    pub fn subscription_id(&self) -> &str {
        self.id.subscription_id()
    }

    pub fn name(&self) -> &str {
        self.id.get(self.kind.collection).unwrap_or_default()
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.kind.parent.and_then(|p| self.id.get(p))
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.id
    }

    /// Key used by the named-resource lock registry
    pub fn lock_key(&self) -> String {
        match self.parent_name() {
            Some(parent) => format!("{}/{}/{}", self.kind.collection, parent, self.name()),
            None => format!("{}/{}", self.kind.collection, self.name()),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.id.fmt(f)
    }
}

macro_rules! typed_identity {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(ResourceIdentity);

        impl $name {
            pub const KIND: ResourceKind = $kind;

            pub fn parse(path: &str) -> Result<Self> {
                ResourceIdentity::parse(path, Self::KIND).map(Self)
            }

            pub fn resource_group(&self) -> &str {
                self.0.resource_group()
            }

            pub fn name(&self) -> &str {
                self.0.name()
            }

            pub fn lock_key(&self) -> String {
                self.0.lock_key()
            }

            pub fn identity(&self) -> &ResourceIdentity {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = CloudError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

typed_identity!(
    /// `.../providers/Microsoft.Compute/virtualMachines/{name}`
    VirtualMachineId,
    ResourceKind {
        display: "Virtual Machine",
        collection: "virtualMachines",
        parent: None,
    }
);

typed_identity!(
    /// `.../virtualMachines/{vm}/extensions/{name}`
    VirtualMachineExtensionId,
    ResourceKind {
        display: "Virtual Machine Extension",
        collection: "extensions",
        parent: Some("virtualMachines"),
    }
);

typed_identity!(
    /// `.../providers/Microsoft.Network/networkInterfaces/{name}`
    NetworkInterfaceId,
    ResourceKind {
        display: "Network Interface",
        collection: "networkInterfaces",
        parent: None,
    }
);

typed_identity!(
    /// `.../providers/Microsoft.Network/publicIPAddresses/{name}`
    PublicIpAddressId,
    ResourceKind {
        display: "Public IP Address",
        collection: "publicIPAddresses",
        parent: None,
    }
);

impl VirtualMachineId {
    pub fn new(
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<Self> {
        Self::parse(&format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{name}"
        ))
    }

    /// Identifier of an extension installed on this machine
    pub fn extension(&self, name: &str) -> Result<VirtualMachineExtensionId> {
        VirtualMachineExtensionId::parse(&format!("{self}/extensions/{name}"))
    }
}

impl VirtualMachineExtensionId {
    pub fn virtual_machine_name(&self) -> &str {
        self.0.parent_name().unwrap_or_default()
    }

    /// Identifier of the machine the extension belongs to
    pub fn virtual_machine_id(&self) -> Result<VirtualMachineId> {
        let id = self.0.resource_id();
        let mut path = format!(
            "/subscriptions/{}/resourceGroups/{}",
            id.subscription_id(),
            id.resource_group()
        );
        if let Some(provider) = id.provider() {
            path.push_str(&format!("/providers/{provider}"));
        }
        path.push_str(&format!("/virtualMachines/{}", self.virtual_machine_name()));
        VirtualMachineId::parse(&path)
    }
}
