//! Representations of entities producing telemetry.
//!
//! A [`Resource`] is an immutable set of attributes describing the process:
//! service name, SDK identity, host details and so on. Providers attach one
//! resource to everything they export.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Key, KeyValue, Value};

const SERVICE_NAME: Key = Key::from_static_str("service.name");
const TELEMETRY_SDK_NAME: Key = Key::from_static_str("telemetry.sdk.name");
const TELEMETRY_SDK_VERSION: Key = Key::from_static_str("telemetry.sdk.version");
const TELEMETRY_SDK_LANGUAGE: Key = Key::from_static_str("telemetry.sdk.language");

/// An immutable representation of the entity producing telemetry as attributes.
///
/// Cheap to clone; merging produces a new resource.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

#[derive(Debug, PartialEq)]
struct ResourceInner {
    attrs: HashMap<Key, Value>,
    schema_url: Option<Cow<'static, str>>,
}

impl Default for Resource {
    fn default() -> Self {
        Resource::builder().build()
    }
}

impl Resource {
    /// Creates an empty resource: no attributes, no schema URL.
    pub fn empty() -> Self {
        Resource {
            inner: Arc::new(ResourceInner {
                attrs: HashMap::new(),
                schema_url: None,
            }),
        }
    }

    /// Creates a resource from the given attributes.
    pub fn new<T: IntoIterator<Item = KeyValue>>(kvs: T) -> Self {
        let attrs = kvs.into_iter().map(|kv| (kv.key, kv.value)).collect();
        Resource {
            inner: Arc::new(ResourceInner {
                attrs,
                schema_url: None,
            }),
        }
    }

    /// Start building a resource seeded with the SDK identity attributes.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::new([
                KeyValue::new(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")),
                KeyValue::new(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(TELEMETRY_SDK_LANGUAGE, "rust"),
            ]),
        }
    }

    /// Start building a resource with no seeded attributes.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::empty(),
        }
    }

    /// Create a new resource from this one and `other`.
    ///
    /// Keys present in `other` override keys in this resource. If both carry
    /// a schema URL, `other`'s wins; otherwise whichever is set is kept.
    pub fn merge(&self, other: &Resource) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        let mut attrs = self.inner.attrs.clone();
        for (k, v) in other.inner.attrs.iter() {
            attrs.insert(k.clone(), v.clone());
        }

        let schema_url = other
            .inner
            .schema_url
            .clone()
            .or_else(|| self.inner.schema_url.clone());

        Resource {
            inner: Arc::new(ResourceInner { attrs, schema_url }),
        }
    }

    /// The schema URL of this resource, if any.
    pub fn schema_url(&self) -> Option<&str> {
        self.inner.schema_url.as_deref()
    }

    /// Returns the value of the attribute with the given key, if present.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.attrs.get(key).cloned()
    }

    /// Iterate over the attribute pairs of this resource.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.attrs.iter()
    }

    /// The number of attributes.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Whether the resource carries no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }
}

/// A builder for [`Resource`].
#[derive(Debug)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Add a single attribute, overriding any previous value for its key.
    pub fn with_attribute(self, kv: KeyValue) -> Self {
        self.with_attributes([kv])
    }

    /// Add attributes, overriding previous values for matching keys.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.resource = self.resource.merge(&Resource::new(kvs));
        self
    }

    /// Set the `service.name` attribute.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue {
            key: SERVICE_NAME,
            value: name.into(),
        })
    }

    /// Set the schema URL.
    pub fn with_schema_url(mut self, url: impl Into<Cow<'static, str>>) -> Self {
        self.resource = Resource {
            inner: Arc::new(ResourceInner {
                attrs: self.resource.inner.attrs.clone(),
                schema_url: Some(url.into()),
            }),
        };
        self
    }

    /// Merge `other` into the resource being built; `other`'s keys win.
    pub fn with_detected(mut self, other: &Resource) -> Self {
        self.resource = self.resource.merge(other);
        self
    }

    /// Create the [`Resource`].
    pub fn build(self) -> Resource {
        self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_later_wins() {
        let base = Resource::new([
            KeyValue::new("service.name", "base"),
            KeyValue::new("host.name", "a"),
        ]);
        let overlay = Resource::new([KeyValue::new("service.name", "overlay")]);

        let merged = base.merge(&overlay);
        assert_eq!(
            merged.get(&Key::new("service.name")),
            Some(Value::from("overlay"))
        );
        assert_eq!(merged.get(&Key::new("host.name")), Some(Value::from("a")));
    }

    #[test]
    fn builder_seeds_sdk_identity() {
        let resource = Resource::builder().with_service_name("checkout").build();
        assert_eq!(
            resource.get(&TELEMETRY_SDK_LANGUAGE),
            Some(Value::from("rust"))
        );
        assert_eq!(
            resource.get(&SERVICE_NAME),
            Some(Value::from("checkout"))
        );
    }

    #[test]
    fn empty_merge_is_identity() {
        let resource = Resource::new([KeyValue::new("k", "v")]);
        assert_eq!(resource.merge(&Resource::empty()), resource);
        assert_eq!(Resource::empty().merge(&resource), resource);
    }
}
