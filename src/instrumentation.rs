//! The instrumentation scope: the logical unit of application code that
//! produced a batch of telemetry, typically a library or module name plus
//! version.

use std::borrow::Cow;
use std::hash::{Hash, Hasher};

use crate::common::KeyValue;

/// Information about a library or module producing telemetry.
///
/// Identity (equality, hashing) covers name, version and schema URL;
/// attributes are carried along but do not distinguish scopes.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl PartialEq for InstrumentationScope {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.schema_url == other.schema_url
    }
}

impl Eq for InstrumentationScope {}

impl Hash for InstrumentationScope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.schema_url.hash(state);
    }
}

impl InstrumentationScope {
    /// Create a new builder for the scope with the given name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> InstrumentationScopeBuilder {
        InstrumentationScopeBuilder {
            name: name.into(),
            version: None,
            schema_url: None,
            attributes: Vec::new(),
        }
    }

    /// The name of the instrumented library or module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version of the instrumented library, if known.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The schema URL the emitted telemetry conforms to, if any.
    pub fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }

    /// Attributes further describing the scope.
    pub fn attributes(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }
}

/// Configuration options for [`InstrumentationScope`].
#[derive(Debug)]
pub struct InstrumentationScopeBuilder {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScopeBuilder {
    /// Set the scope version.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the schema URL.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }

    /// Set the scope attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Create the [`InstrumentationScope`] from this configuration.
    pub fn build(self) -> InstrumentationScope {
        InstrumentationScope {
            name: self.name,
            version: self.version,
            schema_url: self.schema_url,
            attributes: self.attributes,
        }
    }
}

impl From<&'static str> for InstrumentationScope {
    fn from(name: &'static str) -> Self {
        InstrumentationScope::builder(name).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_attributes() {
        let a = InstrumentationScope::builder("component")
            .with_version("0.1.0")
            .with_attributes([KeyValue::new("mode", "a")])
            .build();
        let b = InstrumentationScope::builder("component")
            .with_version("0.1.0")
            .with_attributes([KeyValue::new("mode", "b")])
            .build();
        assert_eq!(a, b);

        let c = InstrumentationScope::builder("component")
            .with_version("0.2.0")
            .build();
        assert_ne!(a, c);
    }
}
