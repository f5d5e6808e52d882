//! Resource - Representing resources and their state

use std::collections::HashMap;
use std::fmt;

use crate::provider::{ProviderError, ProviderResult};

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "ec2.vpc", "s3.bucket")
    pub resource_type: String,
    /// Resource name (the key the resource is declared under)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Parse an address of the form `<type>.<name>` where the type may itself contain dots
    pub fn parse_address(address: &str) -> Option<Self> {
        let (resource_type, name) = address.rsplit_once('.')?;
        if resource_type.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(resource_type, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's attribute, resolved at apply time
    ResourceRef(ResourceId, String),
}

impl Value {
    /// Convert a JSON value into an attribute value.
    ///
    /// `null` has no attribute representation and yields `None`. Strings of the
    /// form `${<type>.<name>.<attribute>}` become [`Value::ResourceRef`].
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => Some(Value::String(n.to_string())),
            },
            serde_json::Value::String(s) => Some(parse_reference(s).unwrap_or_else(|| Value::String(s.clone()))),
            serde_json::Value::Array(items) => {
                Some(Value::List(items.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Value::Map(
                map.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Convert this value into JSON for persistence
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::ResourceRef(id, attr) => serde_json::Value::String(format!("${{{}.{}}}", id, attr)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Build a list of strings
    pub fn string_list<I, S>(items: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    /// Build a map of strings
    pub fn string_map<I, K, V>(items: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Value::Map(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        )
    }

    /// Whether this value (or any nested value) still contains an unresolved reference
    pub fn has_reference(&self) -> bool {
        match self {
            Value::ResourceRef(..) => true,
            Value::List(items) => items.iter().any(Value::has_reference),
            Value::Map(map) => map.values().any(Value::has_reference),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Parse `${<type>.<name>.<attribute>}`
fn parse_reference(s: &str) -> Option<Value> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    let (address, attribute) = inner.rsplit_once('.')?;
    let id = ResourceId::parse_address(address)?;
    if attribute.is_empty() {
        return None;
    }
    Some(Value::ResourceRef(id, attribute.to_string()))
}

/// Typed accessors over an attribute map
pub trait AttributeMap {
    fn attr(&self, key: &str) -> Option<&Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(Value::as_int)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.attr(key).and_then(Value::as_bool)
    }

    fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.attr(key).and_then(Value::as_list)
    }

    fn get_map(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.attr(key).and_then(Value::as_map)
    }

    /// String list attribute; non-string items are skipped
    fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// String map attribute; non-string values are skipped
    fn get_string_map(&self, key: &str) -> HashMap<String, String> {
        self.get_map(key)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AttributeMap for HashMap<String, Value> {
    fn attr(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Desired state declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
    /// If true, this is a data source (read-only) that won't be modified
    pub read_only: bool,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
            read_only: false,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this resource is a data source (read-only)
    pub fn is_data_source(&self) -> bool {
        self.read_only
    }

    /// Get a required string attribute, failing with a resource-scoped error
    pub fn require_str(&self, key: &str) -> ProviderResult<&str> {
        self.get_str(key).ok_or_else(|| {
            ProviderError::new(format!("Attribute '{}' is required", key))
                .for_resource(self.id.clone())
        })
    }

    /// Resources this resource references, sorted and deduplicated
    pub fn dependencies(&self) -> Vec<ResourceId> {
        fn collect(value: &Value, out: &mut Vec<ResourceId>) {
            match value {
                Value::ResourceRef(id, _) => out.push(id.clone()),
                Value::List(items) => items.iter().for_each(|v| collect(v, out)),
                Value::Map(map) => map.values().for_each(|v| collect(v, out)),
                _ => {}
            }
        }
        let mut deps = Vec::new();
        self.attributes.values().for_each(|v| collect(v, &mut deps));
        deps.sort();
        deps.dedup();
        deps
    }

    /// Replace references with values from `states`.
    ///
    /// References to states that are unknown or lack the attribute are left in
    /// place; check [`Value::has_reference`] to find them.
    pub fn resolve_references(&self, states: &HashMap<ResourceId, State>) -> Resource {
        let mut resolved = self.clone();
        for value in resolved.attributes.values_mut() {
            *value = resolve_value(value, states);
        }
        resolved
    }

    /// Like [`Resource::resolve_references`], failing on any unresolved reference
    pub fn resolve_all_references(
        &self,
        states: &HashMap<ResourceId, State>,
    ) -> ProviderResult<Resource> {
        let resolved = self.resolve_references(states);
        let mut names: Vec<&String> = resolved.attributes.keys().collect();
        names.sort();
        for name in names {
            if resolved.attributes[name].has_reference() {
                return Err(ProviderError::new(format!(
                    "Attribute '{}' references a value that is not known yet",
                    name
                ))
                .for_resource(self.id.clone()));
            }
        }
        Ok(resolved)
    }
}

fn resolve_value(value: &Value, states: &HashMap<ResourceId, State>) -> Value {
    match value {
        Value::ResourceRef(id, attr) => states
            .get(id)
            .filter(|s| s.exists)
            .and_then(|s| s.lookup(attr))
            .unwrap_or_else(|| value.clone()),
        Value::List(items) => Value::List(items.iter().map(|v| resolve_value(v, states)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, states)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl AttributeMap for Resource {
    fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Provider identifier (e.g., vpc-xxx, a role name, or a composite id)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Set an attribute, returning self for chaining
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set an attribute only when a value is present
    pub fn set_opt(&mut self, key: &str, value: Option<impl Into<Value>>) {
        if let Some(v) = value {
            self.attributes.insert(key.to_string(), v.into());
        }
    }

    /// Attribute value for references; `id` falls back to the identifier
    pub fn lookup(&self, attr: &str) -> Option<Value> {
        match self.attributes.get(attr) {
            Some(v) => Some(v.clone()),
            None if attr == "id" => self.identifier.clone().map(Value::String),
            None => None,
        }
    }
}

impl AttributeMap for State {
    fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
