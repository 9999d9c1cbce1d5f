use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A name/value attribute describing the class of a service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct ServiceClassIdentityItem {
    pub name: String,
    pub value: String,
}

impl ServiceClassIdentityItem {
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Borrows attributes as `(name, value)` pairs.
pub fn pairs(items: &[ServiceClassIdentityItem]) -> impl Iterator<Item = (&str, &str)> {
    items.iter().map(|i| (i.name.as_str(), i.value.as_str()))
}
