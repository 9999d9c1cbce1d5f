//! Label keys written by this controller and label selectors used in records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "binding-controller";

/// The environment a record was bound to or mirrored from.
pub const CLUSTER_ENVIRONMENT: &str = "svcbind.io/cluster-environment";

/// The remote namespace a record was bound to or mirrored from.
pub const NAMESPACE: &str = "svcbind.io/namespace";

/// Either `application` or `service`.
pub const NAMESPACE_TYPE: &str = "svcbind.io/namespace-type";

pub type Map = BTreeMap<String, String>;

/// Selects workloads by label.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub match_labels: Option<Map>,
    pub match_expressions: Option<Vec<Expression>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Formats equality requirements as a label selector string.
pub fn selector_string<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
