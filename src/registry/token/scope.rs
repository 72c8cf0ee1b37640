use crate::registry::Error;
use serde::{Deserialize, Serialize};

pub const RESOURCE_REPOSITORY: &str = "repository";
pub const ACTION_PULL: &str = "pull";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub actions: Vec<String>,
}

impl AccessEntry {
    pub fn covers(&self, namespace: &str, action: &str) -> bool {
        self.resource_type == RESOURCE_REPOSITORY
            && self.name == namespace
            && self.actions.iter().any(|a| a == action)
    }
}

/// Parses `type:name:actions` scopes.
///
/// The name may itself contain colons (registry host with a port), so the type ends at the first
/// colon and the actions start after the last one.
pub fn parse_scope(scope: &str) -> Result<AccessEntry, Error> {
    let invalid = || Error::Unauthorized(format!("Invalid scope format: {scope}"));

    let (resource_type, rest) = scope.split_once(':').ok_or_else(invalid)?;
    let (name, actions) = rest.rsplit_once(':').ok_or_else(invalid)?;
    if resource_type.is_empty() || name.is_empty() {
        return Err(invalid());
    }

    Ok(AccessEntry {
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        actions: actions
            .split(',')
            .filter(|action| !action.is_empty())
            .map(String::from)
            .collect(),
    })
}

pub fn parse_scopes(scopes: &[String]) -> Result<Vec<AccessEntry>, Error> {
    scopes.iter().map(|scope| parse_scope(scope)).collect()
}

/// Scope a client must obtain to pull from `namespace`.
pub fn pull_scope(namespace: &str) -> String {
    format!("{RESOURCE_REPOSITORY}:{namespace}:{ACTION_PULL}")
}
