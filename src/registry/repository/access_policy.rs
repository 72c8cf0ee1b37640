//! CEL access control for repository actions.
//!
//! Policies are compiled when the configuration is loaded and evaluated when a token is
//! requested, once per requested action.
//!
//! - **Default Allow**: access is granted unless a rule matches (rules are deny rules)
//! - **Default Deny**: access is denied unless a rule matches (rules are allow rules)
//!
//! Expressions see two variables: `identity` (id, username, client_ip) and `request`
//! (action, namespace).

use crate::configuration::Error as ConfigError;
use crate::registry::server::ClientIdentity;
use crate::registry::Error;
use cel_interpreter::{Context, Program, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryAccessPolicyConfig {
    #[serde(default = "RepositoryAccessPolicyConfig::default_allow")]
    pub default_allow: bool,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl RepositoryAccessPolicyConfig {
    fn default_allow() -> bool {
        true
    }
}

impl Default for RepositoryAccessPolicyConfig {
    fn default() -> Self {
        Self {
            default_allow: Self::default_allow(),
            rules: Vec::new(),
        }
    }
}

/// The action a client asks to perform, as exposed to policy expressions.
#[derive(Debug, Serialize)]
pub struct AccessRequest<'a> {
    pub action: &'a str,
    pub namespace: &'a str,
}

pub struct AccessPolicy {
    default_allow: bool,
    rules: Vec<Program>,
}

impl AccessPolicy {
    pub fn new(config: &RepositoryAccessPolicyConfig) -> Result<Self, ConfigError> {
        let mut compiled_rules = Vec::new();

        for (index, rule) in config.rules.iter().enumerate() {
            match Program::compile(rule) {
                Ok(program) => compiled_rules.push(program),
                Err(e) => {
                    return Err(ConfigError::PolicyCompilation(format!(
                        "Failed to compile access policy rule #{} '{}': {}",
                        index + 1,
                        rule,
                        e
                    )));
                }
            }
        }

        Ok(Self {
            default_allow: config.default_allow,
            rules: compiled_rules,
        })
    }

    /// Returns whether `identity` may perform `request`.
    pub fn evaluate(
        &self,
        request: &AccessRequest,
        identity: &ClientIdentity,
    ) -> Result<bool, Error> {
        if self.rules.is_empty() {
            return Ok(self.default_allow);
        }

        let context = Self::build_context(request, identity)?;

        for (index, rule) in self.rules.iter().enumerate() {
            let rule_index = index + 1;
            match rule.execute(&context) {
                Ok(Value::Bool(true)) => {
                    debug!("Access policy rule #{rule_index} matched");
                    return Ok(!self.default_allow);
                }
                Ok(Value::Bool(false)) => {}
                Ok(value) if self.default_allow => {
                    warn!("Access policy deny rule #{rule_index} returned non-boolean value: {value:?}, treating as deny");
                    return Ok(false);
                }
                Ok(value) => {
                    warn!("Access policy allow rule #{rule_index} returned non-boolean value: {value:?}, skipping rule");
                }
                Err(e) => {
                    warn!("Access policy rule #{rule_index} evaluation failed: {e}, skipping rule");
                }
            }
        }

        Ok(self.default_allow)
    }

    fn build_context<'a>(
        request: &'a AccessRequest,
        identity: &'a ClientIdentity,
    ) -> Result<Context<'a>, Error> {
        let mut context = Context::default();
        context
            .add_variable("request", request)
            .map_err(|e| Error::Internal(format!("Unable to expose request to policy: {e}")))?;
        context
            .add_variable("identity", identity)
            .map_err(|e| Error::Internal(format!("Unable to expose identity to policy: {e}")))?;
        Ok(context)
    }
}
