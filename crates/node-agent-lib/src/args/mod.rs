//! Runtime argument synthesis for the kubelet and kube-proxy
//!
//! Arguments are produced from an [`AgentConfig`](crate::models::AgentConfig)
//! by evaluating an ordered table of rules. Each rule has a predicate and an
//! emitter; the engine records which rule wrote which key so that two rules
//! writing the same key are reported as a conflict after the build.

mod host;
mod kube_proxy;
mod kubelet;

#[cfg(test)]
mod tests;

pub use host::{DefaultRouteInterface, HostInterface};
pub use kube_proxy::{kube_proxy_args, kube_proxy_base_args, KubeProxyArgs};
pub use kubelet::{add_feature_gate, kubelet_args, KubeletContext};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::error;

/// Mapping from runtime argument name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgumentMap {
    args: BTreeMap<String, String>,
}

impl ArgumentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an argument, returning the previous value if any
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.args.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `--key=value` flags, sorted by key
    pub fn to_flags(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|(k, v)| format!("--{}={}", k, v))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArgumentMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            args: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Two rules wrote the same argument during one synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConflict {
    pub key: &'static str,
    pub first: &'static str,
    pub second: &'static str,
}

/// One entry of a rule table
///
/// `emit` sees the arguments built so far, which lets a rule merge into a
/// seeded default (feature gates) or skip keys that are already present.
pub(crate) struct Rule<C> {
    pub name: &'static str,
    pub applies: fn(&C) -> bool,
    pub emit: fn(&C, &ArgumentMap) -> Vec<(&'static str, String)>,
}

/// Result of evaluating a rule table
#[derive(Debug)]
pub(crate) struct RuleOutcome {
    pub args: ArgumentMap,
    pub conflicts: Vec<RuleConflict>,
}

impl RuleOutcome {
    /// Log every conflict and hand back the arguments
    pub fn into_args(self, component: &str) -> ArgumentMap {
        for conflict in &self.conflicts {
            error!(
                component = %component,
                key = %conflict.key,
                first_rule = %conflict.first,
                second_rule = %conflict.second,
                "Conflicting argument rules wrote the same key"
            );
        }
        self.args
    }
}

/// Evaluate `rules` in order on top of `defaults`
///
/// Defaults are not owned by any rule, so a single rule may override them.
pub(crate) fn apply_rules<C>(defaults: ArgumentMap, rules: &[Rule<C>], ctx: &C) -> RuleOutcome {
    let mut args = defaults;
    let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
    let mut conflicts = Vec::new();

    for rule in rules {
        if !(rule.applies)(ctx) {
            continue;
        }

        for (key, value) in (rule.emit)(ctx, &args) {
            if let Some(first) = owners.insert(key, rule.name) {
                if first != rule.name {
                    conflicts.push(RuleConflict {
                        key,
                        first,
                        second: rule.name,
                    });
                }
            }
            args.insert(key, value);
        }
    }

    RuleOutcome { args, conflicts }
}
