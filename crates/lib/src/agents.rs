//! Agent registry: the fixed set of agent personas the widget can talk to.
//!
//! Each agent key maps to an immutable profile (remote id sent to the backend,
//! display title, welcome message, initial suggestions). Profiles are built once
//! at startup from compiled-in defaults plus optional config overrides.

use crate::config::{AgentOverride, AgentsConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Key of an agent persona. Closed set.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentKey {
    /// Active when the widget opens.
    #[default]
    Support,
    Sales,
}

impl AgentKey {
    pub const ALL: [AgentKey; 2] = [AgentKey::Support, AgentKey::Sales];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKey::Support => "support",
            AgentKey::Sales => "sales",
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent: {0}")]
pub struct UnknownAgent(pub String);

impl FromStr for AgentKey {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "support" => Ok(AgentKey::Support),
            "sales" => Ok(AgentKey::Sales),
            other => Err(UnknownAgent(other.to_string())),
        }
    }
}

/// Identity of one agent persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub key: AgentKey,
    /// Opaque id sent to the backend as `agent_id`.
    pub remote_id: String,
    pub display_title: String,
    pub welcome_text: String,
    pub initial_suggestions: Vec<String>,
}

impl AgentProfile {
    /// Compiled-in profile for a key.
    pub fn builtin(key: AgentKey) -> Self {
        match key {
            AgentKey::Support => Self {
                key,
                remote_id: "support-agent".to_string(),
                display_title: "Amadeo Support".to_string(),
                welcome_text: "Hi! I'm the Amadeo support assistant. How can I help you today?"
                    .to_string(),
                initial_suggestions: vec![
                    "What is Amadeo?".to_string(),
                    "How do I reset my password?".to_string(),
                    "How can I contact a human?".to_string(),
                ],
            },
            AgentKey::Sales => Self {
                key,
                remote_id: "sales-agent".to_string(),
                display_title: "Amadeo Sales".to_string(),
                welcome_text:
                    "Hello! I can help you find the right Amadeo plan. What are you looking for?"
                        .to_string(),
                initial_suggestions: vec![
                    "What plans do you offer?".to_string(),
                    "Is there a free trial?".to_string(),
                    "Can I get a demo?".to_string(),
                ],
            },
        }
    }

    /// Apply non-empty override fields on top of this profile.
    fn with_override(mut self, o: &AgentOverride) -> Self {
        if let Some(id) = non_empty(o.remote_id.as_deref()) {
            self.remote_id = id;
        }
        if let Some(title) = non_empty(o.display_title.as_deref()) {
            self.display_title = title;
        }
        if let Some(welcome) = non_empty(o.welcome_text.as_deref()) {
            self.welcome_text = welcome;
        }
        if let Some(ref suggestions) = o.initial_suggestions {
            self.initial_suggestions = suggestions
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        self
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Immutable key -> profile map. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    profiles: Arc<BTreeMap<AgentKey, AgentProfile>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AgentRegistry {
    /// Registry with compiled-in profiles only.
    pub fn builtin() -> Self {
        Self::from_config(&AgentsConfig::default())
    }

    /// Registry with config overrides applied to the compiled-in profiles.
    pub fn from_config(agents: &AgentsConfig) -> Self {
        let profiles = AgentKey::ALL
            .iter()
            .map(|&key| {
                let base = AgentProfile::builtin(key);
                let profile = match agents.get(key) {
                    Some(o) => base.with_override(o),
                    None => base,
                };
                (key, profile)
            })
            .collect();
        Self {
            profiles: Arc::new(profiles),
        }
    }

    /// Every key has a profile, so lookup by key is infallible.
    pub fn profile(&self, key: AgentKey) -> &AgentProfile {
        &self.profiles[&key]
    }

    /// Resolve a key by its string name (e.g. from the wire).
    pub fn resolve(&self, name: &str) -> Result<&AgentProfile, UnknownAgent> {
        let key: AgentKey = name.parse()?;
        Ok(self.profile(key))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &AgentProfile> {
        self.profiles.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_agent_key_is_case_insensitive() {
        assert_eq!("Support".parse::<AgentKey>(), Ok(AgentKey::Support));
        assert_eq!(" sales ".parse::<AgentKey>(), Ok(AgentKey::Sales));
        assert!("billing".parse::<AgentKey>().is_err());
    }

    #[test]
    fn builtin_registry_has_every_key() {
        let registry = AgentRegistry::builtin();
        for key in AgentKey::ALL {
            let p = registry.profile(key);
            assert_eq!(p.key, key);
            assert!(!p.remote_id.is_empty());
            assert!(!p.welcome_text.trim().is_empty());
            assert!(!p.initial_suggestions.is_empty());
        }
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let mut agents = AgentsConfig::default();
        agents.sales = Some(AgentOverride {
            remote_id: Some("sales-v2".to_string()),
            display_title: Some("   ".to_string()),
            welcome_text: None,
            initial_suggestions: Some(vec!["".to_string(), " Pricing? ".to_string()]),
        });
        let registry = AgentRegistry::from_config(&agents);
        let sales = registry.profile(AgentKey::Sales);
        assert_eq!(sales.remote_id, "sales-v2");
        assert_eq!(sales.display_title, "Amadeo Sales");
        assert_eq!(sales.initial_suggestions, vec!["Pricing?".to_string()]);
        assert_eq!(
            registry.profile(AgentKey::Support),
            &AgentProfile::builtin(AgentKey::Support)
        );
    }

    #[test]
    fn resolve_unknown_agent_errors() {
        let registry = AgentRegistry::builtin();
        assert_eq!(
            registry.resolve("billing").unwrap_err(),
            UnknownAgent("billing".to_string())
        );
        assert_eq!(registry.resolve("SALES").unwrap().key, AgentKey::Sales);
    }
}
