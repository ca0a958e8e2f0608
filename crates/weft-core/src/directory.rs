use std::collections::HashMap;

use crate::config::AgentProfileConfig;
use crate::traits::AgentDirectory;
use crate::types::AgentProfile;

/// Built-in agent profiles: (agent_type, display name, Chinese name, description).
const BUILTIN_AGENTS: &[(&str, &str, &str, &str)] = &[
    ("coordinator", "Coordinator", "协调者", "Breaks the mission down and keeps agents aligned"),
    ("researcher", "Researcher", "研究员", "Gathers sources and background material"),
    ("analyst", "Analyst", "分析师", "Turns gathered material into findings"),
    ("validator", "Validator", "验证者", "Checks findings for consistency and gaps"),
    ("reporter", "Reporter", "报告员", "Writes the final mission report"),
    ("writer", "Writer", "撰稿人", "Drafts long-form content"),
    ("coder", "Coder", "程序员", "Writes and reviews code"),
    ("critic", "Critic", "评论家", "Challenges assumptions and conclusions"),
    ("planner", "Planner", "规划师", "Produces step-by-step plans"),
    ("data_engineer", "Data Engineer", "数据工程师", "Prepares and transforms datasets"),
];

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// In-process agent directory: built-ins plus user overrides.
pub struct AgentCatalog {
    profiles: HashMap<String, AgentProfile>,
    order: Vec<String>,
}

impl AgentCatalog {
    /// Catalog of built-in profiles only.
    pub fn builtin() -> Self {
        let mut catalog = Self {
            profiles: HashMap::new(),
            order: Vec::new(),
        };
        for (agent_type, name, name_cn, description) in BUILTIN_AGENTS {
            catalog.insert(AgentProfile {
                agent_type: agent_type.to_string(),
                display_name: name.to_string(),
                display_name_cn: Some(name_cn.to_string()),
                default_model: Some(DEFAULT_MODEL.to_string()),
                description: description.to_string(),
            });
        }
        catalog
    }

    /// Built-ins overridden by customized profiles from config.
    pub fn with_overrides(custom: &[AgentProfileConfig]) -> Self {
        let mut catalog = Self::builtin();
        for c in custom {
            catalog.insert(AgentProfile {
                agent_type: c.agent_type.clone(),
                display_name: c.display_name.clone(),
                display_name_cn: c.display_name_cn.clone(),
                default_model: c.default_model.clone(),
                description: c.description.clone(),
            });
        }
        catalog
    }

    /// Insert or replace a profile keyed by `agent_type`.
    pub fn insert(&mut self, profile: AgentProfile) {
        if !self.profiles.contains_key(&profile.agent_type) {
            self.order.push(profile.agent_type.clone());
        }
        self.profiles.insert(profile.agent_type.clone(), profile);
    }
}

impl AgentDirectory for AgentCatalog {
    fn resolve(&self, agent_type: &str) -> Option<AgentProfile> {
        self.profiles.get(agent_type).cloned()
    }

    fn profiles(&self) -> Vec<AgentProfile> {
        self.order
            .iter()
            .filter_map(|t| self.profiles.get(t).cloned())
            .collect()
    }
}

impl Default for AgentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_resolves_canonical_roles() {
        let catalog = AgentCatalog::builtin();
        for t in ["coordinator", "researcher", "analyst", "validator", "reporter"] {
            assert!(catalog.resolve(t).is_some(), "missing {}", t);
        }
        assert_eq!(
            catalog.resolve("analyst").unwrap().display_name_cn.as_deref(),
            Some("分析师")
        );
        assert!(catalog.resolve("astrologer").is_none());
    }

    #[test]
    fn test_override_replaces_builtin_in_place() {
        let custom = vec![AgentProfileConfig {
            agent_type: "researcher".into(),
            display_name: "Deep Researcher".into(),
            display_name_cn: None,
            default_model: Some("o3".into()),
            description: String::new(),
        }];
        let catalog = AgentCatalog::with_overrides(&custom);
        let profile = catalog.resolve("researcher").unwrap();
        assert_eq!(profile.display_name, "Deep Researcher");
        assert_eq!(profile.default_model.as_deref(), Some("o3"));
        assert_eq!(catalog.profiles().len(), BUILTIN_AGENTS.len());
        assert_eq!(catalog.profiles()[1].agent_type, "researcher");
    }

    #[test]
    fn test_display_name_falls_back_to_type() {
        let catalog = AgentCatalog::builtin();
        assert_eq!(catalog.display_name("coder"), "Coder");
        assert_eq!(catalog.display_name("mystery"), "mystery");
    }
}
