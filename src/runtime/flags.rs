//! Skill-flag resolution: role defaults ∪ overrides ∖ exclusions, unioning
//! flags from skills whose declared runtime matches the session's.

use std::collections::HashSet;

use crate::model::RuntimeType;

/// A reusable capability a role can be granted, carrying the CLI flags it
/// contributes for a given runtime.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub runtime: RuntimeType,
    pub flags: Vec<String>,
}

/// Computes the effective skill set for a role, then unions the flags of
/// every skill declared for `runtime_type`.
///
/// `role_defaults` and `overrides` are skill names; `exclusions` removes
/// names from the union of the two before flags are resolved.
pub fn resolve_skill_flags(
    role_defaults: &[String],
    overrides: &[String],
    exclusions: &[String],
    catalog: &[Skill],
    runtime_type: RuntimeType,
) -> Vec<String> {
    let excluded: HashSet<&str> = exclusions.iter().map(String::as_str).collect();
    let effective: HashSet<&str> = role_defaults
        .iter()
        .chain(overrides.iter())
        .map(String::as_str)
        .filter(|name| !excluded.contains(name))
        .collect();

    let mut flags = Vec::new();
    let mut seen = HashSet::new();
    for skill in catalog {
        if skill.runtime != runtime_type || !effective.contains(skill.name.as_str()) {
            continue;
        }
        for flag in &skill.flags {
            if seen.insert(flag.clone()) {
                flags.push(flag.clone());
            }
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Skill> {
        vec![
            Skill {
                name: "web-search".to_string(),
                runtime: RuntimeType::ClaudeCode,
                flags: vec!["--allow-tool".to_string(), "WebSearch".to_string()],
            },
            Skill {
                name: "shell".to_string(),
                runtime: RuntimeType::ClaudeCode,
                flags: vec!["--allow-tool".to_string(), "Bash".to_string()],
            },
            Skill {
                name: "gemini-only".to_string(),
                runtime: RuntimeType::GeminiCli,
                flags: vec!["--sandbox".to_string()],
            },
        ]
    }

    #[test]
    fn unions_default_and_override_flags_for_matching_runtime() {
        let flags = resolve_skill_flags(
            &["web-search".to_string()],
            &["shell".to_string()],
            &[],
            &catalog(),
            RuntimeType::ClaudeCode,
        );
        assert_eq!(
            flags,
            vec![
                "--allow-tool".to_string(),
                "WebSearch".to_string(),
                "Bash".to_string()
            ]
        );
    }

    #[test]
    fn exclusions_remove_from_effective_set() {
        let flags = resolve_skill_flags(
            &["web-search".to_string(), "shell".to_string()],
            &[],
            &["shell".to_string()],
            &catalog(),
            RuntimeType::ClaudeCode,
        );
        assert!(!flags.contains(&"Bash".to_string()));
    }

    #[test]
    fn skills_for_other_runtimes_are_ignored() {
        let flags = resolve_skill_flags(
            &["gemini-only".to_string()],
            &[],
            &[],
            &catalog(),
            RuntimeType::ClaudeCode,
        );
        assert!(flags.is_empty());
    }
}
