//! The generator plugin contract. A generation config is plain text whose
//! first line names a registered generator; everything after the first
//! line is passed through as the generator's own parameter block.
//! Generators are trusted, operator-supplied code — there is no sandbox
//! around them.

use std::collections::HashMap;
use std::sync::Arc;

use derive_more::derive::Display;

use crate::models::{FlagSpec, Task};

/// Config every task falls back to when neither it nor its group chain
/// carries one.
pub const DEFAULT_CONFIG: &str = "noop\n";

/// Placeholder the `subst` generator replaces with the generation token.
pub const TOKEN_PLACEHOLDER: &str = "{{token}}";

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[display("generation config is empty")]
    EmptyConfig,
    #[display("unknown generator {_0:?}")]
    UnknownGenerator(String),
    #[display("{_0}")]
    Failed(String),
}

/// A per-task generation routine: takes the raw task definition and the
/// team's token, returns the team-specific variant. Implementations must
/// be deterministic in (task, token) so racing regenerations are
/// equivalent.
pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, task: Task, token: &str, params: &str) -> Result<Task, GeneratorError>;
}

pub struct GeneratorRegistry {
    by_name: HashMap<&'static str, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Noop));
        registry.register(Arc::new(Subst));
        registry
    }

    /// Later registrations shadow earlier ones of the same name.
    pub fn register(&mut self, generator: Arc<dyn Generator>) {
        self.by_name.insert(generator.name(), generator);
    }

    /// Splits a config into (generator, params) by its first line.
    pub fn resolve(
        &self,
        config: &str,
    ) -> Result<(Arc<dyn Generator>, String), GeneratorError> {
        let (head, params) = config.split_once('\n').unwrap_or((config, ""));
        let name = head.trim();
        if name.is_empty() {
            return Err(GeneratorError::EmptyConfig);
        }
        match self.by_name.get(name) {
            Some(generator) => Ok((Arc::clone(generator), params.to_string())),
            None => Err(GeneratorError::UnknownGenerator(name.to_string())),
        }
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Serves the task definition unchanged. Every team sees the same content,
/// but instances are still cached per token.
pub struct Noop;

impl Generator for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn generate(&self, task: Task, _token: &str, _params: &str) -> Result<Task, GeneratorError> {
        Ok(task)
    }
}

/// Substitutes the generation token into the task body, flag data and hint
/// texts, so otherwise identical definitions yield team-unique flags.
pub struct Subst;

impl Generator for Subst {
    fn name(&self) -> &'static str {
        "subst"
    }

    fn generate(
        &self,
        mut task: Task,
        token: &str,
        _params: &str,
    ) -> Result<Task, GeneratorError> {
        task.text = task.text.replace(TOKEN_PLACEHOLDER, token);
        for flag in &mut task.flags {
            match flag {
                FlagSpec::String(data) | FlagSpec::Regex(data) | FlagSpec::Program(data) => {
                    *data = data.replace(TOKEN_PLACEHOLDER, token)
                }
            }
        }
        for hint in &mut task.hints {
            hint.text = hint.text.replace(TOKEN_PLACEHOLDER, token);
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Seed;

    fn task() -> Task {
        Task {
            id: 1,
            title: "Title".into(),
            text: "Find {{token}} in the haystack".into(),
            value: 100,
            labels: Default::default(),
            flags: vec![FlagSpec::String("FLAG{{{token}}}".into())],
            group: 0,
            order: 0,
            seed: Seed::Literal("0000000000000000".into()),
            hints: vec![],
        }
    }

    #[test]
    fn registry_resolves_by_first_line() {
        let registry = GeneratorRegistry::with_builtins();
        let (generator, params) = registry.resolve("noop\n").unwrap();
        assert_eq!(generator.name(), "noop");
        assert_eq!(params, "");

        let (generator, params) = registry.resolve("subst\nkey=value\n").unwrap();
        assert_eq!(generator.name(), "subst");
        assert_eq!(params, "key=value\n");

        assert_eq!(
            registry.resolve("teleport\n").err(),
            Some(GeneratorError::UnknownGenerator("teleport".into()))
        );
        assert_eq!(registry.resolve("\n").err(), Some(GeneratorError::EmptyConfig));
    }

    #[test]
    fn noop_returns_the_task_unchanged() {
        let generated = Noop.generate(task(), "deadbeef", "").unwrap();
        assert_eq!(generated.text, "Find {{token}} in the haystack");
        assert_eq!(generated.flags, task().flags);
    }

    #[test]
    fn subst_embeds_the_token() {
        let generated = Subst.generate(task(), "deadbeef", "").unwrap();
        assert_eq!(generated.text, "Find deadbeef in the haystack");
        assert_eq!(
            generated.flags,
            vec![FlagSpec::String("FLAG{deadbeef}".into())]
        );

        // Distinct tokens give distinct flags.
        let other = Subst.generate(task(), "cafecafe", "").unwrap();
        assert_ne!(generated.flags, other.flags);
    }
}
