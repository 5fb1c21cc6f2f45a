use std::collections::HashMap;
use std::sync::Arc;

use trellis_types::command::CommandName;

use crate::handler::CommandHandler;

/// Static map from command kind to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandName, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler under its own name, returning any handler it replaced.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.insert(handler.name(), handler)
    }

    pub fn get(&self, name: CommandName) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name).cloned()
    }

    pub fn contains(&self, name: CommandName) -> bool {
        self.handlers.contains_key(&name)
    }

    /// Registered names, in declaration order of [`CommandName`].
    pub fn names(&self) -> Vec<CommandName> {
        let mut names: Vec<CommandName> = self.handlers.keys().copied().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use crate::handler::CommandOutcome;
    use async_trait::async_trait;
    use trellis_types::command::Command;

    struct Named(CommandName);

    #[async_trait]
    impl CommandHandler for Named {
        fn name(&self) -> CommandName {
            self.0
        }

        async fn execute(&self, _command: &Command) -> Result<CommandOutcome, CommandError> {
            Ok(CommandOutcome::Empty)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(registry
            .register(Arc::new(Named(CommandName::ParanetSync)))
            .is_none());
        assert!(registry
            .register(Arc::new(Named(CommandName::LocalGet)))
            .is_none());
        assert!(registry
            .register(Arc::new(Named(CommandName::LocalGet)))
            .is_some());

        assert!(registry.contains(CommandName::LocalGet));
        assert!(registry.get(CommandName::NetworkGet).is_none());
        assert_eq!(
            registry.names(),
            vec![CommandName::LocalGet, CommandName::ParanetSync]
        );
    }
}
