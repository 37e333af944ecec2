//! Registry of session classes instantiated by name.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use sharing_core::Session;

type SessionFactory = Arc<dyn Fn() -> Box<dyn Session> + Send + Sync>;

/// Maps a class name (e.g. `"WfdSinkSession"`) to a session constructor.
#[derive(Default, Clone)]
pub struct SessionRegistry {
    factories: Arc<RwLock<HashMap<String, SessionFactory>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `class_name`, replacing any previous one.
    pub fn register<F>(&self, class_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Session> + Send + Sync + 'static,
    {
        let class_name = class_name.into();
        tracing::debug!("Registering session class {class_name}");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class_name, Arc::new(factory));
    }

    /// Instantiate a session, or `None` if the class is unknown.
    #[must_use]
    pub fn create(&self, class_name: &str) -> Option<Box<dyn Session>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()?;
        Some(factory())
    }

    #[must_use]
    pub fn contains(&self, class_name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(class_name)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SessionRegistry")
            .field("classes", &factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
