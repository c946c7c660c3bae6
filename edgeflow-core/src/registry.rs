//! Stage Library Registry
//!
//! Maps `(library, stage_name)` keys to stage factories. The process-wide
//! [`GLOBAL_REGISTRY`] is filled by explicit registration at startup
//! (`stages::register_basic_stages()` here, `register_all()` in the
//! connectors crate) and read afterwards. Registering a key twice keeps the
//! last factory.
//!
//! Every factory call returns a freshly constructed, uninitialised stage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::debug;

use crate::errors::RegistryError;
use crate::stage::Stage;

/// Factory producing a new stage instance
pub type StageFactory = fn() -> Stage;

/// Registration key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKey {
    /// Library the stage belongs to (e.g. `edgeflow-basic-lib`)
    pub library: String,
    /// Stage name within the library
    pub stage_name: String,
}

impl StageKey {
    /// Build a key
    pub fn new(library: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            stage_name: stage_name.into(),
        }
    }
}

/// Thread-safe factory table
#[derive(Default)]
pub struct StageRegistry {
    factories: RwLock<HashMap<StageKey, StageFactory>>,
}

impl StageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; replaces an earlier registration of the same key
    pub fn register(&self, library: &str, stage_name: &str, factory: StageFactory) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories
            .insert(StageKey::new(library, stage_name), factory)
            .is_some()
        {
            debug!("replaced stage factory {}:{}", library, stage_name);
        }
    }

    /// Instantiate a stage, or report the unknown key
    pub fn try_create_stage(&self, library: &str, stage_name: &str) -> Result<Stage, RegistryError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&StageKey::new(library, stage_name))
            .copied();
        match factory {
            Some(factory) => Ok(factory()),
            None => Err(RegistryError::UnknownStage {
                library: library.to_string(),
                stage_name: stage_name.to_string(),
            }),
        }
    }

    /// Instantiate a stage
    ///
    /// # Panics
    ///
    /// Panics when no factory is registered under the key.
    pub fn create_stage(&self, library: &str, stage_name: &str) -> Stage {
        match self.try_create_stage(library, stage_name) {
            Ok(stage) => stage,
            Err(err) => panic!("{}", err),
        }
    }

    /// Whether a factory is registered under the key
    pub fn contains(&self, library: &str, stage_name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&StageKey::new(library, stage_name))
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<StageKey> {
        let mut keys: Vec<_> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

lazy_static::lazy_static! {
    /// Process-wide stage registry
    pub static ref GLOBAL_REGISTRY: StageRegistry = StageRegistry::new();
}

/// Register a factory in the global registry
pub fn register(library: &str, stage_name: &str, factory: StageFactory) {
    GLOBAL_REGISTRY.register(library, stage_name, factory);
}

/// Instantiate a stage from the global registry
///
/// # Panics
///
/// Panics when no factory is registered under the key.
pub fn create_stage(library: &str, stage_name: &str) -> Stage {
    GLOBAL_REGISTRY.create_stage(library, stage_name)
}

/// Instantiate a stage from the global registry, or report the unknown key
pub fn try_create_stage(library: &str, stage_name: &str) -> Result<Stage, RegistryError> {
    GLOBAL_REGISTRY.try_create_stage(library, stage_name)
}

/// Keys registered in the global registry
pub fn registered_stages() -> Vec<StageKey> {
    GLOBAL_REGISTRY.keys()
}
