//! Module registry for the enrichment scheduler.

use fsindex_core::{EnrichmentModule, ModuleError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::tika::TikaModule;
use crate::whisper::WhisperModule;

/// Connection settings for one module.
#[derive(Debug, Clone)]
pub struct ModuleSettings {
    /// Base URL of the module's service
    pub url: String,
    pub max_workers: usize,
    pub request_timeout: Duration,
    /// Model name, for modules that take one
    pub model: Option<String>,
}

/// The modules fsindex knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Tika,
    Whisper,
}

impl ModuleKind {
    /// Every kind, in scheduling order.
    pub const ALL: [ModuleKind; 2] = [ModuleKind::Tika, ModuleKind::Whisper];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tika => "tika",
            Self::Whisper => "whisper",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Construct the module.
    pub fn build(self, settings: &ModuleSettings) -> Result<Arc<dyn EnrichmentModule>, ModuleError> {
        Ok(match self {
            Self::Tika => Arc::new(TikaModule::new(settings)?),
            Self::Whisper => Arc::new(WhisperModule::new(settings)?),
        })
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered list of enrichment modules.
///
/// Modules run in registration order each cycle.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn EnrichmentModule>>,
}

impl ModuleRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A module with the same name is replaced in place.
    pub fn register(&mut self, module: Arc<dyn EnrichmentModule>) {
        match self.modules.iter().position(|m| m.name() == module.name()) {
            Some(index) => self.modules[index] = module,
            None => self.modules.push(module),
        }
    }

    /// Build and register a known module.
    pub fn register_kind(
        &mut self,
        kind: ModuleKind,
        settings: &ModuleSettings,
    ) -> Result<(), ModuleError> {
        self.register(kind.build(settings)?);
        Ok(())
    }

    #[must_use]
    pub fn modules(&self) -> &[Arc<dyn EnrichmentModule>] {
        &self.modules
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn EnrichmentModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    /// Modules that accept files of `mime_type`.
    pub fn qualifying<'a>(
        &'a self,
        mime_type: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn EnrichmentModule>> + 'a {
        self.modules.iter().filter(move |m| m.supports(mime_type))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
