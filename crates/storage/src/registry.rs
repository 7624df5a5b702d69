use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::provider::StorageProvider;

/// Storage providers addressed by logical name.
///
/// Built once at start-up and then shared read-only.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn StorageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn StorageProvider>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            bail!("storage provider name is empty");
        }
        if self.providers.contains_key(&name) {
            bail!("storage provider {name:?} registered twice");
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn StorageProvider>) -> Result<Self> {
        self.register(name, provider)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.providers.iter().map(|(name, p)| (name, p.kind())))
            .finish()
    }
}
