use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::Provider;

/// Canonical lowercase-tag -> adapter lookup.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(canonical_tag(provider.name()), provider);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(&canonical_tag(tag)).cloned()
    }
}

pub fn canonical_tag(tag: &str) -> String {
    tag.to_ascii_lowercase()
}
