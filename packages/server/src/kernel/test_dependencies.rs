// Test doubles for kernel traits
//
// In-memory implementations that can be injected into ServerDeps for tests
// and local tooling.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::BaseTemplateCatalog;
use crate::common::TemplateId;
use crate::domains::templates::TemplateDefinition;

// =============================================================================
// Static Template Catalog
// =============================================================================

/// Template catalog backed by a map, for tests that do not want to seed the
/// template tables.
#[derive(Clone, Default)]
pub struct StaticTemplateCatalog {
    templates: Arc<Mutex<HashMap<TemplateId, TemplateDefinition>>>,
    load_calls: Arc<Mutex<Vec<TemplateId>>>,
}

impl StaticTemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, definition: TemplateDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&self, definition: TemplateDefinition) {
        self.templates
            .lock()
            .unwrap()
            .insert(definition.template_id, definition);
    }

    /// Template ids requested so far, in call order.
    pub fn load_calls(&self) -> Vec<TemplateId> {
        self.load_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseTemplateCatalog for StaticTemplateCatalog {
    async fn load_template(&self, template_id: TemplateId) -> Result<Option<TemplateDefinition>> {
        self.load_calls.lock().unwrap().push(template_id);
        Ok(self.templates.lock().unwrap().get(&template_id).cloned())
    }
}
