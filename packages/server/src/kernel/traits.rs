// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Naming convention: Base* for trait names.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::TemplateId;
use crate::domains::templates::TemplateDefinition;

// =============================================================================
// Template Catalog Trait (owned by the template-management layer)
// =============================================================================

/// Source of weekly template definitions.
///
/// The core never writes templates; it only reads the slot list it is asked
/// to materialize. `Ok(None)` means the template does not exist.
#[async_trait]
pub trait BaseTemplateCatalog: Send + Sync {
    async fn load_template(&self, template_id: TemplateId) -> Result<Option<TemplateDefinition>>;
}
