//! Server dependencies for the core operations.
//!
//! Every orchestration function takes `&ServerDeps` as its last argument.
//! External collaborators sit behind traits so tests can swap them.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::kernel::database::connect_pool;
use crate::domains::templates::PgTemplateCatalog;
use crate::kernel::{BaseTemplateCatalog, OpContext};

#[derive(Clone)]
pub struct ServerDeps {
    pub db_pool: PgPool,
    pub template_catalog: Arc<dyn BaseTemplateCatalog>,
    pub config: Arc<Config>,
}

impl ServerDeps {
    pub fn new(
        db_pool: PgPool,
        template_catalog: Arc<dyn BaseTemplateCatalog>,
        config: Config,
    ) -> Self {
        Self {
            db_pool,
            template_catalog,
            config: Arc::new(config),
        }
    }

    /// Dependencies reading templates from the same database.
    pub fn with_postgres_catalog(db_pool: PgPool, config: Config) -> Self {
        let catalog = Arc::new(PgTemplateCatalog::new(db_pool.clone()));
        Self::new(db_pool, catalog, config)
    }

    /// Connects a pool sized from `config`.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = connect_pool(&config).await?;
        Ok(Self::with_postgres_catalog(pool, config))
    }

    /// A fresh context carrying the configured default deadline.
    pub fn op_context(&self) -> OpContext {
        match self.config.operation_timeout {
            Some(timeout) => OpContext::with_timeout(timeout),
            None => OpContext::background(),
        }
    }
}
