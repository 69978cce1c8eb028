//! Generic watch-driven engines
//!
//! [`OperatorRunner`] dispatches state changes to an [`Operator`];
//! [`PollerRunner`] keeps one timer per resource in a polled state and drives a
//! [`StatusPoller`]. Kind-specific behaviour lives in `reconcilers`.

mod operator;
mod poller;

pub use operator::{Operator, OperatorRunner};
pub use poller::{PollerHandle, PollerRegistry, PollerRunner, StatusPoller};

use std::sync::Arc;

use crate::director::DirectorClient;
use crate::services::{Catalog, ServiceFactory};
use crate::store::ResourceStore;

/// Shared context for all operators and pollers
#[derive(Clone)]
pub struct Context {
    /// Resource store client
    pub store: Arc<dyn ResourceStore>,
    /// Plan catalog
    pub catalog: Arc<dyn Catalog>,
    /// Service executor factory
    pub services: Arc<dyn ServiceFactory>,
    /// Director task client
    pub director: Arc<dyn DirectorClient>,
}

impl Context {
    /// Create a new context
    pub fn new(
        store: Arc<dyn ResourceStore>,
        catalog: Arc<dyn Catalog>,
        services: Arc<dyn ServiceFactory>,
        director: Arc<dyn DirectorClient>,
    ) -> Self {
        Self {
            store,
            catalog,
            services,
            director,
        }
    }
}
