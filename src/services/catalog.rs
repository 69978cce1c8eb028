//! Plan catalog

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// A service plan as resolved from the catalog
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Plan {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub service_id: String,

    /// Base URL of the executor serving this plan; falls back to the
    /// operator-wide service endpoint when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Plan lookup
pub trait Catalog: Send + Sync {
    fn get_plan(&self, plan_id: &str) -> Result<Plan>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    plans: Vec<Plan>,
}

/// Catalog loaded once from a YAML document of the form `plans: [...]`
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    plans: HashMap<String, Plan>,
}

impl StaticCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn from_yaml(document: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(document)?;
        Ok(Self::new(file.plans))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&document)?;
        info!(path = %path.display(), plans = catalog.plans.len(), "Loaded plan catalog");
        Ok(catalog)
    }
}

impl Catalog for StaticCatalog {
    fn get_plan(&self, plan_id: &str) -> Result<Plan> {
        self.plans
            .get(plan_id)
            .cloned()
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_plans_from_yaml() {
        let catalog = StaticCatalog::from_yaml(
            r#"
plans:
  - id: p-small
    name: small
    service_id: postgres
    endpoint: http://postgres-broker:9293
  - id: p-large
"#,
        )
        .unwrap();

        let plan = catalog.get_plan("p-small").unwrap();
        assert_eq!(plan.service_id, "postgres");
        assert_eq!(plan.endpoint.as_deref(), Some("http://postgres-broker:9293"));
        assert!(catalog.get_plan("p-large").unwrap().endpoint.is_none());
    }

    #[test]
    fn test_unknown_plan() {
        let catalog = StaticCatalog::default();
        assert!(matches!(
            catalog.get_plan("missing"),
            Err(Error::PlanNotFound(id)) if id == "missing"
        ));
    }
}
