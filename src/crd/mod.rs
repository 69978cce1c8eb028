//! Custom resource model for the service broker operators

mod definitions;
mod resource;
mod restore_options;
mod state;

pub use definitions::crd_for;
pub use resource::*;
pub use restore_options::*;
pub use state::*;

/// Every resource kind the operators register
pub const ALL_KINDS: [ResourceKind; 6] = [
    ResourceKind::DEFAULT_BACKUP,
    ResourceKind::DEFAULT_RESTORE,
    ResourceKind::DEFAULT_BOSH_RESTORE,
    ResourceKind::VIRTUALHOST_BIND,
    ResourceKind::DIRECTOR,
    ResourceKind::SFEVENT,
];

/// Generate all CRD YAML manifests
pub fn generate_crds() -> crate::Result<Vec<String>> {
    ALL_KINDS
        .iter()
        .map(|kind| Ok(serde_yaml::to_string(&crd_for(kind)?)?))
        .collect()
}
