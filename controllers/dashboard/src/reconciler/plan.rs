//! Pure set computations for a namespace pass.

use crate::registry::RegistryEntry;
use crds::GrafanaDashboard;
use kube::ResourceExt;

/// Registry entries whose dashboard is no longer present in the listing
pub fn deletions(known: &[RegistryEntry], desired: &[GrafanaDashboard]) -> Vec<RegistryEntry> {
    known
        .iter()
        .filter(|entry| !in_listing(desired, entry))
        .cloned()
        .collect()
}

/// Entry recorded for `(namespace, name)`, if the dashboard was applied before
pub fn known_entry<'a>(known: &'a [RegistryEntry], namespace: &str, name: &str) -> Option<&'a RegistryEntry> {
    known
        .iter()
        .find(|entry| entry.namespace == namespace && entry.name == name)
}

/// Whether the listing still contains the dashboard behind `entry`
pub fn in_listing(desired: &[GrafanaDashboard], entry: &RegistryEntry) -> bool {
    desired
        .iter()
        .any(|d| d.name_any() == entry.name && d.namespace().as_deref() == Some(entry.namespace.as_str()))
}
