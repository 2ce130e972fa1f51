//! Prints the CRD manifests as YAML, ready for `kubectl apply -f -`.

use crds::GrafanaDashboard;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&GrafanaDashboard::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
    print!("{}", crd);
    Ok(())
}
