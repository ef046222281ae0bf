//! Prints the CRD manifests as YAML for `kubectl apply -f -`.

use crds::AWSManagedControlPlane;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let manifest = serde_yaml::to_string(&AWSManagedControlPlane::crd())?;
    print!("---\n{}", manifest);
    Ok(())
}
