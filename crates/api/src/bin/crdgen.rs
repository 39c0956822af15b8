//! Prints the Configuration CRD manifest as YAML.

use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&fabric_api::Configuration::crd())?);
    Ok(())
}
