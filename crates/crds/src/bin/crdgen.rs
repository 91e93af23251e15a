//! Prints the nexus-manager CustomResourceDefinitions as a YAML stream.
//!
//! ```text
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", crds::crd_manifests()?);
    Ok(())
}
