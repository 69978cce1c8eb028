//! CRD YAML Generator
//!
//! Prints the CRD manifests of every resource kind the operators register.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use service_broker_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
