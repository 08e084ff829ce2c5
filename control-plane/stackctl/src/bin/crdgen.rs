use kube::core::CustomResourceExt;
use stackctl::crd::AppStack;

fn main() {
    let crd = AppStack::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
