use std::fs;

fn main() {
    println!("cargo:rerun-if-changed=VERSION");
    println!("cargo:rerun-if-changed=Cargo.toml");

    let version = match fs::read_to_string("VERSION") {
        Ok(contents) => contents.trim().to_string(),
        Err(e) => panic!("cache-mux: cannot read VERSION ({}); create it with the package version", e),
    };

    let package = env!("CARGO_PKG_VERSION");
    if version != package {
        panic!(
            "\n\n\
            ❌ VERSION MISMATCH\n\
            VERSION file:         {}\n\
            Cargo.toml [package]: {}\n\n\
            Keep both at the same release number.\n\n",
            version, package
        );
    }
}
