//! Emits BUILD_TIMESTAMP for version.rs.

use vergen::EmitBuilder;

fn main() {
    if EmitBuilder::builder().build_timestamp().emit().is_err() {
        println!("cargo:rustc-env=VERGEN_BUILD_TIMESTAMP=unknown");
    }
}
