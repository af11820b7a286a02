// Licensed under the Apache-2.0 license

//! Build script: memory layout for the firmware image.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var("CARGO_FEATURE_FIRMWARE").is_ok() {
        let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-search={manifest_dir}");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
    }
}
