//! Build script for vardig-core
//!
//! This script checks toolchain requirements before compilation:
//! - Minimum Rust version (`std::sync::OnceLock` and let-else are required)
//! - Host pointer width (the value layer decodes 32 and 64-bit targets, but the
//!   host must be able to hold a 64-bit target address in a `usize` offset)
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer

fn main()
{
    // Check minimum Rust version
    // OnceLock was stabilised in Rust 1.70
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 70, 0);

        if rustc_version < min_rust_version {
            panic!(
                "vardig-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    check_host_pointer_width();
}

fn check_host_pointer_width()
{
    let width = std::env::var("CARGO_CFG_TARGET_POINTER_WIDTH").unwrap_or_default();
    if width != "64" {
        println!("cargo:warning=vardig-core is only tested on 64-bit hosts (target pointer width: {width})");
    }
}
