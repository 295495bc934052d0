//! Links the supraseal engine when the `native` feature is enabled.
//!
//! `SUPRA_SEAL_DIR` points at a built supraseal checkout (default
//! `/usr/local/supra_seal`). The engine and its SPDK/DPDK dependencies are
//! expected in the layout its own build script produces.

use std::env;
use std::path::PathBuf;

const SPDK_LIBS: &[&str] = &[
    "spdk_bdev_nvme",
    "spdk_bdev",
    "spdk_nvme",
    "spdk_env_dpdk",
    "spdk_event",
    "spdk_event_bdev",
    "spdk_init",
    "spdk_thread",
    "spdk_json",
    "spdk_jsonrpc",
    "spdk_rpc",
    "spdk_sock",
    "spdk_util",
    "spdk_log",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }
    println!("cargo:rerun-if-env-changed=SUPRA_SEAL_DIR");

    let root = env::var("SUPRA_SEAL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/local/supra_seal"));
    let spdk = root.join("deps/spdk-v22.09");

    for dir in [
        root.join("obj"),
        spdk.join("build/lib"),
        spdk.join("isa-l/.libs"),
        spdk.join("dpdk/build/lib"),
        root.join("deps/blst"),
    ] {
        println!("cargo:rustc-link-search=native={}", dir.display());
    }

    println!("cargo:rustc-link-lib=static=supraseal");
    for lib in SPDK_LIBS {
        println!("cargo:rustc-link-lib={}", lib);
    }
    for lib in [
        "blst", "isal", "numa", "uuid", "ssl", "crypto", "aio", "gmp", "config++", "stdc++",
        "cudart_static", "dl", "rt",
    ] {
        println!("cargo:rustc-link-lib={}", lib);
    }
}
