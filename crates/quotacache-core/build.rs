/// Builds the gRPC client and server code for `proto/quotacache.proto` using
/// `tonic-prost-build`.
///
/// Cached values travel as `bytes` fields. They are generated as `Bytes`
/// (from the `bytes` crate) instead of `Vec<u8>` so the server can hand out
/// stored values without copying them.
///
/// The file descriptor set is written next to the generated code so the
/// server can expose it through gRPC reflection.
///
/// # Panics
///
/// Panics if code generation fails (for example when `protoc` is missing).
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("quotacache_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([
            ".quotacache.GetResp.val",
            ".quotacache.StoreReq.val",
            ".quotacache.DumpItem.val",
        ])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/quotacache.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/quotacache.proto");
}
