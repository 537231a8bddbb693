fn main() {
    println!("cargo:rerun-if-changed=proto/ms.proto");
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }
    prost_build::compile_protos(&["proto/ms.proto"], &["proto/"])
        .expect("failed to compile ms.proto");
}
