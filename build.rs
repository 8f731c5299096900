fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }
    let proto_files = &[
        "protocols/basic.proto",
        "protocols/client.proto",
        "protocols/datanode.proto",
    ];
    tonic_build::configure()
        .build_server(true)
        .compile(proto_files, &["protocols"])?;
    Ok(())
}
