fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds don't need one on PATH
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_prost_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &[
                "proto/generation.proto",
                "proto/engines.proto",
                "proto/dashboard.proto",
                "proto/project.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
