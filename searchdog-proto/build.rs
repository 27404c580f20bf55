fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_server(true).build_client(true).compile_protos(
        &[
            "proto/common.proto",
            "proto/master.proto",
            "proto/data.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}
