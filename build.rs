fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enforcer event stream. Messages are prost-derived in src/proto.rs, so only the
    // service plumbing is generated here (no protoc needed).
    let stream_events = tonic_build::manual::Method::builder()
        .name("stream_events")
        .route_name("StreamEvents")
        .input_type("crate::proto::Request")
        .output_type("crate::proto::Event")
        .codec_path("tonic::codec::ProstCodec")
        .server_streaming()
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("EventStreamService")
        .package("apkmgt")
        .method(stream_events)
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
