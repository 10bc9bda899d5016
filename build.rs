fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .include("protobuf")
        .input("protobuf/cast_channel.proto")
        .cargo_out_dir("protobuf")
        .run_from_script();
}
