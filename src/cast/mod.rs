//! Protobuf types generated from `protobuf/cast_channel.proto` by `build.rs`.

include!(concat!(env!("OUT_DIR"), "/protobuf/mod.rs"));
