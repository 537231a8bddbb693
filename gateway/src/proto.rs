//! Generated protobuf wire types for the MS protocol (`proto/ms.proto`).
//!
//! Everything in this module is codegen; conversions to/from the domain
//! types in [`crate::types`] live there, not here.

include!(concat!(env!("OUT_DIR"), "/ms.rs"));
