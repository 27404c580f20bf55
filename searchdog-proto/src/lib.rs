//! `tonic`/`prost` bindings for `MasterService` and `DataService` (spec.md
//! §6.2), plus the hand-rolled wire format for the expression AST (spec.md
//! §6.3) that rides inside `SearchRequest.filter_expression` rather than
//! being itself a protobuf message, since it must parse in a single linear
//! pass with no message-framing overhead per document.

pub mod expr_wire;

pub mod common {
    tonic::include_proto!("searchdog.common");
}

pub mod master {
    tonic::include_proto!("searchdog.master");
}

pub mod data {
    tonic::include_proto!("searchdog.data");
}
