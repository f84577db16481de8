pub mod memory;
pub mod req_resp;
pub mod sync;

pub use req_resp::{CodecError, SyncCodec, SyncRequest, SyncResponse};
