//! External classifier hand-off: chunked outbound protocol and callback receiver

mod callback;
mod client;
pub mod protocol;

pub use callback::{
    flatten_rich_text, CallbackReceiver, CALLBACK_SECRET_HEADER, EXTERNAL_MAPPER,
    NOT_CLASSIFIED_REASON,
};
pub use client::{ChunkTransport, ExternalMappingGateway, GatewaySettings, HttpChunkTransport};
pub use protocol::{CallbackPayload, ChunkRequest};
