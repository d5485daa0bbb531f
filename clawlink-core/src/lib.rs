// ABOUTME: Channel-agnostic core for talking to one owner over many chat surfaces
// ABOUTME: Connector contract, owner authorization, chunked delivery, presence loops and config

pub mod auth;
pub mod chunker;
pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod metrics;
pub mod operator;
pub mod paths;
pub mod presence;
pub mod session;
pub mod shutdown;
pub mod testing;
pub mod traits;

pub use auth::{AuthorizationGate, DiscardReason, GateDecision, GateMode, VERIFICATION_CONFIRMATION};
pub use chunker::{chunk_text, deliver_chunks, ChunkDeliveryError, MAX_CHUNK_CHARS};
pub use config::Config;
pub use error::{DeliveryError, StoreError};
pub use identity::{AuthorizationRecord, IdentityStore, MemoryIdentityStore, SqliteIdentityStore};
pub use presence::{PresenceAnnouncer, PresenceSink, PresenceState};
pub use session::ReplyTarget;
pub use shutdown::ShutdownRequest;
pub use traits::{
    ChannelConnector, ChannelKind, ControlSignal, FileUpload, ImageContent, InboundContent,
    InboundHandler, ListenExit, Reply,
};
