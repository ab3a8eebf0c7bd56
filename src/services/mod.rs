pub mod backoff;
pub mod mention_resolver;
pub mod request_builder;
pub mod stream_decoder;
pub mod transport;
pub mod turn_controller;
pub mod web_search;

pub use backoff::retry_with_backoff;
pub use mention_resolver::AttachmentIndex;
pub use request_builder::{CompletionRequest, RequestType, TurnParams};
pub use stream_decoder::{StreamEvent, decode_frames};
pub use transport::{
    ByteStream, CompletionTransport, HttpCompletionClient, HttpSearchClient, TransportError,
};
pub use turn_controller::{TurnController, TurnOutcome};
pub use web_search::{SearchBackend, SearchQuery, SearchResponse};
