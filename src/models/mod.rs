pub mod conversation;
pub mod mutation;
pub mod overlay;

pub use conversation::{
    AttachmentKind, Conversation, FileRef, ImageRef, Message, Role, SearchResults, SerpEntry,
    attachment_key,
};
pub use mutation::{EditOutcome, edit_message, retry_base, split};
pub use overlay::{
    ControlErrorCode, ErrorOverlay, NullDisplay, OverlayEvent, OverlayNotifier, TurnDisplay,
};
