pub mod cancel;
pub mod composer;
pub mod config;
pub mod error;
pub mod explorer;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use cancel::CancelHandle;
pub use composer::{build_request_body, ManualEditPolicy, RequestComposer, RequestPreset};
pub use error::{ExplorerError, Outcome};
pub use explorer::{Explorer, ExplorerSnapshot, ResponseStatusInfo};
