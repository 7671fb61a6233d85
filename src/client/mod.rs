pub mod auth_client;
pub mod queue;
pub mod request;
pub mod transport;

pub use auth_client::{AuthClient, Recovery};
pub use queue::{PendingQueue, RefreshState};
pub use request::{ApiResponse, OutboundRequest};
pub use transport::{ReqwestTransport, Transport};
