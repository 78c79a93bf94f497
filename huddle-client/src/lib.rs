//! Huddle client
//!
//! Keeps a local, ordered view of a conversation consistent with the server
//! while HTTP write responses and socket broadcasts arrive in any order.

mod api;
mod error;
mod socket;
mod timeline;
mod view;

pub use api::ApiClient;
pub use error::ClientError;
pub use socket::{SocketClient, SocketConfig};
pub use timeline::Timeline;
pub use view::{ChatView, ConnectionStatus, ViewError, ViewEvent};
