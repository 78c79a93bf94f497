use std::sync::Arc;

use crate::config::SessionConfig;
use crate::hub::Hub;
use crate::service::ChatService;

/// Shared by every HTTP request and socket session
pub struct ServerState {
    pub service: ChatService,
    pub session: SessionConfig,
    /// Token a socket `connect` frame must carry, when configured
    pub access_token: Option<String>,
}

impl ServerState {
    pub fn new(service: ChatService, session: SessionConfig, access_token: Option<String>) -> Self {
        Self {
            service,
            session,
            access_token,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        self.service.hub()
    }
}
