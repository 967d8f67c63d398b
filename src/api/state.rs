//! API shared state

use crate::coordinator::Coordinator;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Coordinator,

    /// Public base URL of this front-end, without trailing slash
    pub public_url: String,

    pub app_name: String,
}

impl ApiState {
    pub fn new(
        coordinator: Coordinator,
        public_url: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            app_name: app_name.into(),
        }
    }
}
