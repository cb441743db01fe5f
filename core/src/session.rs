/// Explicit session context shared by the REST client and the realtime channel
use crate::api::ChatApi;
use crate::chat_types::UserProfile;
use crate::error::{Result, SyncError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct SessionState {
    token: Option<String>,
    user: Option<UserProfile>,
}

/// Holds the bearer token for the lifetime of a login.
///
/// Cloning shares the same state, so `invalidate` on any clone is seen by
/// every component holding one.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<RwLock<SessionState>>,
}

impl Session {
    /// Create a session from a freshly issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState {
                token: Some(token.into()),
                user: None,
            })),
        }
    }

    /// A session with no credentials
    pub fn anonymous() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState {
                token: None,
                user: None,
            })),
        }
    }

    /// Current bearer token
    pub async fn token(&self) -> Result<String> {
        self.state
            .read()
            .await
            .token
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.state.read().await.user.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.token.is_some()
    }

    /// Fetch the profile for the current token. Any failure clears the token.
    pub async fn establish(&self, api: &dyn ChatApi) -> Result<UserProfile> {
        if !self.is_authenticated().await {
            return Err(SyncError::NotAuthenticated);
        }
        match api.fetch_profile().await {
            Ok(profile) => {
                info!("Session established for {} ({})", profile.username, profile.user_id);
                self.state.write().await.user = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                warn!("Failed to fetch profile: {}", e);
                self.invalidate().await;
                Err(SyncError::Unauthorized(e.to_string()))
            }
        }
    }

    /// Clear the token and profile (logout)
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if state.token.take().is_some() {
            info!("Session invalidated");
        }
        state.user = None;
    }
}
