use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::GameCatalogCache;
use crate::session::SessionRegistryHandle;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistryHandle,
    pub catalog: Arc<GameCatalogCache>,
    pub admin_tokens: Arc<HashSet<String>>,
}

impl AppState {
    pub fn is_admin_token(&self, token: &str) -> bool {
        let token = token.trim();
        !token.is_empty() && self.admin_tokens.contains(token)
    }
}
