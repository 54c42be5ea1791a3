use tollgate_core::AppContext;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        // Sweepers need a runtime; skipped when built from sync unit tests.
        if tokio::runtime::Handle::try_current().is_ok() {
            ctx.spawn_sweepers();
        }
        Self { ctx }
    }

    /// Whether API-key authentication is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.ctx.config.security.api_keys.is_empty()
    }

    pub fn is_valid_key(&self, key: &str) -> bool {
        self.ctx.config.security.api_keys.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::config::Config;

    #[test]
    fn auth_follows_configured_keys() {
        let state = AppState::new(AppContext::from_config(Config::default()).unwrap());
        assert!(!state.auth_enabled());

        let mut config = Config::default();
        config.security.api_keys = vec!["k-123".into()];
        let state = AppState::new(AppContext::from_config(config).unwrap());
        assert!(state.auth_enabled());
        assert!(state.is_valid_key("k-123"));
        assert!(!state.is_valid_key("k-999"));
    }
}
