//! Auth token source

/// Supplies the bearer token for both transports
pub trait TokenSource: Send + Sync {
    /// Current token, if logged in
    fn token(&self) -> Option<String>;

    /// Called when the server rejects the token with 401
    fn on_unauthorized(&self) {}
}

/// Fixed token, typically from configuration or the command line
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// No token at all; requests go out unauthenticated
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }

    fn on_unauthorized(&self) {
        tracing::warn!("Server rejected the configured token");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token() {
        assert_eq!(StaticToken::new("abc").token().as_deref(), Some("abc"));
        assert_eq!(StaticToken::anonymous().token(), None);
    }
}
