//! The identity the session presents when it connects.
//!
//! Volley does not authenticate players itself. Whatever SDK or service
//! does that hands the session three strings through [`IdentityProvider`],
//! read fresh on every connect so a refreshed access token is picked up
//! by the next reconnect.

/// Supplies the credentials sent in `Connect`.
///
/// # Example
///
/// ```rust
/// use volley_session::IdentityProvider;
///
/// /// Reads the token from the environment on every connect.
/// struct EnvIdentity;
///
/// impl IdentityProvider for EnvIdentity {
///     fn player_id(&self) -> String {
///         "player-1".into()
///     }
///     fn game_id(&self) -> String {
///         "my-game".into()
///     }
///     fn access_token(&self) -> String {
///         std::env::var("VOLLEY_TOKEN").unwrap_or_default()
///     }
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    fn player_id(&self) -> String;
    fn game_id(&self) -> String;
    fn access_token(&self) -> String;
}

/// Fixed credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    pub player_id: String,
    pub game_id: String,
    pub access_token: String,
}

impl StaticIdentity {
    pub fn new(
        player_id: impl Into<String>,
        game_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            game_id: game_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn player_id(&self) -> String {
        self.player_id.clone()
    }

    fn game_id(&self) -> String {
        self.game_id.clone()
    }

    fn access_token(&self) -> String {
        self.access_token.clone()
    }
}
