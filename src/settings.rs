//! Persistent user settings read by the facade.

use crate::engine::DEFAULT_STRENGTH;
use crate::protocol::PlayerId;

/// A remembered server account.
#[derive(Clone, PartialEq, Eq)]
pub struct SavedAccount {
    pub player_id: PlayerId,
    pub secret: String,
}

impl SavedAccount {
    pub fn new(player_id: impl Into<PlayerId>, secret: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SavedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedAccount")
            .field("player_id", &self.player_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Storage for user settings.
///
/// Implementations decide where values live (a file, the platform's
/// preferences store, memory). Writes are expected to be durable when the
/// call returns.
pub trait SettingsStore: Send {
    /// Engine strength for games against the computer.
    fn ai_level(&self) -> u8;

    fn set_ai_level(&mut self, level: u8);

    /// Log in with the saved account instead of a guest identity.
    fn login_with_account(&self) -> bool;

    fn saved_account(&self) -> Option<SavedAccount>;

    fn save_account(&mut self, account: Option<SavedAccount>);
}

/// In-memory [`SettingsStore`]. Nothing survives the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    ai_level: u8,
    login_with_account: bool,
    account: Option<SavedAccount>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ai_level: DEFAULT_STRENGTH,
            login_with_account: false,
            account: None,
        }
    }
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings that log in with `account`.
    #[must_use]
    pub fn with_account(mut self, account: SavedAccount) -> Self {
        self.account = Some(account);
        self.login_with_account = true;
        self
    }

    pub fn set_login_with_account(&mut self, enabled: bool) {
        self.login_with_account = enabled;
    }
}

impl SettingsStore for MemorySettings {
    fn ai_level(&self) -> u8 {
        self.ai_level
    }

    fn set_ai_level(&mut self, level: u8) {
        self.ai_level = level;
    }

    fn login_with_account(&self) -> bool {
        self.login_with_account
    }

    fn saved_account(&self) -> Option<SavedAccount> {
        self.account.clone()
    }

    fn save_account(&mut self, account: Option<SavedAccount>) {
        self.account = account;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = MemorySettings::new();
        assert_eq!(settings.ai_level(), DEFAULT_STRENGTH);
        assert!(!settings.login_with_account());
        assert!(settings.saved_account().is_none());
    }

    #[test]
    fn with_account_enables_account_login() {
        let mut settings = MemorySettings::new().with_account(SavedAccount::new("alice", "pw"));
        assert!(settings.login_with_account());
        assert_eq!(settings.saved_account().unwrap().player_id, "alice");

        settings.set_login_with_account(false);
        settings.save_account(None);
        assert!(!settings.login_with_account());
        assert!(settings.saved_account().is_none());
    }

    #[test]
    fn debug_hides_the_secret() {
        let rendered = format!("{:?}", SavedAccount::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
