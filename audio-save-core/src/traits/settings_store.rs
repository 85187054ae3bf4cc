use crate::models::error::SaveError;

/// Persistent key/value store for per-backend settings (volume, mute).
///
/// Keys are grouped by a scope, normally the backend name.
pub trait SettingsStore: Send + Sync {
    fn load(&self, scope: &str, key: &str) -> Option<i64>;

    fn store(&self, scope: &str, key: &str, value: i64) -> Result<(), SaveError>;
}
