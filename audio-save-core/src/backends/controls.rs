use std::collections::HashMap;
use std::sync::Arc;

use crate::models::error::SaveError;
use crate::traits::settings_store::SettingsStore;

const MUTE_KEY: &str = "mute";

/// Volume and mute values of one backend, optionally persisted.
///
/// Without a store the values live only in memory. With one, every setter
/// writes through and getters prefer the stored value, so a restarted
/// process picks up the last volume.
pub struct SinkControls {
    scope: String,
    store: Option<Arc<dyn SettingsStore>>,
    volumes: HashMap<u32, i32>,
    muted: bool,
}

impl SinkControls {
    pub fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            store: None,
            volumes: HashMap::new(),
            muted: false,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_store(&mut self, store: Arc<dyn SettingsStore>) {
        self.store = Some(store);
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn set_volume(&mut self, channel: u32, volume: i32) -> Result<(), SaveError> {
        self.volumes.insert(channel, volume);
        match &self.store {
            Some(store) => store.store(&self.scope, &volume_key(channel), volume as i64),
            None => Ok(()),
        }
    }

    /// Current volume of `channel`; 0 when never set.
    pub fn volume(&mut self, channel: u32) -> i32 {
        let stored = self
            .store
            .as_ref()
            .and_then(|store| store.load(&self.scope, &volume_key(channel)))
            .and_then(|v| i32::try_from(v).ok());
        match stored {
            Some(volume) => {
                self.volumes.insert(channel, volume);
                volume
            }
            None => self.volumes.get(&channel).copied().unwrap_or(0),
        }
    }

    pub fn set_mute(&mut self, mute: bool) -> Result<(), SaveError> {
        self.muted = mute;
        match &self.store {
            Some(store) => store.store(&self.scope, MUTE_KEY, mute as i64),
            None => Ok(()),
        }
    }

    pub fn muted(&mut self) -> bool {
        if let Some(stored) = self.store.as_ref().and_then(|s| s.load(&self.scope, MUTE_KEY)) {
            self.muted = stored != 0;
        }
        self.muted
    }
}

fn volume_key(channel: u32) -> String {
    format!("volume.{}", channel)
}
