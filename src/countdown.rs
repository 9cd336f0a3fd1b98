//! Live countdowns per chat channel and game.
//!
//! Game event producers (timer ticks, server pushes) drive a [`CountdownStore`];
//! display code watches one `(channel, game)` pair and hides the countdown
//! while it reads `None`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{StoreResult, ValidationError};
use crate::store::KeyedStore;
use crate::watch::ValueWatch;

/// Chat channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Games that run a turn countdown in a channel.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Chess,
    Omok,
    WordMaster,
}

impl GameType {
    /// Wire name of the game.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chess => "chess",
            Self::Omok => "omok",
            Self::WordMaster => "word_master",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chess" => Ok(Self::Chess),
            "omok" => Ok(Self::Omok),
            "word_master" => Ok(Self::WordMaster),
            other => Err(ValidationError::InvalidKeyEncoding {
                input: other.to_string(),
            }),
        }
    }
}

/// Watch over one channel's countdown.
pub type CountdownWatch = ValueWatch<ChannelId, GameType, u32>;

/// Seconds remaining per `(channel, game)`; `None` means no active countdown.
#[derive(Debug, Clone, Default)]
pub struct CountdownStore {
    store: KeyedStore<ChannelId, GameType, u32>,
}

impl CountdownStore {
    /// Create an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the configuration is unusable.
    pub fn with_config(config: StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            store: KeyedStore::with_config(config)?,
        })
    }

    /// The underlying store, for subscribing or streaming.
    #[must_use]
    pub const fn store(&self) -> &KeyedStore<ChannelId, GameType, u32> {
        &self.store
    }

    /// Set the seconds remaining. Returns true if the displayed value changed.
    pub fn start(&self, channel: ChannelId, game: GameType, seconds: u32) -> bool {
        self.store.set(channel, game, Some(seconds))
    }

    /// Count an active countdown down by one second, stopping at zero, and
    /// return what remains. Inactive countdowns are left alone.
    pub fn tick(&self, channel: ChannelId, game: GameType) -> Option<u32> {
        self.store
            .update(channel, game, |current| current.map(|s| s.saturating_sub(1)));
        self.store.get(channel, game)
    }

    /// End the countdown. Returns true if one was active.
    pub fn clear(&self, channel: ChannelId, game: GameType) -> bool {
        self.store.set(channel, game, None)
    }

    /// Seconds remaining, or `None` when no countdown is active.
    #[must_use]
    pub fn remaining(&self, channel: ChannelId, game: GameType) -> Option<u32> {
        self.store.get(channel, game)
    }

    /// Watch a channel's countdown. A `None` channel (no channel selected yet)
    /// yields a watch that always reads `None`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store cannot take
    /// another registration.
    pub fn watch<F>(&self, channel: Option<ChannelId>, game: GameType, on_change: F) -> StoreResult<CountdownWatch>
    where
        F: Fn() + Send + Sync + 'static,
    {
        ValueWatch::new(&self.store, channel, game, on_change)
    }
}
