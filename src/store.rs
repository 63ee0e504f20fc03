//! JSON documents the host application persists between runs: settings,
//! the player roster and the character list. Reading and writing the files
//! is left to the host.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};
use crate::crypto::PasswordHash;
use crate::error::Result;
use crate::notify::NotificationFilter;
use crate::pipeline::Presentation;
use crate::player::{Player, PlayerBook};

pub const PLAYER_ROSTER_FILE: &str = "GT_Players.json";
pub const CHARACTER_LIST_FILE: &str = "characters.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_host: String,
    pub server_port: u16,
    pub motion_smoothing: bool,
    pub mobile_fade_rate: f64,
    pub pict_fade_rate: f64,
    pub max_mobile_interp_pixels: i32,
    pub notifications: NotificationFilter,
    pub remember_password_hash: bool,
    pub last_character: Option<String>,
    pub panic_log: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let pres = Presentation::default();
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            motion_smoothing: pres.motion_smoothing,
            mobile_fade_rate: pres.mobile_fade_rate,
            pict_fade_rate: pres.pict_fade_rate,
            max_mobile_interp_pixels: pres.max_mobile_interp_pixels,
            notifications: NotificationFilter::default(),
            remember_password_hash: false,
            last_character: None,
            panic_log: None,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn presentation(&self) -> Presentation {
        Presentation {
            motion_smoothing: self.motion_smoothing,
            mobile_fade_rate: self.mobile_fade_rate,
            pict_fade_rate: self.pict_fade_rate,
            max_mobile_interp_pixels: self.max_mobile_interp_pixels,
        }
    }
}

/// Everything known about other players, as saved in `GT_Players.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerRoster {
    pub players: Vec<Player>,
}

impl PlayerRoster {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sorted by name so saved files diff cleanly.
    pub fn from_book(book: &PlayerBook) -> Self {
        let mut players: Vec<Player> = book.iter().cloned().collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        Self { players }
    }

    pub fn into_book(self) -> PlayerBook {
        let mut book = PlayerBook::new();
        for player in self.players.into_iter().filter(|p| !p.name.is_empty()) {
            book.insert(player);
        }
        book
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Saved characters, as stored in `characters.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterList {
    characters: Vec<Character>,
}

impl CharacterList {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.characters.iter().map(|c| c.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The remembered hash, if one was saved and still parses.
    pub fn password_hash(&self, name: &str) -> Option<PasswordHash> {
        self.get(name)?
            .password_hash
            .as_deref()
            .and_then(PasswordHash::from_hex)
    }

    /// Adds or updates a character. `None` forgets any remembered hash.
    pub fn upsert(&mut self, name: &str, hash: Option<&PasswordHash>) {
        let password_hash = hash.map(PasswordHash::to_hex);
        match self
            .characters
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.password_hash = password_hash,
            None => self.characters.push(Character {
                name: name.to_string(),
                password_hash,
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.characters.len();
        self.characters.retain(|c| !c.name.eq_ignore_ascii_case(name));
        self.characters.len() != before
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}
