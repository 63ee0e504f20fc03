//! Cumulative per-player knowledge gathered from descriptors and server
//! text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bepp::{self, Message, ThinkTarget};
use crate::notify::{Notification, NotificationKind};

/// How the user has marked a player. The three marks exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    None,
    Friend {
        label: u8,
    },
    Blocked,
    Ignored,
}

pub const MAX_FRIEND_LABEL: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub name: String,
    pub race: String,
    pub gender: String,
    pub class: String,
    pub clan: String,
    pub pict_id: u16,
    pub colors: Vec<u8>,
    pub is_npc: bool,
    /// We are sharing with this player.
    pub sharing: bool,
    /// This player is sharing with us.
    pub sharee: bool,
    pub gm_level: u8,
    pub relation: Relation,
    pub dead: bool,
    pub fell_where: String,
    pub fell_time: Option<u64>,
    pub killer: String,
    pub same_clan: bool,
    pub be_who_seen: bool,
    pub last_seen: Option<u64>,
    pub offline: bool,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn is_friend(&self) -> bool {
        matches!(self.relation, Relation::Friend { .. })
    }

    pub fn friend_label(&self) -> Option<u8> {
        match self.relation {
            Relation::Friend { label } => Some(label),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.relation == Relation::Blocked
    }

    pub fn is_ignored(&self) -> bool {
        self.relation == Relation::Ignored
    }

    pub fn set_friend(&mut self, label: u8) {
        self.relation = Relation::Friend {
            label: label.min(MAX_FRIEND_LABEL),
        };
    }

    pub fn set_relation(&mut self, relation: Relation) {
        self.relation = match relation {
            Relation::Friend { label } => Relation::Friend {
                label: label.min(MAX_FRIEND_LABEL),
            },
            other => other,
        };
    }
}

/// Something server text told us about a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Fallen {
        name: String,
        killer: Option<String>,
        location: Option<String>,
    },
    Unfallen {
        name: String,
    },
    /// We started sharing with `name`.
    Share {
        name: String,
    },
    Unshare {
        name: String,
    },
    /// `name` started sharing with us.
    Sharee {
        name: String,
    },
    Unsharee {
        name: String,
    },
    Logon {
        name: String,
    },
    Logoff {
        name: String,
    },
    Think {
        name: String,
        target: ThinkTarget,
    },
}

const SHARE_START: &str = "You are sharing experiences with ";
const SHARE_STOP: &str = "You are no longer sharing experiences with ";
const SHAREE_START: &str = " is sharing experiences with you";
const SHAREE_STOP: &str = " is no longer sharing experiences with you";

fn trailing_name(rest: &str) -> String {
    rest.trim_end_matches(['.', '!', ' ', '\n']).to_string()
}

impl PlayerEvent {
    /// Recognises player events in a parsed server line. The subject is
    /// the first `pn` span, or the first word when the line carries none.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let text = msg.text.trim();
        if let Some(rest) = text.strip_prefix(SHARE_STOP) {
            let name = msg
                .first(bepp::TAG_PLAYER_NAME)
                .map_or_else(|| trailing_name(rest), str::to_string);
            return Some(Self::Unshare { name });
        }
        if let Some(rest) = text.strip_prefix(SHARE_START) {
            let name = msg
                .first(bepp::TAG_PLAYER_NAME)
                .map_or_else(|| trailing_name(rest), str::to_string);
            return Some(Self::Share { name });
        }

        let subject = match msg.first(bepp::TAG_PLAYER_NAME) {
            Some(name) => name.to_string(),
            None => text.split_whitespace().next()?.to_string(),
        };
        let after = text
            .strip_prefix(subject.as_str())
            .unwrap_or(text)
            .trim_start();

        if msg.is_class(bepp::TAG_THINK) || after.starts_with("thinks") {
            let (name, suffix_target) = bepp::think_suffix(&subject);
            let target = match msg.think_target {
                ThinkTarget::None => suffix_target,
                tagged => tagged,
            };
            return Some(Self::Think {
                name: name.to_string(),
                target,
            });
        }
        if after.starts_with("has fallen") {
            return Some(Self::Fallen {
                name: subject,
                killer: msg.first(bepp::TAG_MONSTER_NAME).map(str::to_string),
                location: msg.first(bepp::TAG_LOCATION).map(str::to_string),
            });
        }
        if after.starts_with("is no longer fallen") {
            return Some(Self::Unfallen { name: subject });
        }
        if after.starts_with(SHAREE_STOP.trim_start()) {
            return Some(Self::Unsharee { name: subject });
        }
        if after.starts_with(SHAREE_START.trim_start()) {
            return Some(Self::Sharee { name: subject });
        }
        if after.starts_with("has logged on") || after.starts_with("is now in the lands") {
            return Some(Self::Logon { name: subject });
        }
        if after.starts_with("has logged off") || after.starts_with("has left the lands") {
            return Some(Self::Logoff { name: subject });
        }
        None
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Fallen { name, .. }
            | Self::Unfallen { name }
            | Self::Share { name }
            | Self::Unshare { name }
            | Self::Sharee { name }
            | Self::Unsharee { name }
            | Self::Logon { name }
            | Self::Logoff { name }
            | Self::Think { name, .. } => name,
        }
    }
}

/// Players keyed by case-folded name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerBook {
    players: HashMap<String, Player>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl PlayerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Player> {
        self.players.get(&fold(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.get_mut(&fold(name))
    }

    pub fn entry(&mut self, name: &str) -> &mut Player {
        self.players
            .entry(fold(name))
            .or_insert_with(|| Player::new(name))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn insert(&mut self, player: Player) {
        self.players.insert(fold(&player.name), player);
    }

    /// Records a sighting from a descriptor table.
    pub fn observe(&mut self, name: &str, pict_id: u16, colors: &[u8], is_npc: bool, now: u64) {
        if name.is_empty() {
            return;
        }
        let player = self.entry(name);
        player.pict_id = pict_id;
        player.colors = colors.to_vec();
        player.is_npc = is_npc;
        player.last_seen = Some(now);
        player.offline = false;
        player.be_who_seen = true;
    }

    /// Applies an event and returns the notification it warrants, if any.
    /// `text` is the presentable line the event came from.
    pub fn apply(&mut self, event: &PlayerEvent, text: &str, now: u64) -> Option<Notification> {
        let player = self.entry(event.name());
        let name = player.name.clone();
        let kind = match event {
            PlayerEvent::Fallen {
                killer, location, ..
            } => {
                player.dead = true;
                player.fell_time = Some(now);
                player.killer = killer.clone().unwrap_or_default();
                player.fell_where = location.clone().unwrap_or_default();
                NotificationKind::Fallen
            }
            PlayerEvent::Unfallen { .. } => {
                player.dead = false;
                player.killer.clear();
                player.fell_where.clear();
                player.fell_time = None;
                NotificationKind::Unfallen
            }
            PlayerEvent::Share { .. } => {
                player.sharing = true;
                NotificationKind::Share
            }
            PlayerEvent::Unshare { .. } => {
                player.sharing = false;
                NotificationKind::Unshare
            }
            PlayerEvent::Sharee { .. } => {
                player.sharee = true;
                NotificationKind::Share
            }
            PlayerEvent::Unsharee { .. } => {
                player.sharee = false;
                NotificationKind::Unshare
            }
            PlayerEvent::Logon { .. } => {
                player.offline = false;
                player.last_seen = Some(now);
                if !player.is_friend() {
                    return None;
                }
                NotificationKind::FriendOnline
            }
            PlayerEvent::Logoff { .. } => {
                player.offline = true;
                player.last_seen = Some(now);
                return None;
            }
            PlayerEvent::Think { .. } => {
                if player.is_blocked() || player.is_ignored() {
                    return None;
                }
                NotificationKind::Think
            }
        };
        Some(Notification {
            kind,
            name,
            text: text.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_fallen_line() {
        let msg = bepp::parse(b"\xC2pnBob\xC2pn has fallen");
        let event = PlayerEvent::from_message(&msg).unwrap();
        assert_eq!(
            event,
            PlayerEvent::Fallen {
                name: "Bob".into(),
                killer: None,
                location: None
            }
        );
        let mut book = PlayerBook::new();
        let note = book.apply(&event, &msg.text, 100).unwrap();
        assert_eq!(note.kind, NotificationKind::Fallen);
        assert_eq!(note.text, "Bob has fallen");
        assert!(book.get("bob").unwrap().dead);
        assert_eq!(book.get("BOB").unwrap().name, "Bob");
    }

    #[test]
    fn plain_text_uses_first_word() {
        let msg = bepp::parse(b"Alice is no longer fallen.");
        assert_eq!(
            PlayerEvent::from_message(&msg),
            Some(PlayerEvent::Unfallen {
                name: "Alice".into()
            })
        );
        let msg = bepp::parse(b"You are sharing experiences with Alice.");
        assert_eq!(
            PlayerEvent::from_message(&msg),
            Some(PlayerEvent::Share {
                name: "Alice".into()
            })
        );
        let msg = bepp::parse(b"Alice is sharing experiences with you.");
        assert_eq!(
            PlayerEvent::from_message(&msg),
            Some(PlayerEvent::Sharee {
                name: "Alice".into()
            })
        );
        assert_eq!(PlayerEvent::from_message(&bepp::parse(b"The sun rises.")), None);
    }

    #[test]
    fn fallen_records_killer_and_place() {
        let msg = bepp::parse(b"\xC2pnBob\xC2pn has fallen to a \xC2mnRat\xC2mn in \xC2loMeadow\xC2lo.");
        let mut book = PlayerBook::new();
        let event = PlayerEvent::from_message(&msg).unwrap();
        book.apply(&event, &msg.text, 5);
        let bob = book.get("Bob").unwrap();
        assert_eq!(bob.killer, "Rat");
        assert_eq!(bob.fell_where, "Meadow");
        assert_eq!(bob.fell_time, Some(5));
        let up = PlayerEvent::Unfallen { name: "bob".into() };
        book.apply(&up, "Bob is no longer fallen", 6);
        assert!(!book.get("Bob").unwrap().dead);
        assert!(book.get("Bob").unwrap().killer.is_empty());
    }

    #[test]
    fn share_flags_are_independent() {
        let mut book = PlayerBook::new();
        book.apply(&PlayerEvent::Share { name: "Ann".into() }, "", 0);
        book.apply(&PlayerEvent::Sharee { name: "Ann".into() }, "", 0);
        book.apply(&PlayerEvent::Unshare { name: "Ann".into() }, "", 0);
        let ann = book.get("ann").unwrap();
        assert!(!ann.sharing);
        assert!(ann.sharee);
    }

    #[test]
    fn friend_logon_notifies_only_friends() {
        let mut book = PlayerBook::new();
        let logon = PlayerEvent::Logon { name: "Ann".into() };
        assert!(book.apply(&logon, "Ann has logged on", 1).is_none());
        book.entry("Ann").set_friend(3);
        let note = book.apply(&logon, "Ann has logged on", 2).unwrap();
        assert_eq!(note.kind, NotificationKind::FriendOnline);
        book.apply(&PlayerEvent::Logoff { name: "Ann".into() }, "", 3);
        assert!(book.get("Ann").unwrap().offline);
    }

    #[test]
    fn relation_marks_exclude_each_other() {
        let mut p = Player::new("Cid");
        p.set_friend(12);
        assert_eq!(p.friend_label(), Some(MAX_FRIEND_LABEL));
        p.set_relation(Relation::Blocked);
        assert!(p.is_blocked() && !p.is_friend() && !p.is_ignored());
    }

    #[test]
    fn think_target_from_suffix_or_tag() {
        let msg = bepp::parse(b"\xC2th\xC2pnBob to you\xC2pn thinks, hello");
        assert_eq!(
            PlayerEvent::from_message(&msg),
            Some(PlayerEvent::Think {
                name: "Bob".into(),
                target: ThinkTarget::You
            })
        );
        let msg = bepp::parse(b"\xC2th\xC2tg\xC2pnBob\xC2pn thinks, hi all");
        assert_eq!(
            PlayerEvent::from_message(&msg),
            Some(PlayerEvent::Think {
                name: "Bob".into(),
                target: ThinkTarget::Group
            })
        );
    }

    #[test]
    fn observe_marks_seen() {
        let mut book = PlayerBook::new();
        book.entry("Eve").offline = true;
        book.observe("Eve", 12, &[1, 2], false, 77);
        let eve = book.get("eve").unwrap();
        assert!(!eve.offline && eve.be_who_seen);
        assert_eq!(eve.last_seen, Some(77));
        assert_eq!(eve.colors, vec![1, 2]);
    }
}
