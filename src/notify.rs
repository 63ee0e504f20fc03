use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Fallen,
    Unfallen,
    Share,
    Unshare,
    FriendOnline,
    Think,
}

/// A user-facing event about one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub name: String,
    pub text: String,
}

/// Which notification classes reach the user. Everything is on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFilter {
    pub fallen: bool,
    pub unfallen: bool,
    pub share: bool,
    pub unshare: bool,
    pub friend_online: bool,
    pub think: bool,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            fallen: true,
            unfallen: true,
            share: true,
            unshare: true,
            friend_online: true,
            think: true,
        }
    }
}

impl NotificationFilter {
    pub fn none() -> Self {
        Self {
            fallen: false,
            unfallen: false,
            share: false,
            unshare: false,
            friend_online: false,
            think: false,
        }
    }

    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Fallen => self.fallen,
            NotificationKind::Unfallen => self.unfallen,
            NotificationKind::Share => self.share,
            NotificationKind::Unshare => self.unshare,
            NotificationKind::FriendOnline => self.friend_online,
            NotificationKind::Think => self.think,
        }
    }

    pub fn set(&mut self, kind: NotificationKind, enabled: bool) {
        let slot = match kind {
            NotificationKind::Fallen => &mut self.fallen,
            NotificationKind::Unfallen => &mut self.unfallen,
            NotificationKind::Share => &mut self.share,
            NotificationKind::Unshare => &mut self.unshare,
            NotificationKind::FriendOnline => &mut self.friend_online,
            NotificationKind::Think => &mut self.think,
        };
        *slot = enabled;
    }
}
