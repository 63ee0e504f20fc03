//! BEPP: tags embedded in server text.
//!
//! A tag is the three bytes `0xC2 t1 t2`. When the same triple appears again
//! later in the message the bytes in between are the tag's content (a
//! span); otherwise the tag stands alone and classifies the message. Tags
//! are always removed from the presentable text; `be` content is removed
//! with them since it is meant for the client, not the player.

pub const MARKER: u8 = 0xC2;

pub type Tag = [u8; 2];

pub const TAG_PLAYER_NAME: Tag = *b"pn";
pub const TAG_MONSTER_NAME: Tag = *b"mn";
pub const TAG_LOCATION: Tag = *b"lo";
pub const TAG_ITEM: Tag = *b"iv";
pub const TAG_HP: Tag = *b"hp";
pub const TAG_CONFIRM: Tag = *b"cf";
pub const TAG_LOGIN: Tag = *b"lg";
pub const TAG_THINK: Tag = *b"th";
pub const TAG_INFO: Tag = *b"in";
pub const TAG_SHARE: Tag = *b"sh";
pub const TAG_BACKEND: Tag = *b"be";
pub const TAG_PASSTHROUGH: Tag = *b"yk";
pub const TAG_THINK_YOU: Tag = *b"tt";
pub const TAG_THINK_CLAN: Tag = *b"tc";
pub const TAG_THINK_DEFAULT: Tag = *b"td";
pub const TAG_THINK_GROUP: Tag = *b"tg";

const KNOWN_TAGS: [Tag; 16] = [
    TAG_PLAYER_NAME,
    TAG_MONSTER_NAME,
    TAG_LOCATION,
    TAG_ITEM,
    TAG_HP,
    TAG_CONFIRM,
    TAG_LOGIN,
    TAG_THINK,
    TAG_INFO,
    TAG_SHARE,
    TAG_BACKEND,
    TAG_PASSTHROUGH,
    TAG_THINK_YOU,
    TAG_THINK_CLAN,
    TAG_THINK_DEFAULT,
    TAG_THINK_GROUP,
];

/// Who a thought is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThinkTarget {
    #[default]
    None,
    You,
    Clan,
    Group,
}

impl ThinkTarget {
    fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            TAG_THINK_YOU => Some(Self::You),
            TAG_THINK_CLAN => Some(Self::Clan),
            TAG_THINK_GROUP => Some(Self::Group),
            TAG_THINK_DEFAULT => Some(Self::None),
            _ => None,
        }
    }
}

/// Content enclosed by a pair of identical tags. `start..end` indexes the
/// stripped text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub tag: Tag,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// The first standalone tag; classifies the whole line.
    pub class: Option<Tag>,
    pub text: String,
    pub spans: Vec<Span>,
    pub think_target: ThinkTarget,
    pub backend: Option<String>,
}

impl Message {
    pub fn first(&self, tag: Tag) -> Option<&str> {
        self.spans
            .iter()
            .find(|s| s.tag == tag)
            .map(|s| s.text.as_str())
    }

    pub fn spans_of(&self, tag: Tag) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(move |s| s.tag == tag)
    }

    pub fn is_class(&self, tag: Tag) -> bool {
        self.class == Some(tag)
    }

    pub fn has_tags(&self) -> bool {
        self.class.is_some() || !self.spans.is_empty() || self.backend.is_some()
    }
}

fn tag_at(bytes: &[u8], i: usize) -> Option<Tag> {
    match bytes.get(i..i + 3) {
        Some([MARKER, a, b]) if a.is_ascii_lowercase() && b.is_ascii_lowercase() => {
            Some([*a, *b])
        }
        _ => None,
    }
}

fn find_closing(bytes: &[u8], from: usize, tag: Tag) -> Option<usize> {
    let mut i = from;
    while i + 3 <= bytes.len() {
        if tag_at(bytes, i) == Some(tag) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn push_text(out: &mut String, bytes: &[u8]) {
    for &b in bytes {
        match b {
            b'\r' | b'\n' => out.push('\n'),
            0..=0x1F | 0x7F..=0xFF => {}
            _ => out.push(b as char),
        }
    }
}

/// Parses raw MacRoman server text.
pub fn parse(bytes: &[u8]) -> Message {
    let mut msg = Message::default();
    let mut plain_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let Some(tag) = tag_at(bytes, i) else {
            i += 1;
            continue;
        };
        push_text(&mut msg.text, &bytes[plain_start..i]);
        if !KNOWN_TAGS.contains(&tag) {
            log::debug!(
                "unknown bepp tag {}{}",
                tag[0] as char,
                tag[1] as char
            );
        }
        let content_start = i + 3;
        if let Some(target) = ThinkTarget::from_tag(tag) {
            msg.think_target = target;
            i = content_start;
            plain_start = i;
            continue;
        }
        match find_closing(bytes, content_start, tag) {
            Some(close) if tag == TAG_BACKEND => {
                let mut cmd = String::new();
                push_text(&mut cmd, &bytes[content_start..close]);
                msg.backend = Some(cmd);
                i = close + 3;
            }
            Some(close) => {
                let start = msg.text.len();
                let mut content = String::new();
                push_text(&mut content, &bytes[content_start..close]);
                msg.text.push_str(&content);
                msg.spans.push(Span {
                    tag,
                    text: content,
                    start,
                    end: msg.text.len(),
                });
                i = close + 3;
            }
            None if tag == TAG_BACKEND => {
                let mut cmd = String::new();
                push_text(&mut cmd, &bytes[content_start..]);
                msg.backend = Some(cmd);
                if msg.class.is_none() {
                    msg.class = Some(tag);
                }
                i = bytes.len();
            }
            None => {
                if msg.class.is_none() {
                    msg.class = Some(tag);
                }
                i = content_start;
            }
        }
        plain_start = i;
    }
    if plain_start < bytes.len() {
        push_text(&mut msg.text, &bytes[plain_start..]);
    }
    msg
}

/// Removes every tag, returning only the presentable text.
pub fn strip(bytes: &[u8]) -> String {
    parse(bytes).text
}

/// Splits an English think-target suffix off a speaker name, as older
/// servers send `"Bob to you"` instead of a `tt` tag.
pub fn think_suffix(name: &str) -> (&str, ThinkTarget) {
    const SUFFIXES: [(&str, ThinkTarget); 4] = [
        (" to your clan", ThinkTarget::Clan),
        (" to a group", ThinkTarget::Group),
        (" to group", ThinkTarget::Group),
        (" to you", ThinkTarget::You),
    ];
    for (suffix, target) in SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return (stripped, target);
        }
    }
    (name, ThinkTarget::None)
}
