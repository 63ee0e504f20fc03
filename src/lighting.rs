//! Lighting flags from the draw-state stat block and the night command
//! carried in server text.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightingFlags(u8);

impl LightingFlags {
    pub const ADJUST_25: Self = Self(0x01);
    pub const ADJUST_50: Self = Self(0x02);
    pub const AREA_DARKER: Self = Self(0x04);
    pub const NO_NIGHT_MODS: Self = Self(0x08);
    pub const NO_SHADOWS: Self = Self(0x10);
    pub const FORCE_100: Self = Self(0x20);

    const ALL: u8 = 0x3F;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps only the bits this client knows about.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LightingFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for LightingFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(LightingFlags, &str); 6] = [
            (LightingFlags::ADJUST_25, "ADJUST_25"),
            (LightingFlags::ADJUST_50, "ADJUST_50"),
            (LightingFlags::AREA_DARKER, "AREA_DARKER"),
            (LightingFlags::NO_NIGHT_MODS, "NO_NIGHT_MODS"),
            (LightingFlags::NO_SHADOWS, "NO_SHADOWS"),
            (LightingFlags::FORCE_100, "FORCE_100"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "LightingFlags({})", set.join(" | "))
    }
}

/// Ambient night state announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NightInfo {
    /// Darkness, 0 (day) to 100.
    pub level: i32,
    /// Sun azimuth in degrees.
    pub azimuth: i32,
    /// Cloud cover, 0 to 100.
    pub cloudy: i32,
    pub flags: LightingFlags,
}

/// Parses a night command.
///
/// Two forms are accepted: `/Nt <level> /sA <azimuth> /cL <cloudy>` (keys
/// in any order, any subset) and the legacy `/nt <level> <flags>
/// <azimuth> <cloudy>`. The command prefix is matched case-insensitively.
pub fn parse_night_command(text: &str) -> Option<NightInfo> {
    let text = text.trim();
    let mut tokens = text.split_whitespace();
    let head = tokens.next()?;
    if !head.eq_ignore_ascii_case("/nt") {
        return None;
    }
    let rest: Vec<&str> = tokens.collect();
    if rest.iter().any(|t| t.starts_with('/')) {
        return parse_keyed(&rest);
    }
    let nums: Vec<i32> = rest.iter().map(|t| t.parse().ok()).collect::<Option<_>>()?;
    match nums.as_slice() {
        [level, flags, azimuth, cloudy] => Some(NightInfo {
            level: *level,
            azimuth: *azimuth,
            cloudy: *cloudy,
            flags: LightingFlags::from_bits_truncate(*flags as u8),
        }),
        [level] => Some(NightInfo {
            level: *level,
            ..NightInfo::default()
        }),
        _ => None,
    }
}

fn parse_keyed(rest: &[&str]) -> Option<NightInfo> {
    let mut info = NightInfo::default();
    let mut iter = rest.iter();
    if let Some(first) = rest.first() {
        if !first.starts_with('/') {
            info.level = first.parse().ok()?;
            iter.next();
        }
    }
    while let Some(key) = iter.next() {
        let value: i32 = iter.next()?.parse().ok()?;
        match key.to_ascii_lowercase().as_str() {
            "/sa" => info.azimuth = value,
            "/cl" => info.cloudy = value,
            "/nt" => info.level = value,
            other => log::debug!("ignoring night key {other}"),
        }
    }
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits() {
        let flags = LightingFlags::from_bits_truncate(0xFF);
        assert_eq!(flags.bits(), 0x3F);
        assert!(flags.contains(LightingFlags::NO_SHADOWS | LightingFlags::FORCE_100));
        let mut f = LightingFlags::empty();
        assert!(f.is_empty());
        f.insert(LightingFlags::AREA_DARKER);
        assert_eq!(format!("{f:?}"), "LightingFlags(AREA_DARKER)");
    }

    #[test]
    fn keyed_night_command() {
        let info = parse_night_command("/Nt 60 /sA 135 /cL 20").unwrap();
        assert_eq!(
            info,
            NightInfo {
                level: 60,
                azimuth: 135,
                cloudy: 20,
                flags: LightingFlags::empty()
            }
        );
    }

    #[test]
    fn legacy_four_integer_form() {
        let info = parse_night_command("/nt 40 16 90 5").unwrap();
        assert_eq!(info.level, 40);
        assert_eq!(info.flags, LightingFlags::NO_SHADOWS);
        assert_eq!(info.azimuth, 90);
        assert_eq!(info.cloudy, 5);
    }

    #[test]
    fn rejects_other_text() {
        assert_eq!(parse_night_command("/who"), None);
        assert_eq!(parse_night_command("/nt a b"), None);
        assert_eq!(parse_night_command("/nt 1 2"), None);
        assert_eq!(parse_night_command("/nt 30").map(|i| i.level), Some(30));
    }
}
