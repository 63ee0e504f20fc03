//! The read-side view of the world, rebuilt each tick and handed to
//! rendering, audio and scripting without sharing any mutable state.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::bubble::Bubble;
use crate::draw::{MobileKind, MobileRecord, Stats};
use crate::inventory::Inventory;
use crate::lighting::{LightingFlags, NightInfo};
use crate::pipeline::{DrawPosition, InterpFactors};
use crate::player::PlayerBook;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub index: u8,
    pub kind: MobileKind,
    pub pict_id: u16,
    pub name: String,
    pub colors: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Picture {
    pub id: u16,
    pub h: i16,
    pub v: i16,
    pub plane: i8,
    /// No twin sat at the camera-shifted position in the previous frame.
    pub moving: bool,
    /// Carried over unchanged from the previous frame.
    pub again: bool,
    /// Position of the nearest same-id picture in the previous frame.
    pub prev: Option<(i16, i16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileView {
    pub mobile: MobileRecord,
    pub draw: DrawPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureView {
    pub picture: Picture,
    pub draw: DrawPosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTag {
    pub index: u8,
    pub name: String,
    pub h: i16,
    pub v: i16,
}

/// Draw order computed once per frame, by index into the world's tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderCache {
    pub live: Vec<u8>,
    pub dead: Vec<u8>,
    pub below: Vec<usize>,
    pub level: Vec<usize>,
    pub above: Vec<usize>,
    pub name_tags: Vec<u8>,
}

impl RenderCache {
    pub fn build(
        mobiles: &BTreeMap<u8, MobileRecord>,
        pictures: &[Picture],
        descriptors: &BTreeMap<u8, Descriptor>,
    ) -> Self {
        let mut cache = Self::default();
        let (mut dead, mut live): (Vec<&MobileRecord>, Vec<&MobileRecord>) =
            mobiles.values().partition(|m| m.is_dead());
        live.sort_by_key(|m| (m.v, m.h));
        dead.sort_by_key(|m| (m.v, m.h));
        cache.live = live.iter().map(|m| m.index).collect();
        cache.dead = dead.iter().map(|m| m.index).collect();

        for (i, p) in pictures.iter().enumerate() {
            match p.plane {
                n if n < 0 => cache.below.push(i),
                0 => cache.level.push(i),
                _ => cache.above.push(i),
            }
        }
        for part in [&mut cache.below, &mut cache.level, &mut cache.above] {
            part.sort_by_key(|&i| (pictures[i].v, pictures[i].h));
        }

        let mut tagged: Vec<&MobileRecord> = mobiles
            .values()
            .filter(|m| descriptors.get(&m.index).map_or(false, |d| !d.name.is_empty()))
            .collect();
        // top to bottom, right to left
        tagged.sort_by_key(|m| (m.v, std::cmp::Reverse(m.h)));
        cache.name_tags = tagged.iter().map(|m| m.index).collect();
        cache
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub frame_counter: u64,
    pub num_frames: u64,
    pub lost_frames: u64,
    pub ack_frame: u32,
    pub descriptors: BTreeMap<u8, Descriptor>,
    pub pictures_below: Vec<PictureView>,
    pub pictures_level: Vec<PictureView>,
    pub pictures_above: Vec<PictureView>,
    pub live_mobiles: Vec<MobileView>,
    pub dead_mobiles: Vec<MobileView>,
    pub name_tags: Vec<NameTag>,
    pub stats: Stats,
    pub prev_stats: Stats,
    pub lighting: LightingFlags,
    pub night: NightInfo,
    pub bubbles: Vec<Bubble>,
    pub sounds: Vec<u16>,
    pub players: PlayerBook,
    pub inventory: Inventory,
    pub pic_shift: (i32, i32),
    pub factors: InterpFactors,
    pub cur_time: Option<Instant>,
    pub prev_time: Option<Instant>,
}

impl WorldSnapshot {
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0 && self.descriptors.is_empty()
    }

    pub fn descriptor(&self, index: u8) -> Option<&Descriptor> {
        self.descriptors.get(&index)
    }

    pub fn pictures(&self) -> impl Iterator<Item = &PictureView> {
        self.pictures_below
            .iter()
            .chain(&self.pictures_level)
            .chain(&self.pictures_above)
    }

    pub fn mobiles(&self) -> impl Iterator<Item = &MobileView> {
        self.dead_mobiles.iter().chain(&self.live_mobiles)
    }
}
