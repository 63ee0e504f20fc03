//! The world state machine. Live sessions and movie playback both feed it
//! decoded [`Frame`]s; readers only ever see [`WorldSnapshot`] copies.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::bepp;
use crate::bubble::Bubble;
use crate::catalog::{ImageCatalog, NullCatalog};
use crate::consts::BUBBLE_LIFE_FRAMES;
use crate::draw::{
    DrawState, MobileKind, MobileRecord, PictureList, PictureRecord, Stats, TailBlock,
    TAIL_BUBBLES, TAIL_INFO_TEXT, TAIL_INVENTORY, TAIL_SOUNDS,
};
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::lighting::{self, LightingFlags, NightInfo};
use crate::macroman;
use crate::movie::{GameState, MobileEntry};
use crate::notify::{Notification, NotificationFilter};
use crate::packet::Frame;
use crate::pipeline::{self, InterpFactors, Presentation};
use crate::player::{PlayerBook, PlayerEvent};
use crate::snapshot::{Descriptor, MobileView, NameTag, Picture, PictureView, RenderCache, WorldSnapshot};

pub struct World {
    initialized: bool,
    catalog: Arc<dyn ImageCatalog>,
    descriptors: BTreeMap<u8, Descriptor>,
    prev_descriptors: BTreeMap<u8, Descriptor>,
    mobiles: BTreeMap<u8, MobileRecord>,
    prev_mobiles: BTreeMap<u8, MobileRecord>,
    pictures: Vec<Picture>,
    pic_shift: (i32, i32),
    bubbles: Vec<Bubble>,
    players: PlayerBook,
    inventory: Arc<Mutex<Inventory>>,
    stats: Stats,
    prev_stats: Stats,
    lighting: LightingFlags,
    night: NightInfo,
    sounds: Vec<u16>,
    ack_frame: Option<u32>,
    resend_frame: u32,
    lost_frames: u64,
    num_frames: u64,
    cur_time: Option<Instant>,
    prev_time: Option<Instant>,
    filter: NotificationFilter,
    notifications: Vec<Notification>,
    console: Vec<String>,
    render: RenderCache,
}

impl Default for World {
    fn default() -> Self {
        Self::new(Arc::new(NullCatalog))
    }
}

impl World {
    pub fn new(catalog: Arc<dyn ImageCatalog>) -> Self {
        Self {
            initialized: false,
            catalog,
            descriptors: BTreeMap::new(),
            prev_descriptors: BTreeMap::new(),
            mobiles: BTreeMap::new(),
            prev_mobiles: BTreeMap::new(),
            pictures: Vec::new(),
            pic_shift: (0, 0),
            bubbles: Vec::new(),
            players: PlayerBook::new(),
            inventory: Arc::default(),
            stats: Stats::default(),
            prev_stats: Stats::default(),
            lighting: LightingFlags::empty(),
            night: NightInfo::default(),
            sounds: Vec::new(),
            ack_frame: None,
            resend_frame: 0,
            lost_frames: 0,
            num_frames: 0,
            cur_time: None,
            prev_time: None,
            filter: NotificationFilter::default(),
            notifications: Vec::new(),
            console: Vec::new(),
            render: RenderCache::default(),
        }
    }

    /// Starts a session. Frame state is cleared; players and inventory
    /// persist across reconnects.
    pub fn begin(&mut self) {
        self.descriptors.clear();
        self.prev_descriptors.clear();
        self.mobiles.clear();
        self.prev_mobiles.clear();
        self.pictures.clear();
        self.pic_shift = (0, 0);
        self.bubbles.clear();
        self.sounds.clear();
        self.ack_frame = None;
        self.resend_frame = 0;
        self.lost_frames = 0;
        self.num_frames = 0;
        self.cur_time = None;
        self.prev_time = None;
        self.render = RenderCache::default();
        self.initialized = true;
        log::debug!("world initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_notification_filter(&mut self, filter: NotificationFilter) {
        self.filter = filter;
    }

    pub fn players(&self) -> &PlayerBook {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut PlayerBook {
        &mut self.players
    }

    /// Shared handle to the inventory, which has its own lock so command
    /// handlers can touch it without the world lock.
    pub fn inventory(&self) -> Arc<Mutex<Inventory>> {
        Arc::clone(&self.inventory)
    }

    pub fn descriptors(&self) -> &BTreeMap<u8, Descriptor> {
        &self.descriptors
    }

    /// The descriptor table as it stood before the latest draw state.
    pub fn prev_descriptors(&self) -> &BTreeMap<u8, Descriptor> {
        &self.prev_descriptors
    }

    pub fn mobiles(&self) -> &BTreeMap<u8, MobileRecord> {
        &self.mobiles
    }

    pub fn pictures(&self) -> &[Picture] {
        &self.pictures
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn night(&self) -> NightInfo {
        self.night
    }

    pub fn ack_frame(&self) -> u32 {
        self.ack_frame.unwrap_or(0)
    }

    pub fn resend_frame(&self) -> u32 {
        self.resend_frame
    }

    pub fn lost_frames(&self) -> u64 {
        self.lost_frames
    }

    pub fn num_frames(&self) -> u64 {
        self.num_frames
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        mem::take(&mut self.notifications)
    }

    /// Queues a line for the console collaborator. Accepted before the
    /// first frame too.
    pub fn push_console(&mut self, line: impl Into<String>) {
        self.console.push(line.into());
    }

    pub fn take_console(&mut self) -> Vec<String> {
        mem::take(&mut self.console)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }

    pub fn apply_frame(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        match frame {
            Frame::DrawState(ds) => self.apply_draw_state(ds, now),
            Frame::GameState(gs) => self.apply_game_state(gs),
            Frame::MobileTable(entries) => self.apply_mobile_table(entries),
            Frame::PictureTable(records) => self.apply_picture_table(records),
            Frame::InfoText(text) => self.apply_info_text(text),
            other => {
                log::debug!("world ignoring {} frame", other.name());
                Ok(())
            }
        }
    }

    pub fn apply_draw_state(&mut self, ds: &DrawState, now: Instant) -> Result<()> {
        self.ensure_initialized()?;
        self.account_frame(ds.ack_frame);
        self.resend_frame = ds.resend_frame;

        self.prev_descriptors = self.descriptors.clone();
        for rec in &ds.descriptors {
            let desc = Descriptor {
                index: rec.index,
                kind: MobileKind::from_u8(rec.kind),
                pict_id: rec.pict_id,
                name: macroman::decode(&rec.name),
                colors: rec.colors.clone(),
            };
            self.install_descriptor(desc);
        }

        self.prev_mobiles = mem::take(&mut self.mobiles);
        for m in &ds.mobiles {
            if !self.descriptors.contains_key(&m.index) {
                log::trace!("mobile {} has no descriptor", m.index);
            }
            self.mobiles.insert(m.index, *m);
        }

        let prev_pictures = mem::take(&mut self.pictures);
        let mut pictures: Vec<Picture> = match &ds.pictures {
            PictureList::Fresh(_) => Vec::new(),
            PictureList::Again(_) => prev_pictures
                .iter()
                .map(|p| Picture { again: true, ..*p })
                .collect(),
        };
        pictures.extend(ds.pictures.records().iter().map(|r| self.picture(r)));
        self.pic_shift = pipeline::detect_shift(&prev_pictures, &pictures);
        pipeline::link_pictures(&prev_pictures, &mut pictures, self.pic_shift);
        self.pictures = pictures;

        self.sounds.clear();
        let mut info_texts = Vec::new();
        for block in &ds.tail {
            self.apply_tail_block(block, &mut info_texts);
        }
        let frame = self.num_frames;
        self.bubbles.retain(|b| b.is_alive(frame, BUBBLE_LIFE_FRAMES));

        self.prev_stats = self.stats;
        self.stats = ds.stats;
        self.lighting = LightingFlags::from_bits_truncate(ds.stats.lighting);

        self.prev_time = self.cur_time;
        self.cur_time = Some(now);

        for text in info_texts {
            self.apply_info_text(&text)?;
        }
        self.rebuild_render_cache();
        Ok(())
    }

    fn account_frame(&mut self, ack: u32) {
        if let Some(prev) = self.ack_frame {
            if ack > prev {
                self.lost_frames += (ack - prev - 1) as u64;
            } else {
                log::debug!("ack frame went from {prev} to {ack}");
            }
        }
        self.ack_frame = Some(ack);
        self.num_frames += 1;
    }

    fn install_descriptor(&mut self, desc: Descriptor) {
        if let Some(old) = self.descriptors.get(&desc.index) {
            if old.name != desc.name {
                log::debug!(
                    "descriptor {} reassigned from {:?} to {:?}",
                    desc.index,
                    old.name,
                    desc.name
                );
            }
        }
        if desc.kind != MobileKind::Monster {
            self.players.observe(
                &desc.name,
                desc.pict_id,
                &desc.colors,
                desc.kind == MobileKind::Npc,
                crate::time::unix_now(),
            );
        }
        self.descriptors.insert(desc.index, desc);
    }

    fn picture(&self, rec: &PictureRecord) -> Picture {
        Picture {
            id: rec.id,
            h: rec.h,
            v: rec.v,
            plane: self.catalog.plane(rec.id),
            ..Picture::default()
        }
    }

    fn apply_tail_block(&mut self, block: &TailBlock, info_texts: &mut Vec<Vec<u8>>) {
        match block.kind {
            TAIL_INVENTORY => match block.decode_inventory() {
                Ok(cmds) => self.inventory.lock().apply_all(&cmds, self.catalog.as_ref()),
                Err(e) => log::warn!("dropping inventory block: {e}"),
            },
            TAIL_BUBBLES => match block.decode_bubbles() {
                Ok(records) => {
                    let frame = self.num_frames;
                    for rec in &records {
                        let Some(bubble) = Bubble::from_record(rec, frame) else {
                            log::debug!("unknown bubble type {:#04x}", rec.type_byte);
                            continue;
                        };
                        self.bubbles.retain(|b| b.index != bubble.index);
                        self.bubbles.push(bubble);
                    }
                }
                Err(e) => log::warn!("dropping bubble block: {e}"),
            },
            TAIL_SOUNDS => match block.decode_sounds() {
                Ok(ids) => self.sounds.extend(ids),
                Err(e) => log::debug!("dropping sound block: {e}"),
            },
            TAIL_INFO_TEXT => info_texts.push(block.info_text_bytes().to_vec()),
            other => log::debug!("skipping tail block {other} ({} bytes)", block.body.len()),
        }
    }

    /// Applies one line of server text: night commands, player events and
    /// the console.
    pub fn apply_info_text(&mut self, text: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        let msg = bepp::parse(text);
        if let Some(cmd) = &msg.backend {
            match lighting::parse_night_command(cmd) {
                Some(night) => {
                    log::debug!("night level {} azimuth {}", night.level, night.azimuth);
                    self.night = night;
                }
                None => log::debug!("ignoring backend command {cmd:?}"),
            }
        }
        if let Some(event) = PlayerEvent::from_message(&msg) {
            let note = self.players.apply(&event, &msg.text, crate::time::unix_now());
            if let Some(note) = note.filter(|n| self.filter.allows(n.kind)) {
                self.notifications.push(note);
            }
        }
        if !msg.text.trim().is_empty() {
            self.console.push(msg.text);
        }
        Ok(())
    }

    pub fn apply_game_state(&mut self, gs: &GameState) -> Result<()> {
        self.ensure_initialized()?;
        if !gs.info_text.is_empty() {
            self.apply_info_text(&gs.info_text)?;
        }
        self.apply_picture_table(&gs.pictures)?;
        self.apply_mobile_table(&gs.mobiles)
    }

    /// The login blocks that rebuild this world when a recording starts
    /// mid-session: every descriptor with its current pose, and the picture
    /// list.
    pub fn login_state(&self) -> GameState {
        let mobiles = self
            .descriptors
            .values()
            .map(|d| {
                let pose = self.mobiles.get(&d.index);
                MobileEntry {
                    index: d.index as u32,
                    pict_id: d.pict_id,
                    kind: d.kind.as_u8(),
                    state: pose.map_or(0, |m| m.state),
                    colors: pose.map_or(0, |m| m.colors),
                    h: pose.map_or(0, |m| m.h),
                    v: pose.map_or(0, |m| m.v),
                    color_table: d.colors.clone(),
                    name: macroman::encode(&d.name),
                    bubble_counter: 0,
                }
            })
            .collect();
        let pictures = self
            .pictures
            .iter()
            .map(|p| PictureRecord {
                id: p.id,
                h: p.h,
                v: p.v,
            })
            .collect();
        GameState {
            info_text: Vec::new(),
            pictures,
            mobiles,
        }
    }

    pub fn apply_mobile_table(&mut self, entries: &[MobileEntry]) -> Result<()> {
        self.ensure_initialized()?;
        for entry in entries {
            let Ok(index) = u8::try_from(entry.index) else {
                log::debug!("mobile table index {} out of range", entry.index);
                continue;
            };
            self.install_descriptor(Descriptor {
                index,
                kind: MobileKind::from_u8(entry.kind),
                pict_id: entry.pict_id,
                name: macroman::decode(&entry.name),
                colors: entry.color_table.clone(),
            });
            self.mobiles.insert(
                index,
                MobileRecord {
                    index,
                    state: entry.state,
                    h: entry.h,
                    v: entry.v,
                    colors: entry.colors,
                },
            );
        }
        self.rebuild_render_cache();
        Ok(())
    }

    pub fn apply_picture_table(&mut self, records: &[PictureRecord]) -> Result<()> {
        self.ensure_initialized()?;
        if records.is_empty() {
            return Ok(());
        }
        let prev = mem::take(&mut self.pictures);
        let mut pictures: Vec<Picture> = records.iter().map(|r| self.picture(r)).collect();
        pipeline::link_pictures(&prev, &mut pictures, (0, 0));
        self.pictures = pictures;
        self.rebuild_render_cache();
        Ok(())
    }

    fn rebuild_render_cache(&mut self) {
        self.render = RenderCache::build(&self.mobiles, &self.pictures, &self.descriptors);
    }

    /// A deep copy of everything a reader needs to draw the world at `now`.
    /// An uninitialized world yields the empty snapshot.
    pub fn snapshot(&self, now: Instant, pres: &Presentation) -> WorldSnapshot {
        if !self.initialized {
            return WorldSnapshot::default();
        }
        let factors = InterpFactors::compute(now, self.prev_time, self.cur_time, pres);
        let max = pres.max_mobile_interp_pixels;
        let mobile_view = |i: &u8| {
            let m = self.mobiles.get(i)?;
            let prev = self.prev_mobiles.get(i).map(|p| (p.h, p.v));
            Some(MobileView {
                mobile: *m,
                draw: pipeline::interpolate(prev, (m.h, m.v), self.pic_shift, factors.alpha, max),
            })
        };
        let picture_view = |&i: &usize| {
            let p = self.pictures[i];
            PictureView {
                picture: p,
                draw: pipeline::interpolate(p.prev, (p.h, p.v), self.pic_shift, factors.alpha, max),
            }
        };
        let name_tags = self
            .render
            .name_tags
            .iter()
            .filter_map(|i| {
                let m = self.mobiles.get(i)?;
                let d = self.descriptors.get(i)?;
                Some(NameTag {
                    index: *i,
                    name: d.name.clone(),
                    h: m.h,
                    v: m.v,
                })
            })
            .collect();

        WorldSnapshot {
            frame_counter: self.num_frames,
            num_frames: self.num_frames,
            lost_frames: self.lost_frames,
            ack_frame: self.ack_frame(),
            descriptors: self.descriptors.clone(),
            pictures_below: self.render.below.iter().map(picture_view).collect(),
            pictures_level: self.render.level.iter().map(picture_view).collect(),
            pictures_above: self.render.above.iter().map(picture_view).collect(),
            live_mobiles: self.render.live.iter().filter_map(mobile_view).collect(),
            dead_mobiles: self.render.dead.iter().filter_map(mobile_view).collect(),
            name_tags,
            stats: self.stats,
            prev_stats: self.prev_stats,
            lighting: self.lighting,
            night: self.night,
            bubbles: self.bubbles.clone(),
            sounds: self.sounds.clone(),
            players: self.players.clone(),
            inventory: self.inventory.lock().clone(),
            pic_shift: self.pic_shift,
            factors,
            cur_time: self.cur_time,
            prev_time: self.prev_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bubble::{BubbleRecord, BubbleType};
    use crate::catalog::MapCatalog;
    use crate::consts::POSE_DEAD;
    use crate::draw::DescriptorRecord;
    use crate::inventory::{FullEntry, InvCommand, ItemRef, Slot};
    use crate::notify::NotificationKind;
    use std::time::Duration;

    fn frame(ack: u32) -> DrawState {
        DrawState {
            ack_frame: ack,
            ..DrawState::default()
        }
    }

    fn started() -> World {
        let mut world = World::default();
        world.begin();
        world
    }

    fn bubble_block(index: u8, text: &[u8]) -> TailBlock {
        TailBlock::bubbles(&[BubbleRecord {
            index,
            type_byte: BubbleType::Normal.as_u8(),
            language_byte: None,
            anchor: None,
            text: text.to_vec(),
        }])
        .unwrap()
    }

    #[test]
    fn uninitialized_world_rejects_mutation() {
        let mut world = World::default();
        let now = Instant::now();
        assert!(matches!(
            world.apply_draw_state(&frame(1), now),
            Err(Error::Uninitialized)
        ));
        assert!(world.snapshot(now, &Presentation::default()).is_empty());
    }

    #[test]
    fn lost_frame_accounting() {
        let mut world = started();
        let now = Instant::now();
        let acks = [10u32, 11, 15, 16, 30];
        for ack in acks {
            world.apply_draw_state(&frame(ack), now).unwrap();
        }
        let n = acks.len() as u64;
        assert_eq!(world.num_frames(), n);
        assert_eq!(world.lost_frames(), (30 - 10) - (n - 1));
    }

    #[test]
    fn descriptors_and_mobiles() {
        let mut world = started();
        let mut ds = frame(1);
        ds.descriptors.push(DescriptorRecord {
            index: 4,
            kind: MobileKind::Player.as_u8(),
            pict_id: 10,
            name: b"Hero".to_vec(),
            colors: vec![7],
        });
        ds.mobiles.push(MobileRecord {
            index: 4,
            state: 0,
            h: 3,
            v: 4,
            colors: 0,
        });
        world.apply_draw_state(&ds, Instant::now()).unwrap();
        assert_eq!(world.descriptors()[&4].name, "Hero");
        assert_eq!(world.players().get("hero").unwrap().pict_id, 10);

        // next frame: the mobile falls; the descriptor persists
        let mut ds = frame(2);
        ds.mobiles.push(MobileRecord {
            index: 4,
            state: POSE_DEAD,
            h: 3,
            v: 4,
            colors: 0,
        });
        world.apply_draw_state(&ds, Instant::now()).unwrap();
        let snap = world.snapshot(Instant::now(), &Presentation::default());
        assert_eq!(snap.dead_mobiles.len(), 1);
        assert!(snap.live_mobiles.is_empty());
        assert_eq!(snap.descriptor(4).unwrap().name, "Hero");
        assert_eq!(snap.name_tags[0].name, "Hero");
    }

    #[test]
    fn again_retains_previous_pictures() {
        let mut world = started();
        let now = Instant::now();
        let mut ds = frame(1);
        ds.pictures = PictureList::Fresh(vec![PictureRecord { id: 1, h: 0, v: 0 }]);
        world.apply_draw_state(&ds, now).unwrap();
        let mut ds = frame(2);
        ds.pictures = PictureList::Again(vec![PictureRecord { id: 2, h: 5, v: 5 }]);
        world.apply_draw_state(&ds, now).unwrap();
        let pics = world.pictures();
        assert_eq!(pics.len(), 2);
        assert!(pics[0].again && !pics[0].moving);
        assert!(!pics[1].again && pics[1].moving);
    }

    #[test]
    fn global_shift_is_recorded() {
        let mut world = started();
        let now = Instant::now();
        let recs = |dx: i16| {
            PictureList::Fresh(vec![
                PictureRecord { id: 1, h: dx, v: 0 },
                PictureRecord {
                    id: 2,
                    h: 100 + dx,
                    v: 40,
                },
            ])
        };
        let mut ds = frame(1);
        ds.pictures = recs(0);
        world.apply_draw_state(&ds, now).unwrap();
        let mut ds = frame(2);
        ds.pictures = recs(-8);
        world.apply_draw_state(&ds, now).unwrap();
        let snap = world.snapshot(now, &Presentation::default());
        assert_eq!(snap.pic_shift, (-8, 0));
        assert!(snap.pictures().all(|p| !p.picture.moving));
    }

    #[test]
    fn pictures_use_catalog_planes() {
        let mut catalog = MapCatalog::default();
        catalog.planes.insert(9, -2);
        let mut world = World::new(Arc::new(catalog));
        world.begin();
        let mut ds = frame(1);
        ds.pictures = PictureList::Fresh(vec![
            PictureRecord { id: 9, h: 0, v: 0 },
            PictureRecord { id: 3, h: 0, v: 0 },
        ]);
        world.apply_draw_state(&ds, Instant::now()).unwrap();
        let snap = world.snapshot(Instant::now(), &Presentation::default());
        assert_eq!(snap.pictures_below.len(), 1);
        assert_eq!(snap.pictures_level.len(), 1);
    }

    #[test]
    fn bubbles_dedupe_and_expire() {
        let mut world = started();
        let now = Instant::now();
        let mut ds = frame(1);
        ds.tail.push(bubble_block(3, b"first"));
        world.apply_draw_state(&ds, now).unwrap();
        let mut ds = frame(2);
        ds.tail.push(bubble_block(3, b"second"));
        world.apply_draw_state(&ds, now).unwrap();
        assert_eq!(world.bubbles().len(), 1);
        assert_eq!(world.bubbles()[0].text, "second");
        let created = world.bubbles()[0].created_frame;

        for ack in 3..(3 + BUBBLE_LIFE_FRAMES as u32 + 1) {
            world.apply_draw_state(&frame(ack), now).unwrap();
        }
        let snap = world.snapshot(now, &Presentation::default());
        assert!(snap
            .bubbles
            .iter()
            .all(|b| b.created_frame > snap.frame_counter - BUBBLE_LIFE_FRAMES));
        assert!(snap.bubbles.iter().all(|b| b.created_frame != created));
    }

    #[test]
    fn inventory_commands_apply_in_order() {
        let mut catalog = MapCatalog::default();
        catalog.slots.insert(200, Slot::RightHand);
        catalog.slots.insert(300, Slot::RightHand);
        let mut world = World::new(Arc::new(catalog));
        world.begin();
        let mut ds = frame(1);
        ds.tail.push(
            TailBlock::inventory(&[
                InvCommand::Full {
                    indexed: false,
                    items: vec![
                        FullEntry {
                            item: ItemRef::legacy(100),
                            equipped: false,
                        },
                        FullEntry {
                            item: ItemRef::legacy(200),
                            equipped: true,
                        },
                    ],
                },
                InvCommand::Add {
                    item: ItemRef::legacy(300),
                    equip: false,
                    name: b"Axe".to_vec(),
                },
                InvCommand::Equip(ItemRef::legacy(300)),
            ])
            .unwrap(),
        );
        world.apply_draw_state(&ds, Instant::now()).unwrap();
        let inv = world.inventory();
        let inv = inv.lock();
        assert_eq!(inv.len(), 3);
        let equipped: Vec<u16> = inv.equipped().map(|i| i.id).collect();
        assert_eq!(equipped, vec![300]);
    }

    #[test]
    fn fallen_text_updates_player_and_notifies() {
        let mut world = started();
        world
            .apply_info_text(b"\xC2pnBob\xC2pn has fallen")
            .unwrap();
        assert!(world.players().get("Bob").unwrap().dead);
        let notes = world.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::Fallen);
        assert_eq!(notes[0].name, "Bob");
        assert_eq!(notes[0].text, "Bob has fallen");
        assert_eq!(world.take_console(), vec!["Bob has fallen".to_string()]);

        let mut quiet = NotificationFilter::default();
        quiet.set(NotificationKind::Fallen, false);
        world.set_notification_filter(quiet);
        world.apply_info_text(b"Ann has fallen").unwrap();
        assert!(world.players().get("ann").unwrap().dead);
        assert!(world.take_notifications().is_empty());
    }

    #[test]
    fn night_command_in_tail_text() {
        let mut world = started();
        let mut ds = frame(1);
        ds.stats.lighting = 0x14;
        ds.tail.push(TailBlock::info_text(b"\xC2be/nt 70 /sA 200 /cL 30"));
        world.apply_draw_state(&ds, Instant::now()).unwrap();
        assert_eq!(world.night().level, 70);
        assert_eq!(world.night().cloudy, 30);
        let snap = world.snapshot(Instant::now(), &Presentation::default());
        assert!(snap.lighting.contains(LightingFlags::NO_SHADOWS));
        assert!(world.take_console().is_empty());
    }

    #[test]
    fn snapshot_interpolates_between_frames() {
        let mut world = started();
        let t0 = Instant::now();
        let mut ds = frame(1);
        ds.mobiles.push(MobileRecord {
            index: 1,
            state: 0,
            h: 0,
            v: 0,
            colors: 0,
        });
        world.apply_draw_state(&ds, t0).unwrap();
        let mut ds = frame(2);
        ds.mobiles.push(MobileRecord {
            index: 1,
            state: 0,
            h: 40,
            v: 0,
            colors: 0,
        });
        let t1 = t0 + Duration::from_millis(200);
        world.apply_draw_state(&ds, t1).unwrap();
        let snap = world.snapshot(t0 + Duration::from_millis(100), &Presentation::default());
        let m = snap.live_mobiles[0];
        assert_eq!((m.draw.h, m.draw.snapped), (20, false));
        assert_eq!(snap.prev_time, Some(t0));
    }
}
