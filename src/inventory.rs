//! Inventory commands carried in the draw-state tail, and the inventory
//! they maintain.
//!
//! Items are identified by their image id plus, for template items, a
//! per-id index. Legacy streams do not send an index; their commands target
//! the first item with a matching id.

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::{read_cstring, write_cstring};
use crate::catalog::ImageCatalog;
use crate::macroman;

pub const OP_NONE: u8 = 0;
pub const OP_FULL: u8 = 1;
pub const OP_ADD: u8 = 2;
pub const OP_ADD_EQUIP: u8 = 3;
pub const OP_DELETE: u8 = 4;
pub const OP_EQUIP: u8 = 5;
pub const OP_UNEQUIP: u8 = 6;
pub const OP_MULTIPLE: u8 = 7;
pub const OP_NAME: u8 = 8;
pub const OP_LEGACY_PADDING: u8 = 0xB1;
pub const OP_INDEXED: u8 = 0x80;

/// Index value for items that carry no per-id index.
pub const NO_INDEX: i32 = -1;

/// Equipment slots. Both-hands items conflict with either hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Slot {
    RightHand,
    LeftHand,
    BothHands,
    Head,
    Neck,
    Shoulders,
    Torso,
    Arms,
    Gloves,
    Waist,
    Legs,
    Feet,
    Finger,
    Coat,
}

impl Slot {
    pub fn conflicts_with(self, other: Slot) -> bool {
        use Slot::*;
        self == other
            || matches!(
                (self, other),
                (BothHands, RightHand | LeftHand) | (RightHand | LeftHand, BothHands)
            )
    }
}

/// Targets an item by id, with the per-id index when the command was sent
/// in indexed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub id: u16,
    pub index: Option<u8>,
}

impl ItemRef {
    pub fn legacy(id: u16) -> Self {
        Self { id, index: None }
    }

    pub fn indexed(id: u16, index: u8) -> Self {
        Self {
            id,
            index: Some(index),
        }
    }

    fn read_from(reader: &mut impl ReadBytesExt, indexed: bool) -> io::Result<Self> {
        let id = reader.read_u16::<BigEndian>()?;
        let index = if indexed {
            Some(reader.read_u8()?)
        } else {
            None
        };
        Ok(Self { id, index })
    }

    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u16::<BigEndian>(self.id)?;
        if let Some(index) = self.index {
            writer.write_u8(index)?;
        }
        Ok(())
    }

    fn matches(&self, item: &Item) -> bool {
        item.id == self.id && self.index.map_or(true, |i| item.index == i as i32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullEntry {
    pub item: ItemRef,
    pub equipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvCommand {
    Full {
        indexed: bool,
        items: Vec<FullEntry>,
    },
    Add {
        item: ItemRef,
        equip: bool,
        name: Vec<u8>,
    },
    Delete(ItemRef),
    Equip(ItemRef),
    Unequip(ItemRef),
    Multiple {
        indexed: bool,
        cmds: Vec<InvCommand>,
    },
    Name {
        item: ItemRef,
        name: Vec<u8>,
    },
    Padding,
}

impl InvCommand {
    fn read_one(reader: &mut impl ReadBytesExt, op: u8) -> io::Result<Self> {
        if op == OP_LEGACY_PADDING {
            return Ok(Self::Padding);
        }
        let indexed = op & OP_INDEXED != 0;
        Ok(match op & !OP_INDEXED {
            OP_FULL => {
                let count = reader.read_u8()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let item = ItemRef::read_from(reader, indexed)?;
                    let equipped = reader.read_u8()? != 0;
                    items.push(FullEntry { item, equipped });
                }
                Self::Full { indexed, items }
            }
            code @ (OP_ADD | OP_ADD_EQUIP) => Self::Add {
                item: ItemRef::read_from(reader, indexed)?,
                equip: code == OP_ADD_EQUIP,
                name: read_cstring(reader)?,
            },
            OP_DELETE => Self::Delete(ItemRef::read_from(reader, indexed)?),
            OP_EQUIP => Self::Equip(ItemRef::read_from(reader, indexed)?),
            OP_UNEQUIP => Self::Unequip(ItemRef::read_from(reader, indexed)?),
            OP_MULTIPLE => {
                let count = reader.read_u8()?;
                let mut cmds = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let sub = reader.read_u8()?;
                    cmds.push(Self::read_one(reader, sub)?);
                }
                Self::Multiple { indexed, cmds }
            }
            OP_NAME => Self::Name {
                item: ItemRef::read_from(reader, indexed)?,
                name: read_cstring(reader)?,
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown inventory opcode {op:#04x}"),
                ))
            }
        })
    }

    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        let flag = |item: &ItemRef| if item.index.is_some() { OP_INDEXED } else { 0 };
        match self {
            Self::Full { indexed, items } => {
                let op = if *indexed { OP_FULL | OP_INDEXED } else { OP_FULL };
                writer.write_u8(op)?;
                writer.write_u8(items.len() as u8)?;
                for entry in items {
                    entry.item.write_to(writer)?;
                    writer.write_u8(entry.equipped as u8)?;
                }
            }
            Self::Add { item, equip, name } => {
                let op = if *equip { OP_ADD_EQUIP } else { OP_ADD };
                writer.write_u8(op | flag(item))?;
                item.write_to(writer)?;
                write_cstring(writer, name)?;
            }
            Self::Delete(item) | Self::Equip(item) | Self::Unequip(item) => {
                let op = match self {
                    Self::Delete(_) => OP_DELETE,
                    Self::Equip(_) => OP_EQUIP,
                    _ => OP_UNEQUIP,
                };
                writer.write_u8(op | flag(item))?;
                item.write_to(writer)?;
            }
            Self::Multiple { indexed, cmds } => {
                let op = if *indexed {
                    OP_MULTIPLE | OP_INDEXED
                } else {
                    OP_MULTIPLE
                };
                writer.write_u8(op)?;
                writer.write_u8(cmds.len() as u8)?;
                for cmd in cmds {
                    cmd.write_to(writer)?;
                }
            }
            Self::Name { item, name } => {
                writer.write_u8(OP_NAME | flag(item))?;
                item.write_to(writer)?;
                write_cstring(writer, name)?;
            }
            Self::Padding => writer.write_u8(OP_LEGACY_PADDING)?,
        }
        Ok(())
    }
}

/// Reads commands up to the `None` terminator (or the end of input).
pub fn read_commands(reader: &mut impl ReadBytesExt) -> io::Result<Vec<InvCommand>> {
    let mut cmds = Vec::new();
    loop {
        let op = match reader.read_u8() {
            Ok(op) => op,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(cmds),
            Err(e) => return Err(e),
        };
        if op == OP_NONE {
            return Ok(cmds);
        }
        cmds.push(InvCommand::read_one(reader, op)?);
    }
}

/// Writes commands followed by the `None` terminator.
pub fn write_commands(writer: &mut impl WriteBytesExt, cmds: &[InvCommand]) -> io::Result<()> {
    for cmd in cmds {
        cmd.write_to(writer)?;
    }
    writer.write_u8(OP_NONE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: u16,
    pub index: i32,
    pub name: String,
    pub equipped: bool,
    pub quantity: u32,
    pub order: u32,
}

/// A display row: either one template item or a stack of coalesced
/// legacy items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemGroup {
    pub id: u16,
    pub name: String,
    pub quantity: u32,
    pub equipped: bool,
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    items: Vec<Item>,
    next_order: u32,
    revision: u64,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bumped whenever a command changes the inventory.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn find(&self, item: ItemRef) -> Option<&Item> {
        self.items.iter().find(|i| item.matches(i))
    }

    pub fn equipped(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| i.equipped)
    }

    /// Applies commands in wire order.
    pub fn apply_all(&mut self, cmds: &[InvCommand], catalog: &dyn ImageCatalog) {
        for cmd in cmds {
            self.apply(cmd, catalog);
        }
    }

    pub fn apply(&mut self, cmd: &InvCommand, catalog: &dyn ImageCatalog) {
        let changed = match cmd {
            InvCommand::Full { items, .. } => self.replace(items, catalog),
            InvCommand::Add { item, equip, name } => {
                self.add(*item, macroman::decode(name), *equip, catalog);
                true
            }
            InvCommand::Delete(item) => self.delete(*item),
            InvCommand::Equip(item) => self.set_equipped(*item, true, catalog),
            InvCommand::Unequip(item) => self.set_equipped(*item, false, catalog),
            InvCommand::Multiple { cmds, .. } => {
                // nested commands bump the revision themselves
                self.apply_all(cmds, catalog);
                false
            }
            InvCommand::Name { item, name } => self.rename(*item, macroman::decode(name)),
            InvCommand::Padding => false,
        };
        if changed {
            self.revision += 1;
        }
    }

    fn replace(&mut self, entries: &[FullEntry], catalog: &dyn ImageCatalog) -> bool {
        let previous = std::mem::take(&mut self.items);
        self.next_order = 0;
        for entry in entries {
            let name = previous
                .iter()
                .find(|i| entry.item.matches(i))
                .map(|i| i.name.clone())
                .unwrap_or_default();
            self.add(entry.item, name, entry.equipped, catalog);
        }
        previous != self.items
    }

    fn add(&mut self, item: ItemRef, name: String, equip: bool, catalog: &dyn ImageCatalog) {
        self.items.push(Item {
            id: item.id,
            index: item.index.map_or(NO_INDEX, i32::from),
            name,
            equipped: false,
            quantity: 1,
            order: self.next_order,
        });
        self.next_order += 1;
        if equip {
            let pos = self.items.len() - 1;
            self.equip_at(pos, catalog);
        }
    }

    fn delete(&mut self, item: ItemRef) -> bool {
        match self.items.iter().position(|i| item.matches(i)) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => {
                log::debug!("inventory delete of unknown item {}", item.id);
                false
            }
        }
    }

    fn rename(&mut self, item: ItemRef, name: String) -> bool {
        match self.items.iter_mut().find(|i| item.matches(i)) {
            Some(found) => {
                found.name = name;
                true
            }
            None => false,
        }
    }

    fn set_equipped(&mut self, item: ItemRef, equip: bool, catalog: &dyn ImageCatalog) -> bool {
        let Some(pos) = self.items.iter().position(|i| item.matches(i)) else {
            return false;
        };
        if equip {
            self.equip_at(pos, catalog);
        } else {
            self.items[pos].equipped = false;
        }
        true
    }

    fn equip_at(&mut self, pos: usize, catalog: &dyn ImageCatalog) {
        if let Some(slot) = catalog.item_slot(self.items[pos].id) {
            for (i, other) in self.items.iter_mut().enumerate() {
                if i == pos || !other.equipped {
                    continue;
                }
                if catalog
                    .item_slot(other.id)
                    .is_some_and(|s| s.conflicts_with(slot))
                {
                    other.equipped = false;
                }
            }
        }
        self.items[pos].equipped = true;
    }

    /// Groups items for display, in display order.
    pub fn groups(&self, catalog: &dyn ImageCatalog) -> Vec<ItemGroup> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by_key(|&i| self.items[i].order);
        let mut groups: Vec<ItemGroup> = Vec::new();
        for i in order {
            let item = &self.items[i];
            let key = normalize_name(&item.name);
            let existing = if catalog.is_template_item(item.id) {
                None
            } else {
                groups.iter_mut().find(|g| {
                    g.id == item.id
                        && !catalog.is_template_item(g.id)
                        && normalize_name(&g.name) == key
                })
            };
            match existing {
                Some(group) => {
                    group.quantity += item.quantity;
                    group.equipped |= item.equipped;
                    group.members.push(i);
                }
                None => groups.push(ItemGroup {
                    id: item.id,
                    name: item.name.clone(),
                    quantity: item.quantity,
                    equipped: item.equipped,
                    members: vec![i],
                }),
            }
        }
        groups
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MapCatalog, NullCatalog};
    use std::io::Cursor;

    fn hands_catalog(shared: bool) -> MapCatalog {
        let mut cat = MapCatalog::default();
        cat.slots.insert(200, Slot::RightHand);
        cat.slots
            .insert(300, if shared { Slot::RightHand } else { Slot::Head });
        cat
    }

    fn scenario() -> Vec<u8> {
        let mut wire = Vec::new();
        write_commands(
            &mut wire,
            &[
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
                    name: b"Helm".to_vec(),
                },
                InvCommand::Equip(ItemRef::legacy(300)),
            ],
        )
        .unwrap();
        wire
    }

    #[test]
    fn full_add_equip_in_separate_slots() {
        let cmds = read_commands(&mut Cursor::new(scenario())).unwrap();
        let mut inv = Inventory::new();
        inv.apply_all(&cmds, &hands_catalog(false));
        assert_eq!(inv.len(), 3);
        let equipped: Vec<u16> = inv.equipped().map(|i| i.id).collect();
        assert_eq!(equipped, vec![200, 300]);
    }

    #[test]
    fn equip_displaces_item_in_same_slot() {
        let cmds = read_commands(&mut Cursor::new(scenario())).unwrap();
        let mut inv = Inventory::new();
        inv.apply_all(&cmds, &hands_catalog(true));
        assert_eq!(inv.len(), 3);
        let equipped: Vec<u16> = inv.equipped().map(|i| i.id).collect();
        assert_eq!(equipped, vec![300]);
    }

    #[test]
    fn both_hands_clears_each_hand() {
        let mut cat = MapCatalog::default();
        cat.slots.insert(1, Slot::RightHand);
        cat.slots.insert(2, Slot::LeftHand);
        cat.slots.insert(3, Slot::BothHands);
        let mut inv = Inventory::new();
        for id in 1..=3 {
            inv.apply(
                &InvCommand::Add {
                    item: ItemRef::legacy(id),
                    equip: true,
                    name: vec![],
                },
                &cat,
            );
        }
        let equipped: Vec<u16> = inv.equipped().map(|i| i.id).collect();
        assert_eq!(equipped, vec![3]);
        inv.apply(&InvCommand::Equip(ItemRef::legacy(1)), &cat);
        let equipped: Vec<u16> = inv.equipped().map(|i| i.id).collect();
        assert_eq!(equipped, vec![1]);
    }

    #[test]
    fn indexed_commands_target_exact_instance() {
        let cat = NullCatalog;
        let mut inv = Inventory::new();
        for idx in 0..3 {
            inv.apply(
                &InvCommand::Add {
                    item: ItemRef::indexed(50, idx),
                    equip: false,
                    name: b"Scroll".to_vec(),
                },
                &cat,
            );
        }
        inv.apply(&InvCommand::Delete(ItemRef::indexed(50, 1)), &cat);
        let indices: Vec<i32> = inv.items().iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 2]);
        inv.apply(&InvCommand::Delete(ItemRef::legacy(50)), &cat);
        assert_eq!(inv.items()[0].index, 2);
    }

    #[test]
    fn unknown_delete_is_noop_and_full_is_idempotent() {
        let cmds = read_commands(&mut Cursor::new(scenario())).unwrap();
        let cat = NullCatalog;
        let mut inv = Inventory::new();
        inv.apply(&cmds[0], &cat);
        let rev = inv.revision();
        inv.apply(&InvCommand::Delete(ItemRef::indexed(999, 4)), &cat);
        assert_eq!(inv.revision(), rev);
        let snapshot = inv.items().to_vec();
        inv.apply(&cmds[0], &cat);
        assert_eq!(inv.items(), &snapshot[..]);
        assert_eq!(inv.revision(), rev);
    }

    #[test]
    fn multiple_and_padding_decode() {
        let mut wire = vec![OP_LEGACY_PADDING, OP_MULTIPLE, 2];
        wire.extend([OP_ADD | OP_INDEXED, 0, 7, 0, b'A', 0]);
        wire.extend([OP_NAME | OP_INDEXED, 0, 7, 0, b'B', 0]);
        wire.push(OP_LEGACY_PADDING);
        wire.push(OP_NONE);
        let cmds = read_commands(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], InvCommand::Padding);
        let mut out = Vec::new();
        write_commands(&mut out, &cmds).unwrap();
        assert_eq!(out, wire);

        let mut inv = Inventory::new();
        inv.apply_all(&cmds, &NullCatalog);
        assert_eq!(inv.items()[0].name, "B");
    }

    #[test]
    fn indexed_multiple_keeps_its_opcode() {
        let mut wire = vec![OP_MULTIPLE | OP_INDEXED, 1];
        wire.extend([OP_DELETE | OP_INDEXED, 0, 7, 3]);
        wire.push(OP_NONE);
        let cmds = read_commands(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(
            cmds,
            vec![InvCommand::Multiple {
                indexed: true,
                cmds: vec![InvCommand::Delete(ItemRef::indexed(7, 3))],
            }]
        );
        let mut out = Vec::new();
        write_commands(&mut out, &cmds).unwrap();
        assert_eq!(out, wire);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert!(read_commands(&mut Cursor::new(vec![0x42])).is_err());
    }

    #[test]
    fn grouping_coalesces_legacy_but_not_templates() {
        let mut cat = MapCatalog::default();
        cat.templates.push(9);
        let mut inv = Inventory::new();
        let add = |id, name: &[u8]| InvCommand::Add {
            item: ItemRef::legacy(id),
            equip: false,
            name: name.to_vec(),
        };
        for cmd in [
            add(5, b"Iron Ore"),
            add(5, b"iron  ore"),
            add(5, b"Gold Ore"),
            add(9, b"Letter"),
            add(9, b"Letter"),
        ] {
            inv.apply(&cmd, &cat);
        }
        let groups = inv.groups(&cat);
        let summary: Vec<(u16, u32)> = groups.iter().map(|g| (g.id, g.quantity)).collect();
        assert_eq!(summary, vec![(5, 2), (5, 1), (9, 1), (9, 1)]);
    }
}
