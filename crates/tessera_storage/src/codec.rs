//! # Region Codec
//!
//! A region file is one LZ4 block (size prepended) holding:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬─────────────────────────┐
//! │ RegionHeader │ EntityRecord × count     │ SlotRecord × total      │
//! │ 24 bytes     │ 88 bytes each            │ 8 bytes each            │
//! └──────────────┴──────────────────────────┴─────────────────────────┘
//! ```
//!
//! Inventory slots follow all entity records, in entity order; each
//! record says how many of them it owns.

use bytemuck::{Pod, Zeroable};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use tessera_core::{
    Activation, Body, BlockIndex, Coordinate, Entity, EntityId, Heading, Inventory,
    InventorySlot, Movement, RegionKey,
};

use crate::error::{CodecError, CodecResult};

/// File magic.
pub const MAGIC: [u8; 4] = *b"TSRE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

const HAS_BODY: u32 = 1 << 0;
const HAS_MOVEMENT: u32 = 1 << 1;
const HAS_INVENTORY: u32 = 1 << 2;
const HAS_ACTIVATION: u32 = 1 << 3;
const FLY_MODE: u32 = 1 << 4;
const ON_GROUND: u32 = 1 << 5;

/// File header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RegionHeader {
    /// Always [`MAGIC`].
    pub magic: [u8; 4],
    /// Format version.
    pub version: u32,
    /// Planet of the region.
    pub planet: i32,
    /// Column x.
    pub x: i32,
    /// Column y.
    pub y: i32,
    /// Number of entity records.
    pub count: u32,
}

/// One entity, fixed size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityRecord {
    id: u64,
    block: [i32; 3],
    offset: [f32; 3],
    angle: f32,
    tilt: f32,
    flags: u32,
    body: [f32; 3],
    velocity: [f32; 3],
    input: [f32; 2],
    activation_range: i32,
    slot_count: u32,
    active_slot: i32,
}

/// One inventory stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SlotRecord {
    definition: u32,
    amount: u32,
}

impl EntityRecord {
    fn from_entity(entity: &Entity) -> CodecResult<Self> {
        let mut record = Self {
            id: entity.id.raw(),
            block: [
                entity.position.block.x,
                entity.position.block.y,
                entity.position.block.z,
            ],
            offset: entity.position.offset,
            angle: entity.heading.angle(),
            tilt: entity.heading.tilt(),
            active_slot: -1,
            ..Self::default()
        };

        if let Some(body) = entity.body {
            record.flags |= HAS_BODY;
            record.body = [body.mass, body.radius, body.height];
        }
        if let Some(movement) = entity.movement {
            record.flags |= HAS_MOVEMENT;
            record.velocity = movement.velocity;
            record.input = movement.input;
            if movement.fly_mode {
                record.flags |= FLY_MODE;
            }
            if movement.on_ground {
                record.flags |= ON_GROUND;
            }
        }
        if let Some(inventory) = &entity.inventory {
            record.flags |= HAS_INVENTORY;
            record.slot_count = u32::try_from(inventory.slots.len())
                .map_err(|_| CodecError::InvalidRecord(format!("{} has too many slots", entity.id)))?;
            record.active_slot = match inventory.active {
                Some(index) => i32::try_from(index)
                    .map_err(|_| CodecError::InvalidRecord(format!("{} active slot {index}", entity.id)))?,
                None => -1,
            };
        }
        if let Some(activation) = entity.activation {
            record.flags |= HAS_ACTIVATION;
            record.activation_range = activation.range;
        }
        Ok(record)
    }

    fn into_entity(self, key: RegionKey, slots: &[SlotRecord]) -> CodecResult<Entity> {
        let position = Coordinate {
            planet: key.planet,
            block: BlockIndex::new(self.block[0], self.block[1], self.block[2]),
            offset: self.offset,
        };
        let mut entity = Entity::new(EntityId::from_raw(self.id), position);
        entity.heading = Heading::new(self.angle, self.tilt);

        if self.flags & HAS_BODY != 0 {
            entity.body = Some(Body {
                mass: self.body[0],
                radius: self.body[1],
                height: self.body[2],
            });
        }
        if self.flags & HAS_MOVEMENT != 0 {
            entity.movement = Some(Movement {
                velocity: self.velocity,
                input: self.input,
                fly_mode: self.flags & FLY_MODE != 0,
                on_ground: self.flags & ON_GROUND != 0,
            });
        }
        if self.flags & HAS_INVENTORY != 0 {
            let slots = slots
                .iter()
                .map(|slot| {
                    let definition = u16::try_from(slot.definition).map_err(|_| {
                        CodecError::InvalidRecord(format!("item definition {}", slot.definition))
                    })?;
                    Ok(InventorySlot {
                        definition,
                        amount: slot.amount,
                    })
                })
                .collect::<CodecResult<Vec<_>>>()?;
            entity.inventory = Some(Inventory {
                active: usize::try_from(self.active_slot).ok(),
                slots,
            });
        }
        if self.flags & HAS_ACTIVATION != 0 {
            entity.activation = Some(Activation {
                range: self.activation_range,
            });
        }
        Ok(entity)
    }
}

/// Encodes the entities of one region into a compressed file body.
///
/// # Errors
///
/// Returns [`CodecError::InvalidRecord`] if an entity cannot be
/// represented.
pub fn encode_region(key: RegionKey, entities: &[Entity]) -> CodecResult<Vec<u8>> {
    let header = RegionHeader {
        magic: MAGIC,
        version: FORMAT_VERSION,
        planet: key.planet.0,
        x: key.column.x,
        y: key.column.y,
        count: u32::try_from(entities.len())
            .map_err(|_| CodecError::InvalidRecord("too many entities".to_string()))?,
    };

    let mut records = Vec::with_capacity(entities.len());
    let mut slots = Vec::new();
    for entity in entities {
        records.push(EntityRecord::from_entity(entity)?);
        if let Some(inventory) = &entity.inventory {
            slots.extend(inventory.slots.iter().map(|slot| SlotRecord {
                definition: u32::from(slot.definition),
                amount: slot.amount,
            }));
        }
    }

    let mut raw = Vec::with_capacity(
        std::mem::size_of::<RegionHeader>()
            + records.len() * std::mem::size_of::<EntityRecord>()
            + slots.len() * std::mem::size_of::<SlotRecord>(),
    );
    raw.extend_from_slice(bytemuck::bytes_of(&header));
    raw.extend_from_slice(bytemuck::cast_slice(&records));
    raw.extend_from_slice(bytemuck::cast_slice(&slots));

    Ok(compress_prepend_size(&raw))
}

/// Decodes a compressed file body written by [`encode_region`].
///
/// # Errors
///
/// Returns a [`CodecError`] if the data is not a valid file for `key`.
pub fn decode_region(key: RegionKey, compressed: &[u8]) -> CodecResult<Vec<Entity>> {
    let raw = decompress_size_prepended(compressed)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;

    let header_size = std::mem::size_of::<RegionHeader>();
    let record_size = std::mem::size_of::<EntityRecord>();
    let slot_size = std::mem::size_of::<SlotRecord>();

    if raw.len() < header_size {
        return Err(CodecError::Length {
            expected: header_size,
            actual: raw.len(),
        });
    }
    let header: RegionHeader = bytemuck::pod_read_unaligned(&raw[..header_size]);
    if header.magic != MAGIC {
        return Err(CodecError::BadMagic(header.magic));
    }
    if header.version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(header.version));
    }
    if header.planet != key.planet.0 || header.x != key.column.x || header.y != key.column.y {
        return Err(CodecError::WrongRegion {
            planet: header.planet,
            x: header.x,
            y: header.y,
        });
    }

    let count = header.count as usize;
    let records_end = header_size + count * record_size;
    if raw.len() < records_end {
        return Err(CodecError::Length {
            expected: records_end,
            actual: raw.len(),
        });
    }
    let records: Vec<EntityRecord> = raw[header_size..records_end]
        .chunks_exact(record_size)
        .map(bytemuck::pod_read_unaligned)
        .collect();

    let total_slots: usize = records.iter().map(|record| record.slot_count as usize).sum();
    let expected = records_end + total_slots * slot_size;
    if raw.len() != expected {
        return Err(CodecError::Length {
            expected,
            actual: raw.len(),
        });
    }
    let slots: Vec<SlotRecord> = raw[records_end..]
        .chunks_exact(slot_size)
        .map(bytemuck::pod_read_unaligned)
        .collect();

    let mut cursor = 0;
    let mut entities = Vec::with_capacity(count);
    for record in records {
        let owned = record.slot_count as usize;
        entities.push(record.into_entity(key, &slots[cursor..cursor + owned])?);
        cursor += owned;
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ColumnIndex, PlanetId};

    fn key() -> RegionKey {
        RegionKey::new(PlanetId(2), ColumnIndex::new(3, 4))
    }

    fn at(x: i32, y: i32) -> Coordinate {
        Coordinate::new(PlanetId(2), BlockIndex::new(x, y, 70), [0.25, 0.5, 0.75])
    }

    #[test]
    fn test_record_has_no_padding() {
        assert_eq!(std::mem::size_of::<RegionHeader>(), 24);
        assert_eq!(std::mem::size_of::<EntityRecord>(), 88);
        assert_eq!(std::mem::size_of::<SlotRecord>(), 8);
    }

    #[test]
    fn test_capabilities_survive_encoding() {
        let mut player = Entity::player(EntityId::from_raw(11), at(50, 66));
        player.heading = Heading::new(0.5, -0.25);
        if let Some(movement) = player.movement.as_mut() {
            movement.fly_mode = true;
            movement.velocity = [1.0, -2.0, 0.5];
        }
        if let Some(inventory) = player.inventory.as_mut() {
            inventory.add(3, 64);
            inventory.add(3, 64);
            inventory.add(9, 64);
            inventory.active = Some(1);
        }
        let dog = Entity::dog(EntityId::from_raw(12), at(49, 70));
        let prop = Entity::prop(EntityId::from_raw(13), at(60, 79));

        let entities = vec![player, dog, prop];
        let bytes = encode_region(key(), &entities).unwrap();
        let decoded = decode_region(key(), &bytes).unwrap();

        assert_eq!(decoded, entities);
    }

    #[test]
    fn test_empty_region() {
        let bytes = encode_region(key(), &[]).unwrap();
        assert!(decode_region(key(), &bytes).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_region_rejected() {
        let bytes = encode_region(key(), &[]).unwrap();
        let other = RegionKey::new(PlanetId(2), ColumnIndex::new(4, 4));
        assert!(matches!(
            decode_region(other, &bytes),
            Err(CodecError::WrongRegion { x: 3, y: 4, .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_region(key(), &[8, 0, 0, 0, 0xF0]).is_err());

        let mut raw = vec![0u8; 24];
        raw[..4].copy_from_slice(b"NOPE");
        let bytes = compress_prepend_size(&raw);
        assert!(matches!(decode_region(key(), &bytes), Err(CodecError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_records_rejected() {
        let entities = vec![Entity::dog(EntityId::from_raw(1), at(48, 64))];
        let bytes = encode_region(key(), &entities).unwrap();
        let mut raw = decompress_size_prepended(&bytes).unwrap();
        raw.truncate(raw.len() - 8);
        let bytes = compress_prepend_size(&raw);
        assert!(matches!(decode_region(key(), &bytes), Err(CodecError::Length { .. })));
    }
}
