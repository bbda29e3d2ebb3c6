//! Per-tick entity synchronization.
//!
//! Each observer receives one frame per entity channel per tick: a bit-packed
//! section sweeping known mobiles (movement or removal) and discovering new
//! ones, followed by a byte-aligned change block carrying updated attributes.

use std::mem;

use crate::entity::{scaled_health, Location, Mobile, UpdateFlag};
use crate::repository::Repository;
use protocol::cipher::Isaac;
use protocol::frame::{FrameBuilder, FrameError};
use protocol::{LOCAL_SET_CAPACITY, SYNC_INDEX_BITS, SYNC_TERMINATOR};

const SYNC_FRAME_CAPACITY: usize = 4096;
const CHANGE_BLOCK_CAPACITY: usize = 2048;
const HEALTH_SCALE: u32 = 100;

/// One tracked mobile in an observer's local set. The serial pins the entry
/// to a specific occupant so a reused slot reads as remove-then-add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEntry {
    pub index: usize,
    pub serial: u64,
}

/// Ordered set of mobiles an observer's client currently knows about.
/// Insertion order is load-bearing: removal markers in the sweep are matched
/// up by position on the client side.
#[derive(Debug, Default)]
pub struct LocalSet {
    entries: Vec<LocalEntry>,
}

impl LocalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= LOCAL_SET_CAPACITY
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.iter().any(|entry| entry.index == index)
    }

    pub fn push(&mut self, entry: LocalEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LocalEntry] {
        &self.entries
    }

    /// Empties the set, handing the previous entries to the caller.
    pub fn take_entries(&mut self) -> Vec<LocalEntry> {
        mem::take(&mut self.entries)
    }
}

/// Builds one observer's synchronization frame for a single entity channel
/// and updates the observer's local set to match what was serialized.
///
/// Frame layout: 8-bit count of previously known mobiles, one movement or
/// removal record per known mobile, add records for newly discovered ones,
/// then a 14-bit terminator and the change block whenever the block is
/// non-empty. `skip` excludes the observer's own repository slot from
/// discovery on the player channel.
pub fn build_sync_frame<T: Mobile>(
    observer: Location,
    skip: Option<usize>,
    locals: &mut LocalSet,
    repository: &Repository<T>,
    cipher: &mut Isaac,
) -> Result<Vec<u8>, FrameError> {
    let mut frame = FrameBuilder::with_capacity(SYNC_FRAME_CAPACITY);
    let mut block = FrameBuilder::with_capacity(CHANGE_BLOCK_CAPACITY);

    frame.start_short_sized(T::SYNC_OPCODE, cipher)?;
    frame.bit_mode()?;
    frame.put_bits(8, locals.len() as u32)?;

    // Sweep what the observer already knows. Anything that vanished, went
    // invisible, left range, or was replaced by a new occupant of its slot
    // gets a removal marker; everything else gets its movement for the tick.
    for entry in locals.take_entries() {
        let known = repository
            .get(entry.index)
            .filter(|mobile| mobile.serial() == entry.serial);
        match known {
            Some(mobile)
                if mobile.is_visible() && observer.within_distance(&mobile.location()) =>
            {
                put_movement(&mut frame, mobile)?;
                put_change_entry(&mut block, mobile)?;
                locals.push(entry);
            }
            _ => {
                frame.put_bits(1, 1)?;
                frame.put_bits(2, 3)?;
            }
        }
    }

    // Discover mobiles that came into view this tick, up to the per-frame
    // capacity the client can address.
    for mobile in repository.iter() {
        if locals.is_full() {
            break;
        }
        if Some(mobile.index()) == skip || locals.contains(mobile.index()) {
            continue;
        }
        if !mobile.is_visible() || !observer.within_distance(&mobile.location()) {
            continue;
        }
        put_add_record(&mut frame, observer, mobile)?;
        put_change_entry(&mut block, mobile)?;
        locals.push(LocalEntry {
            index: mobile.index(),
            serial: mobile.serial(),
        });
    }

    if !block.is_empty() {
        frame.put_bits(SYNC_INDEX_BITS, SYNC_TERMINATOR)?;
        frame.byte_mode()?;
        frame.put_bytes(block.bytes())?;
    } else {
        frame.byte_mode()?;
    }
    frame.finish_sized()?;
    Ok(frame.into_bytes())
}

fn put_movement<T: Mobile>(frame: &mut FrameBuilder, mobile: &T) -> Result<(), FrameError> {
    let mobility = mobile.mobility();
    match (mobility.walk(), mobility.run()) {
        (Some(first), Some(second)) => {
            frame.put_bits(1, 1)?;
            frame.put_bits(2, 2)?;
            frame.put_bits(3, first as u32)?;
            frame.put_bits(3, second as u32)?;
            frame.put_bit(true)?;
        }
        (Some(direction), None) => {
            frame.put_bits(1, 1)?;
            frame.put_bits(2, 1)?;
            frame.put_bits(3, direction as u32)?;
            frame.put_bit(true)?;
        }
        _ => {
            frame.put_bits(1, 1)?;
            frame.put_bits(2, 0)?;
        }
    }
    Ok(())
}

fn put_add_record<T: Mobile>(
    frame: &mut FrameBuilder,
    observer: Location,
    mobile: &T,
) -> Result<(), FrameError> {
    let location = mobile.location();
    frame.put_bits(SYNC_INDEX_BITS, mobile.index() as u32)?;
    frame.put_bits(5, (location.y - observer.y) as u32)?;
    frame.put_bits(5, (location.x - observer.x) as u32)?;
    frame.put_bit(false)?;
    mobile.put_add_extra(frame)?;
    frame.put_bit(true)?;
    Ok(())
}

// One change-block entry: the attribute mask, then each set attribute's
// payload in protocol field order.
fn put_change_entry<T: Mobile>(block: &mut FrameBuilder, mobile: &T) -> Result<(), FrameError> {
    let flags = mobile.flags();
    block.put_u8(flags.mask())?;

    if flags.get(UpdateFlag::Animation) {
        let animation = flags.animation();
        block.put_u16_le(animation.id)?;
        block.put_u8(animation.delay)?;
    }
    if flags.get(UpdateFlag::Hit) {
        let hit = flags.hit();
        block.put_u8_add(hit.damage)?;
        block.put_u8_neg(hit.kind)?;
        block.put_u8_add(scaled_health(
            mobile.hitpoints(),
            mobile.max_hitpoints(),
            HEALTH_SCALE,
        ))?;
        block.put_u8(HEALTH_SCALE as u8)?;
    }
    if flags.get(UpdateFlag::Graphics) {
        let graphic = flags.graphic();
        block.put_u16(graphic.id)?;
        block.put_u32(graphic.value)?;
    }
    if flags.get(UpdateFlag::FaceEntity) {
        block.put_u16(flags.face_entity())?;
    }
    if flags.get(UpdateFlag::ForcedChat) {
        block.put_string(flags.forced_chat())?;
    }
    if flags.get(UpdateFlag::SecondHit) {
        let hit = flags.second_hit();
        block.put_u8_neg(hit.damage)?;
        block.put_u8_sub(hit.kind)?;
        block.put_u8_sub(scaled_health(
            mobile.hitpoints(),
            mobile.max_hitpoints(),
            HEALTH_SCALE,
        ))?;
        block.put_u8_neg(HEALTH_SCALE as u8)?;
    }
    if flags.get(UpdateFlag::FaceCoordinate) {
        match flags.face_target() {
            Some(target) => {
                block.put_u16_le((target.x * 2 + 1) as u16)?;
                block.put_u16_le((target.y * 2 + 1) as u16)?;
            }
            None => {
                block.put_u16_le(0)?;
                block.put_u16_le(0)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Npc;
    use protocol::reader::FrameReader;
    use protocol::NPC_SYNC_OPCODE;

    fn test_cipher() -> Isaac {
        Isaac::new([11, 22, 33, 44])
    }

    fn spawn_npc(
        repository: &mut Repository<Npc>,
        npc_type: u16,
        location: Location,
    ) -> usize {
        repository
            .insert_with(|index, serial| {
                Npc::new(index, serial, npc_type, location, 10, 10)
            })
            .expect("repository full")
    }

    // Strips the obfuscated opcode and the two-byte length prefix, checking
    // the prefix against the actual payload length.
    fn open_payload(frame: &[u8]) -> FrameReader<'_> {
        let mut reader = FrameReader::new(frame);
        reader.skip(1).expect("opcode");
        let length = reader.get_u16().expect("length prefix") as usize;
        assert_eq!(length, frame.len() - 3);
        FrameReader::new(&frame[3..])
    }

    #[test]
    fn test_opcode_is_obfuscated_with_cipher_key() {
        let observer = Location::new(3200, 3200, 0);
        let repository: Repository<Npc> = Repository::new(8);
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();
        let mut twin = test_cipher();

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        assert_eq!(
            frame[0],
            NPC_SYNC_OPCODE.wrapping_add(twin.next_key() as u8)
        );
    }

    #[test]
    fn test_empty_world_emits_bare_frame() {
        let observer = Location::new(3200, 3200, 0);
        let repository: Repository<Npc> = Repository::new(8);
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();

        // Opcode, length 1, then a zero known-count and no change block.
        assert_eq!(frame.len(), 4);
        assert_eq!(&frame[1..], &[0, 1, 0]);
        assert!(locals.is_empty());
    }

    #[test]
    fn test_discovery_emits_add_record() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        spawn_npc(&mut repository, 50, Location::new(3205, 3198, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();

        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 0);
        assert_eq!(payload.get_bits(14).unwrap(), 0); // slot
        assert_eq!(payload.get_bits(5).unwrap(), 30); // dy = -2
        assert_eq!(payload.get_bits(5).unwrap(), 5); // dx = 5
        assert_eq!(payload.get_bits(1).unwrap(), 0);
        assert_eq!(payload.get_bits(12).unwrap(), 50); // npc type
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(14).unwrap(), SYNC_TERMINATOR);
        payload.byte_mode().unwrap();
        assert_eq!(payload.get_u8().unwrap(), 0); // idle mask
        assert_eq!(payload.remaining(), 0);

        assert_eq!(locals.len(), 1);
        assert!(locals.contains(0));
    }

    #[test]
    fn test_retained_mobile_movement_encodings() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        assert_eq!(locals.len(), 1);

        // Stationary.
        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 0);

        // Walking.
        repository.get_mut(index).unwrap().mobility.set_walk(6);
        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 1);
        assert_eq!(payload.get_bits(3).unwrap(), 6);
        assert_eq!(payload.get_bits(1).unwrap(), 1);

        // Running.
        repository.get_mut(index).unwrap().mobility.set_run(2, 3);
        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 2);
        assert_eq!(payload.get_bits(3).unwrap(), 2);
        assert_eq!(payload.get_bits(3).unwrap(), 3);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_mobile_is_removed() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        repository.get_mut(index).unwrap().location = Location::new(3300, 3300, 0);

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 3);
        payload.byte_mode().unwrap();
        assert_eq!(payload.remaining(), 0); // removed mobiles carry no block entry

        assert!(locals.is_empty());
    }

    #[test]
    fn test_hidden_mobile_is_removed() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        repository.get_mut(index).unwrap().visible = false;

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 3);
        assert!(locals.is_empty());
    }

    #[test]
    fn test_slot_reuse_reads_as_remove_then_add() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let original_serial = locals.entries()[0].serial;

        repository.remove(index);
        let reused = spawn_npc(&mut repository, 90, Location::new(3202, 3200, 0));
        assert_eq!(reused, index);

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        // Stale entry removed despite the slot being occupied again.
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 3);
        // New occupant discovered in the same frame.
        assert_eq!(payload.get_bits(14).unwrap(), index as u32);
        assert_eq!(payload.get_bits(5).unwrap(), 0);
        assert_eq!(payload.get_bits(5).unwrap(), 2);
        assert_eq!(payload.get_bits(1).unwrap(), 0);
        assert_eq!(payload.get_bits(12).unwrap(), 90);
        assert_eq!(payload.get_bits(1).unwrap(), 1);

        assert_eq!(locals.len(), 1);
        assert_ne!(locals.entries()[0].serial, original_serial);
    }

    #[test]
    fn test_change_block_field_order_and_obfuscation() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();

        {
            let npc = repository.get_mut(index).unwrap();
            npc.hitpoints = 5;
            npc.flags.set_animation(0x0102, 5);
            npc.flags.set_hit(10, 1);
            npc.flags.set_forced_chat("ok");
            npc.flags.set_face_coordinate(Some(Location::new(3210, 3211, 0)));
        }

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        assert_eq!(payload.get_bits(8).unwrap(), 1);
        assert_eq!(payload.get_bits(1).unwrap(), 1);
        assert_eq!(payload.get_bits(2).unwrap(), 0);
        assert_eq!(payload.get_bits(14).unwrap(), SYNC_TERMINATOR);
        payload.byte_mode().unwrap();

        assert_eq!(payload.get_u8().unwrap(), 0x1 | 0x4 | 0x8 | 0x10);
        // Animation: little-endian id, then delay.
        assert_eq!(payload.get_u16_le().unwrap(), 0x0102);
        assert_eq!(payload.get_u8().unwrap(), 5);
        // Hit: damage, type, health percent, scale, each in its own variant.
        assert_eq!(payload.get_u8_add().unwrap(), 10);
        assert_eq!(payload.get_u8_neg().unwrap(), 1);
        assert_eq!(payload.get_u8_add().unwrap(), 50);
        assert_eq!(payload.get_u8().unwrap(), 100);
        // Forced chat.
        assert_eq!(payload.get_string().unwrap(), "ok");
        // Face coordinate: doubled-plus-one halves, little-endian.
        assert_eq!(payload.get_u16_le().unwrap(), (3210 * 2 + 1) as u16);
        assert_eq!(payload.get_u16_le().unwrap(), (3211 * 2 + 1) as u16);
        assert_eq!(payload.remaining(), 0);
    }

    #[test]
    fn test_second_hit_uses_distinct_variants() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let index = spawn_npc(&mut repository, 1, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        repository.get_mut(index).unwrap().flags.set_second_hit(25, 1);

        let frame =
            build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        let mut payload = open_payload(&frame);
        payload.bit_mode().unwrap();
        payload.get_bits(8).unwrap();
        payload.get_bits(1).unwrap();
        payload.get_bits(2).unwrap();
        payload.get_bits(14).unwrap();
        payload.byte_mode().unwrap();

        assert_eq!(payload.get_u8().unwrap(), 0x40);
        assert_eq!(payload.get_u8_neg().unwrap(), 25);
        assert_eq!(payload.get_u8_sub().unwrap(), 1);
        assert_eq!(payload.get_u8_sub().unwrap(), 100);
        assert_eq!(payload.get_u8_neg().unwrap(), 100);
    }

    #[test]
    fn test_discovery_skips_observer_slot() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(8);
        let first = spawn_npc(&mut repository, 1, Location::new(3200, 3200, 0));
        spawn_npc(&mut repository, 2, Location::new(3201, 3200, 0));
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, Some(first), &mut locals, &repository, &mut cipher)
            .unwrap();

        assert_eq!(locals.len(), 1);
        assert!(!locals.contains(first));
        assert!(locals.contains(1));
    }

    #[test]
    fn test_discovery_respects_local_set_capacity() {
        let observer = Location::new(3200, 3200, 0);
        let mut repository = Repository::new(300);
        for offset in 0..280 {
            // Spread spawns inside the viewport.
            let location = Location::new(3200 - 7 + offset % 15, 3200 - 7 + offset / 15 % 15, 0);
            spawn_npc(&mut repository, 1, location);
        }
        let mut locals = LocalSet::new();
        let mut cipher = test_cipher();

        build_sync_frame(observer, None, &mut locals, &repository, &mut cipher).unwrap();
        assert_eq!(locals.len(), LOCAL_SET_CAPACITY);
    }

    #[test]
    fn test_local_set_basics() {
        let mut locals = LocalSet::new();
        assert!(locals.is_empty());

        locals.push(LocalEntry { index: 3, serial: 7 });
        assert_eq!(locals.len(), 1);
        assert!(locals.contains(3));
        assert!(!locals.contains(4));

        let taken = locals.take_entries();
        assert_eq!(taken, vec![LocalEntry { index: 3, serial: 7 }]);
        assert!(locals.is_empty());
    }
}
