use crate::session::SessionHandle;
use crate::sync::LocalSet;
use protocol::frame::{FrameBuilder, FrameError};
use protocol::{NPC_SYNC_OPCODE, PLAYER_SYNC_OPCODE, VIEW_DISTANCE};

// Absolute world tile, with the plane a mobile currently occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub x: i32,
    pub y: i32,
    pub plane: u8,
}

impl Location {
    pub fn new(x: i32, y: i32, plane: u8) -> Self {
        Location { x, y, plane }
    }

    // Visibility test: same plane and within the square viewport on both axes
    pub fn within_distance(&self, other: &Location) -> bool {
        self.plane == other.plane
            && (other.x - self.x).abs() <= VIEW_DISTANCE
            && (other.y - self.y).abs() <= VIEW_DISTANCE
    }
}

// Pending step directions for the current tick, 0..=7 on the wire.
// Consumed by the update sweep and reset in the post-broadcast clear pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mobility {
    walk: Option<u8>,
    run: Option<u8>,
}

impl Mobility {
    pub fn set_walk(&mut self, direction: u8) {
        self.walk = Some(direction & 7);
        self.run = None;
    }

    pub fn set_run(&mut self, first: u8, second: u8) {
        self.walk = Some(first & 7);
        self.run = Some(second & 7);
    }

    pub fn walk(&self) -> Option<u8> {
        self.walk
    }

    pub fn run(&self) -> Option<u8> {
        self.run
    }

    pub fn reset(&mut self) {
        self.walk = None;
        self.run = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Animation {
    pub id: u16,
    pub delay: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Graphic {
    pub id: u16,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hit {
    pub damage: u8,
    pub kind: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFlag {
    ForcedChat,
    FaceCoordinate,
    Hit,
    Animation,
    FaceEntity,
    SecondHit,
    Graphics,
}

impl UpdateFlag {
    pub const COUNT: usize = 7;

    // Bit each attribute kind occupies in the change-block mask byte
    pub const fn bit(self) -> u8 {
        match self {
            UpdateFlag::ForcedChat => 0x1,
            UpdateFlag::FaceCoordinate => 0x4,
            UpdateFlag::Hit => 0x8,
            UpdateFlag::Animation => 0x10,
            UpdateFlag::FaceEntity => 0x20,
            UpdateFlag::SecondHit => 0x40,
            UpdateFlag::Graphics => 0x80,
        }
    }
}

const FLAG_ORDER: [UpdateFlag; UpdateFlag::COUNT] = [
    UpdateFlag::ForcedChat,
    UpdateFlag::FaceCoordinate,
    UpdateFlag::Hit,
    UpdateFlag::Animation,
    UpdateFlag::FaceEntity,
    UpdateFlag::SecondHit,
    UpdateFlag::Graphics,
];

// What changed on a mobile this tick, plus the payloads the change block
// serializes. Setters populate a flag and its payload together so one is
// never observed without the other.
#[derive(Debug, Clone, Default)]
pub struct UpdateFlags {
    flags: [bool; UpdateFlag::COUNT],
    animation: Animation,
    graphic: Graphic,
    hit: Hit,
    second_hit: Hit,
    forced_chat: String,
    face_entity: u16,
    face_target: Option<Location>,
}

impl UpdateFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, flag: UpdateFlag) -> bool {
        self.flags[flag as usize]
    }

    pub fn update_required(&self) -> bool {
        self.flags.iter().any(|&set| set)
    }

    pub fn mask(&self) -> u8 {
        let mut mask = 0u8;
        for (index, &set) in self.flags.iter().enumerate() {
            if set {
                mask |= FLAG_ORDER[index].bit();
            }
        }
        mask
    }

    pub fn set_animation(&mut self, id: u16, delay: u8) {
        self.animation = Animation { id, delay };
        self.flags[UpdateFlag::Animation as usize] = true;
    }

    pub fn set_graphic(&mut self, id: u16, value: u32) {
        self.graphic = Graphic { id, value };
        self.flags[UpdateFlag::Graphics as usize] = true;
    }

    pub fn set_hit(&mut self, damage: u8, kind: u8) {
        self.hit = Hit { damage, kind };
        self.flags[UpdateFlag::Hit as usize] = true;
    }

    pub fn set_second_hit(&mut self, damage: u8, kind: u8) {
        self.second_hit = Hit { damage, kind };
        self.flags[UpdateFlag::SecondHit as usize] = true;
    }

    pub fn set_forced_chat(&mut self, message: &str) {
        self.forced_chat = message.to_owned();
        self.flags[UpdateFlag::ForcedChat as usize] = true;
    }

    pub fn set_face_entity(&mut self, index: u16) {
        self.face_entity = index;
        self.flags[UpdateFlag::FaceEntity as usize] = true;
    }

    // A cleared target is legal: the block writes zero coordinates for it
    pub fn set_face_coordinate(&mut self, target: Option<Location>) {
        self.face_target = target;
        self.flags[UpdateFlag::FaceCoordinate as usize] = true;
    }

    pub fn animation(&self) -> Animation {
        self.animation
    }

    pub fn graphic(&self) -> Graphic {
        self.graphic
    }

    pub fn hit(&self) -> Hit {
        self.hit
    }

    pub fn second_hit(&self) -> Hit {
        self.second_hit
    }

    pub fn forced_chat(&self) -> &str {
        &self.forced_chat
    }

    pub fn face_entity(&self) -> u16 {
        self.face_entity
    }

    pub fn face_target(&self) -> Option<Location> {
        self.face_target
    }

    pub fn clear(&mut self) {
        *self = UpdateFlags::default();
    }
}

// Current health on the wire scale, rounded to nearest. A zeroed maximum
// would divide by zero, so it reports empty instead.
pub fn scaled_health(current: u32, max: u32, scale: u32) -> u8 {
    if max == 0 {
        return 0;
    }
    let percent = (current as f64 / max as f64 * scale as f64).round();
    percent.min(255.0) as u8
}

// Shared surface the update engine synchronizes over. The engine stays
// kind-agnostic apart from the frame opcode and the discovery-record hook.
pub trait Mobile {
    const SYNC_OPCODE: u8;

    fn index(&self) -> usize;
    fn serial(&self) -> u64;
    fn location(&self) -> Location;
    fn is_visible(&self) -> bool;
    fn mobility(&self) -> &Mobility;
    fn flags(&self) -> &UpdateFlags;
    fn hitpoints(&self) -> u32;
    fn max_hitpoints(&self) -> u32;

    // Kind-specific fields inside the discovery add record
    fn put_add_extra(&self, frame: &mut FrameBuilder) -> Result<(), FrameError>;
}

#[derive(Debug)]
pub struct Player {
    pub index: usize,
    pub serial: u64,
    pub username: String,
    pub privilege: u8,
    pub location: Location,
    pub visible: bool,
    pub hitpoints: u32,
    pub max_hitpoints: u32,
    pub mobility: Mobility,
    pub flags: UpdateFlags,
    pub local_players: LocalSet,
    pub local_npcs: LocalSet,
    pub session: SessionHandle,
}

impl Player {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        serial: u64,
        username: String,
        privilege: u8,
        location: Location,
        hitpoints: u32,
        max_hitpoints: u32,
        session: SessionHandle,
    ) -> Self {
        Player {
            index,
            serial,
            username,
            privilege,
            location,
            visible: true,
            hitpoints,
            max_hitpoints,
            mobility: Mobility::default(),
            flags: UpdateFlags::new(),
            local_players: LocalSet::new(),
            local_npcs: LocalSet::new(),
            session,
        }
    }
}

impl Mobile for Player {
    const SYNC_OPCODE: u8 = PLAYER_SYNC_OPCODE;

    fn index(&self) -> usize {
        self.index
    }

    fn serial(&self) -> u64 {
        self.serial
    }

    fn location(&self) -> Location {
        self.location
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn mobility(&self) -> &Mobility {
        &self.mobility
    }

    fn flags(&self) -> &UpdateFlags {
        &self.flags
    }

    fn hitpoints(&self) -> u32 {
        self.hitpoints
    }

    fn max_hitpoints(&self) -> u32 {
        self.max_hitpoints
    }

    fn put_add_extra(&self, _frame: &mut FrameBuilder) -> Result<(), FrameError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct Npc {
    pub index: usize,
    pub serial: u64,
    pub npc_type: u16,
    pub location: Location,
    pub visible: bool,
    pub hitpoints: u32,
    pub max_hitpoints: u32,
    pub mobility: Mobility,
    pub flags: UpdateFlags,
}

impl Npc {
    pub fn new(
        index: usize,
        serial: u64,
        npc_type: u16,
        location: Location,
        hitpoints: u32,
        max_hitpoints: u32,
    ) -> Self {
        Npc {
            index,
            serial,
            npc_type,
            location,
            visible: true,
            hitpoints,
            max_hitpoints,
            mobility: Mobility::default(),
            flags: UpdateFlags::new(),
        }
    }
}

impl Mobile for Npc {
    const SYNC_OPCODE: u8 = NPC_SYNC_OPCODE;

    fn index(&self) -> usize {
        self.index
    }

    fn serial(&self) -> u64 {
        self.serial
    }

    fn location(&self) -> Location {
        self.location
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn mobility(&self) -> &Mobility {
        &self.mobility
    }

    fn flags(&self) -> &UpdateFlags {
        &self.flags
    }

    fn hitpoints(&self) -> u32 {
        self.hitpoints
    }

    fn max_hitpoints(&self) -> u32 {
        self.max_hitpoints
    }

    fn put_add_extra(&self, frame: &mut FrameBuilder) -> Result<(), FrameError> {
        frame.put_bits(12, self.npc_type as u32)
    }
}
