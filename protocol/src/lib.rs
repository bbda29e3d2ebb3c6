pub mod cipher;
pub mod frame;
pub mod reader;
pub mod sizes;

pub const CLIENT_REVISION: u16 = 317;

pub const HANDSHAKE_REQUEST: u8 = 14;
pub const HANDSHAKE_ACK_LENGTH: usize = 17;
pub const LOGIN_KIND_FRESH: u8 = 16;
pub const LOGIN_KIND_RECONNECT: u8 = 18;
pub const LOGIN_BLOCK_OPCODE: u8 = 10;
pub const LOGIN_PREFIX_LENGTH: u8 = 41;

pub const RESPONSE_OK: u8 = 2;
pub const RESPONSE_BAD_CREDENTIALS: u8 = 3;
pub const RESPONSE_WORLD_FULL: u8 = 10;

pub const PLAYER_SYNC_OPCODE: u8 = 81;
pub const NPC_SYNC_OPCODE: u8 = 65;
pub const INIT_OPCODE: u8 = 249;

pub const OUTBOUND_SEED_OFFSET: u32 = 50;
pub const VIEW_DISTANCE: i32 = 15;
pub const LOCAL_SET_CAPACITY: usize = 255;
pub const SYNC_INDEX_BITS: u32 = 14;
pub const SYNC_TERMINATOR: u32 = 16383;
pub const STRING_TERMINATOR: u8 = 10;
