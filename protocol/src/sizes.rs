// Payload sizes for every client->server opcode, indexed by the decrypted
// opcode byte. Non-negative entries are fixed payload lengths; VAR_BYTE means
// a one-byte length prefix follows the opcode. Unassigned opcodes are left at
// zero so an unknown packet degrades to opcode-only.
pub const VAR_BYTE: i32 = -1;

pub static INBOUND_SIZES: [i32; 256] = [
    0, 0, 0, 1, -1, 0, 0, 0, 0, 0, // 0
    0, 0, 0, 0, 8, 0, 6, 2, 2, 0, // 10
    0, 2, 0, 6, 0, 12, 0, 0, 0, 0, // 20
    0, 0, 0, 0, 0, 8, 4, 0, 0, 2, // 30
    2, 6, 0, 6, 0, -1, 0, 0, 0, 0, // 40
    0, 0, 0, 12, 0, 0, 0, 8, 8, 12, // 50
    0, 8, 0, 0, 0, 0, 0, 0, 0, 0, // 60
    6, 0, 2, 2, 8, 6, 0, -1, 0, 6, // 70
    0, 0, 0, 0, 0, 0, 0, 6, 0, 0, // 80
    0, 0, 0, 0, 0, 0, 0, 0, -1, 0, // 90
    0, 13, 0, -1, 0, 0, 0, 0, 0, 0, // 100
    0, 0, 0, 0, 0, 0, 0, 6, 0, 0, // 110
    1, 0, 6, 0, 0, 0, -1, 0, 2, 6, // 120
    0, 4, 6, 8, 0, 6, 0, 0, 0, 2, // 130
    0, 0, 0, 0, 0, 6, 0, 0, 0, 0, // 140
    0, 0, 1, 2, 0, 2, 6, 0, 0, 0, // 150
    0, 0, 0, 0, -1, -1, 0, 0, 0, 0, // 160
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 170
    0, 8, 0, 3, 0, 2, 0, 0, 8, 1, // 180
    0, 0, 12, 0, 0, 0, 0, 0, 0, 0, // 190
    2, 0, 0, 0, 0, 0, 0, 0, 4, 0, // 200
    4, 0, 0, 0, 7, 8, 0, 0, 10, 0, // 210
    0, 0, 0, 0, 0, 0, -1, 0, 6, 0, // 220
    1, 0, 0, 0, 6, 0, 6, 8, 1, 0, // 230
    0, 4, 6, 0, 6, 0, 0, 0, -1, 0, // 240
    0, 0, 0, 0, 0, 0, // 250
];

pub fn inbound_size(opcode: u8) -> i32 {
    INBOUND_SIZES[opcode as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_covers_every_opcode() {
        assert_eq!(INBOUND_SIZES.len(), 256);
    }

    #[test]
    fn test_well_known_opcodes() {
        // idle keepalive
        assert_eq!(inbound_size(0), 0);
        // public chat carries a length prefix
        assert_eq!(inbound_size(4), VAR_BYTE);
        // walk requests are route-length dependent
        assert_eq!(inbound_size(98), VAR_BYTE);
        assert_eq!(inbound_size(164), VAR_BYTE);
        assert_eq!(inbound_size(248), VAR_BYTE);
        // interface button press
        assert_eq!(inbound_size(185), 2);
        // player-typed command
        assert_eq!(inbound_size(103), VAR_BYTE);
    }

    #[test]
    fn test_sizes_stay_in_frame_range() {
        for &size in INBOUND_SIZES.iter() {
            assert!(size >= VAR_BYTE && size <= 13);
        }
    }
}
