use crate::OUTBOUND_SEED_OFFSET;

const SIZE_LOG: u32 = 8;
const SIZE: usize = 1 << SIZE_LOG;
const MASK: u32 = ((SIZE as u32) - 1) << 2;
const GOLDEN_RATIO: u32 = 0x9e37_79b9;

// ISAAC keystream generator seeded from the four session words exchanged at
// login. Both ends run the same algorithm, so the server's inbound instance
// mirrors the client's outbound one and vice versa. One key is consumed per
// frame opcode.
#[derive(Debug)]
pub struct Isaac {
    results: [u32; SIZE],
    memory: [u32; SIZE],
    accumulator: u32,
    last: u32,
    counter: u32,
    count: usize,
}

impl Isaac {
    pub fn new(seed: [u32; 4]) -> Self {
        let mut results = [0u32; SIZE];
        results[..4].copy_from_slice(&seed);
        let mut cipher = Isaac {
            results,
            memory: [0u32; SIZE],
            accumulator: 0,
            last: 0,
            counter: 0,
            count: 0,
        };
        cipher.init();
        cipher
    }

    // Keys are served from the top of the result table down; a fresh batch is
    // generated every 256 draws.
    pub fn next_key(&mut self) -> u32 {
        if self.count == 0 {
            self.generate();
            self.count = SIZE;
        }
        self.count -= 1;
        self.results[self.count]
    }

    fn generate(&mut self) {
        self.counter = self.counter.wrapping_add(1);
        self.last = self.last.wrapping_add(self.counter);
        for i in 0..SIZE {
            let j = (i + SIZE / 2) & (SIZE - 1);
            self.accumulator = match i & 3 {
                0 => self.accumulator ^ (self.accumulator << 13),
                1 => self.accumulator ^ (self.accumulator >> 6),
                2 => self.accumulator ^ (self.accumulator << 2),
                _ => self.accumulator ^ (self.accumulator >> 16),
            };
            self.accumulator = self.accumulator.wrapping_add(self.memory[j]);
            let x = self.memory[i];
            let y = self.memory[((x & MASK) >> 2) as usize]
                .wrapping_add(self.accumulator)
                .wrapping_add(self.last);
            self.memory[i] = y;
            self.last = self.memory[(((y >> SIZE_LOG) & MASK) >> 2) as usize].wrapping_add(x);
            self.results[i] = self.last;
        }
    }

    fn init(&mut self) {
        let mut v = [GOLDEN_RATIO; 8];
        for _ in 0..4 {
            mix(&mut v);
        }
        for i in (0..SIZE).step_by(8) {
            for k in 0..8 {
                v[k] = v[k].wrapping_add(self.results[i + k]);
            }
            mix(&mut v);
            self.memory[i..i + 8].copy_from_slice(&v);
        }
        // Second pass folds the half-initialized state back into itself.
        for i in (0..SIZE).step_by(8) {
            for k in 0..8 {
                v[k] = v[k].wrapping_add(self.memory[i + k]);
            }
            mix(&mut v);
            self.memory[i..i + 8].copy_from_slice(&v);
        }
        self.generate();
        self.count = SIZE;
    }
}

fn mix(v: &mut [u32; 8]) {
    v[0] ^= v[1] << 11;
    v[3] = v[3].wrapping_add(v[0]);
    v[1] = v[1].wrapping_add(v[2]);
    v[1] ^= v[2] >> 2;
    v[4] = v[4].wrapping_add(v[1]);
    v[2] = v[2].wrapping_add(v[3]);
    v[2] ^= v[3] << 8;
    v[5] = v[5].wrapping_add(v[2]);
    v[3] = v[3].wrapping_add(v[4]);
    v[3] ^= v[4] >> 16;
    v[6] = v[6].wrapping_add(v[3]);
    v[4] = v[4].wrapping_add(v[5]);
    v[4] ^= v[5] << 10;
    v[7] = v[7].wrapping_add(v[4]);
    v[5] = v[5].wrapping_add(v[6]);
    v[5] ^= v[6] >> 4;
    v[0] = v[0].wrapping_add(v[5]);
    v[6] = v[6].wrapping_add(v[7]);
    v[6] ^= v[7] << 8;
    v[1] = v[1].wrapping_add(v[6]);
    v[7] = v[7].wrapping_add(v[0]);
    v[7] ^= v[0] >> 9;
    v[2] = v[2].wrapping_add(v[7]);
    v[0] = v[0].wrapping_add(v[1]);
}

// Splits the two 64-bit handshake values into the four session seed words and
// derives the outbound seed by the fixed per-word offset. The inbound cipher
// is seeded with the words as exchanged; the outbound stream must run offset
// from it for the client to decode server frames.
pub fn derive_session_seeds(client_seed: u64, server_seed: u64) -> ([u32; 4], [u32; 4]) {
    let inbound = [
        (client_seed >> 32) as u32,
        client_seed as u32,
        (server_seed >> 32) as u32,
        server_seed as u32,
    ];
    let outbound = [
        inbound[0].wrapping_add(OUTBOUND_SEED_OFFSET),
        inbound[1].wrapping_add(OUTBOUND_SEED_OFFSET),
        inbound[2].wrapping_add(OUTBOUND_SEED_OFFSET),
        inbound[3].wrapping_add(OUTBOUND_SEED_OFFSET),
    ];
    (inbound, outbound)
}
