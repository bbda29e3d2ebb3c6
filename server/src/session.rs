//! Per-connection session handling.
//!
//! Each accepted socket gets one reader task running the session phases
//! (login, then steady-state or drain) and one writer task that flushes
//! queued frames in order. The tick loop never touches the socket: it
//! queues frames through the session's handle.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::accounts::AccountLoader;
use crate::game::World;
use crate::login::{self, LoginDecoder, LoginProgress, LoginRequest};
use crate::packets;
use protocol::cipher::{derive_session_seeds, Isaac};
use protocol::sizes::{inbound_size, VAR_BYTE};

const READ_CHUNK: usize = 1024;
const COMPACT_THRESHOLD: usize = 4096;

/// Accumulates socket bytes until a decoder consumes them. Decoders see the
/// unread region as a slice and report how much they took; partial input
/// simply stays buffered for the next read.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    data: Vec<u8>,
    read: usize,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn consume(&mut self, count: usize) {
        self.read = (self.read + count).min(self.data.len());
        if self.read == self.data.len() {
            self.data.clear();
            self.read = 0;
        } else if self.read >= COMPACT_THRESHOLD {
            self.data.drain(..self.read);
            self.read = 0;
        }
    }
}

/// Cheap handle for pushing frames to a session from other tasks. Carries
/// the outbound cipher so frame builders and the session share one stream.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    pub cipher: Arc<Mutex<Isaac>>,
}

impl SessionHandle {
    pub fn new(frames: mpsc::UnboundedSender<Vec<u8>>, cipher: Arc<Mutex<Isaac>>) -> Self {
        SessionHandle { frames, cipher }
    }

    /// Queues a frame for the writer task. Frames for a session whose
    /// writer has already exited are dropped.
    pub fn send(&self, frame: Vec<u8>) {
        let _ = self.frames.send(frame);
    }
}

#[derive(Debug, Clone, Copy)]
enum GameStage {
    AwaitingOpcode,
    AwaitingLength { opcode: u8 },
    AwaitingPayload { opcode: u8, length: usize },
}

/// One decoded steady-state packet.
#[derive(Debug, PartialEq, Eq)]
pub struct GamePacket {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Steady-state decoder: strips the cipher key from each opcode byte,
/// resolves the payload length from the static size table, and cuts packets
/// out of the stream. The stage survives partial reads so the cipher is
/// advanced exactly once per opcode.
#[derive(Debug)]
pub struct GameDecoder {
    cipher: Isaac,
    stage: GameStage,
}

impl GameDecoder {
    pub fn new(cipher: Isaac) -> Self {
        GameDecoder {
            cipher,
            stage: GameStage::AwaitingOpcode,
        }
    }

    /// Decodes at most one packet from `buffer`, returning consumed bytes
    /// and the packet if one completed.
    pub fn advance(&mut self, buffer: &[u8]) -> (usize, Option<GamePacket>) {
        let mut consumed = 0;
        loop {
            let remaining = &buffer[consumed..];
            match self.stage {
                GameStage::AwaitingOpcode => {
                    if remaining.is_empty() {
                        return (consumed, None);
                    }
                    let opcode = remaining[0].wrapping_sub(self.cipher.next_key() as u8);
                    consumed += 1;
                    self.stage = match inbound_size(opcode) {
                        VAR_BYTE => GameStage::AwaitingLength { opcode },
                        size => GameStage::AwaitingPayload {
                            opcode,
                            length: size as usize,
                        },
                    };
                }
                GameStage::AwaitingLength { opcode } => {
                    if remaining.is_empty() {
                        return (consumed, None);
                    }
                    self.stage = GameStage::AwaitingPayload {
                        opcode,
                        length: remaining[0] as usize,
                    };
                    consumed += 1;
                }
                GameStage::AwaitingPayload { opcode, length } => {
                    if remaining.len() < length {
                        return (consumed, None);
                    }
                    let payload = remaining[..length].to_vec();
                    consumed += length;
                    self.stage = GameStage::AwaitingOpcode;
                    return (consumed, Some(GamePacket { opcode, payload }));
                }
            }
        }
    }
}

enum LoginResult {
    Player { decoder: GameDecoder, index: usize },
    Rejected,
    Close,
}

struct Session {
    peer: SocketAddr,
    reader: OwnedReadHalf,
    buffer: StreamBuffer,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    world: Arc<RwLock<World>>,
    accounts: Arc<dyn AccountLoader>,
}

impl Session {
    async fn read_more(&mut self) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        match self.reader.read(&mut chunk).await {
            Ok(0) => false,
            Ok(count) => {
                self.buffer.extend(&chunk[..count]);
                true
            }
            Err(error) => {
                debug!("Read error from {}: {}", self.peer, error);
                false
            }
        }
    }

    async fn login_phase(&mut self, enforce_revision: bool) -> LoginResult {
        let mut decoder = LoginDecoder::new(enforce_revision);
        loop {
            loop {
                match decoder.advance(self.buffer.as_slice()) {
                    Ok((consumed, progress)) => {
                        self.buffer.consume(consumed);
                        match progress {
                            LoginProgress::Pending => break,
                            LoginProgress::AckHandshake => {
                                let _ = self.frames.send(packets::handshake_ack());
                            }
                            LoginProgress::Request(request) => {
                                return self.resolve_login(&request).await;
                            }
                        }
                    }
                    Err(error) => {
                        warn!("Protocol violation from {}: {}", self.peer, error);
                        return LoginResult::Close;
                    }
                }
            }
            if !self.read_more().await {
                return LoginResult::Close;
            }
        }
    }

    async fn resolve_login(&mut self, request: &LoginRequest) -> LoginResult {
        let (inbound_seed, outbound_seed) =
            derive_session_seeds(request.client_seed, request.server_seed);
        let inbound = Isaac::new(inbound_seed);
        let outbound = Arc::new(Mutex::new(Isaac::new(outbound_seed)));
        let handle = SessionHandle::new(self.frames.clone(), outbound);

        match login::authenticate(request, &self.world, self.accounts.as_ref(), &handle).await {
            Some(index) => LoginResult::Player {
                decoder: GameDecoder::new(inbound),
                index,
            },
            None => LoginResult::Rejected,
        }
    }

    async fn game_phase(&mut self, mut decoder: GameDecoder, index: usize) {
        loop {
            loop {
                let (consumed, packet) = decoder.advance(self.buffer.as_slice());
                self.buffer.consume(consumed);
                match packet {
                    Some(packet) => self.dispatch(index, packet).await,
                    None => break,
                }
            }
            if !self.read_more().await {
                return;
            }
        }
    }

    /// Rejected logins leave the connection open after the response frame.
    /// Anything the client sends afterwards is read and dropped.
    async fn drain_phase(&mut self) {
        loop {
            let waiting = self.buffer.len();
            self.buffer.consume(waiting);
            if !self.read_more().await {
                return;
            }
        }
    }

    // Gameplay handlers hang off this seam once they exist.
    async fn dispatch(&mut self, index: usize, packet: GamePacket) {
        debug!(
            "Packet {} ({} bytes) from slot {} at {}",
            packet.opcode,
            packet.payload.len(),
            index,
            self.peer
        );
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(error) = writer.write_all(&frame).await {
            debug!("Write failed: {}", error);
            break;
        }
    }
}

/// Drives one connection from accept to close. Returns once the peer
/// disconnects or commits a protocol violation.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    world: Arc<RwLock<World>>,
    accounts: Arc<dyn AccountLoader>,
    enforce_revision: bool,
) {
    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(write_half, frame_rx));

    let mut session = Session {
        peer,
        reader: read_half,
        buffer: StreamBuffer::new(),
        frames: frame_tx,
        world: Arc::clone(&world),
        accounts,
    };

    let player = match session.login_phase(enforce_revision).await {
        LoginResult::Player { decoder, index } => {
            session.game_phase(decoder, index).await;
            Some(index)
        }
        LoginResult::Rejected => {
            session.drain_phase().await;
            None
        }
        LoginResult::Close => None,
    };

    if let Some(index) = player {
        world.write().await.remove_player(index);
    }

    // Dropping the session closes the frame channel; the writer flushes
    // whatever is queued and exits on its own.
    drop(session);
    let _ = writer.await;
    debug!("Session with {} ended", peer);
}
