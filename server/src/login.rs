//! Login handshake decoding and authentication.
//!
//! The decoder is a pure state machine over buffered bytes: each stage either
//! consumes its input and moves forward or reports that it needs more data,
//! leaving the buffer untouched. Side effects (the handshake ack, the login
//! response, registration) are driven by the session from the events the
//! decoder emits, so no stage ever repeats one.

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::accounts::AccountLoader;
use crate::game::World;
use crate::packets;
use crate::session::SessionHandle;
use protocol::reader::{FrameReader, ReadError};
use protocol::{
    CLIENT_REVISION, HANDSHAKE_REQUEST, LOGIN_BLOCK_OPCODE, LOGIN_KIND_FRESH,
    LOGIN_KIND_RECONNECT, LOGIN_PREFIX_LENGTH, RESPONSE_BAD_CREDENTIALS, RESPONSE_OK,
    RESPONSE_WORLD_FULL,
};

/// Fatal handshake failures. Every variant closes the connection without a
/// response frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("unexpected handshake type {0}")]
    HandshakeType(u8),
    #[error("unexpected login kind {0}")]
    LoginKind(u8),
    #[error("unsupported client revision {0}")]
    Revision(u16),
    #[error("declared tail size {declared} does not match block size {actual}")]
    DeclaredSize { declared: u8, actual: u8 },
    #[error("unexpected login block opcode {0}")]
    BlockOpcode(u8),
    #[error("malformed login payload: {0}")]
    Payload(#[from] ReadError),
    #[error("empty credentials")]
    EmptyCredentials,
}

#[derive(Debug, Clone, Copy)]
enum LoginStage {
    AwaitingHandshake,
    AwaitingHeader,
    AwaitingPayload { reconnecting: bool, length: usize },
    Complete,
}

/// Everything the login block carries that outlives the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub reconnecting: bool,
    pub revision: u16,
    pub client_seed: u64,
    pub server_seed: u64,
    pub username: String,
    pub password: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoginProgress {
    /// Not enough buffered bytes to finish the current stage.
    Pending,
    /// Handshake request consumed; the ack must be sent now, exactly once.
    AckHandshake,
    /// Full login block parsed.
    Request(LoginRequest),
}

#[derive(Debug)]
pub struct LoginDecoder {
    stage: LoginStage,
    enforce_revision: bool,
}

impl LoginDecoder {
    pub fn new(enforce_revision: bool) -> Self {
        LoginDecoder {
            stage: LoginStage::AwaitingHandshake,
            enforce_revision,
        }
    }

    /// Runs stages against `buffer` until one produces an event or runs out
    /// of bytes. Returns how many bytes were consumed together with the
    /// event; unconsumed bytes must stay buffered for the next call.
    pub fn advance(&mut self, buffer: &[u8]) -> Result<(usize, LoginProgress), LoginError> {
        let mut consumed = 0;
        loop {
            let remaining = &buffer[consumed..];
            match self.stage {
                LoginStage::AwaitingHandshake => {
                    if remaining.len() < 2 {
                        return Ok((consumed, LoginProgress::Pending));
                    }
                    let kind = remaining[0];
                    if kind != HANDSHAKE_REQUEST {
                        return Err(LoginError::HandshakeType(kind));
                    }
                    // remaining[1] is the name hash, only meaningful to a
                    // multi-world login router.
                    consumed += 2;
                    self.stage = LoginStage::AwaitingHeader;
                    return Ok((consumed, LoginProgress::AckHandshake));
                }
                LoginStage::AwaitingHeader => {
                    if remaining.len() < 2 {
                        return Ok((consumed, LoginProgress::Pending));
                    }
                    let kind = remaining[0];
                    if kind != LOGIN_KIND_FRESH && kind != LOGIN_KIND_RECONNECT {
                        return Err(LoginError::LoginKind(kind));
                    }
                    consumed += 2;
                    self.stage = LoginStage::AwaitingPayload {
                        reconnecting: kind == LOGIN_KIND_RECONNECT,
                        length: remaining[1] as usize,
                    };
                    // Fall straight through: the payload may already be here.
                }
                LoginStage::AwaitingPayload {
                    reconnecting,
                    length,
                } => {
                    if remaining.len() < length {
                        return Ok((consumed, LoginProgress::Pending));
                    }
                    let request = self.parse_payload(&remaining[..length], reconnecting)?;
                    consumed += length;
                    self.stage = LoginStage::Complete;
                    return Ok((consumed, LoginProgress::Request(request)));
                }
                LoginStage::Complete => return Ok((consumed, LoginProgress::Pending)),
            }
        }
    }

    fn parse_payload(
        &self,
        payload: &[u8],
        reconnecting: bool,
    ) -> Result<LoginRequest, LoginError> {
        let mut reader = FrameReader::new(payload);

        reader.get_u8()?; // connection opcode, redundant with the header
        let revision = reader.get_u16()?;
        if revision != CLIENT_REVISION {
            if self.enforce_revision {
                return Err(LoginError::Revision(revision));
            }
            warn!("Client declared unexpected revision {}", revision);
        }
        reader.get_u8()?; // low/high memory indicator
        reader.skip(36)?; // reserved for a key-wrapped section this server does not read

        let declared = reader.get_u8()?;
        let actual = (payload.len() - LOGIN_PREFIX_LENGTH as usize) as u8;
        if declared != actual {
            return Err(LoginError::DeclaredSize { declared, actual });
        }

        let block_opcode = reader.get_u8()?;
        if block_opcode != LOGIN_BLOCK_OPCODE {
            return Err(LoginError::BlockOpcode(block_opcode));
        }

        let client_seed = reader.get_u64()?;
        let server_seed = reader.get_u64()?;
        reader.get_u32()?; // numeric user id, superseded by the username

        let username = reader.get_string()?;
        let password = reader.get_string()?;
        if username.is_empty() || password.is_empty() {
            return Err(LoginError::EmptyCredentials);
        }

        Ok(LoginRequest {
            reconnecting,
            revision,
            client_seed,
            server_seed,
            username,
            password,
        })
    }
}

/// Final response code for a login attempt. The capacity check runs last so
/// a full world overrides whatever the account load produced.
pub fn response_code(profile_loaded: bool, population: usize, capacity: usize) -> u8 {
    let code = if profile_loaded {
        RESPONSE_OK
    } else {
        RESPONSE_BAD_CREDENTIALS
    };
    if population >= capacity {
        return RESPONSE_WORLD_FULL;
    }
    code
}

/// Resolves a parsed login request against the account store and the world.
/// The login response and, on success, the initial-state frame are queued on
/// the session in order before this returns. A `None` means the connection
/// stays open but unregistered; closing it is left to the caller's policy.
pub async fn authenticate(
    request: &LoginRequest,
    world: &RwLock<World>,
    accounts: &dyn AccountLoader,
    session: &SessionHandle,
) -> Option<usize> {
    let profile = accounts.load_profile(&request.username, &request.password);

    let mut world = world.write().await;
    let mut code = response_code(
        profile.is_some(),
        world.player_count(),
        world.player_capacity(),
    );

    let mut registered = None;
    if code == RESPONSE_OK {
        if let Some(profile) = &profile {
            match world.register_player(&request.username, profile, session.clone()) {
                Some(index) => registered = Some(index),
                None => code = RESPONSE_WORLD_FULL,
            }
        }
    }

    let privilege = profile.as_ref().map(|profile| profile.privilege).unwrap_or(0);
    session.send(packets::login_response(code, privilege));

    if let Some(index) = registered {
        let mut cipher = session.cipher.lock().await;
        match packets::initial_state(index, true, &mut cipher) {
            Ok(frame) => session.send(frame),
            Err(error) => warn!("Failed to build initial state for slot {}: {}", index, error),
        }
    } else {
        debug!(
            "Login for '{}' rejected with code {}",
            request.username, code
        );
    }

    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{DefaultAccounts, Profile};
    use crate::entity::Location;
    use protocol::cipher::Isaac;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    const CLIENT_SEED: u64 = 0x1122334455667788;
    const SERVER_SEED: u64 = 0x99aabbccddeeff00;

    fn handshake_bytes() -> Vec<u8> {
        vec![HANDSHAKE_REQUEST, 31]
    }

    fn login_bytes(username: &str, password: &str, revision: u16) -> Vec<u8> {
        let mut block = Vec::new();
        block.push(LOGIN_BLOCK_OPCODE);
        block.extend_from_slice(&CLIENT_SEED.to_be_bytes());
        block.extend_from_slice(&SERVER_SEED.to_be_bytes());
        block.extend_from_slice(&7u32.to_be_bytes());
        block.extend_from_slice(username.as_bytes());
        block.push(10);
        block.extend_from_slice(password.as_bytes());
        block.push(10);

        let mut payload = vec![255];
        payload.extend_from_slice(&revision.to_be_bytes());
        payload.push(0);
        payload.extend_from_slice(&[0; 36]);
        payload.push(block.len() as u8);
        payload.extend_from_slice(&block);

        let mut bytes = vec![LOGIN_KIND_FRESH, payload.len() as u8];
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn past_handshake() -> LoginDecoder {
        let mut decoder = LoginDecoder::new(false);
        let (consumed, progress) = decoder.advance(&handshake_bytes()).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(progress, LoginProgress::AckHandshake);
        decoder
    }

    #[test]
    fn test_handshake_requires_two_bytes() {
        let mut decoder = LoginDecoder::new(false);
        assert_eq!(
            decoder.advance(&[HANDSHAKE_REQUEST]).unwrap(),
            (0, LoginProgress::Pending)
        );
        assert_eq!(
            decoder.advance(&handshake_bytes()).unwrap(),
            (2, LoginProgress::AckHandshake)
        );
    }

    #[test]
    fn test_rejects_unknown_handshake_type() {
        let mut decoder = LoginDecoder::new(false);
        assert_eq!(
            decoder.advance(&[15, 0]),
            Err(LoginError::HandshakeType(15))
        );
    }

    #[test]
    fn test_header_and_payload_complete_in_one_call() {
        let mut decoder = past_handshake();
        let bytes = login_bytes("mopar", "hunter2", CLIENT_REVISION);

        let (consumed, progress) = decoder.advance(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        match progress {
            LoginProgress::Request(request) => {
                assert!(!request.reconnecting);
                assert_eq!(request.revision, CLIENT_REVISION);
                assert_eq!(request.client_seed, CLIENT_SEED);
                assert_eq!(request.server_seed, SERVER_SEED);
                assert_eq!(request.username, "mopar");
                assert_eq!(request.password, "hunter2");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_payload_waits_without_losing_bytes() {
        let mut decoder = past_handshake();
        let bytes = login_bytes("mopar", "hunter2", CLIENT_REVISION);

        // Header only: the decoder records the length and asks for more.
        let (consumed, progress) = decoder.advance(&bytes[..2]).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(progress, LoginProgress::Pending);

        // Half the payload: nothing consumed, still pending.
        let half = 2 + (bytes.len() - 2) / 2;
        let (consumed, progress) = decoder.advance(&bytes[2..half]).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(progress, LoginProgress::Pending);

        // Full payload arrives: parsed in one piece.
        let (consumed, progress) = decoder.advance(&bytes[2..]).unwrap();
        assert_eq!(consumed, bytes.len() - 2);
        assert!(matches!(progress, LoginProgress::Request(_)));
    }

    #[test]
    fn test_rejects_unknown_login_kind() {
        let mut decoder = past_handshake();
        assert_eq!(decoder.advance(&[17, 40]), Err(LoginError::LoginKind(17)));
    }

    #[test]
    fn test_accepts_reconnect_kind() {
        let mut decoder = past_handshake();
        let mut bytes = login_bytes("mopar", "hunter2", CLIENT_REVISION);
        bytes[0] = LOGIN_KIND_RECONNECT;

        let (_, progress) = decoder.advance(&bytes).unwrap();
        match progress {
            LoginProgress::Request(request) => assert!(request.reconnecting),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_declared_size_mismatch() {
        let mut decoder = past_handshake();
        let mut bytes = login_bytes("mopar", "hunter2", CLIENT_REVISION);
        bytes[42] = bytes[42].wrapping_add(1); // declared tail size

        match decoder.advance(&bytes) {
            Err(LoginError::DeclaredSize { .. }) => {}
            other => panic!("expected size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_block_opcode() {
        let mut decoder = past_handshake();
        let mut bytes = login_bytes("mopar", "hunter2", CLIENT_REVISION);
        bytes[43] = 9;

        assert_eq!(decoder.advance(&bytes), Err(LoginError::BlockOpcode(9)));
    }

    #[test]
    fn test_rejects_empty_credentials() {
        let mut decoder = past_handshake();
        let bytes = login_bytes("", "hunter2", CLIENT_REVISION);
        assert_eq!(decoder.advance(&bytes), Err(LoginError::EmptyCredentials));

        let mut decoder = past_handshake();
        let bytes = login_bytes("mopar", "", CLIENT_REVISION);
        assert_eq!(decoder.advance(&bytes), Err(LoginError::EmptyCredentials));
    }

    #[test]
    fn test_revision_mismatch_is_policy_controlled() {
        // Permissive by default: parsed, logged, carried through.
        let mut decoder = past_handshake();
        let bytes = login_bytes("mopar", "hunter2", 377);
        match decoder.advance(&bytes).unwrap().1 {
            LoginProgress::Request(request) => assert_eq!(request.revision, 377),
            other => panic!("expected request, got {:?}", other),
        }

        // Enforced when configured.
        let mut decoder = LoginDecoder::new(true);
        decoder.advance(&handshake_bytes()).unwrap();
        assert_eq!(decoder.advance(&bytes), Err(LoginError::Revision(377)));
    }

    #[test]
    fn test_response_code_priority() {
        assert_eq!(response_code(true, 5, 10), RESPONSE_OK);
        assert_eq!(response_code(false, 5, 10), RESPONSE_BAD_CREDENTIALS);
        assert_eq!(response_code(true, 10, 10), RESPONSE_WORLD_FULL);
        // Capacity overrides a failed load as well.
        assert_eq!(response_code(false, 10, 10), RESPONSE_WORLD_FULL);
    }

    struct DenyAll;

    impl AccountLoader for DenyAll {
        fn load_profile(&self, _username: &str, _password: &str) -> Option<Profile> {
            None
        }
    }

    fn test_request() -> LoginRequest {
        LoginRequest {
            reconnecting: false,
            revision: CLIENT_REVISION,
            client_seed: CLIENT_SEED,
            server_seed: SERVER_SEED,
            username: "mopar".to_owned(),
            password: "hunter2".to_owned(),
        }
    }

    fn test_session() -> (SessionHandle, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cipher = Arc::new(Mutex::new(Isaac::new([1, 2, 3, 4])));
        (SessionHandle::new(tx, cipher), rx)
    }

    #[tokio::test]
    async fn test_authenticate_registers_and_queues_frames() {
        let world = RwLock::new(World::new(10));
        let accounts = DefaultAccounts::new(Location::new(3222, 3218, 0));
        let (session, mut rx) = test_session();

        let index = authenticate(&test_request(), &world, &accounts, &session).await;
        assert_eq!(index, Some(0));
        assert_eq!(world.read().await.player_count(), 1);

        // Response first, then the ciphered initial-state frame.
        assert_eq!(rx.try_recv().unwrap(), vec![RESPONSE_OK, 0, 0]);
        assert_eq!(rx.try_recv().unwrap().len(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_authenticate_rejects_without_registering() {
        let world = RwLock::new(World::new(10));
        let (session, mut rx) = test_session();

        let index = authenticate(&test_request(), &world, &DenyAll, &session).await;
        assert_eq!(index, None);
        assert_eq!(world.read().await.player_count(), 0);

        assert_eq!(rx.try_recv().unwrap(), vec![RESPONSE_BAD_CREDENTIALS, 0, 0]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_authenticate_reports_full_world() {
        let world = RwLock::new(World::new(0));
        let accounts = DefaultAccounts::new(Location::new(3222, 3218, 0));
        let (session, mut rx) = test_session();

        let index = authenticate(&test_request(), &world, &accounts, &session).await;
        assert_eq!(index, None);
        assert_eq!(rx.try_recv().unwrap(), vec![RESPONSE_WORLD_FULL, 0, 0]);
    }
}
