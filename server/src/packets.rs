use protocol::cipher::Isaac;
use protocol::frame::{FrameBuilder, FrameError};
use protocol::{HANDSHAKE_ACK_LENGTH, INIT_OPCODE};

// Pre-login responses are raw bytes: the cipher pair does not exist yet.

// Handshake acknowledgement: a fixed run of zero bytes, the last of which
// the client reads as the initial status code.
pub fn handshake_ack() -> Vec<u8> {
    vec![0; HANDSHAKE_ACK_LENGTH]
}

// Login response: status code, privilege level, reserved flag byte.
pub fn login_response(code: u8, privilege: u8) -> Vec<u8> {
    vec![code, privilege, 0]
}

// First ciphered frame after a successful login, telling the client which
// repository slot it occupies and whether the account is flagged as member.
pub fn initial_state(index: usize, member: bool, cipher: &mut Isaac) -> Result<Vec<u8>, FrameError> {
    let mut frame = FrameBuilder::with_capacity(8);
    frame.start_fixed(INIT_OPCODE, cipher)?;
    frame.put_u8_add(member as u8)?;
    frame.put_u16_le(index as u16)?;
    Ok(frame.into_bytes())
}
