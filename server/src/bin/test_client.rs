use protocol::cipher::{derive_session_seeds, Isaac};
use protocol::{
    CLIENT_REVISION, HANDSHAKE_ACK_LENGTH, HANDSHAKE_REQUEST, INIT_OPCODE, LOGIN_BLOCK_OPCODE,
    LOGIN_KIND_FRESH, NPC_SYNC_OPCODE, PLAYER_SYNC_OPCODE, RESPONSE_OK,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Builds the two header bytes plus the full login payload.
fn login_bytes(username: &str, password: &str, client_seed: u64, server_seed: u64) -> Vec<u8> {
    let mut block = Vec::new();
    block.push(LOGIN_BLOCK_OPCODE);
    block.extend_from_slice(&client_seed.to_be_bytes());
    block.extend_from_slice(&server_seed.to_be_bytes());
    block.extend_from_slice(&0u32.to_be_bytes());
    block.extend_from_slice(username.as_bytes());
    block.push(10);
    block.extend_from_slice(password.as_bytes());
    block.push(10);

    let mut payload = vec![255];
    payload.extend_from_slice(&CLIENT_REVISION.to_be_bytes());
    payload.push(0); // low memory flag
    payload.extend_from_slice(&[0; 36]);
    payload.push(block.len() as u8);
    payload.extend_from_slice(&block);

    let mut bytes = vec![LOGIN_KIND_FRESH, payload.len() as u8];
    bytes.extend_from_slice(&payload);
    bytes
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:43594".to_owned());

    println!("Connecting to {}", address);
    let mut stream = TcpStream::connect(&address).await?;

    // Handshake
    stream.write_all(&[HANDSHAKE_REQUEST, 31]).await?;
    let mut ack = [0u8; HANDSHAKE_ACK_LENGTH];
    stream.read_exact(&mut ack).await?;
    println!("Handshake acknowledged ({} bytes)", ack.len());

    // Login with throwaway credentials and fresh random seeds
    let client_seed: u64 = rand::random();
    let server_seed: u64 = rand::random();
    stream
        .write_all(&login_bytes("tester", "password", client_seed, server_seed))
        .await?;

    let mut response = [0u8; 3];
    stream.read_exact(&mut response).await?;
    println!(
        "Login response: code {}, privilege {}",
        response[0], response[1]
    );
    if response[0] != RESPONSE_OK {
        return Ok(());
    }

    // Server frames arrive on its outbound cipher; our packets run on the
    // inbound one.
    let (inbound_seed, outbound_seed) = derive_session_seeds(client_seed, server_seed);
    let mut decode = Isaac::new(outbound_seed);
    let mut encode = Isaac::new(inbound_seed);

    // Initial state frame
    let mut head = [0u8; 1];
    stream.read_exact(&mut head).await?;
    let opcode = head[0].wrapping_sub(decode.next_key() as u8);
    if opcode != INIT_OPCODE {
        println!("Expected initial state frame, got opcode {}", opcode);
        return Ok(());
    }
    let mut body = [0u8; 3];
    stream.read_exact(&mut body).await?;
    let slot = u16::from_le_bytes([body[1], body[2]]);
    println!("Entered world in slot {}", slot);

    // Watch a few ticks of synchronization traffic, pinging in between
    for _ in 0..8 {
        stream.read_exact(&mut head).await?;
        let opcode = head[0].wrapping_sub(decode.next_key() as u8);

        let mut length_bytes = [0u8; 2];
        stream.read_exact(&mut length_bytes).await?;
        let length = u16::from_be_bytes(length_bytes) as usize;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await?;

        let channel = match opcode {
            PLAYER_SYNC_OPCODE => "player",
            NPC_SYNC_OPCODE => "npc",
            _ => "unknown",
        };
        println!("{} sync frame: {} bytes", channel, length);

        if opcode == NPC_SYNC_OPCODE {
            // Idle packet, to exercise the steady-state decoder
            let key = encode.next_key() as u8;
            stream.write_all(&[key]).await?;
        }
    }

    println!("Test client finished");
    Ok(())
}
