//! Program event decoding
//!
//! The launchpad program emits Anchor events as base64 `Program data:` log
//! lines. Two layouts matter here: the creation event written when a token
//! is minted, and the swap event written on every bonding-curve trade. Both
//! start with an 8-byte discriminator; 32-byte account fields are re-encoded
//! as base58 strings so the rest of the system never touches raw key bytes.

use base64::Engine;
use borsh::{BorshDeserialize, BorshSerialize};

/// Discriminator of the token-creation event.
pub const CREATE_EVENT_DISCRIMINATOR: [u8; 8] = [27, 114, 169, 77, 222, 235, 99, 118];

/// Discriminator of the swap (trade) event.
pub const TRADE_EVENT_DISCRIMINATOR: [u8; 8] = [189, 219, 127, 211, 78, 230, 97, 238];

const PROGRAM_DATA_MARKER: &str = "Program data: ";
const INITIALIZE_MINT_MARKER: &str = "InitializeMint";

#[derive(Debug)]
pub enum DecodeError {
    Base64(base64::DecodeError),
    Truncated(usize),
    UnknownDiscriminator([u8; 8]),
    Layout(std::io::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Base64(e) => write!(f, "Invalid base64 payload: {}", e),
            DecodeError::Truncated(len) => write!(f, "Payload too short: {} bytes", len),
            DecodeError::UnknownDiscriminator(d) => {
                write!(f, "Unknown event discriminator: {:?}", d)
            }
            DecodeError::Layout(e) => write!(f, "Event layout mismatch: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<base64::DecodeError> for DecodeError {
    fn from(err: base64::DecodeError) -> Self {
        DecodeError::Base64(err)
    }
}

/// Wire layout of the creation event after the discriminator.
#[derive(BorshSerialize, BorshDeserialize)]
struct RawCreation {
    name: String,
    symbol: String,
    uri: String,
    mint: [u8; 32],
    bonding_curve: [u8; 32],
    user: [u8; 32],
}

/// Wire layout of the swap event after the discriminator.
#[derive(BorshSerialize, BorshDeserialize)]
struct RawSwap {
    mint: [u8; 32],
    sol_amount: u64,
    token_amount: u64,
    is_buy: bool,
    user: [u8; 32],
    timestamp: i64,
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
}

/// A newly minted token.
#[derive(Debug, Clone)]
pub struct CreationEvent {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub mint: String,
    pub bonding_curve: String,
    pub user: String,
}

/// A bonding-curve trade.
///
/// `sol_amount` is lamports (9 decimals), `token_amount` is raw token units
/// (6 decimals). The virtual reserves determine the instantaneous price.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub mint: String,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub is_buy: bool,
    pub user: String,
    pub timestamp: i64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
}

#[derive(Debug, Clone)]
pub enum ProgramEvent {
    Creation(CreationEvent),
    Swap(SwapEvent),
}

fn encode_key(bytes: &[u8; 32]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decode one `Program data:` payload into a tagged event.
///
/// Trailing bytes after the known layout are tolerated (the program appends
/// fields over time); a short buffer or a foreign discriminator is an error.
pub fn decode_program_data(b64: &str) -> Result<ProgramEvent, DecodeError> {
    let data = base64::engine::general_purpose::STANDARD.decode(b64)?;
    if data.len() < 8 {
        return Err(DecodeError::Truncated(data.len()));
    }

    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&data[..8]);
    let mut body = &data[8..];

    match discriminator {
        CREATE_EVENT_DISCRIMINATOR => {
            let raw = RawCreation::deserialize(&mut body).map_err(DecodeError::Layout)?;
            Ok(ProgramEvent::Creation(CreationEvent {
                name: raw.name,
                symbol: raw.symbol,
                uri: raw.uri,
                mint: encode_key(&raw.mint),
                bonding_curve: encode_key(&raw.bonding_curve),
                user: encode_key(&raw.user),
            }))
        }
        TRADE_EVENT_DISCRIMINATOR => {
            let raw = RawSwap::deserialize(&mut body).map_err(DecodeError::Layout)?;
            Ok(ProgramEvent::Swap(SwapEvent {
                mint: encode_key(&raw.mint),
                sol_amount: raw.sol_amount,
                token_amount: raw.token_amount,
                is_buy: raw.is_buy,
                user: encode_key(&raw.user),
                timestamp: raw.timestamp,
                virtual_sol_reserves: raw.virtual_sol_reserves,
                virtual_token_reserves: raw.virtual_token_reserves,
            }))
        }
        other => Err(DecodeError::UnknownDiscriminator(other)),
    }
}

/// Everything extracted from one log frame.
#[derive(Debug, Default)]
pub struct FrameEvents {
    /// True when the frame carried the mint-initialization instruction,
    /// which is what distinguishes a creation frame from a plain swap.
    pub is_mint: bool,
    pub events: Vec<ProgramEvent>,
}

/// Scan the log lines of one transaction for decodable program events.
///
/// Undecodable payloads are skipped, never fatal; foreign Anchor events
/// (unknown discriminators) are common and dropped without noise.
pub fn scan_logs(logs: &[String]) -> FrameEvents {
    let mut frame = FrameEvents::default();

    for line in logs {
        if line.contains(INITIALIZE_MINT_MARKER) {
            frame.is_mint = true;
        } else if let Some(idx) = line.find(PROGRAM_DATA_MARKER) {
            let raw = &line[idx + PROGRAM_DATA_MARKER.len()..];
            match decode_program_data(raw) {
                Ok(event) => frame.events.push(event),
                Err(DecodeError::UnknownDiscriminator(_)) => {}
                Err(e) => log::debug!("Skipping undecodable program data: {}", e),
            }
        }
    }

    frame
}
