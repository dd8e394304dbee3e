//! Room codes: `U/NNNN-NNNN-SSSS-SSSS`.
//!
//! Sixteen symbols from a 34-character alphabet (no `I`, no `O`). Read as a
//! little-endian base-34 number, the symbols must be divisible by 7. The
//! first two groups name the mesh network, the last two are its secret.

use crate::error::{ProtocolError, Result};
use std::fmt;
use std::str::FromStr;

/// Symbol alphabet. Position is the symbol's value.
pub const ALPHABET: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Total length of a room code, prefix and separators included.
pub const ROOM_CODE_LEN: usize = 21;

const PREFIX: &str = "U/";
const SYMBOLS: usize = 16;
const GROUP: usize = 4;
const SEPARATOR_POSITIONS: [usize; 3] = [6, 11, 16];

/// Prefix of the mesh network name every room joins.
pub const NETWORK_NAME_PREFIX: &str = "scaffolding-mc-";

/// `34^i mod 7` cycles with period 6 because `34 mod 7 == 6`.
const WEIGHTS: [u32; 6] = [1, 6, 1, 6, 1, 6];

fn symbol_value(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u8)
}

fn checksum(values: &[u8]) -> u32 {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| u32::from(v) * WEIGHTS[i % WEIGHTS.len()])
        .sum::<u32>()
        % 7
}

/// Whether `code` is a well-formed room code with a valid checksum.
pub fn is_valid(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != ROOM_CODE_LEN || !code.starts_with(PREFIX) {
        return false;
    }

    let mut values = [0u8; SYMBOLS];
    let mut n = 0;
    for (i, &c) in bytes.iter().enumerate().skip(PREFIX.len()) {
        if SEPARATOR_POSITIONS.contains(&i) {
            if c != b'-' {
                return false;
            }
            continue;
        }
        match symbol_value(c) {
            Some(v) => {
                values[n] = v;
                n += 1;
            }
            None => return false,
        }
    }

    n == SYMBOLS && checksum(&values) == 0
}

/// A validated room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Validate `code`.
    ///
    /// # Errors
    /// `InvalidRoomCode` unless [`is_valid`] accepts it.
    pub fn parse(code: &str) -> Result<Self> {
        if is_valid(code) {
            Ok(Self(code.to_owned()))
        } else {
            Err(ProtocolError::InvalidRoomCode)
        }
    }

    /// Draw random codes until one passes the checksum.
    ///
    /// Symbols come from the OS CSPRNG; bytes at or above the largest
    /// multiple of 34 are discarded so every symbol is equally likely.
    ///
    /// # Errors
    /// `Io` if the OS random source fails.
    pub fn generate() -> Result<Self> {
        loop {
            let symbols = random_symbols()?;
            let mut code = String::with_capacity(ROOM_CODE_LEN);
            code.push_str(PREFIX);
            for (i, group) in symbols.chunks(GROUP).enumerate() {
                if i > 0 {
                    code.push('-');
                }
                code.extend(group.iter().map(|&v| ALPHABET[v as usize] as char));
            }
            if is_valid(&code) {
                return Ok(Self(code));
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mesh network name: the prefix plus the first two groups.
    pub fn network_name(&self) -> String {
        format!("{NETWORK_NAME_PREFIX}{}", &self.0[2..11])
    }

    /// Mesh network secret: the last two groups.
    pub fn network_secret(&self) -> &str {
        &self.0[12..21]
    }
}

fn random_symbols() -> Result<[u8; SYMBOLS]> {
    const LIMIT: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

    let mut out = [0u8; SYMBOLS];
    let mut filled = 0;
    let mut pool = [0u8; 32];
    while filled < SYMBOLS {
        getrandom::fill(&mut pool)
            .map_err(|e| ProtocolError::Io(std::io::Error::other(e.to_string())))?;
        for &b in pool.iter().filter(|&&b| b < LIMIT) {
            if filled == SYMBOLS {
                break;
            }
            out[filled] = b % ALPHABET.len() as u8;
            filled += 1;
        }
    }
    Ok(out)
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
