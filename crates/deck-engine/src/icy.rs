//! ICY (SHOUTcast/Icecast) in-band metadata framing.
//!
//! Wire layout, repeating:
//!
//! ```text
//!   [metaint bytes of audio][1 length byte n][16*n bytes metadata, NUL padded]
//! ```
//!
//! [`IcyDecoder`] is push-based: feed it whatever chunk sizes the HTTP body
//! yields and it returns the metadata blocks completed by that chunk.

use thiserror::Error;

/// Largest metadata block the length byte can describe.
pub const MAX_METADATA_LEN: usize = 16 * 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Audio { remaining: usize },
    Length,
    Metadata { remaining: usize },
}

#[derive(Debug, Clone)]
pub struct IcyDecoder {
    metaint: usize,
    phase: Phase,
    block: Vec<u8>,
    audio_bytes: u64,
}

impl IcyDecoder {
    /// `metaint` must be non-zero.
    pub fn new(metaint: usize) -> Self {
        let metaint = metaint.max(1);
        Self {
            metaint,
            phase: Phase::Audio { remaining: metaint },
            block: Vec::new(),
            audio_bytes: 0,
        }
    }

    /// Audio payload bytes skipped so far.
    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes
    }

    /// Consume `bytes`, returning raw metadata blocks (padding included)
    /// that were completed.  Zero-length blocks are not returned.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        while !bytes.is_empty() {
            match self.phase {
                Phase::Audio { remaining } => {
                    let take = remaining.min(bytes.len());
                    self.audio_bytes += take as u64;
                    bytes = &bytes[take..];
                    self.phase = if take == remaining {
                        Phase::Length
                    } else {
                        Phase::Audio {
                            remaining: remaining - take,
                        }
                    };
                }
                Phase::Length => {
                    let len = bytes[0] as usize * 16;
                    bytes = &bytes[1..];
                    self.phase = if len == 0 {
                        Phase::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        self.block.clear();
                        self.block.reserve(len);
                        Phase::Metadata { remaining: len }
                    };
                }
                Phase::Metadata { remaining } => {
                    let take = remaining.min(bytes.len());
                    self.block.extend_from_slice(&bytes[..take]);
                    bytes = &bytes[take..];
                    if take == remaining {
                        blocks.push(std::mem::take(&mut self.block));
                        self.phase = Phase::Audio {
                            remaining: self.metaint,
                        };
                    } else {
                        self.phase = Phase::Metadata {
                            remaining: remaining - take,
                        };
                    }
                }
            }
        }
        blocks
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IcyParseError {
    #[error("metadata block is empty")]
    Empty,
    #[error("malformed pair at byte {0}")]
    Malformed(usize),
    #[error("unterminated value for key {0}")]
    Unterminated(String),
}

/// Split a metadata block into `key='value'` pairs.
///
/// Trailing NUL padding is stripped.  Values may be quoted with `'` or `"`
/// and may contain `;`; a value ends at its closing quote followed by `;`
/// or end of text.
pub fn parse_metadata(block: &[u8]) -> Result<Vec<(String, String)>, IcyParseError> {
    let end = block
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let text = String::from_utf8_lossy(&block[..end]);
    let text = text.trim();
    if text.is_empty() {
        return Err(IcyParseError::Empty);
    }

    let mut pairs = Vec::new();
    let mut rest = text;
    let mut offset = 0usize;
    loop {
        let skipped = rest.len()
            - rest
                .trim_start_matches(|c: char| c == ';' || c.is_whitespace())
                .len();
        rest = &rest[skipped..];
        offset += skipped;
        if rest.is_empty() {
            break;
        }

        let eq = rest.find('=').ok_or(IcyParseError::Malformed(offset))?;
        let key = rest[..eq].trim().to_string();
        if key.is_empty() {
            return Err(IcyParseError::Malformed(offset));
        }
        let after = &rest[eq + 1..];
        let quote = match after.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => {
                // Unquoted value runs to the next ';'.
                let value_end = after.find(';').unwrap_or(after.len());
                pairs.push((key, after[..value_end].trim().to_string()));
                let consumed = eq + 1 + value_end;
                rest = &rest[consumed..];
                offset += consumed;
                continue;
            }
        };

        let body = &after[1..];
        let terminator = format!("{};", quote);
        let (value, consumed_body) = match body.find(&terminator) {
            Some(i) => (&body[..i], i + terminator.len()),
            None if body.ends_with(quote) => (&body[..body.len() - 1], body.len()),
            None => return Err(IcyParseError::Unterminated(key)),
        };
        pairs.push((key, value.to_string()));
        let consumed = eq + 2 + consumed_body;
        rest = &rest[consumed..];
        offset += consumed;
    }
    Ok(pairs)
}

/// `StreamTitle` of a metadata block, if present and non-blank.
pub fn stream_title(block: &[u8]) -> Result<Option<String>, IcyParseError> {
    let pairs = parse_metadata(block)?;
    Ok(pairs
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("StreamTitle"))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Encode one metadata block the way a server would, padding to 16 bytes.
pub fn encode_block(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let n = bytes.len().div_ceil(16).min(255);
    let mut out = Vec::with_capacity(1 + n * 16);
    out.push(n as u8);
    out.extend_from_slice(&bytes[..bytes.len().min(n * 16)]);
    out.resize(1 + n * 16, 0);
    out
}
