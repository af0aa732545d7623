//! Stream framing
//!
//! Scans exactly one bencode value off a buffered reader and returns its raw
//! bytes. The scan is iterative and bounds nesting, so the frame handed to
//! serde_bencode is never deeper than [`MAX_DEPTH`].

use std::io::{BufRead, ErrorKind, Read};

use super::BencodeError;

/// Deepest list/dictionary nesting accepted in one frame
pub const MAX_DEPTH: usize = 64;

/// Longest integer or length prefix accepted, in bytes
const MAX_NUMBER_LEN: usize = 20;

/// Largest byte string accepted from the wire
const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;

/// Read the next complete value from `reader`
///
/// Returns `Ok(None)` if the stream ends cleanly before a value starts.
/// Ending in the middle of a value is an error.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, BencodeError> {
    let mut byte = match next_byte(reader)? {
        Some(byte) => byte,
        None => return Ok(None),
    };

    let mut frame = Vec::new();
    let mut depth = 0usize;
    loop {
        frame.push(byte);
        match byte {
            b'i' => read_until(reader, &mut frame, b'e', "integer")?,
            b'l' | b'd' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(BencodeError::TooDeep { limit: MAX_DEPTH });
                }
            }
            b'e' if depth > 0 => depth -= 1,
            b'0'..=b'9' => {
                let start = frame.len() - 1;
                read_until(reader, &mut frame, b':', "string length")?;
                let len = parse_length(&frame[start..frame.len() - 1])?;
                let read = reader.by_ref().take(len).read_to_end(&mut frame)?;
                if (read as u64) < len {
                    return Err(BencodeError::UnexpectedEof("string"));
                }
            }
            byte => return Err(BencodeError::UnexpectedByte { byte }),
        }

        if depth == 0 {
            return Ok(Some(frame));
        }
        byte = next_byte(reader)?.ok_or(BencodeError::UnexpectedEof("value"))?;
    }
}

fn next_byte<R: BufRead>(reader: &mut R) -> Result<Option<u8>, BencodeError> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Append bytes up to and including `terminator`
fn read_until<R: BufRead>(
    reader: &mut R,
    frame: &mut Vec<u8>,
    terminator: u8,
    what: &'static str,
) -> Result<(), BencodeError> {
    for _ in 0..=MAX_NUMBER_LEN {
        let b = next_byte(reader)?.ok_or(BencodeError::UnexpectedEof(what))?;
        frame.push(b);
        if b == terminator {
            return Ok(());
        }
    }
    Err(BencodeError::InvalidLength(format!(
        "{} exceeds {} bytes",
        what, MAX_NUMBER_LEN
    )))
}

fn parse_length(text: &[u8]) -> Result<u64, BencodeError> {
    if !text.iter().all(u8::is_ascii_digit) || (text.len() > 1 && text[0] == b'0') {
        return Err(BencodeError::invalid_length(text));
    }
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|len| *len <= MAX_STRING_LEN)
        .ok_or_else(|| BencodeError::invalid_length(text))
}
