//! Positional wire codec shared by every protocol message.
//!
//! A message body is described by a format string mixing literal bytes with
//! field specifiers:
//!
//! ```text
//! %1i  %2i  %4i     unsigned big-endian integer, 1 / 2 / 4 bytes
//! %s                byte string, 4-byte big-endian length prefix then data
//! %%                a literal '%'
//! ```
//!
//! The same format string drives both directions: [`writef`] appends the
//! encoded fields to a buffer, [`readf`] parses them back out.  Literal bytes
//! in the format are emitted verbatim on write and must match exactly on
//! read.  [`writef`] computes the total encoded size up front and reserves it
//! before filling, so a message is always one contiguous allocation.

use thiserror::Error;

/// Errors produced while decoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before the format was fully consumed.  When decoding
    /// from a stream this means "wait for more bytes", not corruption.
    #[error("truncated message: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// A literal byte in the format did not match the byte on the wire.
    #[error("protocol literal mismatch: expected 0x{expected:02x}, found 0x{found:02x}")]
    LiteralMismatch { expected: u8, found: u8 },

    /// The leading four bytes are not a known message code.
    #[error("unknown message code {:?}", String::from_utf8_lossy(.0))]
    UnknownCode([u8; 4]),

    /// A field decoded cleanly but holds a value outside its domain.
    #[error("bad {what} value {value}")]
    BadField { what: &'static str, value: u32 },
}

/// A field passed to [`writef`].
#[derive(Debug, Clone, Copy)]
pub enum WireArg<'a> {
    /// Written with the width given by the matching `%Ni` specifier.
    Int(u32),
    /// Written as a 4-byte length followed by the raw bytes (`%s`).
    Bytes(&'a [u8]),
}

/// A field returned by [`readf`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Int(u32),
    Bytes(Vec<u8>),
}

impl WireValue {
    /// Returns the integer value, panicking on a string field.  Decoders only
    /// call this on positions the format string guarantees to be integers.
    pub fn as_int(&self) -> u32 {
        match self {
            WireValue::Int(v) => *v,
            WireValue::Bytes(_) => panic!("wire field is a string, expected an integer"),
        }
    }

    /// Consumes the value and returns the string bytes, panicking on an
    /// integer field.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireValue::Int(_) => panic!("wire field is an integer, expected a string"),
            WireValue::Bytes(b) => b,
        }
    }
}

/// Returns the exact number of bytes [`writef`] will produce for `fmt` and
/// `args`.
pub fn encoded_len(fmt: &str, args: &[WireArg<'_>]) -> usize {
    let mut n = 0;
    let mut next_arg = 0;
    let mut bytes = fmt.as_bytes().iter().peekable();
    while let Some(&b) = bytes.next() {
        if b != b'%' {
            n += 1;
            continue;
        }
        let width = eat_width(&mut bytes);
        match bytes.next() {
            Some(b'i') => {
                debug_assert!(matches!(width, 1 | 2 | 4), "bad integer width in {fmt:?}");
                n += width;
                next_arg += 1;
            }
            Some(b's') => {
                match args.get(next_arg) {
                    Some(WireArg::Bytes(data)) => n += 4 + data.len(),
                    other => panic!("%s expects a byte argument, got {other:?}"),
                }
                next_arg += 1;
            }
            Some(b'%') => n += 1,
            other => panic!("invalid format specifier {other:?} in {fmt:?}"),
        }
    }
    n
}

/// Encodes `args` according to `fmt`, appending to `out`.
///
/// Panics if the format string and arguments disagree; format strings are
/// compile-time constants, so a mismatch is a programming error rather than a
/// wire condition.
pub fn writef(out: &mut Vec<u8>, fmt: &str, args: &[WireArg<'_>]) {
    tracing::trace!(fmt, "writef");
    out.reserve(encoded_len(fmt, args));

    let mut next_arg = 0;
    let mut bytes = fmt.as_bytes().iter().peekable();
    while let Some(&b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }
        let width = eat_width(&mut bytes);
        match bytes.next() {
            Some(b'i') => {
                let v = match args.get(next_arg) {
                    Some(WireArg::Int(v)) => *v,
                    other => panic!("%{width}i expects an integer argument, got {other:?}"),
                };
                next_arg += 1;
                match width {
                    1 => out.push(v as u8),
                    2 => out.extend_from_slice(&(v as u16).to_be_bytes()),
                    4 => out.extend_from_slice(&v.to_be_bytes()),
                    _ => panic!("bad integer width {width} in {fmt:?}"),
                }
            }
            Some(b's') => {
                let data = match args.get(next_arg) {
                    Some(WireArg::Bytes(data)) => *data,
                    other => panic!("%s expects a byte argument, got {other:?}"),
                };
                next_arg += 1;
                out.extend_from_slice(&(data.len() as u32).to_be_bytes());
                out.extend_from_slice(data);
            }
            Some(b'%') => out.push(b'%'),
            other => panic!("invalid format specifier {other:?} in {fmt:?}"),
        }
    }
    debug_assert_eq!(next_arg, args.len(), "unused arguments for {fmt:?}");
}

/// Decodes fields from the front of `buf` according to `fmt`.
///
/// Returns the decoded fields and the number of bytes consumed so a streaming
/// caller can advance its cursor.
///
/// # Errors
///
/// [`ProtocolError::Truncated`] when `buf` ends early (retryable once more
/// bytes arrive) and [`ProtocolError::LiteralMismatch`] when a literal format
/// byte does not match the wire.
pub fn readf(buf: &[u8], fmt: &str) -> Result<(Vec<WireValue>, usize), ProtocolError> {
    let mut values = Vec::new();
    let mut pos = 0;

    let mut bytes = fmt.as_bytes().iter().peekable();
    while let Some(&b) = bytes.next() {
        if b != b'%' {
            let found = take(buf, &mut pos, 1)?[0];
            if found != b {
                return Err(ProtocolError::LiteralMismatch { expected: b, found });
            }
            continue;
        }
        let width = eat_width(&mut bytes);
        match bytes.next() {
            Some(b'i') => {
                let raw = take(buf, &mut pos, width)?;
                let v = raw.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                values.push(WireValue::Int(v));
            }
            Some(b's') => {
                let raw = take(buf, &mut pos, 4)?;
                let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                let data = take(buf, &mut pos, len)?;
                values.push(WireValue::Bytes(data.to_vec()));
            }
            Some(b'%') => {
                let found = take(buf, &mut pos, 1)?[0];
                if found != b'%' {
                    return Err(ProtocolError::LiteralMismatch { expected: b'%', found });
                }
            }
            other => panic!("invalid format specifier {other:?} in {fmt:?}"),
        }
    }

    Ok((values, pos))
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Consumes decimal digits from the format iterator, returning the width
/// (0 when the specifier carries none, as in `%s`).
fn eat_width(bytes: &mut std::iter::Peekable<std::slice::Iter<'_, u8>>) -> usize {
    let mut n = 0;
    while let Some(d) = bytes.peek().copied().filter(|b| b.is_ascii_digit()) {
        n = 10 * n + usize::from(d - b'0');
        bytes.next();
    }
    n
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, count: usize) -> Result<&'a [u8], ProtocolError> {
    let end = pos.checked_add(count).expect("field length overflow");
    if buf.len() < end {
        return Err(ProtocolError::Truncated {
            needed: end,
            available: buf.len(),
        });
    }
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(fmt: &str, args: &[WireArg<'_>]) -> Vec<WireValue> {
        let mut buf = Vec::new();
        writef(&mut buf, fmt, args);
        assert_eq!(buf.len(), encoded_len(fmt, args), "encoded_len must be exact");
        let (values, consumed) = readf(&buf, fmt).expect("decode failed");
        assert_eq!(consumed, buf.len(), "decode must consume the whole encoding");
        values
    }

    // ── Round trips per field type ────────────────────────────────────────────

    #[test]
    fn test_one_byte_integer_round_trip() {
        let values = round_trip("%1i", &[WireArg::Int(0xAB)]);
        assert_eq!(values, vec![WireValue::Int(0xAB)]);
    }

    #[test]
    fn test_two_byte_integer_round_trip() {
        let values = round_trip("%2i", &[WireArg::Int(0xBEEF)]);
        assert_eq!(values, vec![WireValue::Int(0xBEEF)]);
    }

    #[test]
    fn test_four_byte_integer_round_trip() {
        let values = round_trip("%4i", &[WireArg::Int(0xDEAD_BEEF)]);
        assert_eq!(values, vec![WireValue::Int(0xDEAD_BEEF)]);
    }

    #[test]
    fn test_string_round_trip() {
        let values = round_trip("%s", &[WireArg::Bytes(b"hello")]);
        assert_eq!(values, vec![WireValue::Bytes(b"hello".to_vec())]);
    }

    #[test]
    fn test_empty_string_round_trip() {
        let values = round_trip("%s", &[WireArg::Bytes(b"")]);
        assert_eq!(values, vec![WireValue::Bytes(Vec::new())]);
    }

    #[test]
    fn test_literal_round_trip() {
        let values = round_trip("CALV", &[]);
        assert!(values.is_empty());
    }

    #[test]
    fn test_escaped_percent_round_trip() {
        let values = round_trip("a%%b", &[]);
        assert!(values.is_empty());
    }

    #[test]
    fn test_mixed_format_round_trip() {
        let values = round_trip(
            "CINN%2i%2i%4i%2i",
            &[
                WireArg::Int(100),
                WireArg::Int(200),
                WireArg::Int(7),
                WireArg::Int(0x4000),
            ],
        );
        assert_eq!(
            values,
            vec![
                WireValue::Int(100),
                WireValue::Int(200),
                WireValue::Int(7),
                WireValue::Int(0x4000),
            ]
        );
    }

    #[test]
    fn test_string_after_integers_round_trip() {
        let values = round_trip(
            "DCLP%1i%4i%s",
            &[WireArg::Int(1), WireArg::Int(42), WireArg::Bytes(b"clipboard text")],
        );
        assert_eq!(values[2], WireValue::Bytes(b"clipboard text".to_vec()));
    }

    // ── Wire layout ───────────────────────────────────────────────────────────

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = Vec::new();
        writef(&mut buf, "%2i%4i", &[WireArg::Int(0x0102), WireArg::Int(0x0304_0506)]);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_one_byte_integer_truncates_to_low_byte() {
        let mut buf = Vec::new();
        writef(&mut buf, "%1i", &[WireArg::Int(0x1FF)]);
        assert_eq!(buf, [0xFF]);
    }

    #[test]
    fn test_string_has_four_byte_length_prefix() {
        let mut buf = Vec::new();
        writef(&mut buf, "%s", &[WireArg::Bytes(b"ab")]);
        assert_eq!(buf, [0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_literal_bytes_written_verbatim() {
        let mut buf = Vec::new();
        writef(&mut buf, "Synergy%2i%2i", &[WireArg::Int(1), WireArg::Int(3)]);
        assert_eq!(&buf[..7], b"Synergy");
        assert_eq!(&buf[7..], [0, 1, 0, 3]);
    }

    // ── Error conditions ──────────────────────────────────────────────────────

    #[test]
    fn test_truncated_integer_returns_truncated() {
        let result = readf(&[0x01], "%2i");
        assert_eq!(
            result,
            Err(ProtocolError::Truncated { needed: 2, available: 1 })
        );
    }

    #[test]
    fn test_truncated_string_body_returns_truncated() {
        // Length prefix says 10 bytes but only 3 follow.
        let mut buf = vec![0, 0, 0, 10];
        buf.extend_from_slice(b"abc");
        let result = readf(&buf, "%s");
        assert!(matches!(result, Err(ProtocolError::Truncated { needed: 14, .. })));
    }

    #[test]
    fn test_truncated_string_length_returns_truncated() {
        let result = readf(&[0, 0], "%s");
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_literal_mismatch_returns_error() {
        let result = readf(b"CALX", "CALV");
        assert_eq!(
            result,
            Err(ProtocolError::LiteralMismatch { expected: b'V', found: b'X' })
        );
    }

    #[test]
    fn test_empty_buffer_against_literal_returns_truncated() {
        let result = readf(&[], "COUT");
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_trailing_bytes_are_not_consumed() {
        let mut buf = Vec::new();
        writef(&mut buf, "%1i", &[WireArg::Int(9)]);
        buf.extend_from_slice(b"rest");
        let (_, consumed) = readf(&buf, "%1i").unwrap();
        assert_eq!(consumed, 1);
    }
}
