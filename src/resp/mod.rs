//! Minimal RESP (REdis Serialization Protocol) framer.
//!
//! Reads exactly one complete RESP object's raw bytes off a buffered async
//! reader, preserving the original framing byte-for-byte (spec.md §4.1).
//! This is not a general RESP parser: it produces verbatim bytes, not typed
//! values, which is all the proxy needs — it forwards what it reads and
//! only inspects the top-level array for command dispatch (see
//! [`parse_command_args`]).

use crate::error::IoClass;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Guards against unbounded memory growth from a peer that never sends a
/// line terminator.
const MAX_LINE: usize = 64 * 1024;

/// `+OK\r\n`
pub const OK: &[u8] = b"+OK\r\n";

/// Read exactly one RESP object from `reader`, returning its raw bytes
/// (including the leading type byte and trailing CRLF of every line it
/// spans). Trailing bytes in the stream are left untouched for the next
/// call.
///
/// EOF at the very first line (nothing yet consumed for this object) is a
/// clean `ConnectionClosed` — the peer simply isn't sending another command.
/// EOF anywhere after that (a nested array element, a bulk-string payload)
/// means the peer hung up mid-object, which is a framing violation, not a
/// plain disconnect (spec.md §4.1: "an array whose advertised count cannot
/// be satisfied" is a framing failure).
pub async fn read_object<R>(reader: &mut R) -> Result<Vec<u8>, IoClass>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader, true).await?;
    read_object_from_line(reader, line).await
}

async fn read_object_from_line<R>(reader: &mut R, line: Vec<u8>) -> Result<Vec<u8>, IoClass>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = line.clone();

    match line[0] {
        b'$' => {
            let len = parse_len(&line)?;
            if len >= 0 {
                let mut payload = vec![0u8; len as usize + 2];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|e| classify_mid_object_io_error(&e))?;
                buf.extend_from_slice(&payload);
            }
            // len == -1: null bulk string, nothing further to read.
        }
        b'*' => {
            let len = parse_len(&line)?;
            for _ in 0..len.max(0) {
                let sub_line = read_line(reader, false).await?;
                let sub = Box::pin(read_object_from_line(reader, sub_line)).await?;
                buf.extend_from_slice(&sub);
            }
        }
        // Simple string (+), error (-), integer (:): the line is the whole object.
        _ => {}
    }

    Ok(buf)
}

/// Classify an `io::Error` from a read that occurred strictly inside an
/// object (after its first line). A clean EOF here means the peer stopped
/// sending partway through a well-formed object, which is framing, not a
/// fresh-boundary disconnect.
fn classify_mid_object_io_error(err: &io::Error) -> IoClass {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        IoClass::Framing("truncated bulk string payload".to_string())
    } else {
        IoClass::from_io_error(err)
    }
}

/// `at_boundary` is true only for the first line of a top-level
/// `read_object` call — a clean EOF there is an ordinary disconnect. Every
/// other call site (array elements) passes `false`, so a clean EOF there is
/// a truncated object.
async fn read_line<R>(reader: &mut R, at_boundary: bool) -> Result<Vec<u8>, IoClass>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| IoClass::from_io_error(&e))?;
    if n == 0 {
        return if at_boundary {
            Err(IoClass::ConnectionClosed)
        } else {
            Err(IoClass::Framing("truncated object".to_string()))
        };
    }
    if line.len() > MAX_LINE {
        return Err(IoClass::Framing("line too long".to_string()));
    }
    if line.len() < 2 || line[line.len() - 2] != b'\r' {
        return Err(IoClass::Framing("bad line terminator".to_string()));
    }
    Ok(line)
}

/// Parse a RESP array/bulk-string length line (`*<n>\r\n` or `$<n>\r\n`,
/// including the `$-1\r\n` null sentinel).
fn parse_len(line: &[u8]) -> Result<i64, IoClass> {
    if line.len() < 4 {
        return Err(IoClass::Framing("bad length line".to_string()));
    }
    if line[0] != b'$' && line[0] != b'*' {
        return Err(IoClass::Framing("bad length prefix".to_string()));
    }
    if line.len() == 4 && line[1] == b'-' && line[2] == b'1' {
        return Ok(-1);
    }
    let mut n: i64 = 0;
    for &b in &line[1..line.len() - 2] {
        if !b.is_ascii_digit() {
            return Err(IoClass::Framing("bad length characters".to_string()));
        }
        n = n * 10 + i64::from(b - b'0');
    }
    Ok(n)
}

/// Parse the top-level bulk strings out of a RESP array's raw bytes (as
/// produced by [`read_object`]) into an ordered argument list. Used only for
/// command dispatch; the verbatim bytes are still what gets forwarded
/// upstream.
pub fn parse_command_args(raw: &[u8]) -> Result<Vec<Vec<u8>>, IoClass> {
    let mut pos = 0usize;
    let header = take_line(raw, &mut pos)?;
    if header[0] != b'*' {
        return Err(IoClass::Framing("expected array".to_string()));
    }
    let count = parse_len(header)?;
    if count < 0 {
        return Err(IoClass::Framing("null array".to_string()));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let item = take_line(raw, &mut pos)?;
        if item[0] != b'$' {
            return Err(IoClass::Framing("expected bulk string".to_string()));
        }
        let len = parse_len(item)?;
        if len < 0 {
            return Err(IoClass::Framing("null bulk string argument".to_string()));
        }
        let len = len as usize;
        if pos + len + 2 > raw.len() {
            return Err(IoClass::Framing("truncated bulk string".to_string()));
        }
        args.push(raw[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Ok(args)
}

fn take_line<'a>(raw: &'a [u8], pos: &mut usize) -> Result<&'a [u8], IoClass> {
    let start = *pos;
    let rel = raw[start..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| IoClass::Framing("truncated line".to_string()))?;
    let end = start + rel + 1;
    *pos = end;
    let line = &raw[start..end];
    if line.len() < 2 || line[line.len() - 2] != b'\r' {
        return Err(IoClass::Framing("bad line terminator".to_string()));
    }
    Ok(line)
}

/// Encode a RESP error reply: `-<message>\r\n`.
pub fn encode_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.push(b'-');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Encode a RESP array command from plain argument strings, e.g. for
/// `AUTH <password>`.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// True if `raw` (the bytes of one framed object) is a RESP error object.
pub fn is_error_object(raw: &[u8]) -> bool {
    raw.first() == Some(&b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn read(bytes: &[u8]) -> Result<Vec<u8>, IoClass> {
        let mut reader = BufReader::new(Cursor::new(bytes.to_vec()));
        read_object(&mut reader).await
    }

    #[tokio::test]
    async fn simple_string() {
        assert_eq!(read(b"-OK\r\n").await.unwrap(), b"-OK\r\n");
    }

    #[tokio::test]
    async fn ignores_trailing_junk() {
        assert_eq!(read(b"-OK\r\n...").await.unwrap(), b"-OK\r\n");
    }

    #[tokio::test]
    async fn reads_only_one_object() {
        assert_eq!(read(b"-OK\r\n-ERR\r\n").await.unwrap(), b"-OK\r\n");
    }

    #[tokio::test]
    async fn array_of_simple_strings() {
        assert_eq!(
            read(b"*2\r\n-OK\r\n-OK\r\n").await.unwrap(),
            b"*2\r\n-OK\r\n-OK\r\n"
        );
    }

    #[tokio::test]
    async fn empty_array() {
        assert_eq!(read(b"*0\r\n").await.unwrap(), b"*0\r\n");
    }

    #[tokio::test]
    async fn array_with_missing_elements_is_framing_error() {
        let err = read(b"*5\r\n-OK\r\n").await.unwrap_err();
        assert!(matches!(err, IoClass::Framing(_)));
    }

    #[tokio::test]
    async fn empty_bulk_string() {
        assert_eq!(read(b"$0\r\n\r\n").await.unwrap(), b"$0\r\n\r\n");
    }

    #[tokio::test]
    async fn bulk_string() {
        assert_eq!(read(b"$4\r\ncool\r\n").await.unwrap(), b"$4\r\ncool\r\n");
    }

    #[tokio::test]
    async fn null_bulk_string() {
        assert_eq!(read(b"$-1\r\n").await.unwrap(), b"$-1\r\n");
    }

    #[tokio::test]
    async fn nested_arrays() {
        let given = b"*2\r\n*1\r\n-OK\r\n*1\r\n-OK\r\n";
        assert_eq!(read(given).await.unwrap(), given.to_vec());
    }

    #[tokio::test]
    async fn empty_input_is_connection_closed() {
        let err = read(b"").await.unwrap_err();
        assert!(matches!(err, IoClass::ConnectionClosed));
    }

    #[tokio::test]
    async fn single_element_array_with_no_payload_is_framing_error() {
        let err = read(b"*1\r\n").await.unwrap_err();
        assert!(matches!(err, IoClass::Framing(_)));
    }

    #[tokio::test]
    async fn truncated_bulk_string_payload_is_framing_error() {
        // Advertises 5 bytes but the stream ends 2 bytes and the CRLF short.
        let err = read(b"$5\r\nabc").await.unwrap_err();
        assert!(matches!(err, IoClass::Framing(_)));
    }

    #[test]
    fn parses_command_args() {
        let raw = encode_command(&[b"PROXY", b"localhost", b"9999", b""]);
        let args = parse_command_args(&raw).unwrap();
        assert_eq!(args, vec![b"PROXY".to_vec(), b"localhost".to_vec(), b"9999".to_vec(), Vec::new()]);
    }

    #[test]
    fn error_object_detection() {
        assert!(is_error_object(b"-ERR boom\r\n"));
        assert!(!is_error_object(b"+OK\r\n"));
    }
}
