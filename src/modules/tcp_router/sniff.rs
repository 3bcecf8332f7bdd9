//! Non-destructive TLS ClientHello detection.
//!
//! The router must look at the first bytes of an accepted connection to
//! decide whether it speaks TLS (and if so, which server name it asks
//! for) without consuming anything: every byte read here is handed back
//! in [`SniffResult::peeked`] so the caller can replay it to the
//! eventual handler.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const TLS_RECORD_HEADER_LEN: usize = 5;
const RECORD_TYPE_HANDSHAKE: u8 = 0x16;
// SSLv2 clients set the high bit of the first length byte.
const RECORD_TYPE_SSLV2: u8 = 0x80;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SNI_NAME_TYPE_HOST: u8 = 0x00;

/// Outcome of peeking at the start of a connection.
#[derive(Debug)]
pub struct SniffResult {
    /// Server name from the SNI extension, when one was presented.
    pub server_name: Option<String>,

    /// Whether the prefix looks like a TLS (or legacy SSLv2) handshake.
    pub is_tls: bool,

    /// Every byte consumed from the stream, in order, for replay.
    pub peeked: Bytes,
}

/// Read the minimum prefix of `stream` needed to classify it.
///
/// Classification degrades gracefully: a truncated record header falls
/// back to "not TLS", a truncated record body to "TLS without SNI", and
/// in both cases the bytes read so far are still returned for replay.
///
/// # Errors
///
/// Only failure to read the very first byte is an error; it means the
/// peer hung up before sending anything and the connection should be
/// dropped.
pub async fn sniff_client_hello<S>(stream: &mut S) -> io::Result<SniffResult>
where
    S: AsyncRead + Unpin,
{
    let mut peeked = BytesMut::with_capacity(TLS_RECORD_HEADER_LEN);
    fill_to(stream, &mut peeked, 1).await?;

    match peeked[0] {
        RECORD_TYPE_SSLV2 => Ok(SniffResult {
            server_name: None,
            is_tls: true,
            peeked: peeked.freeze(),
        }),
        RECORD_TYPE_HANDSHAKE => sniff_handshake(stream, peeked).await,
        _ => Ok(SniffResult {
            server_name: None,
            is_tls: false,
            peeked: peeked.freeze(),
        }),
    }
}

async fn sniff_handshake<S>(stream: &mut S, mut peeked: BytesMut) -> io::Result<SniffResult>
where
    S: AsyncRead + Unpin,
{
    if fill_to(stream, &mut peeked, TLS_RECORD_HEADER_LEN).await.is_err() {
        // Too short to be a real handshake record.
        return Ok(SniffResult {
            server_name: None,
            is_tls: false,
            peeked: peeked.freeze(),
        });
    }

    let record_len = usize::from(u16::from_be_bytes([peeked[3], peeked[4]]));
    if fill_to(stream, &mut peeked, TLS_RECORD_HEADER_LEN + record_len)
        .await
        .is_err()
    {
        return Ok(SniffResult {
            server_name: None,
            is_tls: true,
            peeked: peeked.freeze(),
        });
    }

    let server_name = parse_client_hello(&peeked[TLS_RECORD_HEADER_LEN..]);
    Ok(SniffResult {
        server_name,
        is_tls: true,
        peeked: peeked.freeze(),
    })
}

/// Read from `stream` until `buf` holds `target` bytes, never more.
async fn fill_to<S>(stream: &mut S, buf: &mut BytesMut, target: usize) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < target {
        let remaining = target - buf.len();
        let mut limited = (&mut *buf).limit(remaining);
        let n = stream.read_buf(&mut limited).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake peek",
            ));
        }
    }
    Ok(())
}

/// Walk a ClientHello handshake message and pull out the SNI host name.
fn parse_client_hello(payload: &[u8]) -> Option<String> {
    let mut cur = ByteReader::new(payload);

    if cur.read_u8()? != HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    cur.skip(3)?; // handshake length
    cur.skip(2)?; // client version
    cur.skip(32)?; // random

    let session_id_len = usize::from(cur.read_u8()?);
    cur.skip(session_id_len)?;

    let cipher_suites_len = usize::from(cur.read_u16()?);
    cur.skip(cipher_suites_len)?;

    let compression_len = usize::from(cur.read_u8()?);
    cur.skip(compression_len)?;

    let extensions_len = usize::from(cur.read_u16()?);
    let mut extensions = ByteReader::new(cur.read_slice(extensions_len)?);

    while !extensions.is_empty() {
        let ext_type = extensions.read_u16()?;
        let ext_len = usize::from(extensions.read_u16()?);
        let ext_data = extensions.read_slice(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name_extension(ext_data);
        }
    }

    None
}

fn parse_server_name_extension(data: &[u8]) -> Option<String> {
    let mut cur = ByteReader::new(data);
    let list_len = usize::from(cur.read_u16()?);
    let mut list = ByteReader::new(cur.read_slice(list_len)?);

    while !list.is_empty() {
        let name_type = list.read_u8()?;
        let name_len = usize::from(list.read_u16()?);
        let name = list.read_slice(name_len)?;

        if name_type == SNI_NAME_TYPE_HOST {
            return String::from_utf8(name.to_vec()).ok();
        }
    }

    None
}

struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn read_slice(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() < n {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.read_slice(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.read_slice(1).map(|s| s[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.read_slice(2).map(|s| u16::from_be_bytes([s[0], s[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-encode a ClientHello record, optionally with an SNI
    /// extension.
    pub(crate) fn client_hello(server_name: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();
        if let Some(name) = server_name {
            let name = name.as_bytes();
            let mut ext_data = Vec::new();
            ext_data.extend_from_slice(&u16::to_be_bytes(name.len() as u16 + 3)); // list length
            ext_data.push(SNI_NAME_TYPE_HOST);
            ext_data.extend_from_slice(&u16::to_be_bytes(name.len() as u16));
            ext_data.extend_from_slice(name);

            extensions.extend_from_slice(&u16::to_be_bytes(EXTENSION_SERVER_NAME));
            extensions.extend_from_slice(&u16::to_be_bytes(ext_data.len() as u16));
            extensions.extend_from_slice(&ext_data);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // cipher suites
        body.extend_from_slice(&[0x01, 0x00]); // compression methods
        body.extend_from_slice(&u16::to_be_bytes(extensions.len() as u16));
        body.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO];
        let len = body.len() as u32;
        handshake.extend_from_slice(&len.to_be_bytes()[1..]); // 24-bit length
        handshake.extend_from_slice(&body);

        let mut record = vec![RECORD_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&u16::to_be_bytes(handshake.len() as u16));
        record.extend_from_slice(&handshake);
        record
    }

    #[tokio::test]
    async fn test_plain_prefix_reads_one_byte() {
        let mut input: &[u8] = b"GET / HTTP/1.1\r\n";
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(!result.is_tls);
        assert_eq!(result.server_name, None);
        assert_eq!(&result.peeked[..], b"G");
        assert_eq!(input, b"ET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn test_empty_stream_is_an_error() {
        let mut input: &[u8] = b"";
        assert!(sniff_client_hello(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_sslv2_counts_as_tls() {
        let mut input: &[u8] = &[0x80, 0x2e, 0x01];
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(result.is_tls);
        assert_eq!(result.server_name, None);
        assert_eq!(&result.peeked[..], &[0x80]);
    }

    #[tokio::test]
    async fn test_client_hello_with_sni() {
        let message = client_hello(Some("example.com"));
        let mut input: &[u8] = &message;
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(result.is_tls);
        assert_eq!(result.server_name.as_deref(), Some("example.com"));
        assert_eq!(&result.peeked[..], &message[..]);
    }

    #[tokio::test]
    async fn test_client_hello_without_sni() {
        let message = client_hello(None);
        let mut input: &[u8] = &message;
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(result.is_tls);
        assert_eq!(result.server_name, None);
        assert_eq!(&result.peeked[..], &message[..]);
    }

    #[tokio::test]
    async fn test_truncated_header_falls_back_to_plain() {
        let mut input: &[u8] = &[RECORD_TYPE_HANDSHAKE, 0x03];
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(!result.is_tls);
        assert_eq!(&result.peeked[..], &[RECORD_TYPE_HANDSHAKE, 0x03]);
    }

    #[tokio::test]
    async fn test_truncated_body_stays_tls_without_sni() {
        let mut message = client_hello(Some("example.com"));
        message.truncate(20);
        let mut input: &[u8] = &message;
        let result = sniff_client_hello(&mut input).await.unwrap();
        assert!(result.is_tls);
        assert_eq!(result.server_name, None);
        assert_eq!(&result.peeked[..], &message[..]);
    }

    #[tokio::test]
    async fn test_peek_plus_remainder_reconstructs_stream() {
        let mut message = client_hello(Some("example.com"));
        message.extend_from_slice(b"application data after the hello");
        let original = message.clone();

        let mut input: &[u8] = &message;
        let result = sniff_client_hello(&mut input).await.unwrap();

        let mut reconstructed = result.peeked.to_vec();
        reconstructed.extend_from_slice(input);
        assert_eq!(reconstructed, original);
    }
}
