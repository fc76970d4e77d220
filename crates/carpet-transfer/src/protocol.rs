//! Flying Carpet wire format.
//!
//! Every integer is a big-endian i64. Messages carry no type tag; what comes
//! next is known from the phase of the session:
//!
//! ```text
//! count                         once per session
//! name_len | name | size        once per file (size is plaintext bytes)
//! chunk_len | sealed chunk      repeated, chunk_len > 0
//! 0                             end of file sentinel
//! 1                             receiver -> sender ack after the file is flushed
//! ```

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;

/// Plaintext bytes per chunk. The last chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 1_000_000;

/// Chunk length value that ends a file's chunk stream.
pub const END_OF_FILE: i64 = 0;

/// Value the receiver writes once a file is on disk.
pub const ACK: i64 = 1;

/// Longest filename accepted from a peer.
pub const MAX_FILENAME_LEN: usize = 4096;

/// Largest sealed chunk accepted from a peer (16 MB leaves room for peers with
/// other chunk sizes).
pub const MAX_CHUNK_LEN: usize = 16 * 1024 * 1024;

/// Number of chunks a file of `size` bytes is split into.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

/// Size of chunk `index` (0-based) of a file of `size` bytes.
pub fn chunk_len_at(size: u64, index: u64) -> usize {
    let start = index * CHUNK_SIZE as u64;
    size.saturating_sub(start).min(CHUNK_SIZE as u64) as usize
}

// ── Manifest ──

pub async fn write_count<W>(writer: &mut W, count: usize) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_i64(count as i64)
        .await
        .map_err(|e| TransferError::io("error transmitting number of files", e))?;
    writer
        .flush()
        .await
        .map_err(|e| TransferError::io("error transmitting number of files", e))
}

pub async fn read_count<R>(reader: &mut R) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
{
    let count = reader
        .read_i64()
        .await
        .map_err(|e| TransferError::io("error receiving number of files", e))?;
    u64::try_from(count)
        .map_err(|_| TransferError::Protocol(format!("peer announced {} files", count)))
}

/// Per-file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Base name or `/`-separated relative path chosen by the sender.
    pub name: String,
    /// Plaintext size in bytes.
    pub size: u64,
}

impl FileHeader {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16 + self.name.len());
        buf.put_i64(self.name.len() as i64);
        buf.put_slice(self.name.as_bytes());
        buf.put_i64(self.size as i64);
        buf
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.encode())
            .await
            .map_err(|e| TransferError::io("error sending file details", e))
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let name_len = reader
            .read_i64()
            .await
            .map_err(|e| TransferError::io("error receiving filename length", e))?;
        if name_len <= 0 || name_len as u64 > MAX_FILENAME_LEN as u64 {
            return Err(TransferError::Protocol(format!(
                "filename length {} out of range",
                name_len
            )));
        }

        let mut name = vec![0u8; name_len as usize];
        reader
            .read_exact(&mut name)
            .await
            .map_err(|e| TransferError::io("error receiving filename", e))?;
        let name = String::from_utf8(name)
            .map_err(|_| TransferError::Protocol("filename is not valid UTF-8".into()))?;

        let size = reader
            .read_i64()
            .await
            .map_err(|e| TransferError::io("error receiving file size", e))?;
        let size = u64::try_from(size)
            .map_err(|_| TransferError::Protocol(format!("negative file size {}", size)))?;

        Ok(FileHeader { name, size })
    }
}

// ── Chunk stream ──

/// Write one sealed chunk with its length prefix.
pub async fn write_chunk<W>(writer: &mut W, sealed: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i64(sealed.len() as i64).await?;
    writer.write_all(sealed).await
}

pub async fn write_end_of_file<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i64(END_OF_FILE).await?;
    writer.flush().await
}

/// Validate a chunk length read off the wire. `None` is the end of file.
pub fn parse_chunk_len(raw: i64) -> Result<Option<usize>, TransferError> {
    match raw {
        END_OF_FILE => Ok(None),
        n if n < 0 => Err(TransferError::Protocol(format!("negative chunk length {}", n))),
        n if n as u64 > MAX_CHUNK_LEN as u64 => Err(TransferError::Protocol(format!(
            "chunk length {} exceeds {}",
            n, MAX_CHUNK_LEN
        ))),
        n => Ok(Some(n as usize)),
    }
}

pub async fn write_ack<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i64(ACK).await?;
    writer.flush().await
}

pub async fn read_ack<R>(reader: &mut R) -> io::Result<i64>
where
    R: AsyncRead + Unpin,
{
    reader.read_i64().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let hdr = FileHeader {
            name: "a/b.txt".into(),
            size: 0x0102,
        };
        let bytes = hdr.encode();
        assert_eq!(&bytes[0..8], &7i64.to_be_bytes());
        assert_eq!(&bytes[8..15], b"a/b.txt");
        assert_eq!(&bytes[15..23], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(bytes.len(), 23);
    }

    #[tokio::test]
    async fn header_roundtrip() {
        let hdr = FileHeader {
            name: "photos/ünïcode.jpg".into(),
            size: 3_000_001,
        };
        let bytes = hdr.encode();
        let parsed = FileHeader::read_from(&mut &bytes[..]).await.unwrap();
        assert_eq!(parsed, hdr);
    }

    #[tokio::test]
    async fn reject_bad_filename_length() {
        for len in [0i64, -1, MAX_FILENAME_LEN as i64 + 1] {
            let buf = len.to_be_bytes();
            let err = FileHeader::read_from(&mut &buf[..]).await.unwrap_err();
            assert!(matches!(err, TransferError::Protocol(_)), "len {}", len);
        }
    }

    #[tokio::test]
    async fn reject_non_utf8_filename() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2i64.to_be_bytes());
        buf.extend_from_slice(&[0xFF, 0xFE]);
        buf.extend_from_slice(&10i64.to_be_bytes());
        let err = FileHeader::read_from(&mut &buf[..]).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn truncated_header_is_io_error() {
        let buf = 5i64.to_be_bytes();
        let err = FileHeader::read_from(&mut &buf[..]).await.unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
    }

    #[tokio::test]
    async fn count_roundtrip_and_negative() {
        let mut out = Vec::new();
        write_count(&mut out, 3).await.unwrap();
        assert_eq!(out, 3i64.to_be_bytes());
        assert_eq!(read_count(&mut &out[..]).await.unwrap(), 3);

        let neg = (-2i64).to_be_bytes();
        assert!(matches!(
            read_count(&mut &neg[..]).await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn chunk_stream_layout() {
        let mut out = Vec::new();
        write_chunk(&mut out, &[9, 9, 9]).await.unwrap();
        write_end_of_file(&mut out).await.unwrap();
        let mut expected = 3i64.to_be_bytes().to_vec();
        expected.extend_from_slice(&[9, 9, 9]);
        expected.extend_from_slice(&0i64.to_be_bytes());
        assert_eq!(out, expected);
    }

    #[test]
    fn chunk_len_validation() {
        assert_eq!(parse_chunk_len(0).unwrap(), None);
        assert_eq!(parse_chunk_len(40).unwrap(), Some(40));
        assert!(parse_chunk_len(-1).is_err());
        assert!(parse_chunk_len(MAX_CHUNK_LEN as i64 + 1).is_err());
    }

    #[test]
    fn chunking_is_size_exact() {
        let c = CHUNK_SIZE as u64;
        for (size, chunks, last) in [
            (0, 0, 0),
            (1, 1, 1),
            (c - 1, 1, CHUNK_SIZE - 1),
            (c, 1, CHUNK_SIZE),
            (c + 1, 2, 1),
            (3 * c, 3, CHUNK_SIZE),
            (3 * c + 17, 4, 17),
        ] {
            assert_eq!(chunk_count(size), chunks, "size {}", size);
            if chunks > 0 {
                assert_eq!(chunk_len_at(size, chunks - 1), last, "size {}", size);
                assert_eq!(chunk_len_at(size, chunks), 0);
            }
        }
    }
}
