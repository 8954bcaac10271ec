pub mod compress;
pub mod packet;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub use packet::{
    Packet, MAX_BODY_SIZE, MODULE_ID_ROOM, MODULE_ID_SYSTEM, SYSTEM_SEQ_HANDSHAKE,
    SYSTEM_SEQ_HEARTBEAT,
};

use crate::buffer::framed_reader::FramedReader;
use crate::error::{GateError, Result};

pub const LEN_PREFIX_SIZE: usize = 4;

/// Reads one length-prefixed frame body from `reader`. Enforces `0 < len <= MAX_BODY_SIZE`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut FramedReader<R>) -> Result<Vec<u8>> {
    let len_bytes = reader.read_full(LEN_PREFIX_SIZE).await?;
    let len = BigEndian::read_u32(len_bytes) as i32;

    if len <= 0 || len > MAX_BODY_SIZE {
        return Err(GateError::PacketTooLarge(len));
    }

    Ok(reader.read_full(len as usize).await?.to_vec())
}

/// Writes a single length-prefixed frame to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let mut header = [0u8; LEN_PREFIX_SIZE];
    BigEndian::write_u32(&mut header, body.len() as u32);
    writer.write_all(&header).await?;
    writer.write_all(body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::slab::SlabPool;
    use std::io::Cursor;
    use std::sync::Arc;

    #[tokio::test]
    async fn reads_a_framed_body() {
        let pool = Arc::new(SlabPool::new(64, 65536, 4).unwrap());
        let body = vec![9u8; 10];
        let mut wire = Vec::new();
        write_frame(&mut wire, &body).await.unwrap();

        let mut reader = FramedReader::new(Cursor::new(wire), pool, 32);
        let out = read_frame(&mut reader).await.unwrap();
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let pool = Arc::new(SlabPool::new(64, 65536, 4).unwrap());
        let mut wire = vec![0u8; 4];
        BigEndian::write_u32(&mut wire, 20000);
        let mut reader = FramedReader::new(Cursor::new(wire), pool, 32);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, GateError::PacketTooLarge(20000)));
    }

    #[tokio::test]
    async fn rejects_zero_length_frame() {
        let pool = Arc::new(SlabPool::new(64, 65536, 4).unwrap());
        let wire = vec![0u8; 4];
        let mut reader = FramedReader::new(Cursor::new(wire), pool, 32);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, GateError::PacketTooLarge(0)));
    }
}
