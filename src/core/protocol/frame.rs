// src/core/protocol/frame.rs

//! Length-prefixed framing for the binary wire protocol.
//!
//! Every frame is a little-endian `u32` length prefix followed by that many
//! payload bytes. The decoder strips the prefix, the encoder prepends it.

use crate::core::OpaliteError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum payload size of a single frame. An oversize frame is a protocol
/// violation and terminates the channel.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

const LENGTH_PREFIX_LEN: usize = 4;

/// A `tokio_util::codec` implementation for the length-prefixed framing layer.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Bytes> for FrameCodec {
    type Error = OpaliteError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_LENGTH {
            return Err(OpaliteError::FrameTooLarge {
                max_frame_bytes: MAX_FRAME_LENGTH,
                got_bytes: item.len(),
            });
        }
        dst.reserve(LENGTH_PREFIX_LEN + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = OpaliteError;

    /// Returns `Ok(None)` until the buffer holds a complete frame, allowing
    /// the `Framed` stream to wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_LENGTH {
            return Err(OpaliteError::FrameTooLarge {
                max_frame_bytes: MAX_FRAME_LENGTH,
                got_bytes: length,
            });
        }

        if src.len() < LENGTH_PREFIX_LEN + length {
            // Reserve up front so the next read can complete the frame.
            src.reserve(LENGTH_PREFIX_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}
