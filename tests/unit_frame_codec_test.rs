// tests/unit_frame_codec_test.rs

use bytes::{BufMut, Bytes, BytesMut};
use opalite::core::OpaliteError;
use opalite::core::protocol::{FrameCodec, MAX_FRAME_LENGTH};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_frame_roundtrip() {
    let payload = Bytes::from_static(b"hello frames");
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();

    codec.encode(payload.clone(), &mut buf).unwrap();
    assert_eq!(&buf[..4], &(payload.len() as u32).to_le_bytes()[..]);

    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, payload);
    assert!(buf.is_empty());
}

#[test]
fn test_decode_waits_for_complete_frame() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();

    // Length prefix only, no body yet.
    buf.put_u32_le(8);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"1234");
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"5678");
    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, Bytes::from_static(b"12345678"));
}

#[test]
fn test_decode_waits_for_length_prefix() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x01, 0x02]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_oversize_frame_is_rejected_without_buffering() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    buf.put_u32_le((MAX_FRAME_LENGTH + 1) as u32);

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        OpaliteError::FrameTooLarge { got_bytes, .. } if got_bytes == MAX_FRAME_LENGTH + 1
    ));
}

#[test]
fn test_consecutive_frames_decode_independently() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
    codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

    assert_eq!(
        codec.decode(&mut buf).unwrap().unwrap(),
        Bytes::from_static(b"first")
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap().unwrap(),
        Bytes::from_static(b"second")
    );
    assert!(codec.decode(&mut buf).unwrap().is_none());
}
