// tests/unit_package_codec_test.rs

use bytes::{Bytes, BytesMut};
use opalite::core::OpaliteError;
use opalite::core::protocol::{Credentials, FLAG_AUTHENTICATED, Package, PackageCodec, TcpCommand};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

fn roundtrip(package: Package) -> Package {
    let mut codec = PackageCodec::default();
    let mut buf = BytesMut::new();
    codec.encode(package, &mut buf).unwrap();
    codec.decode(&mut buf).unwrap().unwrap()
}

#[test]
fn test_package_roundtrip_without_credentials() {
    let correlation_id = Uuid::new_v4();
    let package = Package::with_payload(
        TcpCommand::WriteEvents,
        correlation_id,
        Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
    );

    let decoded = roundtrip(package.clone());
    assert_eq!(decoded, package);
    assert_eq!(decoded.command, TcpCommand::WriteEvents);
    assert_eq!(decoded.correlation_id, correlation_id);
    assert!(decoded.credentials.is_none());
}

#[test]
fn test_package_roundtrip_with_credentials() {
    let package = Package::authenticated(
        TcpCommand::ReadEvent,
        Uuid::new_v4(),
        Credentials::new("admin", "changeit"),
        Bytes::from_static(b"body"),
    );

    let decoded = roundtrip(package.clone());
    assert_eq!(decoded, package);
    let credentials = decoded.credentials.unwrap();
    assert_eq!(credentials.login, "admin");
    assert_eq!(credentials.password, "changeit");
}

#[test]
fn test_auth_flag_is_set_only_with_credentials() {
    let plain = Package::new(TcpCommand::Ping, Uuid::new_v4()).encode().unwrap();
    assert_eq!(plain[1], 0);

    let authenticated = Package::authenticated(
        TcpCommand::Ping,
        Uuid::new_v4(),
        Credentials::new("u", "p"),
        Bytes::new(),
    )
    .encode()
    .unwrap();
    assert_eq!(authenticated[1], FLAG_AUTHENTICATED);
}

#[test]
fn test_heartbeat_response_echoes_correlation_id() {
    let correlation_id = Uuid::new_v4();
    let response = Package::heartbeat_response(correlation_id);
    assert_eq!(response.command, TcpCommand::HeartbeatResponse);
    assert_eq!(response.correlation_id, correlation_id);
    assert!(response.payload.is_empty());
}

#[test]
fn test_truncated_header_is_rejected() {
    let err = Package::decode(Bytes::from_static(&[0x82, 0x00])).unwrap_err();
    assert!(matches!(err, OpaliteError::ProtocolViolation(_)));
}

#[test]
fn test_truncated_credentials_are_rejected() {
    let package = Package::authenticated(
        TcpCommand::Ping,
        Uuid::new_v4(),
        Credentials::new("login", "password"),
        Bytes::new(),
    );
    let encoded = package.encode().unwrap();

    // Chop the body inside the credentials block.
    let truncated = encoded.slice(..encoded.len() - 4);
    let err = Package::decode(truncated).unwrap_err();
    assert!(matches!(err, OpaliteError::ProtocolViolation(_)));
}

#[test]
fn test_unknown_command_byte_is_rejected() {
    let mut body = BytesMut::new();
    body.extend_from_slice(&[0x7F, 0x00]);
    body.extend_from_slice(Uuid::new_v4().as_bytes());

    let err = Package::decode(body.freeze()).unwrap_err();
    assert!(matches!(err, OpaliteError::UnknownCommand(0x7F)));
}

#[test]
fn test_overlong_login_is_rejected_on_encode() {
    let package = Package::authenticated(
        TcpCommand::Ping,
        Uuid::new_v4(),
        Credentials::new("x".repeat(300), "p"),
        Bytes::new(),
    );
    assert!(matches!(
        package.encode().unwrap_err(),
        OpaliteError::InvalidArgument(_)
    ));
}
