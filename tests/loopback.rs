//! End-to-end protocol tests over an in-memory duplex pipe.
//!
//! Each test runs the session on one end and a scripted relay/pocket
//! computer on the other, asserting the exact bytes both directions.

use std::sync::Arc;
use std::time::Duration;

use sharplink::ascii;
use sharplink::protocol::frame::additive_checksum;
use sharplink::{BridgeError, MemorySink, Session, SessionConfig, WINDOW_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

fn fast_config() -> SessionConfig {
    SessionConfig {
        byte_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(500),
        ping_timeout: Duration::from_millis(200),
        sync_reply_timeout: Duration::from_millis(50),
        max_sync_attempts: 3,
        drain_poll: Duration::from_millis(10),
    }
}

fn session_pair() -> (Session<DuplexStream>, DuplexStream, Arc<MemorySink>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (host, peer) = tokio::io::duplex(1024);
    let sink = Arc::new(MemorySink::new());
    let session = Session::new(host, fast_config(), sink.clone());
    (session, peer, sink)
}

/// Answer one SYN with SYN.
async fn expect_sync(peer: &mut DuplexStream) {
    assert_eq!(peer.read_u8().await.unwrap(), ascii::SYN);
    peer.write_u8(ascii::SYN).await.unwrap();
}

async fn expect_bytes(peer: &mut DuplexStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, expected);
}

/// Send an escaped STX..ETX frame the way the relay does.
async fn write_frame(peer: &mut DuplexStream, payload: &[u8]) {
    peer.write_u8(ascii::STX).await.unwrap();
    for &byte in payload {
        if matches!(byte, ascii::DLE | ascii::NAK | ascii::CAN | ascii::ETX) {
            peer.write_u8(ascii::DLE).await.unwrap();
        }
        peer.write_u8(byte).await.unwrap();
    }
    peer.write_u8(ascii::ETX).await.unwrap();
}

/// Receive a disk response envelope plus its acknowledged windows.
async fn read_disk_response(peer: &mut DuplexStream) -> (u8, Vec<u8>) {
    assert_eq!(peer.read_u8().await.unwrap(), ascii::SOH);
    assert_eq!(peer.read_u8().await.unwrap(), 8);
    let flag = peer.read_u8().await.unwrap();
    let mut word = [0u8; 2];
    peer.read_exact(&mut word).await.unwrap();
    let length = u16::from_le_bytes(word) as usize;
    peer.write_u8(ascii::ACK).await.unwrap();

    let mut payload = vec![0u8; length];
    let mut offset = 0;
    while offset < length {
        let window = WINDOW_SIZE.min(length - offset);
        peer.read_exact(&mut payload[offset..offset + window])
            .await
            .unwrap();
        offset += window;
        peer.write_u8(ascii::ACK).await.unwrap();
    }
    (flag, payload)
}

/// Payload carrying a file name at bytes 3..15.
fn named_command(op: u8, name: &str, extra: &[u8]) -> Vec<u8> {
    let mut data = vec![op, 0, 0];
    data.extend_from_slice(format!("{name:<12}").as_bytes());
    data.extend_from_slice(extra);
    data
}

#[tokio::test]
async fn test_ping_round_trip() {
    let (mut session, mut peer, sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 2]).await;
        peer.write_u8(ascii::ACK).await.unwrap();
        peer
    });
    session.ping().await.unwrap();
    driver.await.unwrap();
    assert!(sink.contains("Success."));
}

#[tokio::test]
async fn test_ping_reports_peer_error() {
    let (mut session, mut peer, sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 2]).await;
        peer.write_all(&[ascii::NAK, 0x04]).await.unwrap();
        peer
    });
    let err = session.ping().await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Peer(sharplink::ErrorCode::Overflow)
    ));
    driver.await.unwrap();
    assert!(sink.contains("Failure"));
}

#[tokio::test]
async fn test_initialize_reads_banner() {
    let (mut session, mut peer, sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 1]).await;
        peer.write_all(&[ascii::SOH, 1, 1, 64]).await.unwrap();
        peer.write_u8(ascii::STX).await.unwrap();
        peer.write_all(b"Sharp relay ready\r").await.unwrap();
        peer.write_u8(ascii::ETX).await.unwrap();
        peer
    });
    session.initialize().await.unwrap();
    driver.await.unwrap();
    assert!(sink.contains("Sharp relay ready"));
}

#[tokio::test]
async fn test_initialize_rejects_version_mismatch() {
    let (mut session, mut peer, _sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 1]).await;
        peer.write_all(&[ascii::SOH, 2, 0, 64]).await.unwrap();
        peer
    });
    let err = session.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::VersionMismatch {
            actual_major: 2,
            actual_minor: 0,
            ..
        }
    ));
    driver.await.unwrap();
}

#[tokio::test]
async fn test_initialize_rejects_small_buffer() {
    let (mut session, mut peer, _sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 1]).await;
        peer.write_all(&[ascii::SOH, 1, 1, 8]).await.unwrap();
        peer
    });
    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, BridgeError::BufferTooSmall(8)));
    driver.await.unwrap();
}

#[tokio::test]
async fn test_send_tape_windows_and_nibble_swap() {
    let (mut session, mut peer, _sink) = session_pair();

    // 100-byte Basic image; no password, so only bytes 1..=7 are swapped.
    let image: Vec<u8> = std::iter::once(0x70)
        .chain((1..100u32).map(|i| i as u8))
        .collect();
    let expected_len = image.len();

    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 6]).await;
        let mut word = [0u8; 2];
        peer.read_exact(&mut word).await.unwrap();
        assert_eq!(u16::from_le_bytes(word) as usize, expected_len);
        assert_eq!(peer.read_u8().await.unwrap(), 10);
        peer.write_u8(ascii::ACK).await.unwrap();

        let mut received = Vec::new();
        let mut remaining = expected_len;
        while remaining > 0 {
            let window = WINDOW_SIZE.min(remaining);
            let mut buf = vec![0u8; window];
            peer.read_exact(&mut buf).await.unwrap();
            received.extend_from_slice(&buf);
            remaining -= window;
            peer.write_u8(ascii::ACK).await.unwrap();
        }
        received
    });

    session.send_tape_file(&image).await.unwrap();
    let received = driver.await.unwrap();

    assert_eq!(received.len(), image.len());
    assert_eq!(received[0], 0x70);
    for i in 1..=7 {
        assert_eq!(received[i], image[i].rotate_left(4));
    }
    assert_eq!(&received[8..], &image[8..]);
}

#[tokio::test]
async fn test_send_tape_exact_window_boundary() {
    let (mut session, mut peer, _sink) = session_pair();

    // Image exactly one window long: one window, one handshake, nothing
    // trailing.
    let image: Vec<u8> = std::iter::once(0x70)
        .chain((1..WINDOW_SIZE as u32).map(|i| i as u8))
        .collect();
    assert_eq!(image.len(), WINDOW_SIZE);

    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 6]).await;
        let mut word = [0u8; 2];
        peer.read_exact(&mut word).await.unwrap();
        assert_eq!(u16::from_le_bytes(word) as usize, WINDOW_SIZE);
        assert_eq!(peer.read_u8().await.unwrap(), 10);
        peer.write_u8(ascii::ACK).await.unwrap();

        let mut buf = [0u8; WINDOW_SIZE];
        peer.read_exact(&mut buf).await.unwrap();
        peer.write_u8(ascii::ACK).await.unwrap();
        // No empty trailing window follows; the line goes straight to EOF
        // once the host hangs up.
        assert!(peer.read_u8().await.is_err());
        buf[0]
    });

    session.send_tape_file(&image).await.unwrap();
    drop(session);
    assert_eq!(driver.await.unwrap(), 0x70);
}

#[tokio::test]
async fn test_sync_gives_up_after_exact_attempts() {
    let (mut session, mut peer, _sink) = session_pair();
    let driver = tokio::spawn(async move {
        let mut syn_count = 0;
        let mut buf = [0u8; 1];
        while peer.read_exact(&mut buf).await.is_ok() {
            assert_eq!(buf[0], ascii::SYN);
            syn_count += 1;
        }
        syn_count
    });

    let image = vec![0x70u8; 32];
    let err = session.send_tape_file(&image).await.unwrap_err();
    assert!(matches!(err, BridgeError::SyncFailed));
    drop(session);
    assert_eq!(driver.await.unwrap(), 3);
}

#[tokio::test]
async fn test_read_tape_file() {
    let (mut session, mut peer, _sink) = session_pair();
    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 7]).await;
        peer.write_u8(ascii::ACK).await.unwrap();
        write_frame(&mut peer, &[0x41, ascii::ETX, 0x42]).await;
        peer
    });
    let frame = session.read_tape_file().await.unwrap();
    assert_eq!(&frame[..], &[0x41, ascii::ETX, 0x42]);
    driver.await.unwrap();
}

#[tokio::test]
async fn test_read_tape_cancel() {
    let (mut session, mut peer, _sink) = session_pair();
    let handle = session.cancel_handle();

    let driver = tokio::spawn(async move {
        expect_sync(&mut peer).await;
        expect_bytes(&mut peer, &[ascii::SOH, 7]).await;
        peer.write_u8(ascii::ACK).await.unwrap();
        // The pocket computer never starts CSAVE; the host cancels and we
        // observe the CAN byte.
        assert_eq!(peer.read_u8().await.unwrap(), ascii::CAN);
        peer
    });

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(handle.can_cancel());
            handle.cancel();
        })
    };

    let err = session.read_tape_file().await.unwrap_err();
    assert!(matches!(err, BridgeError::Cancelled));
    assert!(!handle.can_cancel());
    driver.await.unwrap();
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_idle_syn_is_echoed() {
    let (mut session, mut peer, _sink) = session_pair();
    peer.write_u8(ascii::SYN).await.unwrap();
    assert!(session.poll_incoming().await.unwrap());
    assert_eq!(peer.read_u8().await.unwrap(), ascii::SYN);
}

#[tokio::test]
async fn test_idle_garbage_gets_nak() {
    let (mut session, mut peer, _sink) = session_pair();
    peer.write_u8(0x7F).await.unwrap();
    assert!(session.poll_incoming().await.unwrap());
    expect_bytes(&mut peer, &[ascii::NAK, 0x03]).await;
}

#[tokio::test]
async fn test_eof_disconnects() {
    let (mut session, peer, sink) = session_pair();
    drop(peer);
    assert!(!session.poll_incoming().await.unwrap());
    assert_eq!(
        session.state(),
        sharplink::ConnectionState::Disconnected
    );
    assert!(sink.contains("Disconnected."));
}

#[tokio::test]
async fn test_inbound_ping_gets_ack() {
    let (mut session, mut peer, _sink) = session_pair();
    peer.write_all(&[ascii::SOH, 2]).await.unwrap();
    assert!(session.poll_incoming().await.unwrap());
    assert_eq!(peer.read_u8().await.unwrap(), ascii::ACK);
}

#[tokio::test]
async fn test_inbound_print_characters() {
    let (mut session, mut peer, sink) = session_pair();
    for &byte in b"HI" {
        peer.write_all(&[ascii::SOH, 4, byte]).await.unwrap();
        session.poll_incoming().await.unwrap();
    }
    peer.write_all(&[ascii::SOH, 4, ascii::CR]).await.unwrap();
    session.poll_incoming().await.unwrap();
    assert_eq!(sink.lines(), vec!["HI".to_string()]);
}

#[tokio::test]
async fn test_inbound_print_skips_unprintable() {
    let (mut session, mut peer, sink) = session_pair();
    for &byte in &[b'A', 0x80, b'B'] {
        peer.write_all(&[ascii::SOH, 4, byte]).await.unwrap();
        session.poll_incoming().await.unwrap();
    }
    peer.write_all(&[ascii::SOH, 4, ascii::CR]).await.unwrap();
    session.poll_incoming().await.unwrap();
    assert_eq!(sink.lines(), vec!["AB".to_string()]);
}

#[tokio::test]
async fn test_inbound_disk_files_listing() {
    let (mut session, mut peer, _sink) = session_pair();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PROG.BAS"), b"x").unwrap();
    session
        .disk_mut()
        .set_directory(Some(dir.path().to_path_buf()));

    let driver = tokio::spawn(async move {
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &[0x05]).await;
        let (flag, payload) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0x00);
        // Sealed frame: zero prefix, file count, checksum.
        assert_eq!(payload, vec![0x00, 0x01, 0x01]);
        peer
    });
    session.poll_incoming().await.unwrap();
    driver.await.unwrap();
}

#[tokio::test]
async fn test_oversized_disk_response_is_rejected() {
    let (mut session, mut peer, _sink) = session_pair();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("BIG.BIN"), vec![0u8; 70_000]).unwrap();
    session
        .disk_mut()
        .set_directory(Some(dir.path().to_path_buf()));

    let driver = tokio::spawn(async move {
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &named_command(0x0E, "BIG.BIN", &[])).await;
        let (flag, _) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0x00);

        // LOAD-binary of the whole file would not fit the length word.
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &[0x0F]).await;
        peer
    });

    session.poll_incoming().await.unwrap();
    let err = session.poll_incoming().await.unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)));
    driver.await.unwrap();
}

#[tokio::test]
async fn test_inbound_save_text_continuation_chain() {
    let (mut session, mut peer, _sink) = session_pair();
    let dir = tempfile::tempdir().unwrap();
    session
        .disk_mut()
        .set_directory(Some(dir.path().to_path_buf()));

    // Leg 1: SAVE-open creates the file; no continuation.
    let driver = tokio::spawn(async move {
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &named_command(0x10, "OUT.TXT", &[])).await;
        let (flag, payload) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0x00);
        assert_eq!(payload, vec![0x00]);

        // Leg 2: SAVE-text arms the capture; the session keeps the
        // exchange open across the text lines until the SUB sentinel.
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &[0x16]).await;
        let (flag, _) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0xFF);

        let line = b"10 PRINT\r\n";
        let mut leg = line.to_vec();
        leg.push(additive_checksum(line));
        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &leg).await;
        let (flag, _) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0xFF);

        peer.write_u8(ascii::SOH).await.unwrap();
        peer.write_u8(8).await.unwrap();
        write_frame(&mut peer, &[ascii::SUB]).await;
        let (flag, payload) = read_disk_response(&mut peer).await;
        assert_eq!(flag, 0x00);
        assert_eq!(payload, vec![0x00]);
        peer
    });

    // Leg 1 completes in one poll; the save-text chain is a single
    // exchange spanning three frames.
    session.poll_incoming().await.unwrap();
    session.poll_incoming().await.unwrap();
    driver.await.unwrap();

    let written = std::fs::read(dir.path().join("OUT.TXT")).unwrap();
    assert_eq!(written, b"10 PRINT\r\n");
}
