//! Wire-level framing scenarios: fragmented delivery, oversize rejection,
//! and deadline behavior on a drained socket.

use sentinel_core::{ErrorCategory, FrameReader, FrameWriter, MAX_MESSAGE_SIZE};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn kilobyte_payload_survives_uneven_fragmentation() {
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let mut wire = Vec::new();
    FrameWriter::new().write_message(&mut wire, &payload).await.expect("framed");

    let (mut tx, mut rx) = tokio::io::duplex(2048);
    let chunk_sizes = [1usize, 3, 100, 400, 520, wire.len()];
    let writer = tokio::spawn(async move {
        let mut offset = 0;
        for size in chunk_sizes {
            let end = (offset + size).min(wire.len());
            if offset >= end {
                break;
            }
            tx.write_all(&wire[offset..end]).await.expect("fragment written");
            tx.flush().await.expect("fragment flushed");
            tokio::task::yield_now().await;
            offset = end;
        }
        tx
    });

    let mut reader = FrameReader::new();
    let read = reader.read_complete_message(&mut rx).await.expect("reassembled");
    assert_eq!(read, payload);

    // The socket is drained: another read waits and then times out.
    let mut reader = FrameReader::new().with_timeout(Duration::from_millis(100));
    let _tx = writer.await.expect("writer task panicked");
    let err = reader
        .read_complete_message(&mut rx)
        .await
        .expect_err("drained socket must time out");
    assert_eq!(err.category(), ErrorCategory::ReadTimeout);
}

#[tokio::test]
async fn oversize_is_refused_on_both_sides() {
    // Writer side: 10 MiB + 1 payload, nothing reaches the wire.
    let mut wire = Vec::new();
    let oversized = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
    let err = FrameWriter::new()
        .write_message(&mut wire, &oversized)
        .await
        .expect_err("writer must refuse");
    assert_eq!(err.category(), ErrorCategory::MessageTooLarge);
    assert!(wire.is_empty());

    // Reader side: a crafted header declaring 10 MiB + 1 is refused before
    // any payload byte is consumed.
    let crafted = [0x00u8, 0xA0, 0x00, 0x01];
    let mut socket = &crafted[..];
    let mut reader = FrameReader::new();
    let err = reader
        .read_complete_message(&mut socket)
        .await
        .expect_err("reader must refuse");
    assert_eq!(err.category(), ErrorCategory::MessageTooLarge);
}

#[tokio::test]
async fn max_size_payload_round_trips() {
    let payload = vec![0x5Au8; MAX_MESSAGE_SIZE as usize];
    let mut wire = Vec::new();
    FrameWriter::new().write_message(&mut wire, &payload).await.expect("framed");
    assert_eq!(wire.len(), 4 + payload.len());

    let mut socket = wire.as_slice();
    let mut reader = FrameReader::new();
    let read = reader.read_complete_message(&mut socket).await.expect("reassembled");
    assert_eq!(read.len(), payload.len());
    assert_eq!(read, payload);
}

#[tokio::test(start_paused = true)]
async fn silence_before_the_header_times_out_and_resets() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    let mut reader = FrameReader::new().with_timeout(Duration::from_millis(250));

    let err = reader
        .read_complete_message(&mut rx)
        .await
        .expect_err("no header bytes must time out");
    assert_eq!(err.category(), ErrorCategory::ReadTimeout);
    assert!(!reader.has_complete_message());

    // Reader is reusable: a full frame arriving later is delivered.
    let mut wire = Vec::new();
    FrameWriter::new().write_message(&mut wire, b"post-timeout").await.expect("framed");
    tx.write_all(&wire).await.expect("frame written");
    tx.flush().await.expect("frame flushed");

    let read = reader.read_complete_message(&mut rx).await.expect("late frame");
    assert_eq!(read, b"post-timeout");
}

#[tokio::test]
async fn interleaved_request_response_over_one_duplex_pair() {
    let (mut client_side, mut server_side) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut reader = FrameReader::new();
        let writer = FrameWriter::new();
        for _ in 0..3 {
            let request =
                reader.read_complete_message(&mut server_side).await.expect("request");
            let mut response = b"ack:".to_vec();
            response.extend_from_slice(&request);
            writer.write_message(&mut server_side, &response).await.expect("response");
        }
    });

    let mut reader = FrameReader::new();
    let writer = FrameWriter::new();
    for name in ["alpha", "beta", "gamma"] {
        writer
            .write_message(&mut client_side, name.as_bytes())
            .await
            .expect("request written");
        let response =
            reader.read_complete_message(&mut client_side).await.expect("response read");
        assert_eq!(response, format!("ack:{name}").into_bytes());
    }
    server.await.expect("server task panicked");
}
