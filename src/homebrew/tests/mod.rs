//! End-to-end protocol scenarios over real localhost UDP sockets.

mod keepalive;

use super::*;
use crate::dmr::{CallType, DataType, Packet, PAYLOAD_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

fn test_config(id: u32) -> RepeaterConfiguration {
    RepeaterConfiguration {
        id,
        callsign: "N0CALL".to_string(),
        rx_freq: 438_200_000,
        tx_freq: 430_600_000,
        tx_power: 25,
        color_code: 1,
        latitude: 51.5,
        longitude: 5.125,
        height: 30,
        location: "Test site".to_string(),
        description: "test".to_string(),
        slots: 2,
        url: String::new(),
        software_id: String::new(),
        package_id: String::new(),
    }
}

async fn bind_endpoint(id: u32) -> Arc<Endpoint> {
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid addr");
    Arc::new(
        Endpoint::new(test_config(id), addr)
            .await
            .expect("bind endpoint"),
    )
}

fn spawn_serve(endpoint: &Arc<Endpoint>) -> JoinHandle<Result<(), ProtocolError>> {
    let endpoint = Arc::clone(endpoint);
    tokio::spawn(endpoint.listen_and_serve())
}

async fn bind_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.expect("bind socket")
}

/// Receive one frame, failing the test if nothing arrives in time.
async fn recv_frame(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; wire::MAX_FRAME_SIZE];
    let (n, from) = timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a frame")
        .expect("recv failed");
    (buf[..n].to_vec(), from)
}

/// Assert that no frame arrives within a short window.
async fn assert_no_frame(socket: &UdpSocket) {
    let mut buf = [0u8; wire::MAX_FRAME_SIZE];
    if let Ok(received) = timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await {
        let (n, from) = received.expect("recv failed");
        panic!("unexpected {}-byte frame from {}: {:?}", n, from, &buf[..n]);
    }
}

fn group_packet(src_id: u32, dst_id: u32, repeater_id: u32) -> Packet {
    let mut payload = [0u8; PAYLOAD_SIZE];
    for (i, b) in payload.iter_mut().enumerate() {
        *b = i as u8;
    }
    Packet {
        sequence: 1,
        src_id,
        dst_id,
        repeater_id,
        timeslot: 0,
        call_type: CallType::Group,
        stream_id: 0x0bad_cafe,
        data_type: DataType::VoiceBurstA,
        ber: 0,
        rssi: 0,
        data: payload,
    }
}
