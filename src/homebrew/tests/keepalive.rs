//! Keepalive sweep scenarios, driven tick by tick.
//!
//! Timeouts are provoked by clearing the relevant timestamp (an unset stamp
//! counts as infinitely old) rather than by sleeping through real windows,
//! so each test calls `keepalive_tick` directly with a fresh `now`.

use super::*;
use tokio::time::Instant;

/// Link an outgoing peer and drain the RPTL that `link` sends.
async fn link_outgoing(endpoint: &Arc<Endpoint>, master: &UdpSocket, id: u32) -> SocketAddr {
    let addr = master.local_addr().expect("bound");
    let peer = Peer::outgoing(id, addr, b"s3cr3t".to_vec());
    endpoint.link(peer).await.expect("link");
    let (login, _) = recv_frame(master).await;
    assert!(login.starts_with(wire::REPEATER_LOGIN));
    addr
}

#[tokio::test]
async fn done_peer_pings_once_per_interval() {
    let master = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;
    let addr = link_outgoing(&endpoint, &master, 100).await;

    endpoint.registry.with_peer_mut(&addr, |p| {
        p.status = AuthStatus::Done;
        p.last.pong_received = Some(Instant::now());
        p.last.ping_sent = None; // due for a ping
    });

    endpoint.keepalive_tick(Instant::now()).await;
    let (ping, _) = recv_frame(&master).await;
    assert_eq!(ping.len(), wire::PING_FRAME_SIZE);
    assert!(ping.starts_with(wire::REPEATER_PING));
    assert_eq!(&ping[7..11], &2042u32.to_be_bytes());

    // The stamp was refreshed: the next sweep inside the interval is quiet.
    endpoint.keepalive_tick(Instant::now()).await;
    assert_no_frame(&master).await;
}

#[tokio::test]
async fn ping_timeout_closes_and_reauthenticates() {
    let master = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;
    let addr = link_outgoing(&endpoint, &master, 100).await;

    endpoint.registry.with_peer_mut(&addr, |p| {
        p.status = AuthStatus::Done;
        p.last.pong_received = None; // pong loss
    });

    endpoint.keepalive_tick(Instant::now()).await;

    // Exactly one RPTCL followed by a fresh RPTL.
    let (closing, _) = recv_frame(&master).await;
    assert!(closing.starts_with(wire::REPEATER_CLOSING));
    assert_eq!(&closing[5..9], &2042u32.to_be_bytes());
    let (login, _) = recv_frame(&master).await;
    assert!(login.starts_with(wire::REPEATER_LOGIN));

    let peer = endpoint.peer(100).expect("linked");
    assert_eq!(peer.status, AuthStatus::None);
    assert!(peer.last.auth_sent.is_some());

    // The restart stamped packet_received, so the next sweep is quiet.
    endpoint.keepalive_tick(Instant::now()).await;
    assert_no_frame(&master).await;
}

#[tokio::test]
async fn stalled_login_fails_then_retries() {
    let master = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;
    let addr = link_outgoing(&endpoint, &master, 100).await;

    // No reply from the master for longer than the auth window.
    endpoint.registry.with_peer_mut(&addr, |p| {
        p.last.packet_received = None;
    });
    endpoint.keepalive_tick(Instant::now()).await;
    assert_eq!(endpoint.peer(100).expect("linked").status, AuthStatus::Failed);
    assert_no_frame(&master).await;

    // Once the retry window passes, the login restarts from scratch.
    endpoint.registry.with_peer_mut(&addr, |p| {
        p.last.auth_sent = None;
    });
    endpoint.keepalive_tick(Instant::now()).await;
    let (login, _) = recv_frame(&master).await;
    assert!(login.starts_with(wire::REPEATER_LOGIN));
    assert_eq!(endpoint.peer(100).expect("linked").status, AuthStatus::None);
}

#[tokio::test]
async fn fresh_peer_is_left_alone() {
    let master = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;
    let _ = link_outgoing(&endpoint, &master, 100).await;

    // link() stamped packet_received, so nothing is due.
    endpoint.keepalive_tick(Instant::now()).await;
    assert_no_frame(&master).await;
    assert_eq!(endpoint.peer(100).expect("linked").status, AuthStatus::None);
}

#[tokio::test]
async fn incoming_peers_are_not_pinged() {
    let repeater = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;

    let mut peer = Peer::incoming(1, repeater.local_addr().expect("bound"), b"passw0rd".to_vec());
    peer.status = AuthStatus::Done;
    endpoint.link(peer).await.expect("link");

    // All stamps unset, yet the master side never initiates pings.
    endpoint.keepalive_tick(Instant::now()).await;
    assert_no_frame(&repeater).await;
    assert_eq!(endpoint.peer(1).expect("linked").status, AuthStatus::Done);
}

#[tokio::test]
async fn done_peer_answers_master_ping() {
    let master = bind_socket().await;
    let endpoint = bind_endpoint(2042).await;
    let serve = spawn_serve(&endpoint);
    let addr = link_outgoing(&endpoint, &master, 100).await;

    endpoint.registry.with_peer_mut(&addr, |p| {
        p.status = AuthStatus::Done;
        p.last.pong_received = Some(Instant::now());
    });

    // A pong from the master lands in the liveness stamp.
    let before = Instant::now();
    let pong = wire::tagged(wire::MASTER_PONG, &2042u32.to_be_bytes());
    master
        .send_to(&pong, endpoint.local_addr().expect("bound"))
        .await
        .expect("send");

    timeout(Duration::from_secs(1), async {
        loop {
            let stamped = endpoint
                .peer(100)
                .expect("linked")
                .last
                .pong_received
                .map(|t| t >= before)
                .unwrap_or(false);
            if stamped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pong should be stamped");

    endpoint.close().await.expect("close");
    serve.await.expect("join").expect("clean exit");
}
