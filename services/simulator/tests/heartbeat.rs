// Heartbeat behavior: ping payload shape, pong echo, and timeout-driven
// eviction with close status 1011.  Timers are compressed via the config so
// the three-miss eviction fits in test time.

use std::time::Duration;

use origin_test_utils::SimClient;
use origin_wire::{Frame, HEARTBEAT_PAYLOAD_LEN};
use simulator::{Simulator, SimulatorConfig};

fn fast_heartbeat_config() -> SimulatorConfig {
    SimulatorConfig {
        port: 0,
        enable_discovery: false,
        heartbeat_interval: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(150),
        ..SimulatorConfig::default()
    }
}

async fn next_ping(client: &mut SimClient, wait: Duration) -> Option<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match client.next_frame(remaining).await? {
            Frame::Ping(payload) => return Some(payload),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn pings_carry_the_29_byte_heartbeat_payload_with_a_counter() {
    let simulator = Simulator::start(fast_heartbeat_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    for expected in 0..3u64 {
        let payload = next_ping(&mut client, Duration::from_secs(5))
            .await
            .expect("ping expected");
        assert_eq!(payload.len(), HEARTBEAT_PAYLOAD_LEN);
        let text = String::from_utf8_lossy(&payload);
        let text = text.trim_end_matches('\0');
        assert_eq!(text, format!("ixwebsocket::heartbeat::5s::{expected}"));
        // Answer so the connection stays alive.
        client.send_frame(Frame::Pong(payload)).await.expect("pong");
    }

    simulator.shutdown().await;
}

#[tokio::test]
async fn client_pings_are_echoed_as_pongs_with_the_same_payload() {
    let simulator = Simulator::start(fast_heartbeat_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    client
        .send_frame(Frame::Ping(b"are-you-there".to_vec()))
        .await
        .expect("ping");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let pong = loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("pong should arrive in time");
        match client.next_frame(remaining).await.expect("frame") {
            Frame::Pong(payload) => break payload,
            Frame::Ping(payload) => {
                client.send_frame(Frame::Pong(payload)).await.expect("pong");
            }
            _ => continue,
        }
    };
    assert_eq!(pong, b"are-you-there".to_vec());

    simulator.shutdown().await;
}

#[tokio::test]
async fn three_missed_pongs_close_the_connection_with_1011() {
    let simulator = Simulator::start(fast_heartbeat_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");
    client.auto_pong(false);

    // Count server pings while never answering; the close must follow the
    // third miss.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut pings = 0u32;
    let close_payload = loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("close should arrive in time");
        match client.next_frame(remaining).await {
            Some(Frame::Ping(_)) => pings += 1,
            Some(Frame::Close(payload)) => break payload,
            Some(_) => continue,
            None => panic!("connection dropped without a close frame"),
        }
    };

    assert!(pings >= 3, "expected at least three pings, saw {pings}");
    let status = u16::from_be_bytes([close_payload[0], close_payload[1]]);
    assert_eq!(status, 1011);
    assert_eq!(&close_payload[2..], b"Ping timeout");

    // The socket closes shortly after.
    let eof = client.next_frame(Duration::from_secs(3)).await;
    assert!(eof.is_none());

    simulator.shutdown().await;
}

#[tokio::test]
async fn answered_pings_keep_the_connection_alive() {
    let simulator = Simulator::start(fast_heartbeat_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    // Auto-pong is on; across many heartbeat intervals no close shows up.
    let seen = client.collect_json_for(Duration::from_millis(1500)).await;
    assert!(!seen.is_empty(), "status notifications keep flowing");

    client
        .send_json(&serde_json::json!({
            "Command": "GetVersion",
            "Destination": "System",
            "Source": "T",
            "SequenceID": 99,
            "Type": "Command",
        }))
        .await
        .expect("still writable");
    let response = client
        .response_for(99, Duration::from_secs(5))
        .await
        .expect("still responsive");
    assert_eq!(response["Number"], "1.1.4248");

    simulator.shutdown().await;
}
