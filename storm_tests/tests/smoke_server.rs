use std::time::Duration;

use storm_server::server::bind_ephemeral;
use storm_shared::net::{decode_frame, StormPacket};
use storm_tests::{init_tracing, test_server_config, wait_until};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

/// Smoke test: server broadcasts to a silent client, then shuts down cleanly.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_client_gets_zero_energy_storms() -> anyhow::Result<()> {
    init_tracing();

    let server = bind_ephemeral(test_server_config(20, 0.0)).await?;
    let handle = server.spawn()?;

    let stream = TcpStream::connect(handle.local_addr()).await?;
    let mut lines = BufReader::new(stream).lines();

    for _ in 0..3 {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await??
            .expect("storm line");
        let pkt: StormPacket = decode_frame(line.as_bytes())?;
        // Energy defaults to 0 until the first report; jitter is disabled.
        assert_eq!(pkt.intensity, 0.0);
        assert_eq!(pkt.wind_dir[1], 0.0);
        assert!(pkt.wind_dir.iter().all(|w| (0.0..1.0).contains(w)));
    }

    let registry = handle.registry().clone();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.energies(), vec![0.0]);

    handle.shutdown().await?;
    assert!(registry.is_empty());

    // The server side is gone: the stream drains and then ends.
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while let Ok(Some(_)) = lines.next_line().await {}
    })
    .await;
    assert!(ended.is_ok(), "stream should end after shutdown");
    Ok(())
}

/// An empty server keeps ticking without clients.
#[tokio::test]
async fn server_ticks_with_no_sessions() -> anyhow::Result<()> {
    init_tracing();

    let handle = bind_ephemeral(test_server_config(10, 0.2)).await?.spawn()?;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(handle.registry().is_empty());

    // Late client still gets served.
    let stream = TcpStream::connect(handle.local_addr()).await?;
    let registry = handle.registry().clone();
    assert!(wait_until(Duration::from_secs(2), || registry.len() == 1).await);

    let mut lines = BufReader::new(stream).lines();
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await??
        .expect("storm line");
    let pkt: StormPacket = decode_frame(line.as_bytes())?;
    assert!((0.0..=1.0).contains(&pkt.intensity));

    handle.shutdown().await?;
    Ok(())
}
