//! Registry behavior while a broadcast is iterating it.

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use storm_server::registry::Registry;
use storm_server::server::fan_out;
use tokio::io::{duplex, AsyncReadExt, DuplexStream};

const LINE: &[u8] = b"{\"intensity\":0.4,\"windDir\":[0.2,0.0,0.6]}\n";

fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000)
}

/// Removing sessions mid-broadcast never panics, skips a surviving session,
/// or delivers a packet twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removal_during_fan_out_is_safe() -> anyhow::Result<()> {
    storm_tests::init_tracing();

    for round in 0..20 {
        let registry = Arc::new(Registry::<DuplexStream>::new());
        let mut peers = Vec::new();
        for _ in 0..40 {
            let (ours, theirs) = duplex(4096);
            let id = registry.register(peer(), ours).id;
            peers.push((id, theirs));
        }
        let doomed: Vec<_> = peers.iter().step_by(2).map(|(id, _)| *id).collect();

        let remover = {
            let registry = registry.clone();
            let doomed = doomed.clone();
            tokio::spawn(async move {
                for id in doomed {
                    registry.remove(id);
                    tokio::task::yield_now().await;
                }
            })
        };
        let out = fan_out(&registry, LINE, Duration::from_secs(1)).await;
        remover.await?;

        let delivered: HashSet<_> = out.delivered.iter().copied().collect();
        assert_eq!(delivered.len(), out.delivered.len(), "round {round}: duplicate delivery");
        assert!(out.dropped.is_empty(), "round {round}: no write should fail");

        let doomed: HashSet<_> = doomed.into_iter().collect();
        for (id, _) in &peers {
            if !doomed.contains(id) {
                assert!(delivered.contains(id), "round {round}: survivor {id} skipped");
            }
        }
        assert_eq!(registry.len(), 20);

        // Close every writer so each peer reads to EOF.
        drop(registry);
        for (id, mut theirs) in peers {
            let mut got = Vec::new();
            theirs.read_to_end(&mut got).await?;
            if delivered.contains(&id) {
                assert_eq!(got, LINE, "round {round}: {id} got {} bytes", got.len());
            } else {
                assert!(got.is_empty());
            }
        }
    }
    Ok(())
}

/// Sessions registered while a broadcast runs are simply served next tick.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insertion_during_fan_out_is_safe() -> anyhow::Result<()> {
    let registry = Arc::new(Registry::<DuplexStream>::new());
    let mut keep = Vec::new();
    for _ in 0..10 {
        let (ours, theirs) = duplex(4096);
        registry.register(peer(), ours);
        keep.push(theirs);
    }

    let adder = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut late = Vec::new();
            for _ in 0..10 {
                let (ours, theirs) = duplex(4096);
                registry.register(peer(), ours);
                late.push(theirs);
                tokio::task::yield_now().await;
            }
            late
        })
    };

    let first = fan_out(&registry, LINE, Duration::from_secs(1)).await;
    let _late = adder.await?;
    assert!(first.delivered.len() >= 10);

    let second = fan_out(&registry, LINE, Duration::from_secs(1)).await;
    assert_eq!(second.delivered.len(), 20);
    Ok(())
}
