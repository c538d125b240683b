/*
    Four committee members gather each other's values over a lossy in-memory
    network. Every member reliably broadcasts its own value; the reliable
    channel layer underneath resends whatever the network loses, so each
    member ends up with the values of at least a quorum of broadcasters.
*/

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use simple_gpa::common::Keypair;
use simple_gpa::consensus::{Gather, Peers};
use simple_gpa::gpa::{AckHandlerConfig, OwnHandler};
use simple_gpa::network::{DriverConfig, MemoryNetwork, MemoryNetworkConfig, Node};
use tracing::info;
use tracing_subscriber::EnvFilter;

const COMMITTEE_SIZE: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let keypairs: Vec<Keypair> = (0..COMMITTEE_SIZE).map(|_| Keypair::new_pair()).collect();
    let peers = Peers::new(keypairs.iter().map(Keypair::node_id).collect());
    let network = MemoryNetwork::new(MemoryNetworkConfig {
        delivery_probability: 0.7,
        seed: 7,
    });
    let config = DriverConfig {
        tick_interval: Duration::from_millis(50),
        ack: AckHandlerConfig {
            resend_period: Duration::from_millis(100),
        },
        ..DriverConfig::default()
    };

    let mut handles = Vec::new();
    for keypair in keypairs {
        let me = keypair.node_id();
        let gather = OwnHandler::new(me, Gather::new(me, peers.clone()));
        let transport = Arc::new(network.transport(keypair));
        let (node, handle) = Node::new(me, peers.clone(), gather, transport, config.clone());
        network.register(me, handle.frames());
        tokio::spawn(node.run());
        handles.push((me, handle));
    }

    for (me, handle) in &handles {
        handle.input(format!("hello from {me}").into_bytes()).await?;
    }

    for (me, handle) in &mut handles {
        match tokio::time::timeout(Duration::from_secs(10), handle.wait_output()).await {
            Ok(Some(values)) => {
                println!("Node {me}: gathered {} values", values.len());
                for (from, value) in values {
                    println!("  {from}: {}", String::from_utf8_lossy(&value));
                }
            }
            Ok(None) => println!("Node {me}: stopped without output"),
            Err(_) => println!("Node {me}: timed out"),
        }
    }

    info!(
        delivered = network.delivered_count(),
        dropped = network.dropped_count(),
        "network totals"
    );
    for (_, handle) in &handles {
        handle.shutdown().await?;
    }
    Ok(())
}
