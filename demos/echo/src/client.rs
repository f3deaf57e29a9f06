//! Echo client: forwards stdin lines, prints what comes back.

use std::net::SocketAddr;
use std::time::Duration;

use reliable_transport::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long to keep printing echoes after stdin closed.
const LINGER: Duration = Duration::from_secs(1);

/// Connect to `peer` and relay stdin until EOF.
pub async fn run(
    config: ServerConfig,
    peer: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (endpoint, mut events) = TransportServer::bind(config).await?;
    let conn = endpoint.connect(peer).await?;
    log::info!("connecting to {peer} as {}", conn.id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => conn.send(format!("{line}\n")).await?,
                None => {
                    stdin_open = false;
                    conn.close().await?;
                }
            },
            event = events.recv() => match event {
                Some(ServerEvent::Connected { id }) => log::info!("{id}: established"),
                Some(ServerEvent::Data { data, .. }) => {
                    print!("{}", String::from_utf8_lossy(&data));
                }
                Some(ServerEvent::Closed { side: HalfClose::Local, .. }) => {
                    log::info!("FIN sent");
                }
                Some(ServerEvent::Closed { side: HalfClose::Remote, .. }) | None => break,
                Some(ServerEvent::Reset { reason, .. }) => {
                    log::warn!("connection reset: {reason}");
                    break;
                }
                Some(ServerEvent::Accepted { id, .. }) => log::debug!("{id}: unexpected accept"),
            },
            _ = tokio::time::sleep(LINGER), if !stdin_open => break,
        }
    }

    endpoint.shutdown().await?;
    Ok(())
}
