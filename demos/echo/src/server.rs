//! Echo server: every byte received goes straight back.

use std::collections::HashMap;

use reliable_transport::prelude::*;

/// Serve until the event channel closes or Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (server, mut events) = TransportServer::bind(config).await?;
    log::info!("echo server on link {}", server.local_addr());

    let mut handles: HashMap<ConnectionId, ConnectionHandle> = HashMap::new();

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match event {
            ServerEvent::Accepted { id, handle } => {
                log::info!("{id}: accepted");
                handles.insert(id, handle);
            }
            ServerEvent::Data { id, data } => {
                log::debug!("{id}: echoing {} bytes", data.len());
                if let Some(handle) = handles.get(&id) {
                    if let Err(e) = handle.send(data).await {
                        log::warn!("{id}: echo failed: {e}");
                    }
                }
            }
            ServerEvent::Closed { id, side } => {
                log::info!("{id}: closed ({side:?})");
                if side == HalfClose::Remote {
                    handles.remove(&id);
                }
            }
            ServerEvent::Reset { id, reason } => {
                log::warn!("{id}: reset: {reason}");
                handles.remove(&id);
            }
            ServerEvent::Connected { .. } => {}
        }
    }

    log::info!("shutting down with {} connections", handles.len());
    server.shutdown().await?;
    Ok(())
}
