//! # Presence Loop Example
//!
//! A minimal game loop that publishes rich presence to a locally running
//! chat client over the IPC transport. The background I/O thread keeps the
//! connection alive and reconnects if the chat client restarts.
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=rich_presence_client=debug cargo run --example presence_loop -- <application-id>
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rich_presence_client::{EventHandlers, RichPresence, RpcClient, RpcConfig};

/// Ticks of the fake game loop before exiting.
const FRAMES: u32 = 120;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let application_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "345229890980937739".to_owned());

    let handlers = EventHandlers::new()
        .on_ready(|| tracing::info!("connected to the chat client"))
        .on_disconnected(|code, message| tracing::info!(code, reason = message, "disconnected"))
        .on_errored(|code, message| tracing::warn!(code, reason = message, "request failed"))
        .on_join_game(|secret| tracing::info!(secret, "player asked to join"))
        .on_spectate_game(|secret| tracing::info!(secret, "player asked to spectate"));

    let mut client = RpcClient::connect(RpcConfig::new(application_id), handlers)?;

    let started = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let started = i64::try_from(started)?;

    for frame in 0..FRAMES {
        // Presence is last-value-wins; refreshing it every couple of seconds is enough.
        if frame % 20 == 0 {
            let wave = frame / 20 + 1;
            let presence = RichPresence::new()
                .with_state("In a group")
                .with_details(format!("Wave {wave}"))
                .with_start_timestamp(started)
                .with_party("presence-loop-party", 1, 4)
                .with_join_secret("presence-loop-join");
            if !client.update_presence(&presence) {
                tracing::warn!("send queue full, presence dropped");
            }
        }

        client.run_callbacks();
        std::thread::sleep(Duration::from_millis(100));
    }

    // Shutdown does not flush the queue, so give the I/O thread a moment.
    client.clear_presence();
    std::thread::sleep(Duration::from_millis(100));
    client.shutdown();
    Ok(())
}
