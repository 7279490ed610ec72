use anyhow::{Context, Result};
use clap::Parser;
use pixelplanet_client::{Area, ClientConfig, PixelPlanetClient};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Watch pixel changes on a pixelplanet canvas.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Canvas id to watch
    #[arg(long, default_value_t = 0)]
    canvas: u8,
    /// Area to watch as `x1 y1 x2 y2`; only the canvas list is printed
    /// when omitted
    #[arg(
        long,
        num_args = 4,
        value_names = ["X1", "Y1", "X2", "Y2"],
        allow_negative_numbers = true
    )]
    area: Option<Vec<i32>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or("info,pixelplanet_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env();
    info!("Connecting to {}", config.base_url);

    let client = PixelPlanetClient::connect(config)
        .await
        .context("Failed to load canvas metadata")?;

    for canvas in client.canvases() {
        info!(
            "Canvas {} '{}': size {}, {} colors{}",
            canvas.id,
            canvas.title,
            canvas.size(),
            canvas.palette().len(),
            if canvas.is_3d() { ", 3D" } else { "" }
        );
    }

    let Some(bounds) = args.area else {
        return Ok(());
    };
    let area = Area::new(args.canvas, bounds[0], bounds[1], bounds[2], bounds[3])
        .context("Invalid area")?;

    let mut changes = client.subscribe();
    client
        .track_area(&area)
        .await
        .context("Failed to track area")?;
    info!("Tracking {:?}", area);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) if area.contains(change.pixel.x, change.pixel.y, change.pixel.z) => {
                    info!(
                        "Pixel ({}, {}) on canvas {} -> color {}",
                        change.pixel.x, change.pixel.y, change.canvas_id, change.pixel.color
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change listener lagging, skipped {} changes", skipped);
                }
                Err(RecvError::Closed) => {
                    error!("Change stream closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
