use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod events;
mod ffmpeg;
mod handler;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("lite_cast", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    match config::load_destinations(config.destinations_path()) {
        Ok(destinations) => {
            log::info!("Loaded {} saved destination(s)", destinations.len());
        }
        Err(e) => {
            log::warn!(
                "Destination store {} unreadable: {:#}",
                config.destinations_path().display(),
                e
            );
        }
    }

    let cancel = CancellationToken::new();
    api::start_api_server(cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                ffmpeg::supervisor::supervisor().stop().await;
                cancel.cancel();
            },
        }
    }

    std::process::exit(0);
}
