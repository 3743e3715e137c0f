use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use proctor_hub::api;
use proctor_hub::config::Config;
use proctor_hub::rtc::connector::WebRtcConnectorFactory;
use proctor_hub::rtc::HeadlessMediaSource;
use proctor_hub::session::SessionHub;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "proctor_hub=info".into()),
        )
        .init();

    let factory = Arc::new(WebRtcConnectorFactory::new(&config.rtc));
    let media = Arc::new(HeadlessMediaSource::new());
    let hub = SessionHub::new(factory, media, config.session.negotiation_timeout);

    let routes = api::routes(hub, &config.rtc);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "proctor hub listening"
    );
    warp::serve(routes).run(config.bind_address()).await;
}
