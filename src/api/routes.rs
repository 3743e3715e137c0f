use std::sync::Arc;

use warp::Filter;

use crate::config::RtcConfig;
use crate::session::SessionHub;

use super::websocket;

/// All HTTP and WebSocket routes served by the hub.
pub fn routes(
    hub: Arc<SessionHub>,
    rtc: &RtcConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    websocket_route(hub.clone())
        .or(health_check())
        .or(rtc_config_endpoint(rtc))
        .or(monitor_endpoint(hub))
}

pub fn websocket_route(
    hub: Arc<SessionHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, hub: Arc<SessionHub>| {
            ws.on_upgrade(move |websocket| websocket::handle_socket(websocket, hub))
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Proctor Hub",
            "version": env!("CARGO_PKG_VERSION"),
        }))
    })
}

/// ICE settings clients need to build their own peer endpoints.
pub fn rtc_config_endpoint(
    rtc: &RtcConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let stun_urls = rtc.stun_urls.clone();
    let turn_url = rtc.turn_url.clone();

    warp::path("config").and(warp::get()).map(move || {
        warp::reply::json(&serde_json::json!({
            "stun_urls": stun_urls,
            "turn_url": turn_url,
        }))
    })
}

/// Snapshot of the monitoring view for one room: every student whose screen
/// stream is currently live.
pub fn monitor_endpoint(
    hub: Arc<SessionHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / String)
        .and(warp::get())
        .and(with_hub(hub))
        .and_then(|room_id: String, hub: Arc<SessionHub>| async move {
            match hub.monitor(&room_id).await {
                Some(feed) => {
                    let entries = feed.borrow().clone();
                    Ok::<_, warp::Rejection>(warp::reply::json(&entries))
                }
                None => Err(warp::reject::not_found()),
            }
        })
}

fn with_hub(
    hub: Arc<SessionHub>,
) -> impl Filter<Extract = (Arc<SessionHub>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
