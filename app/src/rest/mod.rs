use crate::error::ApiError;
use crate::service::IngestionService;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Reply};

mod metric_routes;
mod sensor_routes;

pub fn routes(
    service: &Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    sensor_routes::routes(service)
        .or(metric_routes::routes(service))
        .with(warp::trace::request())
}

/// Serves the admin api until `shutdown` resolves.
pub async fn dispatch_server<S>(
    service: Arc<IngestionService>,
    addr: SocketAddr,
    shutdown: S,
) -> Result<(), warp::Error>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (bound, server) =
        warp::serve(routes(&service)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(addr = %bound, "Serving admin api");
    server.await;
    info!("Admin api stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
struct ErrorDto {
    error: String,
}

fn build_response<T: Serialize>(
    resp: Result<T, ApiError>,
) -> Result<warp::reply::Response, warp::Rejection> {
    match resp {
        Ok(body) => Ok(warp::reply::json(&body).into_response()),
        Err(e) => {
            let body = ErrorDto {
                error: e.to_string(),
            };
            Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST)
                .into_response())
        }
    }
}
