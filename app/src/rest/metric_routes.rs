use super::build_response;
use crate::service::IngestionService;
use std::sync::Arc;
use warp::Filter;

pub fn routes(
    service: &Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    health(service.clone())
}

/// GET api/health
///
/// The process is healthy while it serves requests, broker connectivity is
/// reported separately since the client reconnects on its own.
fn health(
    service: Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || service.clone())
        .and(warp::get())
        .and(warp::path!("api" / "health"))
        .and_then(|service: Arc<IngestionService>| async move {
            let ret = dto::HealthyDto {
                healthy: true,
                mqtt_connected: service.is_connected(),
                connection_state: service.connection_state().to_string(),
                broker: service.broker_url().to_owned(),
            };
            build_response(Ok(ret))
        })
        .boxed()
}

mod dto {
    use serde::Serialize;
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HealthyDto {
        pub healthy: bool,
        pub mqtt_connected: bool,
        pub connection_state: String,
        pub broker: String,
    }
}
