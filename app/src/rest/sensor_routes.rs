use super::build_response;
use crate::auth::SensorAuthorizer;
use crate::error::ApiError;
use crate::service::IngestionService;
use std::sync::Arc;
use warp::Filter;

pub fn routes(
    service: &Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    allowed_sensors(service.clone())
        .or(update_allowed_sensors(service.clone()))
        .or(reload_allowed_sensors(service.clone()))
}

/// GET api/allowed-sensors
///
/// Returns the explicit allow-list, sorted. Prefix matches are not listed.
fn allowed_sensors(
    service: Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || service.clone())
        .and(warp::get())
        .and(warp::path!("api" / "allowed-sensors"))
        .and_then(|service: Arc<IngestionService>| async move {
            let resp = dto::AllowedSensorsDto {
                allowed_sensors: service.authorizer().list_allowed(),
            };
            build_response(Ok(resp))
        })
        .boxed()
}

/// POST api/allowed-sensors
///
/// Adds or removes a single sensor id, takes effect for the next message
fn update_allowed_sensors(
    service: Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || service.clone())
        .and(warp::post())
        .and(warp::path!("api" / "allowed-sensors"))
        .and(warp::body::json())
        .and_then(
            |service: Arc<IngestionService>, body: dto::AllowedSensorUpdateDto| async move {
                build_response(update_allow_list(service.authorizer(), body))
            },
        )
        .boxed()
}

/// POST api/allowed-sensors/reload
///
/// Drops runtime changes and re-reads the configured list
fn reload_allowed_sensors(
    service: Arc<IngestionService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || service.clone())
        .and(warp::post())
        .and(warp::path!("api" / "allowed-sensors" / "reload"))
        .and_then(|service: Arc<IngestionService>| async move {
            service.authorizer().reload();
            let resp = dto::AllowedSensorsDto {
                allowed_sensors: service.authorizer().list_allowed(),
            };
            build_response(Ok(resp))
        })
        .boxed()
}

fn update_allow_list(
    authorizer: &SensorAuthorizer,
    body: dto::AllowedSensorUpdateDto,
) -> Result<dto::MessageDto, ApiError> {
    let sensor_id = body.sensor_id.as_deref().map(str::trim).unwrap_or_default();
    let action = body.action.as_deref().unwrap_or_default();
    if sensor_id.is_empty() || action.is_empty() {
        return Err(ApiError::MissingArgument);
    }
    // could never be a single topic segment
    if sensor_id.contains(['/', '+', '#']) {
        return Err(ApiError::InvalidSensorId(sensor_id.to_owned()));
    }

    let message = match action {
        "add" => {
            authorizer.add_allowed(sensor_id);
            format!("Sensor {} added to allowed list", sensor_id)
        }
        "remove" => {
            authorizer.remove_allowed(sensor_id);
            format!("Sensor {} removed from allowed list", sensor_id)
        }
        other => return Err(ApiError::InvalidAction(other.to_owned())),
    };
    Ok(dto::MessageDto { message })
}

///
/// DTO
///
pub mod dto {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AllowedSensorsDto {
        pub allowed_sensors: Vec<String>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AllowedSensorUpdateDto {
        pub sensor_id: Option<String>,
        pub action: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct MessageDto {
        pub message: String,
    }
}
