//! # Gateway errors
//!
//! Maps the errors of the gateway's components onto HTTP responses. Every error response carries a
//! `{status}` JSON body.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use comms_if::api::{status, Status};
use log::{debug, error, warn};

use crate::{
    map_store::MapStoreError, mapping::MappingError, nav_mgr::NavMgrError,
    video_client::VideoSourceError,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    NavMgr(#[from] NavMgrError),

    #[error(transparent)]
    MapStore(#[from] MapStoreError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Video(#[from] VideoSourceError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NavMgr(e) => match e {
                NavMgrError::TaskBusy => StatusCode::CONFLICT,
                NavMgrError::PoseUnavailable | NavMgrError::UpstreamUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                NavMgrError::TaskAborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::MapStore(e) => map_store_status(e),
            Self::Mapping(e) => match e {
                MappingError::MappingBusy => StatusCode::CONFLICT,
                MappingError::Map(e) => map_store_status(e),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Video(e) => match e {
                VideoSourceError::InvalidTopic(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Text of the `status` field of the response body.
    fn status_text(&self) -> String {
        match self {
            Self::NavMgr(NavMgrError::TaskBusy) => status::BUSY.into(),
            e => e.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.status_code();

        if code.is_server_error() {
            match code {
                StatusCode::SERVICE_UNAVAILABLE => warn!("{}", self),
                _ => error!("{}", self),
            }
        } else {
            debug!("Request refused ({}): {}", code, self);
        }

        (code, Json(Status::new(self.status_text()))).into_response()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn map_store_status(e: &MapStoreError) -> StatusCode {
    match e {
        MapStoreError::InvalidName(_) => StatusCode::BAD_REQUEST,
        MapStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::from(NavMgrError::TaskBusy).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::from(NavMgrError::PoseUnavailable).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::from(MapStoreError::NotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::from(MappingError::Map(MapStoreError::InvalidName("..".into())))
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::from(MappingError::MappingBusy).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::from(VideoSourceError::NoData("cam".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_busy_text() {
        assert_eq!(
            GatewayError::from(NavMgrError::TaskBusy).status_text(),
            "stop the running task."
        );
    }
}
