//! The HTTP surface from spec §6: `POST /put/` and `POST /get/`, JSON
//! bodies, one `RespStatus` wire enum shared by both responses. No auth, no
//! retries at this layer — retries are the KV client's job.

use crate::{KvService, ServiceError};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Mirrors the original design's `ResponseStatus` exactly, including the
/// ordinal values (`Invalid=0`, `OK=1`, `NotLeader=2`, `FailedCommit=3`) so a
/// client speaking the wire protocol doesn't have to know this is Rust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RespStatus {
    Invalid = 0,
    Ok = 1,
    NotLeader = 2,
    FailedCommit = 3,
}

impl From<ServiceError> for RespStatus {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotLeader => RespStatus::NotLeader,
            ServiceError::FailedCommit => RespStatus::FailedCommit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    #[serde(rename = "RespStatus")]
    pub resp_status: RespStatus,
    #[serde(rename = "KeyFound")]
    pub key_found: bool,
    #[serde(rename = "PrevValue")]
    pub prev_value: String,
}

impl PutResponse {
    fn failed(status: RespStatus) -> Self {
        Self {
            resp_status: status,
            key_found: false,
            prev_value: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    #[serde(rename = "RespStatus")]
    pub resp_status: RespStatus,
    #[serde(rename = "KeyFound")]
    pub key_found: bool,
    #[serde(rename = "Value")]
    pub value: String,
}

impl GetResponse {
    fn failed(status: RespStatus) -> Self {
        Self {
            resp_status: status,
            key_found: false,
            value: String::new(),
        }
    }
}

/// Builds the two-route Axum app for one node. The caller owns binding and
/// serving (`axum::serve`); this crate only describes the surface.
pub fn router(service: KvService) -> Router {
    Router::new()
        .route("/put/", post(handle_put))
        .route("/get/", post(handle_get))
        .with_state(service)
}

async fn handle_put(State(service): State<KvService>, Json(req): Json<PutRequest>) -> Json<PutResponse> {
    match service.put(req.key, req.value).await {
        Ok(outcome) => Json(PutResponse {
            resp_status: RespStatus::Ok,
            key_found: outcome.key_found,
            prev_value: outcome.prev_value.unwrap_or_default(),
        }),
        Err(e) => Json(PutResponse::failed(e.into())),
    }
}

async fn handle_get(State(service): State<KvService>, Json(req): Json<GetRequest>) -> Json<GetResponse> {
    match service.get(req.key).await {
        Ok(outcome) => Json(GetResponse {
            resp_status: RespStatus::Ok,
            key_found: outcome.key_found,
            value: outcome.value.unwrap_or_default(),
        }),
        Err(e) => Json(GetResponse::failed(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resp_status_ordinals_match_the_wire_protocol() {
        assert_eq!(serde_json::to_string(&RespStatus::Invalid).unwrap(), "0");
        assert_eq!(serde_json::to_string(&RespStatus::Ok).unwrap(), "1");
        assert_eq!(serde_json::to_string(&RespStatus::NotLeader).unwrap(), "2");
        assert_eq!(serde_json::to_string(&RespStatus::FailedCommit).unwrap(), "3");
    }

    #[test]
    fn put_request_deserializes_pascal_case_field_names() {
        let req: PutRequest = serde_json::from_str(r#"{"Key":"llave","Value":"cosa"}"#).unwrap();
        assert_eq!(req.key, "llave");
        assert_eq!(req.value, "cosa");
    }
}
