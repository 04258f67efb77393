//! `{ "data": ... }` envelope shared by every Waypoint endpoint.
//!
//! Success bodies wrap their payload in [`DataResponse`]; failures use the
//! `{ "error", "code" }` body produced by [`AppError`](crate::error::AppError).

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> DataResponse<T> {
    /// `200 OK`: the request finished inside the call.
    pub fn ok(data: T) -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { data }))
    }

    /// `202 Accepted`: the job is stored and runs in the background.
    pub fn accepted(data: T) -> (StatusCode, Json<Self>) {
        (StatusCode::ACCEPTED, Json(Self { data }))
    }
}
