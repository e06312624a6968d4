//! Request extractors whose rejections use the [`AppError`] body.

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Query};

use crate::error::AppError;

/// [`Json`] that rejects with `{"error":{..}}` instead of plain text.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// [`Query`] that rejects with `{"error":{..}}` instead of plain text.
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);
