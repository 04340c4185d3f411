//! Extractors whose rejections render as `MarketError` (400 with a JSON body)

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::MarketError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(MarketError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(MarketError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(MarketError))]
pub struct ApiQuery<T>(pub T);
