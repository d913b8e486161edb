//! Per-router state extraction for retrieving shared application state.
//!
//! This module exposes `State<T>` to access state a `Router` was given via
//! `Router::state`. The router stashes each value as `Arc<T>` in the
//! request's extensions before dispatch, and this extractor reads it back
//! out by that same type — the same pattern `Params<T>` uses for path
//! parameters, just keyed on `T` instead of on `PathParams`.
//!
//! # Examples
//!
//! ```rust
//! use tako::{extractors::state::State, responder::Responder, router::Router, Method};
//!
//! #[derive(Clone)]
//! struct AppConfig { name: String }
//!
//! async fn handler(State(cfg): State<AppConfig>) -> impl Responder { cfg.name.clone() }
//!
//! let mut router = Router::new();
//! router.state(AppConfig { name: "demo".into() });
//! router.route(Method::GET, "/", handler);
//! ```

use std::sync::Arc;

use http::request::Parts;

use crate::extractors::FromRequest;
use crate::extractors::FromRequestParts;
use crate::responder::Responder;
use crate::types::Request;

/// Extractor for accessing a value a `Router` was given via `Router::state`.
pub struct State<T>(pub Arc<T>);

impl<T> Clone for State<T> {
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

#[derive(Debug)]
pub struct MissingState;

impl Responder for MissingState {
  fn into_response(self) -> crate::types::Response {
    (
      http::StatusCode::INTERNAL_SERVER_ERROR,
      "missing application state",
    )
      .into_response()
  }
}

impl<'a, T> FromRequest<'a> for State<T>
where
  T: Send + Sync + 'static,
{
  type Error = MissingState;

  fn from_request(
    req: &'a mut Request,
  ) -> impl core::future::Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a {
    let found = req.extensions().get::<Arc<T>>().cloned();
    futures_util::future::ready(match found {
      Some(arc) => Ok(Self(arc)),
      None => Err(MissingState),
    })
  }
}

impl<'a, T> FromRequestParts<'a> for State<T>
where
  T: Send + Sync + 'static,
{
  type Error = MissingState;

  fn from_request_parts(
    parts: &'a mut Parts,
  ) -> impl core::future::Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a {
    let found = parts.extensions.get::<Arc<T>>().cloned();
    futures_util::future::ready(match found {
      Some(arc) => Ok(Self(arc)),
      None => Err(MissingState),
    })
  }
}
