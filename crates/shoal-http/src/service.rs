//! The hyper `Service` wrapping the control plane: body collection,
//! routing, dispatch, and common response headers.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::header::HeaderValue;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::debug;
use uuid::Uuid;

use crate::handlers::{dispatch, ApiState};
use crate::response::{error_response, ApiBody};
use crate::router::route;

/// The control-plane HTTP service. Cloning is cheap; every clone shares
/// the same [`ApiState`].
#[derive(Debug, Clone)]
pub struct ControlPlaneService {
    state: Arc<ApiState>,
}

impl ControlPlaneService {
    /// Wrap the shared gateway state into a hyper service.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

impl Service<Request<Incoming>> for ControlPlaneService {
    type Response = Response<ApiBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            let query = req.uri().query().unwrap_or("").to_owned();

            let mut response = match route(&method, &path) {
                Some(operation) => match req.into_body().collect().await {
                    Ok(collected) => {
                        dispatch(state.as_ref(), operation, collected.to_bytes(), &query).await
                    }
                    Err(e) => error_response(
                        StatusCode::BAD_REQUEST,
                        &format!("failed to read request body: {e}"),
                    ),
                },
                None => error_response(StatusCode::NOT_FOUND, "not found"),
            };

            debug!(
                %method,
                path,
                status = response.status().as_u16(),
                request_id,
                "request handled"
            );

            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                headers.insert("x-request-id", value);
            }
            headers.insert("server", HeaderValue::from_static("shoal"));

            Ok(response)
        })
    }
}
