//! Server-side call wrapping.
//!
//! Every handler runs through [`Dispatch::unary`], which:
//!
//! 1. stamps the call with its start time,
//! 2. runs each middleware's [`Middleware::before`] hook in order (any of them
//!    may reject the call with an application error),
//! 3. invokes the handler,
//! 4. turns an error into a status with the `rpc-error` envelope attached,
//! 5. runs [`Middleware::after`] in reverse order for every middleware whose
//!    `before` hook passed.
//!
//! The middleware list is fixed when the server is built
//! (`Dispatch::builder().layer(..).build()`), so concerns such as
//! instrumentation, authentication or rate limiting compose as an ordered
//! stack rather than competing for a single interceptor slot.

use crate::server::telemetry;
use core::time::Duration;
use quotacache_core::{Error, envelope};
use std::{sync::Arc, time::Instant};
use tonic::{Request, Response, Status, metadata::MetadataMap};
use tracing::Instrument;

/// What a middleware knows about the call it wraps.
#[derive(Clone, Copy, Debug)]
pub struct CallInfo {
    /// Full gRPC method path, e.g. `/quotacache.Cache/Store`.
    pub method: &'static str,
    pub started: Instant,
}

impl CallInfo {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A hook pair run around every unary call.
pub trait Middleware: Send + Sync + 'static {
    /// Runs before the handler. Returning an error rejects the call.
    fn before(&self, _call: &CallInfo, _metadata: &MetadataMap) -> Result<(), Error> {
        Ok(())
    }

    /// Runs after the handler (or after a rejection further down the stack)
    /// with the status about to be sent, if the call failed.
    fn after(&self, _call: &CallInfo, _error: Option<&Status>) {}
}

/// Ordered middleware stack shared by all services of a server.
#[derive(Clone, Default)]
pub struct Dispatch {
    middleware: Arc<[Arc<dyn Middleware>]>,
}

#[derive(Default)]
pub struct DispatchBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl DispatchBuilder {
    /// Appends `middleware`; earlier layers wrap later ones.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Dispatch {
        Dispatch {
            middleware: self.middleware.into(),
        }
    }
}

impl Dispatch {
    pub fn builder() -> DispatchBuilder {
        DispatchBuilder::default()
    }

    /// Runs `handler` for `request` inside the middleware stack.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Resp, Error>>,
    {
        let call = CallInfo {
            method,
            started: Instant::now(),
        };

        let mut entered = 0;
        let result = 'call: {
            for middleware in self.middleware.iter() {
                if let Err(e) = middleware.before(&call, request.metadata()) {
                    break 'call Err(e);
                }
                entered += 1;
            }
            handler(request)
                .instrument(tracing::info_span!("rpc", method))
                .await
        };

        let result = result.map(Response::new).map_err(envelope::attach);

        for middleware in self.middleware[..entered].iter().rev() {
            middleware.after(&call, result.as_ref().err());
        }

        result
    }
}

/// Logs and measures every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct Instrumented;

impl Middleware for Instrumented {
    fn after(&self, call: &CallInfo, error: Option<&Status>) {
        let duration = call.elapsed();
        telemetry::record_call(call.method, duration, error.map(Status::code));

        match error {
            None => tracing::info!(method = call.method, ?duration, "invoke server ok"),
            Some(status) => tracing::info!(
                method = call.method,
                ?duration,
                code = ?status.code(),
                error = %status.message(),
                "invoke server failed"
            ),
        }
    }
}
