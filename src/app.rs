//! The application contract.
//!
//! The server never routes or renders anything itself; it hands each request
//! to an [`Application`] and writes back whatever that returns.

use crate::http::environ::Environ;
use crate::http::response::{Body, StartResponse};

/// An in-process application callback.
///
/// Must call `start_response.start(..)` exactly once before returning, and
/// return a finite body. Each worker process calls its own copy, so no state
/// is shared between concurrent calls.
pub trait Application: Send + Sync {
    fn call(&self, environ: &mut Environ, start_response: &mut StartResponse)
    -> anyhow::Result<Body>;
}

impl<F> Application for F
where
    F: Fn(&mut Environ, &mut StartResponse) -> anyhow::Result<Body> + Send + Sync,
{
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> anyhow::Result<Body> {
        self(environ, start_response)
    }
}

/// Pins a closure to the application signature so its argument and return
/// types are inferred.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut Environ, &mut StartResponse) -> anyhow::Result<Body> + Send + Sync,
{
    f
}

/// The application served by the binary.
///
/// Answers every request with `200 OK` and a short plain-text body, and tags
/// the response with the id of the process that handled it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextApp;

impl Application for PlainTextApp {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> anyhow::Result<Body> {
        let worker = std::process::id().to_string();
        start_response.start(
            "200 OK",
            [
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-Worker".to_string(), worker),
            ],
            None,
        )?;

        let body = match environ.path() {
            "/" => Body::from("index\n"),
            "/foo" => Body::from("foo\n"),
            "/bar" => Body::from("bar\n"),
            _ => Body::empty(),
        };
        Ok(body)
    }
}
