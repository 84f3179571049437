use std::io::Cursor;

use bytes::Bytes;

use crate::http::request::RequestLine;

/// Version of the gateway contract exposed to applications.
pub const GATEWAY_VERSION: (u8, u8) = (1, 0);

/// Who is answering: computed once per process from the listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub scheme: String,
    pub name: String,
    pub port: u16,
    pub software: String,
    /// Whether other threads of this process may call the application concurrently
    pub multithread: bool,
    /// Whether other processes may be serving the same socket concurrently
    pub multiprocess: bool,
}

impl ServerIdentity {
    pub fn new(name: impl Into<String>, port: u16, software: impl Into<String>) -> Self {
        Self {
            scheme: "http".to_string(),
            name: name.into(),
            port,
            software: software.into(),
            multithread: false,
            multiprocess: false,
        }
    }

    pub fn multithread(mut self, multithread: bool) -> Self {
        self.multithread = multithread;
        self
    }

    pub fn multiprocess(mut self, multiprocess: bool) -> Self {
        self.multiprocess = multiprocess;
        self
    }
}

/// The request context handed to the application for one request.
///
/// Built fresh for every request and never mutated afterwards, apart from
/// the application consuming the body stream.
#[derive(Debug)]
pub struct Environ {
    request: RequestLine,
    input: Cursor<Bytes>,
    url_scheme: String,
    server_name: String,
    server_port: String,
    multithread: bool,
    multiprocess: bool,
}

impl Environ {
    /// Builds the context from a parsed request line, the body bytes that
    /// arrived with it, and the server identity. Performs no I/O.
    pub fn build(request: RequestLine, body: Bytes, identity: &ServerIdentity) -> Self {
        Self {
            request,
            input: Cursor::new(body),
            url_scheme: identity.scheme.clone(),
            server_name: identity.name.clone(),
            server_port: identity.port.to_string(),
            multithread: identity.multithread,
            multiprocess: identity.multiprocess,
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn protocol(&self) -> &str {
        &self.request.version
    }

    pub fn url_scheme(&self) -> &str {
        &self.url_scheme
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> &str {
        &self.server_port
    }

    pub fn gateway_version(&self) -> (u8, u8) {
        GATEWAY_VERSION
    }

    pub fn multithread(&self) -> bool {
        self.multithread
    }

    pub fn multiprocess(&self) -> bool {
        self.multiprocess
    }

    pub fn run_once(&self) -> bool {
        false
    }

    /// Readable stream over the already-buffered request body.
    pub fn input(&mut self) -> &mut Cursor<Bytes> {
        &mut self.input
    }

    /// CGI-style lookup of the string variables.
    pub fn var(&self, name: &str) -> Option<&str> {
        match name {
            "REQUEST_METHOD" => Some(self.method()),
            "PATH_INFO" => Some(self.path()),
            "SERVER_PROTOCOL" => Some(self.protocol()),
            "SERVER_NAME" => Some(self.server_name()),
            "SERVER_PORT" => Some(self.server_port()),
            "wsgi.url_scheme" => Some(self.url_scheme()),
            _ => None,
        }
    }
}
