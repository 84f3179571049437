//! HTTP protocol implementation.
//!
//! Just enough HTTP/1.1 to answer one request per connection: the request
//! line is parsed, headers are skipped, and the response body is terminated
//! by closing the connection.
//!
//! # Architecture
//!
//! - **`connection`**: The per-connection state machine and error taxonomy
//! - **`parser`**: Parses the request line out of a single read
//! - **`request`**: The parsed request line
//! - **`environ`**: The request context handed to the application
//! - **`response`**: The start-response collector and the lazy body type
//! - **`writer`**: Serializes and writes the response to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────────┐
//!        │ AwaitingRequest │ ← One bounded read
//!        └──────┬──────────┘
//!               │ Bytes received (zero bytes → Done)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Parse, build environ, call the application
//!        └──────┬───────────┘
//!               │ Status and headers collected, body realized
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ▼
//!        ┌──────────────────┐
//!        │      Done        │ ← Caller deregisters and closes
//!        └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use preforkd::app::PlainTextApp;
//! use preforkd::http::connection::Connection;
//! use preforkd::http::environ::ServerIdentity;
//! use std::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080")?;
//! let identity = ServerIdentity::new("localhost", 8080, "preforkd");
//! for stream in listener.incoming() {
//!     let stream = stream?;
//!     let peer = stream.peer_addr()?;
//!     let mut conn = Connection::new(stream, peer, 8192);
//!     if let Err(e) = conn.run(&PlainTextApp, &identity, None) {
//!         eprintln!("Connection error: {}", e);
//!     }
//! }
//! ```

pub mod connection;
pub mod environ;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
