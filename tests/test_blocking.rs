use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use preforkd::app::{Application, PlainTextApp, from_fn};
use preforkd::config::{Config, Mode};
use preforkd::http::response::Body;
use preforkd::server::{ServerContext, blocking, listener};

type Serve<A> = fn(&ServerContext<A>, &AtomicBool) -> anyhow::Result<()>;

/// A server running on a background thread until `shutdown`.
struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<anyhow::Result<()>>,
}

impl Running {
    fn shutdown(self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.done
            .recv_timeout(Duration::from_secs(5))
            .expect("server did not stop")
    }
}

fn start<A: Application + 'static>(mode: Mode, app: A, serve: Serve<A>) -> Running {
    let config = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        mode,
        poll_interval_ms: 20,
        write_timeout_ms: Some(2000),
        server_name: Some("localhost".to_string()),
        ..Config::default()
    };
    let listener = listener::bind(&config.bind_source()).unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = Arc::new(ServerContext::new(config, listener, app).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, done) = mpsc::channel();
    let flag = Arc::clone(&stop);
    thread::spawn(move || {
        let _ = tx.send(serve(&ctx, &flag));
    });

    Running { addr, stop, done }
}

fn get(addr: SocketAddr, path: &str) -> String {
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
        .write_all(format!("GET {} HTTP/1.1\r\n\r\n", path).as_bytes())
        .unwrap();

    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    response
}

fn worker_of(response: &str) -> u32 {
    response
        .lines()
        .find_map(|line| line.strip_prefix("X-Worker: "))
        .expect("response carries the worker id")
        .parse()
        .unwrap()
}

#[test]
fn test_serial_serves_requests_in_turn() {
    let server = start(Mode::Blocking, PlainTextApp, blocking::serve_serial);

    for (path, body) in [("/", "index\n"), ("/foo", "foo\n"), ("/bar", "bar\n")] {
        let response = get(server.addr, path);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(&format!("\r\n\r\n{}", body)));
        assert_eq!(worker_of(&response), std::process::id());
    }

    server.shutdown().unwrap();
}

#[test]
fn test_serial_stops_while_client_is_idle() {
    let server = start(Mode::Blocking, PlainTextApp, blocking::serve_serial);

    let mut idle = TcpStream::connect(server.addr).unwrap();
    idle.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    thread::sleep(Duration::from_millis(100));

    server.shutdown().unwrap();

    let mut leftover = Vec::new();
    idle.read_to_end(&mut leftover).unwrap();
    assert!(leftover.is_empty());
}

#[test]
fn test_threaded_answers_while_another_client_is_idle() {
    let app = from_fn(|env, start| {
        start.start("200 OK", [("Content-Type", "text/plain")], None)?;
        Ok(Body::from(format!("multithread={}", env.multithread())))
    });
    let server = start(Mode::Threaded, app, blocking::serve_threaded);

    let _idle = TcpStream::connect(server.addr).unwrap();
    thread::sleep(Duration::from_millis(50));

    for _ in 0..4 {
        let response = get(server.addr, "/");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nmultithread=true"));
    }

    server.shutdown().unwrap();
}

#[test]
fn test_forking_answers_in_children_and_reaps_them() {
    let server = start(Mode::Forking, PlainTextApp, blocking::serve_forking);

    let mut handlers = HashSet::new();
    for _ in 0..4 {
        let response = get(server.addr, "/foo");
        assert!(response.ends_with("\r\n\r\nfoo\n"));
        handlers.insert(worker_of(&response));
    }
    assert_eq!(handlers.len(), 4);
    assert!(!handlers.contains(&std::process::id()));

    server.shutdown().unwrap();

    // Every handler child has been collected.
    assert_eq!(
        waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    );
}
