use std::ffi::CStr;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{FromRawFd, RawFd};

use anyhow::Context;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::config::{BindSource, Config, Mode};
use crate::http::environ::ServerIdentity;

const NI_MAXHOST: usize = 1025;

/// Result of one non-blocking accept.
#[derive(Debug)]
pub enum Accept {
    Accepted(TcpStream, SocketAddr),
    /// Nothing pending, usually because another worker won the race.
    WouldBlock,
}

/// Creates or adopts the listening socket and puts it in non-blocking mode.
pub fn bind(source: &BindSource) -> anyhow::Result<TcpListener> {
    let listener = match source {
        BindSource::Fresh {
            addr,
            backlog,
            reuse_port,
        } => bind_fresh(addr, *backlog, *reuse_port)?,
        BindSource::Inherited(fd) => adopt(*fd)?,
    };

    listener.set_nonblocking(true)?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

fn bind_fresh(addr: &str, backlog: i32, reuse_port: bool) -> anyhow::Result<TcpListener> {
    let addr = addr
        .to_socket_addrs()
        .with_context(|| format!("resolving listen address {}", addr))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("listen address {} resolved to nothing", addr))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket
        .bind(&addr.into())
        .with_context(|| format!("binding {}", addr))?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

fn adopt(fd: RawFd) -> anyhow::Result<TcpListener> {
    // Safety: the descriptor was opened by our parent for us and nothing else
    // in this process owns it.
    let socket = unsafe { Socket::from_raw_fd(fd) };
    anyhow::ensure!(
        socket.r#type()? == Type::STREAM,
        "inherited descriptor {} is not a stream socket",
        fd
    );
    socket
        .local_addr()?
        .as_socket()
        .ok_or_else(|| anyhow::anyhow!("inherited descriptor {} is not an inet socket", fd))?;

    info!(fd, "adopted inherited listening socket");
    Ok(socket.into())
}

/// Accepts one pending connection without blocking.
///
/// Aborted handshakes and connections carrying a pending network error are
/// skipped. Running out of descriptors or buffers is
/// logged and reported as [`Accept::WouldBlock`]; every other error means the
/// listening socket itself is unusable.
pub fn accept(listener: &TcpListener) -> io::Result<Accept> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => return Ok(Accept::Accepted(stream, peer)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("nothing to accept");
                return Ok(Accept::WouldBlock);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) if is_pending_network_error(&e) => {
                debug!(error = %e, "skipping connection with a pending network error");
                continue;
            }
            Err(e) if is_resource_exhaustion(&e) => {
                warn!(error = %e, "accept failed, out of resources");
                return Ok(Accept::WouldBlock);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors Linux `accept` passes through from the new connection rather than
/// the listening socket. These are retried like `EAGAIN`.
fn is_pending_network_error(e: &io::Error) -> bool {
    let Some(code) = e.raw_os_error() else {
        return false;
    };

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if code == libc::ENONET {
        return true;
    }

    matches!(
        code,
        libc::ENETDOWN
            | libc::EPROTO
            | libc::ENOPROTOOPT
            | libc::EHOSTDOWN
            | libc::EHOSTUNREACH
            | libc::EOPNOTSUPP
            | libc::ENETUNREACH
            | libc::EPERM
    )
}

fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

/// Derives the identity reported to applications from the bound socket.
pub fn server_identity(listener: &TcpListener, config: &Config) -> io::Result<ServerIdentity> {
    let local = listener.local_addr()?;
    let name = match &config.server_name {
        Some(name) => name.clone(),
        None => resolve_server_name(local.ip()),
    };

    Ok(ServerIdentity::new(name, local.port(), &config.server_software)
        .multithread(config.mode == Mode::Threaded)
        .multiprocess(matches!(config.mode, Mode::Forking | Mode::Prefork)))
}

/// Fully qualified name for a local address.
///
/// Unspecified addresses map to the host name; anything else goes through
/// reverse resolution and falls back to the textual address.
pub fn resolve_server_name(ip: IpAddr) -> String {
    if ip.is_unspecified() {
        return nix::unistd::gethostname()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_else(|| ip.to_string());
    }

    reverse_lookup(ip).unwrap_or_else(|| ip.to_string())
}

fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let addr = SockAddr::from(SocketAddr::new(ip, 0));
    let mut host = [0 as libc::c_char; NI_MAXHOST];

    // Safety: `addr` is a valid sockaddr of `addr.len()` bytes and `host` is
    // a writable buffer of the advertised length.
    let rc = unsafe {
        libc::getnameinfo(
            addr.as_ptr(),
            addr.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }

    // Safety: on success getnameinfo wrote a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    name.to_str().ok().map(str::to_string)
}
