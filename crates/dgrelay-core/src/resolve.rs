//! Name resolution and datagram-socket setup.
//!
//! Endpoints resolve through the OS resolver requesting datagram use; bind
//! and connect attempts walk the returned addresses in order and keep the
//! first that succeeds, IPv4 or IPv6 alike.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{Error, Result};

/// Socket receive/send buffer size requested for UDP endpoints. The kernel
/// may clamp it; failures to grow the buffer are not fatal.
const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Resolve `host:port` for datagram use. Fails if the resolver returns
/// nothing.
pub fn resolve_datagram(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::Resolve {
            host: host.to_string(),
            port,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Resolve {
            host: host.to_string(),
            port,
        });
    }
    for addr in &addrs {
        debug!(%addr, "resolved datagram address");
    }
    Ok(addrs)
}

/// Bind a datagram socket to the first workable address in `addrs`.
pub fn bind_datagram(addrs: &[SocketAddr]) -> io::Result<Socket> {
    try_each(addrs, |socket, addr| socket.bind(&addr.into()), "bound")
}

/// Connect a datagram socket to the first workable address in `addrs`,
/// fixing the default peer for subsequent sends.
pub fn connect_datagram(addrs: &[SocketAddr]) -> io::Result<Socket> {
    try_each(addrs, |socket, addr| socket.connect(&addr.into()), "connected")
}

fn try_each(
    addrs: &[SocketAddr],
    attach: impl Fn(&Socket, SocketAddr) -> io::Result<()>,
    verb: &str,
) -> io::Result<Socket> {
    let mut last_err = None;
    for &addr in addrs {
        let socket = match Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        {
            Ok(socket) => socket,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };
        if let Err(err) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!(%addr, %err, "could not grow receive buffer");
        }
        if let Err(err) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!(%addr, %err, "could not grow send buffer");
        }
        match attach(&socket, addr) {
            Ok(()) => {
                debug!(%addr, "{} datagram socket", verb);
                return Ok(socket);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to try")
    }))
}
