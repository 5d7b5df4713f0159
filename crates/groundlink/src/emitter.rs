//! Outbound control datagrams.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::config::Endpoint;
use crate::scorer::ScoredOutput;
use crate::wire;

/// Destination for scored messages.
pub trait Emitter {
    fn emit(&mut self, out: &ScoredOutput) -> io::Result<()>;
}

/// Sends each message as one UDP datagram to a fixed target.
pub struct UdpEmitter {
    socket: UdpSocket,
    target: String,
    addr: SocketAddr,
}

impl UdpEmitter {
    /// Resolve `target` and bind an ephemeral local socket of the same
    /// address family.
    pub fn new(target: &Endpoint) -> io::Result<Self> {
        let target = target.to_string();
        let addr = resolve(&target)?;
        let local: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        Ok(Self {
            socket,
            target,
            addr,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Address datagrams are currently sent to.
    pub fn peer(&self) -> SocketAddr {
        self.addr
    }
}

impl Emitter for UdpEmitter {
    fn emit(&mut self, out: &ScoredOutput) -> io::Result<()> {
        let datagram = wire::encode_datagram(out);
        match self.socket.send_to(&datagram, self.addr) {
            Ok(_) => Ok(()),
            Err(e) => {
                // The controller may have moved; look it up again for the
                // next message.
                match resolve(&self.target) {
                    // The socket is bound to one address family.
                    Ok(addr) if addr != self.addr && addr.is_ipv6() == self.addr.is_ipv6() => {
                        tracing::debug!(controller = %self.target, %addr, "control target re-resolved");
                        self.addr = addr;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(controller = %self.target, error = %err, "control target lookup failed")
                    }
                }
                Err(e)
            }
        }
    }
}

fn resolve(target: &str) -> io::Result<SocketAddr> {
    target.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address for {target}"),
        )
    })
}
