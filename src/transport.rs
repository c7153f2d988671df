//! Multicast UDP socket, send loop and receive loop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::config::ResponderConfig;
use crate::name::Name;
use crate::responder::Responder;

pub const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;
pub const UDP_SIZE: usize = 9000;
const RECV_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Outbound packet handed from the responder to the send loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendCommand {
    /// Send to the multicast group
    Multicast(Vec<u8>),
    /// Send to a specific address (legacy unicast reply)
    Unicast(Vec<u8>, SocketAddr),
}

/// The local host as advertised in service records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: Name,
    pub addr: Ipv4Addr,
}

fn set_reuse(sock: &Socket) -> Result<()> {
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        match sock.set_reuse_port(true) {
            Ok(()) => {
                // SO_REUSEADDR is still needed to share the port with responders that only set it
                let _ = sock.set_reuse_address(true);
                return Ok(());
            }
            Err(e) => log::warn!("set SO_REUSEPORT failed: {}, trying SO_REUSEADDR", e),
        }
    }
    sock.set_reuse_address(true)
        .context("neither SO_REUSEPORT nor SO_REUSEADDR could be set")
}

/// Bind to the mDNS port on the wildcard address and join the multicast group on
/// `interface` (unspecified selects the default interface).
pub(crate) fn create_multicast_socket(
    config: &ResponderConfig,
    interface: Ipv4Addr,
) -> Result<std::net::UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    set_reuse(&sock)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    sock.bind(&socket2::SockAddr::from(addr))
        .context(format!("binding {}", addr))?;
    sock.join_multicast_v4(&config.multicast_addr, &interface)
        .context(format!("joining {} on {}", config.multicast_addr, interface))?;
    if !interface.is_unspecified() {
        sock.set_multicast_if_v4(&interface)?;
    }
    sock.set_ttl(255)?;
    sock.set_multicast_ttl_v4(255)?;
    sock.set_multicast_loop_v4(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Work out the host name and address to advertise, preferring the configured values.
pub(crate) fn local_host(config: &ResponderConfig) -> Result<Host> {
    let hostname = match &config.hostname {
        Some(h) => h.clone(),
        None => hostname::get()
            .context("reading host name")?
            .to_string_lossy()
            .into_owned(),
    };
    let mut name = Name::parse(hostname.trim_end_matches('.'))?;
    if name.len() == 1 {
        name = name.join(&Name::parse("local.")?)?;
    }
    name.set_absolute(true);

    let addr = match config.host_address {
        Some(a) => a,
        None => first_ipv4().context("no non-loopback IPv4 address found")?,
    };
    Ok(Host { name, addr })
}

fn first_ipv4() -> Option<Ipv4Addr> {
    if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
}

pub(crate) async fn send_loop(
    socket: Arc<UdpSocket>,
    group: SocketAddr,
    mut rx: UnboundedReceiver<SendCommand>,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(c) => c,
                    None => return,
                }
            }
            _ = cancel.cancelled() => return,
        };

        let (data, dest) = match cmd {
            SendCommand::Multicast(data) => (data, group),
            SendCommand::Unicast(data, addr) => (data, addr),
        };
        if let Err(e) = socket.send_to(&data, dest).await {
            log::warn!("send to {} failed: {}", dest, e);
        }
    }
}

/// Pause before reading again after a failed receive, so a socket stuck in an error
/// state does not spin. Returns false when cancelled meanwhile.
async fn pause_after_error(e: &std::io::Error, cancel: &CancellationToken) -> bool {
    log::warn!("recv error: {}", e);
    tokio::select! {
        _ = tokio::time::sleep(RECV_ERROR_PAUSE) => true,
        _ = cancel.cancelled() => false,
    }
}

pub(crate) async fn recv_loop(
    socket: Arc<UdpSocket>,
    responder: Weak<Responder>,
    udp_size: usize,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; udp_size];
    loop {
        let (n, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        if !pause_after_error(&e, &cancel).await {
                            return;
                        }
                        continue;
                    }
                }
            }
            _ = cancel.cancelled() => return,
        };
        let Some(responder) = responder.upgrade() else {
            return;
        };
        if let Err(e) = responder.handle_packet(&buf[..n], from).await {
            log::error!("handling packet from {} failed: {:?}", from, e);
        }
    }
}
