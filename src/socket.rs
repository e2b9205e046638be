//! Link-layer raw sockets (Linux `AF_PACKET`).
//!
//! [`PacketSocket`] is bound to one interface and sends and receives whole
//! frames, link header included. [`AsyncPacketSocket`] is the same socket
//! driven by tokio. [`L3PacketSocket`] takes IPv4 packets, picks the
//! interface from the routing table and adds the link header itself.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::mem::{self, MaybeUninit};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::arp;
use crate::capture::{self, AsyncLink, CancelToken, CaptureConfig, DEFAULT_SNAPLEN, Link};
use crate::codec::Dissector;
use crate::error::PacketError;
use crate::ethernet::{self, MacAddress};
use crate::iface::{self, InterfaceInfo, Route, RouteTable};
use crate::ip::{self, Ipv4Address};
use crate::packet::Packet;
use crate::registry;
use crate::value::Value;

const AF_PACKET: u16 = 17;
/// Every protocol
const ETH_P_ALL: u16 = 0x0003;
/// `sizeof(struct sockaddr_ll)`
const SOCKADDR_LL_LEN: usize = 20;

/// Smallest read timeout the kernel accepts; zero means "block forever".
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// How long an ARP lookup waits for its answer.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

fn open_raw(info: &InterfaceInfo) -> io::Result<Socket> {
    let protocol = Protocol::from(i32::from(ETH_P_ALL.to_be()));
    let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol))?;
    socket.bind(&link_address(info.index)?)?;
    debug!(interface = %info.name, index = info.index, "opened packet socket");
    Ok(socket)
}

/// A `sockaddr_ll` naming an interface, for every protocol.
fn link_address(index: u32) -> io::Result<SockAddr> {
    let mut raw = [0u8; SOCKADDR_LL_LEN];
    raw[0..2].copy_from_slice(&AF_PACKET.to_ne_bytes());
    raw[2..4].copy_from_slice(&ETH_P_ALL.to_be_bytes());
    raw[4..8].copy_from_slice(&index.to_ne_bytes());
    // SAFETY: the storage is zeroed and larger than a sockaddr_ll; exactly
    // `raw.len()` bytes are written and reported.
    let ((), addr) = unsafe {
        SockAddr::try_init(|storage, len| {
            std::ptr::copy_nonoverlapping(raw.as_ptr(), storage.cast::<u8>(), raw.len());
            *len = raw.len() as _;
            Ok(())
        })
    }?;
    Ok(addr)
}

/// `struct packet_mreq` from `<linux/if_packet.h>`.
#[repr(C)]
#[allow(dead_code)]
struct PacketMreq {
    ifindex: libc::c_int,
    kind: libc::c_ushort,
    alen: libc::c_ushort,
    address: [libc::c_uchar; 8],
}

/// Adds or drops the promiscuous membership of `socket` on interface `index`.
/// The kernel drops it by itself when the socket is closed.
fn set_promisc_membership(socket: &Socket, index: u32, enable: bool) -> io::Result<()> {
    let mreq = PacketMreq {
        ifindex: index as libc::c_int,
        kind: libc::PACKET_MR_PROMISC as libc::c_ushort,
        alen: 0,
        address: [0; 8],
    };
    let option = if enable {
        libc::PACKET_ADD_MEMBERSHIP
    } else {
        libc::PACKET_DROP_MEMBERSHIP
    };
    // SAFETY: `mreq` is a live, fully initialized packet_mreq and the length
    // passed is its size.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_PACKET,
            option,
            (&mreq as *const PacketMreq).cast(),
            mem::size_of::<PacketMreq>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn recv_frame(socket: &Socket, snaplen: usize) -> io::Result<Vec<u8>> {
    let mut buffer: Vec<MaybeUninit<u8>> = vec![MaybeUninit::uninit(); snaplen];
    let n = socket.recv(&mut buffer)?;
    // SAFETY: recv initialized the first `n` bytes.
    Ok(buffer[..n]
        .iter()
        .map(|byte| unsafe { byte.assume_init() })
        .collect())
}

fn send_frame(socket: &Socket, frame: &[u8]) -> io::Result<()> {
    let sent = socket.send(frame)?;
    if sent != frame.len() {
        return Err(io::Error::new(
            ErrorKind::WriteZero,
            format!("short write: {sent} of {} bytes", frame.len()),
        ));
    }
    Ok(())
}

/// A blocking raw socket bound to one interface.
pub struct PacketSocket {
    socket: Socket,
    info: InterfaceInfo,
    snaplen: usize,
    promisc: bool,
}

impl PacketSocket {
    /// Opens a raw socket on the named interface. Needs `CAP_NET_RAW`.
    ///
    /// # Arguments
    /// * `name` - Interface to bind to, e.g. `"eth0"`
    ///
    /// # Returns
    /// The bound socket, `UnknownInterface` if there is no such interface, or
    /// an I/O error (typically `PermissionDenied`) from the kernel
    pub fn open(name: &str) -> Result<Self, PacketError> {
        let info = iface::interface(name)?;
        Ok(Self {
            socket: open_raw(&info)?,
            info,
            snaplen: DEFAULT_SNAPLEN,
            promisc: false,
        })
    }

    pub fn interface(&self) -> &InterfaceInfo {
        &self.info
    }

    /// Name of the layer received frames start with.
    pub fn link_layer(&self) -> &str {
        &self.info.link_layer
    }

    /// Sets the largest frame kept by `recv`; longer frames are cut.
    ///
    /// # Arguments
    /// * `snaplen` - Maximum bytes per frame, at least 1
    pub fn set_snaplen(&mut self, snaplen: usize) {
        self.snaplen = snaplen.max(1);
    }

    /// Switches promiscuous mode for as long as this socket stays open.
    ///
    /// # Arguments
    /// * `enable` - `true` to receive frames addressed to other hosts
    ///
    /// # Returns
    /// `Ok(())` once the kernel accepted the change
    pub fn set_promisc(&mut self, enable: bool) -> Result<(), PacketError> {
        set_promisc_membership(&self.socket, self.info.index, enable)?;
        self.promisc = enable;
        debug!(interface = %self.info.name, enable, "promiscuous mode");
        Ok(())
    }

    pub fn is_promisc(&self) -> bool {
        self.promisc
    }

    /// Hands the socket to the tokio reactor.
    ///
    /// # Returns
    /// The same socket, nonblocking, as an [`AsyncPacketSocket`]. Must be
    /// called from within a tokio runtime.
    pub fn into_async(self) -> io::Result<AsyncPacketSocket> {
        self.socket.set_nonblocking(true)?;
        Ok(AsyncPacketSocket {
            inner: AsyncFd::new(self.socket)?,
            info: self.info,
            snaplen: self.snaplen,
        })
    }
}

impl Link for PacketSocket {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        send_frame(&self.socket, frame)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        match recv_frame(&self.socket, self.snaplen) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A nonblocking raw socket registered with the tokio reactor.
pub struct AsyncPacketSocket {
    inner: AsyncFd<Socket>,
    info: InterfaceInfo,
    snaplen: usize,
}

impl AsyncPacketSocket {
    /// Opens a raw socket on the named interface and registers it with tokio.
    ///
    /// # Arguments
    /// * `name` - Interface to bind to
    ///
    /// # Returns
    /// The socket, or the errors of [`PacketSocket::open`]. Must be called
    /// from within a tokio runtime.
    pub fn open(name: &str) -> Result<Self, PacketError> {
        Ok(PacketSocket::open(name)?.into_async()?)
    }

    pub fn interface(&self) -> &InterfaceInfo {
        &self.info
    }

    pub fn link_layer(&self) -> &str {
        &self.info.link_layer
    }
}

impl AsyncLink for AsyncPacketSocket {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        loop {
            let mut guard = self.inner.writable().await?;
            if let Ok(result) = guard.try_io(|fd| send_frame(fd.get_ref(), frame)) {
                return result;
            }
        }
    }

    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        let snaplen = self.snaplen;
        loop {
            let mut guard = self.inner.readable().await?;
            if let Ok(result) = guard.try_io(|fd| recv_frame(fd.get_ref(), snaplen)) {
                return result;
            }
        }
    }
}

/// Opens the link for an interface name.
pub type LinkOpener<L> = fn(&str) -> Result<(L, InterfaceInfo), PacketError>;

struct Outbound<L> {
    link: L,
    info: InterfaceInfo,
}

/// Sends IPv4 packets out of the interface the routing table picks.
///
/// Links are opened on first use and kept. On Ethernet links the next hop's
/// hardware address is resolved with ARP and cached; an unset IPv4 source is
/// filled with the outgoing interface's address.
pub struct L3PacketSocket<L: Link = PacketSocket> {
    routes: RouteTable,
    open: LinkOpener<L>,
    links: HashMap<String, Outbound<L>>,
    neighbors: HashMap<Ipv4Address, MacAddress>,
    resolve: CaptureConfig,
}

impl L3PacketSocket<PacketSocket> {
    /// Reads the kernel routing table and sends through [`PacketSocket`]s.
    pub fn open() -> Result<Self, PacketError> {
        Ok(Self::with_routes(RouteTable::read()?, |name| {
            let socket = PacketSocket::open(name)?;
            let info = socket.interface().clone();
            Ok((socket, info))
        }))
    }
}

impl<L: Link> L3PacketSocket<L> {
    pub fn with_routes(routes: RouteTable, open: LinkOpener<L>) -> Self {
        Self {
            routes,
            open,
            links: HashMap::new(),
            neighbors: HashMap::new(),
            resolve: CaptureConfig::default().with_timeout(DEFAULT_RESOLVE_TIMEOUT),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The link opened for `interface`, if anything was sent there yet.
    pub fn link(&self, interface: &str) -> Option<&L> {
        self.links.get(interface).map(|out| &out.link)
    }

    pub fn set_resolve_timeout(&mut self, timeout: Duration) {
        self.resolve = self.resolve.clone().with_timeout(timeout);
    }

    /// Pins the hardware address of a neighbor, skipping ARP for it.
    pub fn add_neighbor(&mut self, addr: Ipv4Address, mac: MacAddress) {
        self.neighbors.insert(addr, mac);
    }

    /// Routes `packet` by its IPv4 destination and sends it.
    ///
    /// # Arguments
    /// * `packet` - A packet whose first layer is IPv4
    ///
    /// # Returns
    /// The length of the frame put on the wire; `InvalidOperation` when the
    /// packet does not start with IPv4, when no route covers its
    /// destination, or when the chosen interface cannot carry IPv4
    pub fn send(&mut self, packet: &Packet) -> Result<usize, PacketError> {
        if packet.layer(0).is_none_or(|layer| layer.name() != ip::NAME) {
            return Err(PacketError::InvalidOperation(format!(
                "routed send needs an IPv4 packet, got '{}'",
                packet.summary()
            )));
        }
        let dst = packet
            .get_field("dst", Some(0))
            .and_then(|value| value.as_ipv4())
            .ok_or_else(|| PacketError::InvalidFieldValue("IPv4 destination".to_string()))?;
        let route = self
            .routes
            .lookup(dst)
            .cloned()
            .ok_or_else(|| PacketError::InvalidOperation(format!("no route to {dst}")))?;
        let info = self.outbound(&route.interface)?.info.clone();

        let mut packet = packet.clone();
        if !packet.layers()[0].is_set("src") {
            if let Some(src) = info.ipv4() {
                packet = packet.set_field("src", src, Some(0))?;
            }
        }
        let frame = match info.link_layer.as_str() {
            ethernet::NAME => {
                let src = packet
                    .get_field("src", Some(0))
                    .and_then(|value| value.as_ipv4())
                    .unwrap_or(Ipv4Address::UNSPECIFIED);
                let dst_mac = self.next_hop_mac(&route, &info, route.next_hop(dst), src)?;
                let src_mac = info.mac.unwrap_or(MacAddress::ZERO);
                Packet::from(ethernet::frame(dst_mac, src_mac)?) / packet
            }
            ip::NAME => packet,
            other => {
                return Err(PacketError::InvalidOperation(format!(
                    "cannot send IPv4 over '{}' (link layer {other})",
                    info.name
                )));
            }
        };
        debug!(%dst, interface = %route.interface, "routed send");
        let out = self.outbound(&route.interface)?;
        capture::send(&mut out.link, &frame)
    }

    fn outbound(&mut self, name: &str) -> Result<&mut Outbound<L>, PacketError> {
        if !self.links.contains_key(name) {
            let (link, info) = (self.open)(name)?;
            debug!(interface = name, link_layer = %info.link_layer, "opened routed link");
            self.links.insert(name.to_string(), Outbound { link, info });
        }
        self.links
            .get_mut(name)
            .ok_or_else(|| PacketError::UnknownInterface(name.to_string()))
    }

    fn next_hop_mac(
        &mut self,
        route: &Route,
        info: &InterfaceInfo,
        hop: Ipv4Address,
        src: Ipv4Address,
    ) -> Result<MacAddress, PacketError> {
        if info.is_loopback {
            return Ok(MacAddress::ZERO);
        }
        let addr = Ipv4Addr::from(hop);
        if addr.is_broadcast() || (route.is_direct() && route.prefix_len() < 31 && addr == route.destination.broadcast()) {
            return Ok(MacAddress::BROADCAST);
        }
        if addr.is_multicast() {
            let [_, b, c, d] = hop.octets();
            return Ok(MacAddress::new([0x01, 0x00, 0x5E, b & 0x7F, c, d]));
        }
        if let Some(mac) = self.neighbors.get(&hop) {
            return Ok(*mac);
        }

        let src_mac = info.mac.unwrap_or(MacAddress::ZERO);
        let request = Packet::from(ethernet::frame(MacAddress::BROADCAST, src_mac)?) / arp::request(src_mac, src, hop)?;
        let dissector = Dissector::new(registry::global(), ethernet::NAME)?;
        let config = self.resolve.clone();
        let out = self.outbound(&route.interface)?;
        let answer = capture::send_and_match(
            &mut out.link,
            &dissector,
            &request,
            &config,
            &CancelToken::new(),
            &answers_who_has,
        )?;
        let resolved = answer.and_then(|reply| reply.get_field("hwsrc", reply.find(arp::NAME))?.as_mac());
        match resolved {
            Some(mac) => {
                debug!(%hop, %mac, "resolved neighbor");
                self.neighbors.insert(hop, mac);
                Ok(mac)
            }
            None => {
                warn!(%hop, "no ARP answer, using broadcast");
                Ok(MacAddress::BROADCAST)
            }
        }
    }
}

/// An ARP reply from the address a request asked about.
fn answers_who_has(request: &Packet, response: &Packet) -> bool {
    let (Some(q), Some(r)) = (request.find(arp::NAME), response.find(arp::NAME)) else {
        return false;
    };
    response.get_field("op", Some(r)) == Some(Value::Int(arp::Operation::Reply as u64))
        && response.get_field("psrc", Some(r)) == request.get_field("pdst", Some(q))
}
