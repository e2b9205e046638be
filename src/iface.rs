//! Network interface and IPv4 route discovery.
//!
//! Interfaces come from `pnet_datalink`. Routes are read from
//! `/proc/net/route`; the parser takes the file contents so it can be used on
//! any input.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};
use pnet_datalink::{self, NetworkInterface};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PacketError;
use crate::ethernet::{self, MacAddress};
use crate::ip::{self, Ipv4Address};
use crate::raw;

const PROC_NET_ROUTE: &str = "/proc/net/route";

pub const LOOPBACK_NAME: &str = "lo";

const ARPHRD_ETHER: u16 = 1;
const ARPHRD_LOOPBACK: u16 = 772;
const ARPHRD_NONE: u16 = 65534;
/// Anything else; frames are left undecoded.
const ARPHRD_VOID: u16 = 0xFFFF;

const RTF_UP: u32 = 0x0001;
const RTF_REJECT: u32 = 0x0200;

/// Information about a network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "eth0", "wlan0")
    pub name: String,
    /// Kernel interface index, as used in `sockaddr_ll`
    pub index: u32,
    /// Name of the layer frames on this interface start with
    pub link_layer: String,
    /// Hardware address; `None` when the interface has none (or an all-zero one)
    pub mac: Option<MacAddress>,
    /// Assigned networks, address plus prefix
    pub ips: Vec<IpNet>,
    pub is_up: bool,
    pub is_loopback: bool,
}

impl From<&NetworkInterface> for InterfaceInfo {
    fn from(iface: &NetworkInterface) -> Self {
        let mac = iface
            .mac
            .map(|mac| MacAddress::new([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]))
            .filter(|mac| *mac != MacAddress::ZERO);
        let ips = iface
            .ips
            .iter()
            .filter_map(|network| IpNet::new(network.ip(), network.prefix()).ok())
            .collect();

        InterfaceInfo {
            name: iface.name.clone(),
            index: iface.index,
            link_layer: link_layer_for(hardware_type(iface, mac.is_some())).to_string(),
            mac,
            ips,
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
        }
    }
}

impl InterfaceInfo {
    /// First IPv4 address assigned to the interface.
    pub fn ipv4(&self) -> Option<Ipv4Address> {
        self.ips.iter().find_map(|network| match network.addr() {
            IpAddr::V4(addr) => Some(Ipv4Address::from(addr)),
            IpAddr::V6(_) => None,
        })
    }
}

/// The `ARPHRD_*` type the interface flags imply. Linux loopback frames carry
/// an Ethernet header; point-to-point links without a hardware address (tun,
/// WireGuard) deliver bare IP packets.
fn hardware_type(iface: &NetworkInterface, has_mac: bool) -> u16 {
    if iface.is_loopback() {
        ARPHRD_LOOPBACK
    } else if iface.is_point_to_point() && !has_mac {
        ARPHRD_NONE
    } else if has_mac {
        ARPHRD_ETHER
    } else {
        ARPHRD_VOID
    }
}

/// Dissection root for an `ARPHRD_*` hardware type.
pub fn link_layer_for(hardware_type: u16) -> &'static str {
    match hardware_type {
        ARPHRD_ETHER | ARPHRD_LOOPBACK => ethernet::NAME,
        ARPHRD_NONE => ip::NAME,
        _ => raw::RAW,
    }
}

/// List all available network interfaces
///
/// # Returns
/// Every interface `pnet_datalink` reports, or `UnknownInterface` when it
/// reports none at all
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>, PacketError> {
    let interfaces = pnet_datalink::interfaces();
    if interfaces.is_empty() {
        return Err(PacketError::UnknownInterface(LOOPBACK_NAME.to_string()));
    }
    debug!(count = interfaces.len(), "listed interfaces");
    Ok(interfaces.iter().map(InterfaceInfo::from).collect())
}

/// Looks an interface up by name.
///
/// # Arguments
/// * `name` - Interface name, e.g. `"eth0"`
///
/// # Returns
/// The interface, or `UnknownInterface` when no interface has that name
pub fn interface(name: &str) -> Result<InterfaceInfo, PacketError> {
    pnet_datalink::interfaces()
        .iter()
        .find(|iface| iface.name == name)
        .map(InterfaceInfo::from)
        .ok_or_else(|| PacketError::UnknownInterface(name.to_string()))
}

/// First interface that is up, other than loopback; loopback if none is.
pub fn working_interface() -> Result<InterfaceInfo, PacketError> {
    let interfaces = list_interfaces()?;
    interfaces
        .iter()
        .find(|info| !info.is_loopback && info.is_up)
        .or_else(|| interfaces.iter().find(|info| info.is_loopback))
        .cloned()
        .ok_or_else(|| PacketError::UnknownInterface(LOOPBACK_NAME.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Ipv4Net,
    pub gateway: Ipv4Address,
    pub interface: String,
    pub metric: u32,
}

impl Route {
    pub fn prefix_len(&self) -> u8 {
        self.destination.prefix_len()
    }

    pub fn netmask(&self) -> Ipv4Address {
        self.destination.netmask().into()
    }

    pub fn contains(&self, addr: Ipv4Address) -> bool {
        self.destination.contains(&Ipv4Addr::from(addr))
    }

    /// True for directly connected networks.
    pub fn is_direct(&self) -> bool {
        self.gateway == Ipv4Address::UNSPECIFIED
    }

    /// Where a packet for `dst` goes next: the gateway, or `dst` itself on a
    /// directly connected network.
    pub fn next_hop(&self, dst: Ipv4Address) -> Ipv4Address {
        if self.is_direct() { dst } else { self.gateway }
    }
}

/// Addresses in `/proc/net/route` are hex words in host (little-endian) order.
fn route_addr(hex: &str) -> Option<Ipv4Addr> {
    u32::from_str_radix(hex, 16)
        .ok()
        .map(|word| Ipv4Addr::from(word.to_le_bytes()))
}

/// Usable routes from the contents of `/proc/net/route`. Routes that are
/// down or rejecting are dropped, as are malformed lines.
pub fn parse_proc_net_route(contents: &str) -> Vec<Route> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 8 {
                return None;
            }
            let flags = u32::from_str_radix(cols[3], 16).ok()?;
            if flags & RTF_UP == 0 || flags & RTF_REJECT != 0 {
                return None;
            }
            let destination = Ipv4Net::with_netmask(route_addr(cols[1])?, route_addr(cols[7])?).ok()?;
            Some(Route {
                interface: cols[0].to_string(),
                destination: destination.trunc(),
                gateway: route_addr(cols[2])?.into(),
                metric: cols[6].parse().ok()?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Reads the kernel's IPv4 routing table.
    pub fn read() -> Result<Self, PacketError> {
        let routes = parse_proc_net_route(&fs::read_to_string(PROC_NET_ROUTE)?);
        debug!(routes = routes.len(), "read routing table");
        Ok(Self::from_routes(routes))
    }

    pub fn from_routes(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Picks the route a packet for `addr` takes.
    ///
    /// # Arguments
    /// * `addr` - Destination address
    ///
    /// # Returns
    /// The longest matching prefix, lowest metric among equals, or `None`
    /// when no route covers `addr`
    pub fn lookup(&self, addr: Ipv4Address) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.contains(addr))
            .min_by_key(|route| (std::cmp::Reverse(route.prefix_len()), route.metric))
    }
}
