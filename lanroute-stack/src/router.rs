use crate::NetworkInterface;
use lanroute_packets::{EthernetFrame, Ipv4Packet};
use log::{debug, trace};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

struct Route {
    prefix: u32,
    prefix_len: u8,
    next_hop: Option<Ipv4Addr>,
    interface: usize,
}

/// A router over a set of [`NetworkInterface`]s.
///
/// Routes are appended by the owner at configuration time and scanned linearly per datagram;
/// the longest matching prefix wins, and among equal-length matches the route added last
/// wins. At the handful-of-routes scale this targets, the scan beats the bookkeeping of a
/// trie.
///
/// Datagrams enter through [`receive_frame`](Router::receive_frame), which parks them in a
/// per-interface inbound queue; each [`route`](Router::route) pass drains those queues in
/// interface order and hands every datagram to the egress interface chosen by the table.
/// Retry and backoff live entirely in the egress interface's ARP machinery — the router
/// itself forwards once or drops.
#[derive(Default)]
pub struct Router {
    interfaces: Vec<NetworkInterface>,
    inbound: Vec<VecDeque<Ipv4Packet>>,
    routes: Vec<Route>,
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Attaches an interface and returns its index, the handle used by routes and by the
    /// frame-level accessors below.
    pub fn add_interface(&mut self, interface: NetworkInterface) -> usize {
        self.interfaces.push(interface);
        self.inbound.push(VecDeque::new());
        self.interfaces.len() - 1
    }

    pub fn interface(&self, interface: usize) -> &NetworkInterface {
        &self.interfaces[interface]
    }

    /// Appends a route: datagrams whose destination matches the leading `prefix_len` bits of
    /// `prefix` leave through `interface`, addressed to `next_hop` — or to their own
    /// destination when `next_hop` is `None` (directly attached network).
    pub fn add_route(
        &mut self,
        prefix: Ipv4Addr,
        prefix_len: u8,
        next_hop: Option<Ipv4Addr>,
        interface: usize,
    ) {
        debug!(
            "adding route {}/{} => {} on interface {}",
            prefix,
            prefix_len,
            next_hop.map_or_else(|| "(direct)".to_string(), |hop| hop.to_string()),
            interface
        );
        debug_assert!(prefix_len <= 32);

        self.routes.push(Route {
            prefix: u32::from(prefix),
            prefix_len,
            next_hop,
            interface,
        });
    }

    /// Feeds one frame from the wire into the named interface. If the interface surfaces an
    /// IPv4 datagram it is parked for the next `route` pass; ARP traffic is absorbed by the
    /// interface itself.
    pub fn receive_frame(&mut self, interface: usize, frame: EthernetFrame) {
        if let Some(dgram) = self.interfaces[interface].on_frame_received(frame) {
            self.inbound[interface].push_back(dgram);
        }
    }

    /// Pops the oldest outbound frame of the named interface.
    pub fn take_ready(&mut self, interface: usize) -> Option<EthernetFrame> {
        self.interfaces[interface].take_ready()
    }

    /// Advances every interface's logical clock by `elapsed` milliseconds.
    pub fn advance_time(&mut self, elapsed: u64) {
        for interface in &mut self.interfaces {
            interface.advance_time(elapsed);
        }
    }

    /// One scheduling pass: drains every interface's inbound datagrams, in interface order,
    /// and forwards each one.
    pub fn route(&mut self) {
        for interface in 0..self.interfaces.len() {
            while let Some(dgram) = self.inbound[interface].pop_front() {
                self.route_datagram(dgram);
            }
        }
    }

    fn route_datagram(&mut self, mut dgram: Ipv4Packet) {
        if dgram.ttl() == 0 {
            trace!("dropping datagram to {}: TTL expired on arrival", dgram.dest_addr());
            return;
        }

        let dest = u32::from(dgram.dest_addr());
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            let matches = dest & prefix_mask(route.prefix_len) == route.prefix;
            if matches && best.map_or(true, |b| route.prefix_len >= b.prefix_len) {
                best = Some(route);
            }
        }

        let route = match best {
            Some(route) => route,
            None => {
                trace!("dropping datagram to {}: no matching route", dgram.dest_addr());
                return;
            }
        };

        let ttl = dgram.ttl() - 1;
        if ttl == 0 {
            // Don't bother the next hop with a datagram it would only discard.
            trace!("dropping datagram to {}: TTL exhausted", dgram.dest_addr());
            return;
        }
        dgram.set_ttl(ttl);
        dgram.set_checksum();

        let next_hop = route.next_hop.unwrap_or_else(|| dgram.dest_addr());
        self.interfaces[route.interface].resolve_and_send(dgram, next_hop);
    }
}
