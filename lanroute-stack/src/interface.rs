use lanroute_packets::{
    ArpFrame, ArpOp, EthernetFrame, Ipv4Packet, MacAddr, ARP_ETHER_TYPE, IPV4_ETHER_TYPE,
};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::net::Ipv4Addr;

struct CacheEntry {
    mac: MacAddr,
    learned_at: u64,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum PendingKind {
    /// A framed datagram with the destination MAC still unset.
    Datagram,
    /// The broadcast ARP request for a target, kept so the timer can re-arm it.
    ArpRequest,
}

struct PendingFrame {
    target: u32,
    frame: EthernetFrame,
    kind: PendingKind,
}

/// A network interface that speaks Ethernet on one side and hands IPv4 datagrams to its owner
/// on the other.
///
/// Time only moves when `advance_time` is called, so behavior is fully deterministic: ARP
/// cache entries expire after [`CACHE_TTL`](NetworkInterface::CACHE_TTL) logical milliseconds
/// and an unanswered request is re-broadcast every
/// [`RETRY_INTERVAL`](NetworkInterface::RETRY_INTERVAL). Datagrams waiting on resolution are
/// never dropped; they sit until a reply arrives.
pub struct NetworkInterface {
    mac: MacAddr,
    ip: Ipv4Addr,
    now: u64,
    cache: HashMap<u32, CacheEntry>,
    requested_at: HashMap<u32, u64>,
    pending: VecDeque<PendingFrame>,
    ready: VecDeque<EthernetFrame>,
}

impl NetworkInterface {
    /// How long a learned IP-to-MAC mapping stays valid, in logical milliseconds.
    pub const CACHE_TTL: u64 = 30_000;
    /// Minimum spacing between ARP requests for the same target, in logical milliseconds.
    pub const RETRY_INTERVAL: u64 = 5_000;

    pub fn new(mac: MacAddr, ip: Ipv4Addr) -> NetworkInterface {
        debug!("network interface has MAC address {} and IP address {}", mac, ip);
        NetworkInterface {
            mac,
            ip,
            now: 0,
            cache: HashMap::new(),
            requested_at: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Frames `dgram` for transmission to `next_hop`.
    ///
    /// On a cache hit the frame goes straight onto the outbound queue. Otherwise the datagram
    /// is parked with its destination MAC unset and an ARP request for `next_hop` is
    /// broadcast, unless one already went out within the last `RETRY_INTERVAL` — one request
    /// in flight per target is enough no matter how many datagrams pile up behind it.
    pub fn resolve_and_send(&mut self, dgram: Ipv4Packet, next_hop: Ipv4Addr) {
        let target = u32::from(next_hop);

        if let Some(entry) = self.cache.get(&target) {
            let dest = entry.mac;
            self.ready.push_back(self.frame_datagram(dgram, dest));
            return;
        }

        let mut frame = EthernetFrame::encap_ipv4(dgram);
        frame.set_src_mac(self.mac);
        self.pending.push_back(PendingFrame {
            target,
            frame,
            kind: PendingKind::Datagram,
        });

        match self.requested_at.get(&target) {
            Some(&at) if self.now - at < Self::RETRY_INTERVAL => {
                // a request is already in flight, let it do the work
            }
            _ => self.broadcast_request(next_hop),
        }
    }

    /// Accepts one frame off the wire. Frames not addressed to this interface (or broadcast)
    /// are ignored. An IPv4 frame for us decodes into the returned datagram; ARP traffic
    /// updates the cache and queues, and may queue a reply. Malformed payloads are dropped
    /// silently.
    pub fn on_frame_received(&mut self, frame: EthernetFrame) -> Option<Ipv4Packet> {
        let dest = frame.dest_mac();
        if dest != self.mac && !dest.is_broadcast() {
            return None;
        }

        match frame.ether_type() {
            IPV4_ETHER_TYPE if dest == self.mac => Ipv4Packet::try_from(frame).ok(),
            ARP_ETHER_TYPE => {
                self.handle_arp(frame);
                None
            }
            _ => None,
        }
    }

    /// Pops the oldest frame that is ready for the wire, if any. Strict FIFO.
    pub fn take_ready(&mut self) -> Option<EthernetFrame> {
        self.ready.pop_front()
    }

    /// Advances the logical clock by `elapsed` milliseconds, expiring stale cache entries and
    /// re-broadcasting any ARP request that has gone a full `RETRY_INTERVAL` without an
    /// answer. Parked datagrams are left alone regardless of age.
    pub fn advance_time(&mut self, elapsed: u64) {
        self.now += elapsed;
        let now = self.now;

        self.cache
            .retain(|_, entry| now - entry.learned_at < Self::CACHE_TTL);

        for entry in &self.pending {
            if entry.kind != PendingKind::ArpRequest {
                continue;
            }
            let stale = match self.requested_at.get(&entry.target) {
                Some(&at) => now - at >= Self::RETRY_INTERVAL,
                None => true,
            };
            if stale {
                self.ready.push_back(entry.frame.clone());
                self.requested_at.insert(entry.target, now);
            }
        }
    }

    fn handle_arp(&mut self, frame: EthernetFrame) {
        let message = match ArpFrame::try_from(frame) {
            Ok(message) => message,
            Err(_) => return,
        };
        let sender_mac = message.sender_hardware_addr();
        let sender_ip = message.sender_protocol_addr();

        // Requests and replies both name their sender, learn from either.
        self.cache.insert(
            u32::from(sender_ip),
            CacheEntry {
                mac: sender_mac,
                learned_at: self.now,
            },
        );

        if message.opcode() == ArpOp::Request as u16 {
            if message.target_protocol_addr() == self.ip {
                self.ready
                    .push_back(ArpFrame::reply(self.mac, self.ip, sender_mac, sender_ip).frame());
            }
        } else {
            self.release_pending(u32::from(sender_ip), sender_mac);
        }
    }

    /// A reply resolved `target`: every parked datagram for it gets its destination MAC
    /// filled in and moves to the outbound queue, in the order it was submitted. The request
    /// tracker and the rate-limit record are retired so a later cache expiry starts a fresh
    /// request cycle. Everything else keeps its relative order.
    fn release_pending(&mut self, target: u32, mac: MacAddr) {
        let mut keep = VecDeque::with_capacity(self.pending.len());
        while let Some(entry) = self.pending.pop_front() {
            if entry.target != target {
                keep.push_back(entry);
            } else if entry.kind == PendingKind::Datagram {
                let mut frame = entry.frame;
                frame.set_dest_mac(mac);
                self.ready.push_back(frame);
            }
        }
        self.pending = keep;
        self.requested_at.remove(&target);
    }

    fn broadcast_request(&mut self, next_hop: Ipv4Addr) {
        let target = u32::from(next_hop);
        let request = ArpFrame::request(self.mac, self.ip, next_hop).frame();
        self.ready.push_back(request.clone());

        // One tracker per target; a re-broadcast only refreshes the stamp.
        let tracked = self
            .pending
            .iter()
            .any(|entry| entry.kind == PendingKind::ArpRequest && entry.target == target);
        if !tracked {
            self.pending.push_back(PendingFrame {
                target,
                frame: request,
                kind: PendingKind::ArpRequest,
            });
        }
        self.requested_at.insert(target, self.now);
    }

    fn frame_datagram(&self, dgram: Ipv4Packet, dest: MacAddr) -> EthernetFrame {
        let mut frame = EthernetFrame::encap_ipv4(dgram);
        frame.set_src_mac(self.mac);
        frame.set_dest_mac(dest);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(byte: u8) -> MacAddr {
        MacAddr::new([byte; 6])
    }

    fn datagram(dest: Ipv4Addr, ttl: u8) -> Ipv4Packet {
        let mut dgram = Ipv4Packet::empty();
        dgram.set_src_addr(Ipv4Addr::new(1, 1, 1, 1));
        dgram.set_dest_addr(dest);
        dgram.set_ttl(ttl);
        dgram.set_checksum();
        dgram
    }

    fn interface_a() -> NetworkInterface {
        NetworkInterface::new(mac(0xaa), Ipv4Addr::new(1, 1, 1, 1))
    }

    fn interface_b() -> NetworkInterface {
        NetworkInterface::new(mac(0xbb), Ipv4Addr::new(2, 2, 2, 2))
    }

    fn drain(interface: &mut NetworkInterface) -> Vec<EthernetFrame> {
        let mut frames = vec![];
        while let Some(frame) = interface.take_ready() {
            frames.push(frame);
        }
        frames
    }

    fn arp_requests(frames: &[EthernetFrame]) -> usize {
        frames
            .iter()
            .filter(|f| f.ether_type() == ARP_ETHER_TYPE && f.dest_mac().is_broadcast())
            .count()
    }

    #[test]
    fn cache_hit_sends_immediately() {
        let mut a = interface_a();
        let b = interface_b();

        // A reply out of the blue still populates the cache.
        let reply = ArpFrame::reply(b.mac(), b.ip(), a.mac(), a.ip()).frame();
        assert!(a.on_frame_received(reply).is_none());

        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 9), 32), b.ip());
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ether_type(), IPV4_ETHER_TYPE);
        assert_eq!(frames[0].dest_mac(), b.mac());
        assert_eq!(frames[0].src_mac(), a.mac());
    }

    #[test]
    fn cache_entry_expires_after_ttl() {
        let mut a = interface_a();
        let b = interface_b();

        let reply = ArpFrame::reply(b.mac(), b.ip(), a.mac(), a.ip()).frame();
        a.on_frame_received(reply);

        a.advance_time(NetworkInterface::CACHE_TTL - 1);
        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 9), 32), b.ip());
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ether_type(), IPV4_ETHER_TYPE);

        // One more tick and the entry is gone, the next send has to ask again.
        a.advance_time(1);
        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 9), 32), b.ip());
        let frames = drain(&mut a);
        assert_eq!(arp_requests(&frames), 1);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn one_request_per_target_regardless_of_backlog() {
        let mut a = interface_a();
        let next_hop = Ipv4Addr::new(2, 2, 2, 2);

        for i in 0..5 {
            a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, i), 32), next_hop);
        }
        assert_eq!(arp_requests(&drain(&mut a)), 1);

        // Just shy of the interval, still suppressed.
        a.advance_time(NetworkInterface::RETRY_INTERVAL - 1);
        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 5), 32), next_hop);
        assert_eq!(arp_requests(&drain(&mut a)), 0);

        // Re-broadcasts land exactly one interval apart.
        a.advance_time(1);
        assert_eq!(arp_requests(&drain(&mut a)), 1);
        a.advance_time(NetworkInterface::RETRY_INTERVAL);
        assert_eq!(arp_requests(&drain(&mut a)), 1);
        a.advance_time(NetworkInterface::RETRY_INTERVAL - 1);
        assert_eq!(arp_requests(&drain(&mut a)), 0);
    }

    #[test]
    fn reply_releases_only_matching_datagrams_in_order() {
        let mut a = interface_a();
        let b = interface_b();
        let other_hop = Ipv4Addr::new(3, 3, 3, 3);

        for i in 0..3 {
            a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, i), 32), b.ip());
        }
        a.resolve_and_send(datagram(Ipv4Addr::new(8, 8, 8, 8), 32), other_hop);
        drain(&mut a); // two broadcasts, one per target

        let reply = ArpFrame::reply(b.mac(), b.ip(), a.mac(), a.ip()).frame();
        a.on_frame_received(reply);

        let frames = drain(&mut a);
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.ether_type(), IPV4_ETHER_TYPE);
            assert_eq!(frame.dest_mac(), b.mac());
            let dgram = Ipv4Packet::try_from(frame.clone()).unwrap();
            assert_eq!(dgram.dest_addr(), Ipv4Addr::new(9, 9, 9, i as u8));
        }

        // The datagram for the other hop is still parked.
        let reply = ArpFrame::reply(mac(0xcc), other_hop, a.mac(), a.ip()).frame();
        a.on_frame_received(reply);
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dest_mac(), mac(0xcc));
    }

    #[test]
    fn parked_datagrams_survive_long_waits() {
        let mut a = interface_a();
        let b = interface_b();

        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 9), 32), b.ip());
        drain(&mut a);

        // No reply for ten minutes; requests keep going out, the datagram stays parked.
        for _ in 0..120 {
            a.advance_time(NetworkInterface::RETRY_INTERVAL);
        }

        let reply = ArpFrame::reply(b.mac(), b.ip(), a.mac(), a.ip()).frame();
        a.on_frame_received(reply);
        let frames: Vec<_> = drain(&mut a)
            .into_iter()
            .filter(|f| f.ether_type() == IPV4_ETHER_TYPE)
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dest_mac(), b.mac());
    }

    #[test]
    fn learns_from_requests_and_replies_only_to_own_address() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut a = interface_a();
        let b = interface_b();

        // A request for somebody else's address: learned from, not answered.
        let request = ArpFrame::request(b.mac(), b.ip(), Ipv4Addr::new(5, 5, 5, 5)).frame();
        assert!(a.on_frame_received(request).is_none());
        assert!(a.take_ready().is_none());

        // The mapping was cached, so a send to B needs no request.
        a.resolve_and_send(datagram(Ipv4Addr::new(9, 9, 9, 9), 32), b.ip());
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ether_type(), IPV4_ETHER_TYPE);

        // A request for our address gets a unicast reply back.
        let request = ArpFrame::request(mac(0xcc), Ipv4Addr::new(4, 4, 4, 4), a.ip()).frame();
        assert!(a.on_frame_received(request).is_none());
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 1);
        let reply = ArpFrame::try_from(frames[0].clone()).unwrap();
        assert_eq!(reply.opcode(), ArpOp::Reply as u16);
        assert_eq!(reply.sender_hardware_addr(), a.mac());
        assert_eq!(reply.target_hardware_addr(), mac(0xcc));
    }

    #[test]
    fn ignores_frames_for_other_interfaces() {
        let mut a = interface_a();

        let mut dgram_frame = EthernetFrame::encap_ipv4(datagram(a.ip(), 32));
        dgram_frame.set_src_mac(mac(0xdd));
        dgram_frame.set_dest_mac(mac(0xee));
        assert!(a.on_frame_received(dgram_frame).is_none());

        // Unicast IPv4 to us comes back out as a datagram.
        let mut dgram_frame = EthernetFrame::encap_ipv4(datagram(a.ip(), 32));
        dgram_frame.set_src_mac(mac(0xdd));
        dgram_frame.set_dest_mac(a.mac());
        let dgram = a.on_frame_received(dgram_frame).unwrap();
        assert_eq!(dgram.dest_addr(), a.ip());
    }

    #[test]
    fn garbage_payloads_are_dropped_silently() {
        let mut a = interface_a();

        let mut frame = EthernetFrame::empty();
        frame.set_dest_mac(a.mac());
        frame.set_ether_type(IPV4_ETHER_TYPE);
        frame.set_payload(&[0u8; 7]);
        assert!(a.on_frame_received(frame).is_none());

        let mut frame = EthernetFrame::empty();
        frame.set_dest_mac(MacAddr::BROADCAST);
        frame.set_ether_type(ARP_ETHER_TYPE);
        frame.set_payload(&[0u8; 28]);
        assert!(a.on_frame_received(frame).is_none());
        assert!(a.take_ready().is_none());
    }

    #[test]
    fn two_interfaces_end_to_end() {
        let mut a = interface_a();
        let mut b = interface_b();

        let payload = datagram(Ipv4Addr::new(2, 2, 2, 2), 32);
        a.resolve_and_send(payload.clone(), b.ip());

        // A only has the broadcast request ready, the datagram is parked.
        let request = a.take_ready().unwrap();
        assert_eq!(request.ether_type(), ARP_ETHER_TYPE);
        assert!(request.dest_mac().is_broadcast());
        assert!(a.take_ready().is_none());

        // B answers with a unicast reply.
        assert!(b.on_frame_received(request).is_none());
        let reply = b.take_ready().unwrap();
        assert_eq!(reply.ether_type(), ARP_ETHER_TYPE);
        assert_eq!(reply.dest_mac(), a.mac());
        assert!(b.take_ready().is_none());

        // The reply unblocks the original datagram, framed for B.
        assert!(a.on_frame_received(reply).is_none());
        let frame = a.take_ready().unwrap();
        assert_eq!(frame.ether_type(), IPV4_ETHER_TYPE);
        assert_eq!(frame.dest_mac(), b.mac());
        assert_eq!(frame.src_mac(), a.mac());

        // And B accepts it as an IPv4 datagram.
        let delivered = b.on_frame_received(frame).unwrap();
        assert_eq!(delivered, payload);
    }
}
