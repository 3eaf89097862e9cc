//! The lowest two layers of a minimal IP stack: network interfaces that resolve next-hop
//! addresses over ARP and frame datagrams for the wire, and a router that forwards datagrams
//! between those interfaces by longest-prefix match.
//!
//! Everything here is a synchronous, single-threaded state machine driven by an explicit
//! logical clock. The driver is expected to repeatedly drain each interface's outbound queue,
//! push received frames in, call `route`, and advance time with the measured elapsed
//! milliseconds. Nothing blocks and nothing spawns.

/// The interface owns one MAC address and one IPv4 address. Datagrams handed to it are framed
/// immediately when the next hop's MAC address is cached, and parked otherwise while an ARP
/// request goes out. Outbound frames are pulled from a strict FIFO queue; inbound frames are
/// pushed in and either update ARP state or surface a datagram to the caller.
mod interface;
pub use self::interface::*;

/// The router owns a set of interfaces and an append-only routing table. Each scheduling pass
/// drains every interface's received datagrams and forwards each one out the interface with
/// the longest matching prefix, decrementing the TTL on the way through.
mod router;
pub use self::router::*;
