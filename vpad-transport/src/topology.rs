//! Endpoint topology discovery
//!
//! Walks a raw configuration-descriptor byte stream to find the vendor
//! interface and its interrupt endpoint pair. Each descriptor record
//! self-describes its length in byte 0 and its type in byte 1; no ordering
//! of endpoint records is assumed.

use tracing::{debug, warn};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::TransportError;

/// Descriptor record type: interface
const DESC_INTERFACE: u8 = 0x04;
/// Descriptor record type: endpoint
const DESC_ENDPOINT: u8 = 0x05;
/// Vendor-specific interface class
const CLASS_VENDOR: u8 = 0xFF;
/// Transfer type bits of bmAttributes
const ATTR_TRANSFER_MASK: u8 = 0x03;
/// High bit of an endpoint address marks the inbound direction
const ADDR_DIR_IN: u8 = 0x80;

/// Transfer direction of an endpoint, from the address high bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Endpoint transfer type, from bmAttributes bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    fn from_attributes(attributes: u8) -> Self {
        match attributes & ATTR_TRANSFER_MASK {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }
}

/// One discovered endpoint. Immutable after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub interface: u8,
    pub direction: Direction,
    pub address: u8,
    pub max_packet_size: u16,
    pub transfer_type: TransferType,
}

/// Endpoint table for one session: the event/command interrupt pair plus the
/// optional hall-sensor channel. The control endpoint is implicit (EP0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTable {
    pub interface: u8,
    pub event_in: EndpointDescriptor,
    pub command_out: EndpointDescriptor,
    pub hall_in: Option<EndpointDescriptor>,
}

/// Known-good fixed endpoint addresses, validated empirically across the
/// shipped firmware revisions.
pub mod fixed {
    pub const EVENT_IN: u8 = 0x81;
    pub const COMMAND_OUT: u8 = 0x02;
    pub const HALL_IN: u8 = 0x83;
    pub const MAX_PACKET: u16 = 64;
}

/// Interface descriptor record header (wire layout).
#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct InterfaceRecord {
    length: u8,
    kind: u8,
    number: u8,
    alternate: u8,
    num_endpoints: u8,
    class: u8,
    subclass: u8,
    protocol: u8,
    name_index: u8,
}

/// Endpoint descriptor record (wire layout). wMaxPacketSize is unaligned on
/// the wire, so it is kept as raw little-endian bytes.
#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct EndpointRecord {
    length: u8,
    kind: u8,
    address: u8,
    attributes: u8,
    max_packet: [u8; 2],
    interval: u8,
}

/// Parse a full configuration-descriptor blob into an endpoint table.
///
/// Fails with [`TransportError::Topology`] if no vendor interface exposes a
/// complete interrupt IN/OUT pair.
pub fn discover(config: &[u8]) -> Result<EndpointTable, TransportError> {
    let mut current_interface: Option<u8> = None;
    let mut event_in = None;
    let mut command_out = None;
    let mut extra_in = None;
    let mut interface_of_pair = None;

    let mut offset = 0usize;
    while offset + 2 <= config.len() {
        let record_len = config[offset] as usize;
        if record_len < 2 || offset + record_len > config.len() {
            return Err(TransportError::MalformedDescriptor(offset));
        }
        let record = &config[offset..offset + record_len];

        match record[1] {
            DESC_INTERFACE => {
                let Ok((iface, _)) = InterfaceRecord::read_from_prefix(record) else {
                    return Err(TransportError::MalformedDescriptor(offset));
                };
                if iface.class == CLASS_VENDOR {
                    debug!(
                        interface = iface.number,
                        endpoints = iface.num_endpoints,
                        "vendor interface"
                    );
                    current_interface = Some(iface.number);
                } else {
                    current_interface = None;
                }
            }
            DESC_ENDPOINT => {
                if let Some(interface) = current_interface {
                    let Ok((ep, _)) = EndpointRecord::read_from_prefix(record) else {
                        return Err(TransportError::MalformedDescriptor(offset));
                    };
                    let descriptor = EndpointDescriptor {
                        interface,
                        direction: if ep.address & ADDR_DIR_IN != 0 {
                            Direction::In
                        } else {
                            Direction::Out
                        },
                        address: ep.address,
                        max_packet_size: u16::from_le_bytes(ep.max_packet),
                        transfer_type: TransferType::from_attributes(ep.attributes),
                    };
                    record_endpoint(
                        descriptor,
                        &mut event_in,
                        &mut command_out,
                        &mut extra_in,
                        &mut interface_of_pair,
                    );
                }
            }
            _ => {}
        }

        offset += record_len;
    }

    match (event_in, command_out) {
        (Some(event_in), Some(command_out)) => Ok(EndpointTable {
            interface: interface_of_pair.unwrap_or(event_in.interface),
            event_in,
            command_out,
            hall_in: extra_in,
        }),
        _ => Err(TransportError::Topology(
            "no vendor interface with a complete interrupt IN/OUT pair".into(),
        )),
    }
}

fn record_endpoint(
    descriptor: EndpointDescriptor,
    event_in: &mut Option<EndpointDescriptor>,
    command_out: &mut Option<EndpointDescriptor>,
    extra_in: &mut Option<EndpointDescriptor>,
    interface_of_pair: &mut Option<u8>,
) {
    if descriptor.transfer_type != TransferType::Interrupt {
        debug!(address = descriptor.address, "skipping non-interrupt endpoint");
        return;
    }
    match descriptor.direction {
        Direction::In => {
            if event_in.is_none() {
                *event_in = Some(descriptor);
                *interface_of_pair = Some(descriptor.interface);
            } else if extra_in.is_none() {
                *extra_in = Some(descriptor);
            }
        }
        Direction::Out => {
            if command_out.is_none() {
                *command_out = Some(descriptor);
            }
        }
    }
}

impl EndpointTable {
    /// Fill in benignly-missing optional endpoints from the known-good fixed
    /// table. The hall channel is the only substitutable entry; a command
    /// endpoint that disagrees with the fixed table is kept as discovered and
    /// logged, never silently substituted.
    pub fn with_fixed_fallback(mut self) -> Self {
        if self.command_out.address != fixed::COMMAND_OUT {
            warn!(
                discovered = format_args!("0x{:02X}", self.command_out.address),
                expected = format_args!("0x{:02X}", fixed::COMMAND_OUT),
                "command endpoint differs from known-good table; using discovered value"
            );
        }
        if self.event_in.address != fixed::EVENT_IN {
            warn!(
                discovered = format_args!("0x{:02X}", self.event_in.address),
                expected = format_args!("0x{:02X}", fixed::EVENT_IN),
                "event endpoint differs from known-good table; using discovered value"
            );
        }
        if self.hall_in.is_none() {
            warn!(
                address = format_args!("0x{:02X}", fixed::HALL_IN),
                "hall endpoint missing from descriptors; substituting fixed address"
            );
            self.hall_in = Some(EndpointDescriptor {
                interface: self.interface,
                direction: Direction::In,
                address: fixed::HALL_IN,
                max_packet_size: fixed::MAX_PACKET,
                transfer_type: TransferType::Interrupt,
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(number: u8, class: u8, num_endpoints: u8) -> Vec<u8> {
        vec![9, DESC_INTERFACE, number, 0, num_endpoints, class, 0, 0, 0]
    }

    fn endpoint(address: u8, attributes: u8) -> Vec<u8> {
        vec![7, DESC_ENDPOINT, address, attributes, 64, 0, 1]
    }

    fn config_header() -> Vec<u8> {
        // 9-byte configuration descriptor record; walker skips it by length
        vec![9, 0x02, 0, 0, 1, 1, 0, 0x80, 50]
    }

    fn blob(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.iter().flatten().copied().collect()
    }

    #[test]
    fn discovers_pair_regardless_of_order() {
        // OUT listed before IN to exercise the no-ordering guarantee
        let config = blob(&[
            config_header(),
            interface(1, CLASS_VENDOR, 3),
            endpoint(0x02, 0x03),
            endpoint(0x81, 0x03),
            endpoint(0x83, 0x03),
        ]);
        let table = discover(&config).unwrap();
        assert_eq!(table.interface, 1);
        assert_eq!(table.event_in.address, 0x81);
        assert_eq!(table.command_out.address, 0x02);
        assert_eq!(table.hall_in.unwrap().address, 0x83);
        assert_eq!(table.event_in.max_packet_size, 64);
        assert_eq!(table.event_in.transfer_type, TransferType::Interrupt);
    }

    #[test]
    fn ignores_endpoints_of_other_classes() {
        let config = blob(&[
            config_header(),
            interface(0, 0x03, 1), // HID interface, not ours
            endpoint(0x84, 0x03),
            interface(1, CLASS_VENDOR, 2),
            endpoint(0x81, 0x03),
            endpoint(0x02, 0x03),
        ]);
        let table = discover(&config).unwrap();
        assert_eq!(table.event_in.address, 0x81);
        assert!(table.hall_in.is_none());
    }

    #[test]
    fn incomplete_pair_is_a_topology_error() {
        // one interface exposes only an interrupt IN endpoint: must fail,
        // not proceed with a partial table
        let config = blob(&[
            config_header(),
            interface(0, CLASS_VENDOR, 1),
            endpoint(0x81, 0x03),
            interface(1, 0x03, 1),
            endpoint(0x02, 0x03),
        ]);
        assert!(matches!(
            discover(&config),
            Err(TransportError::Topology(_))
        ));
    }

    #[test]
    fn bulk_endpoints_do_not_count() {
        let config = blob(&[
            config_header(),
            interface(0, CLASS_VENDOR, 2),
            endpoint(0x81, 0x02), // bulk
            endpoint(0x02, 0x03),
        ]);
        assert!(discover(&config).is_err());
    }

    #[test]
    fn zero_length_record_is_malformed() {
        let mut config = blob(&[config_header(), interface(0, CLASS_VENDOR, 1)]);
        config.push(0); // record claiming zero length
        config.push(DESC_ENDPOINT);
        assert!(matches!(
            discover(&config),
            Err(TransportError::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn fallback_fills_missing_hall_channel_only() {
        let config = blob(&[
            config_header(),
            interface(0, CLASS_VENDOR, 2),
            endpoint(0x81, 0x03),
            endpoint(0x02, 0x03),
        ]);
        let table = discover(&config).unwrap().with_fixed_fallback();
        assert_eq!(table.hall_in.unwrap().address, fixed::HALL_IN);
        // primary endpoints stay as discovered
        assert_eq!(table.event_in.address, 0x81);
        assert_eq!(table.command_out.address, 0x02);
    }
}
