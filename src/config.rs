//! Configuration shapes.
//!
//! The emulator is driven by one JSON document. Parsing is plain serde
//! derive; semantic validation (interface existence, VLAN uniqueness,
//! stream references) happens when the stack is built, so every error
//! there carries the fatal-at-startup taxonomy.

use serde::Deserialize;
use serde_json;

use std::fs::File;
use std::net::{Ipv4Addr, Ipv6Addr};

use packet::MplsLabel;
use stream::{DirectionConfig, StreamConfig};
use packet::bbl::BblSubType;
use {ConfigError, ConfigResult};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum IoModeConfig {
    PacketMmap,
    Raw,
}

fn default_io_mode() -> IoModeConfig {
    IoModeConfig::PacketMmap
}

fn default_io_slots() -> u32 {
    4096
}

fn default_io_burst() -> u16 {
    32
}

fn default_io_stream_max_ppi() -> u64 {
    32
}

fn default_interval_ms() -> u64 {
    1
}

fn default_pps() -> f64 {
    1.0
}

fn default_length() -> usize {
    128
}

fn default_port() -> u16 {
    ::BBL_UDP_PORT
}

fn default_txq_slots() -> usize {
    ::txq::TXQ_DEFAULT_SLOTS
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub interfaces: InterfacesConfig,
    #[serde(default)]
    pub streams: Vec<StreamSection>,
    #[serde(default)]
    pub session_traffic: SessionTrafficConfig,
    #[serde(default)]
    pub secondary_ip_addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub secondary_ip6_addresses: Vec<Ipv6Addr>,
    /// Stop a stream once its first packet came back verified.
    #[serde(default)]
    pub traffic_stop_verified: bool,
    /// Copy stream packets to an attached capture sink, not only
    /// control traffic.
    #[serde(default)]
    pub pcap_include_streams: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            interfaces: InterfacesConfig::default(),
            streams: Vec::new(),
            session_traffic: SessionTrafficConfig::default(),
            secondary_ip_addresses: Vec::new(),
            secondary_ip6_addresses: Vec::new(),
            traffic_stop_verified: false,
            pcap_include_streams: false,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> ConfigResult<Config> {
        let file = File::open(path)?;
        serde_json::from_reader(file)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path, e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfacesConfig {
    #[serde(default = "default_io_mode")]
    pub io_mode: IoModeConfig,
    /// Ring frames per direction.
    #[serde(default = "default_io_slots")]
    pub io_slots: u32,
    /// Packets moved per TX/RX pass.
    #[serde(default = "default_io_burst")]
    pub io_burst: u16,
    /// Upper bound of packets one stream may emit per pass.
    #[serde(default = "default_io_stream_max_ppi")]
    pub io_stream_max_ppi: u64,
    #[serde(default = "default_interval_ms")]
    pub rx_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub tx_interval_ms: u64,
    #[serde(default = "default_txq_slots")]
    pub txq_slots: usize,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub network: Vec<NetworkInterfaceConfig>,
    #[serde(default)]
    pub access: Vec<AccessInterfaceConfig>,
    #[serde(default)]
    pub a10nsp: Vec<A10nspInterfaceConfig>,
}

impl Default for InterfacesConfig {
    fn default() -> InterfacesConfig {
        InterfacesConfig {
            io_mode: default_io_mode(),
            io_slots: default_io_slots(),
            io_burst: default_io_burst(),
            io_stream_max_ppi: default_io_stream_max_ppi(),
            rx_interval_ms: default_interval_ms(),
            tx_interval_ms: default_interval_ms(),
            txq_slots: default_txq_slots(),
            links: Vec::new(),
            network: Vec::new(),
            access: Vec::new(),
            a10nsp: Vec::new(),
        }
    }
}

/// One physical port and its worker layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub interface: String,
    /// Override for the port MAC; network interfaces inherit it.
    #[serde(default)]
    pub mac: Option<String>,
    /// Dedicated RX worker thread instead of the main-loop job.
    #[serde(default)]
    pub rx_threads: u8,
    /// TX worker threads; zero keeps transmission on the main loop.
    #[serde(default)]
    pub tx_threads: u8,
    #[serde(default)]
    pub rx_cpuset: Vec<usize>,
    #[serde(default)]
    pub tx_cpuset: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv4Config {
    pub address: Ipv4Addr,
    pub len: u8,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv6Config {
    pub address: Ipv6Addr,
    pub len: u8,
    pub gateway: Ipv6Addr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterfaceConfig {
    pub interface: String,
    /// 0 means untagged, forbidden if the port also carries access.
    #[serde(default)]
    pub vlan: u16,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub gateway_mac: Option<String>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Config>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Config>,
    #[serde(default)]
    pub tx_label: Option<MplsLabelConfig>,
    /// Hold all outbound traffic until ARP/ND resolved the gateway.
    #[serde(default)]
    pub gateway_resolve_wait: bool,
    #[serde(default)]
    pub isis_instance_id: u32,
    #[serde(default)]
    pub ospf_instance_id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessInterfaceConfig {
    pub interface: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct A10nspInterfaceConfig {
    pub interface: String,
    #[serde(default)]
    pub qinq: bool,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MplsLabelConfig {
    pub label: u32,
    #[serde(default)]
    pub exp: u8,
    #[serde(default)]
    pub ttl: u8,
}

impl MplsLabelConfig {
    pub fn to_label(&self) -> MplsLabel {
        MplsLabel {
            label: self.label,
            exp: self.exp,
            ttl: if self.ttl == 0 { 255 } else { self.ttl },
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StreamTypeConfig {
    Ipv4,
    Ipv6,
    Ipv6Pd,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StreamDirectionConfig {
    Up,
    Down,
    Both,
}

/// One `streams` entry of the configuration document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSection {
    pub name: String,
    /// 0 = raw stream bound to a network interface only.
    #[serde(default)]
    pub stream_group_id: u16,
    #[serde(rename = "type")]
    pub stream_type: StreamTypeConfig,
    pub direction: StreamDirectionConfig,
    #[serde(default = "default_pps")]
    pub pps: f64,
    #[serde(default = "default_length")]
    pub length: usize,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub vlan_priority: u8,
    #[serde(default = "default_port")]
    pub src_port: u16,
    #[serde(default = "default_port")]
    pub dst_port: u16,
    #[serde(default)]
    pub network_interface: Option<String>,
    #[serde(default)]
    pub a10nsp_interface: Option<String>,
    #[serde(default)]
    pub ipv4_destination_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv4_network_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv4_access_src_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv6_destination_address: Option<Ipv6Addr>,
    #[serde(default)]
    pub ipv6_network_address: Option<Ipv6Addr>,
    #[serde(default)]
    pub ipv6_access_src_address: Option<Ipv6Addr>,
    #[serde(default)]
    pub tx_mpls1: Option<MplsLabelConfig>,
    #[serde(default)]
    pub tx_mpls2: Option<MplsLabelConfig>,
    #[serde(default)]
    pub rx_mpls1_label: Option<u32>,
    #[serde(default)]
    pub rx_mpls2_label: Option<u32>,
    #[serde(default)]
    pub start_delay: u64,
    #[serde(default)]
    pub max_packets: u64,
    #[serde(default)]
    pub ipv4_df: bool,
}

impl StreamSection {
    pub fn to_stream_config(&self) -> StreamConfig {
        StreamConfig {
            name: self.name.clone(),
            stream_group_id: self.stream_group_id,
            stream_type: match self.stream_type {
                StreamTypeConfig::Ipv4 => BblSubType::Ipv4,
                StreamTypeConfig::Ipv6 => BblSubType::Ipv6,
                StreamTypeConfig::Ipv6Pd => BblSubType::Ipv6Pd,
            },
            direction: match self.direction {
                StreamDirectionConfig::Up => DirectionConfig::Up,
                StreamDirectionConfig::Down => DirectionConfig::Down,
                StreamDirectionConfig::Both => DirectionConfig::Both,
            },
            pps: self.pps,
            length: self.length,
            priority: self.priority,
            vlan_priority: self.vlan_priority,
            src_port: self.src_port,
            dst_port: self.dst_port,
            network_interface: self.network_interface.clone(),
            a10nsp_interface: self.a10nsp_interface.clone(),
            ipv4_destination_address: self.ipv4_destination_address,
            ipv4_network_address: self.ipv4_network_address,
            ipv4_access_src_address: self.ipv4_access_src_address,
            ipv6_destination_address: self.ipv6_destination_address,
            ipv6_network_address: self.ipv6_network_address,
            ipv6_access_src_address: self.ipv6_access_src_address,
            tx_mpls1: self.tx_mpls1.as_ref().map(|m| m.to_label()),
            tx_mpls2: self.tx_mpls2.as_ref().map(|m| m.to_label()),
            rx_mpls1_label: self.rx_mpls1_label,
            rx_mpls2_label: self.rx_mpls2_label,
            start_delay: self.start_delay,
            max_packets: self.max_packets,
            ipv4_df: self.ipv4_df,
            session_traffic: false,
        }
    }
}

/// Autogenerated per-session verification traffic.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionTrafficConfig {
    #[serde(default)]
    pub ipv4_pps: f64,
    #[serde(default)]
    pub ipv4_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv4_label: Option<u32>,
    #[serde(default)]
    pub ipv6_pps: f64,
    #[serde(default)]
    pub ipv6_address: Option<Ipv6Addr>,
    #[serde(default)]
    pub ipv6_label: Option<u32>,
    #[serde(default)]
    pub ipv6pd_pps: f64,
}

/// Parses a `aa:bb:cc:dd:ee:ff` MAC option.
pub fn parse_mac(value: &str) -> ConfigResult<::pnet::util::MacAddr> {
    value.parse()
        .map_err(|_| ConfigError::Invalid(format!("mac address {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_parses() {
        let config: Config = serde_json::from_str(r#"{
            "interfaces": {
                "links": [{"interface": "veth0"}],
                "network": [{
                    "interface": "veth0",
                    "vlan": 100,
                    "ipv4": {"address": "10.0.0.2", "len": 24, "gateway": "10.0.0.1"}
                }]
            },
            "streams": [{
                "name": "S1",
                "type": "ipv4",
                "direction": "down",
                "pps": 1000.0,
                "length": 128,
                "ipv4_destination_address": "10.0.0.99"
            }]
        }"#)
            .unwrap();
        assert_eq!(config.interfaces.network[0].vlan, 100);
        assert_eq!(config.streams[0].pps, 1000.0);
        let stream = config.streams[0].to_stream_config();
        assert_eq!(stream.stream_type, BblSubType::Ipv4);
        assert!(stream.session_traffic == false);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"nonsense": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.interfaces.io_burst, 32);
        assert_eq!(config.interfaces.io_stream_max_ppi, 32);
        assert_eq!(config.interfaces.io_mode, IoModeConfig::PacketMmap);
    }
}
