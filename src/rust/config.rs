// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::{
        config::{
            CongestionControlType,
            TcpConfig,
        },
        types::MacAddress,
    },
};
use ::std::{
    collections::HashMap,
    fs,
    net::Ipv4Addr,
    ops::Index,
    str::FromStr,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Identity of the local host.
mod global_config {
    pub const SECTION_NAME: &str = "tcpcore";
    // Local IPv4 addr.
    pub const LOCAL_IPV4_ADDR: &str = "local_ipv4_addr";
    // Local network MAC address.
    pub const LOCAL_LINK_ADDR: &str = "local_link_addr";
}

// Lower-layer collaborators. These are static because address resolution itself is out of scope.
mod inetstack_config {
    pub const SECTION_NAME: &str = "inetstack_config";
    pub const ARP_TABLE: &str = "arp_table";
}

// TCP engine tunables. Every entry is optional and falls back to [TcpConfig::default].
mod tcp_config {
    pub const SECTION_NAME: &str = "tcp_config";
    pub const MSS: &str = "mss";
    pub const RECEIVE_WINDOW_SIZE: &str = "receive_window_size";
    pub const MSL_WAIT_MS: &str = "msl_wait_ms";
    pub const CONGESTION_CONTROL: &str = "congestion_control";
    pub const RX_CHECKSUM_OFFLOAD: &str = "rx_checksum_offload";
    pub const TX_CHECKSUM_OFFLOAD: &str = "tx_checksum_offload";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Stack configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_s: String = fs::read_to_string(config_path)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration held in memory.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }

    fn get_global_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, global_config::SECTION_NAME)
    }

    fn get_inetstack_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, inetstack_config::SECTION_NAME)
    }

    /// Reads the local IPv4 address parameter from the environment variable first and then the underlying
    /// configuration file.
    pub fn local_ipv4_addr(&self) -> Result<Ipv4Addr, Fail> {
        let local_ipv4_addr: Ipv4Addr = match Self::get_typed_env_option(global_config::LOCAL_IPV4_ADDR)? {
            Some(addr) => addr,
            None => Self::get_typed_str_option(
                self.get_global_config()?,
                global_config::LOCAL_IPV4_ADDR,
                |val: &str| val.parse().ok(),
            )?,
        };
        if local_ipv4_addr.is_unspecified() || local_ipv4_addr.is_broadcast() {
            let cause: String = format!("Invalid IPv4 address (addr={})", local_ipv4_addr);
            error!("local_ipv4_addr(): {:?}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(local_ipv4_addr)
    }

    /// Reads the "local link address" parameter from the environment variable first and then underlying configuration
    /// file.
    pub fn local_link_addr(&self) -> Result<MacAddress, Fail> {
        let local_link_addr: MacAddress = match Self::get_typed_env_option(global_config::LOCAL_LINK_ADDR)? {
            Some(addr) => addr,
            None => Self::get_typed_str_option(
                self.get_global_config()?,
                global_config::LOCAL_LINK_ADDR,
                |val: &str| MacAddress::parse_canonical_str(val).ok(),
            )?,
        };
        if !local_link_addr.is_unicast() {
            let cause: String = format!("Invalid link address (addr={:?})", local_link_addr);
            error!("local_link_addr(): {:?}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(local_link_addr)
    }

    /// Reads the static address-resolution table, keyed by link address in the file.
    pub fn arp_table(&self) -> Result<HashMap<Ipv4Addr, MacAddress>, Fail> {
        let arp_table = match Self::get_typed_option(
            self.get_inetstack_config()?,
            inetstack_config::ARP_TABLE,
            |yaml: &Yaml| yaml.as_hash(),
        ) {
            Ok(arp_table) => arp_table,
            Err(_) => return Ok(HashMap::new()),
        };
        let mut result: HashMap<Ipv4Addr, MacAddress> = HashMap::<Ipv4Addr, MacAddress>::with_capacity(arp_table.len());
        for (k, v) in arp_table {
            let link_addr: MacAddress = match k.as_str() {
                Some(link_string) => MacAddress::parse_canonical_str(link_string)?,
                None => {
                    let cause: &str = "Couldn't parse ARP table link_addr in config";
                    error!("arp_table(): {:?}", cause);
                    return Err(Fail::new(libc::EINVAL, cause));
                },
            };
            let ipv4_addr: Ipv4Addr = match v.as_str().map(|ip_string| ip_string.parse::<Ipv4Addr>()) {
                Some(Ok(ip)) => ip,
                _ => {
                    let cause: String = format!("Couldn't parse ARP table ip_addr in config (link_addr={})", link_addr);
                    error!("arp_table(): {:?}", cause);
                    return Err(Fail::new(libc::EINVAL, &cause));
                },
            };
            result.insert(ipv4_addr, link_addr);
        }
        Ok(result)
    }

    /// Builds the TCP configuration, overriding defaults with whatever the optional "tcp_config" section sets.
    pub fn tcp_config(&self) -> Result<TcpConfig, Fail> {
        let section: &Yaml = match self.0.index(tcp_config::SECTION_NAME) {
            Yaml::BadValue => return Ok(TcpConfig::default()),
            section @ Yaml::Hash(_) => section,
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", tcp_config::SECTION_NAME);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };

        let mss: Option<usize> = Self::get_optional(section, tcp_config::MSS, Self::get_int_option)?;
        let receive_window_size: Option<u16> =
            Self::get_optional(section, tcp_config::RECEIVE_WINDOW_SIZE, Self::get_int_option)?;
        let msl_wait: Option<Duration> =
            Self::get_optional(section, tcp_config::MSL_WAIT_MS, Self::get_int_option::<u64>)?
                .map(Duration::from_millis);
        let congestion_control: Option<CongestionControlType> =
            Self::get_optional(section, tcp_config::CONGESTION_CONTROL, |yaml, index| {
                Self::get_typed_str_option(yaml, index, |val: &str| CongestionControlType::from_str(val).ok())
            })?;
        let rx_checksum_offload: Option<bool> =
            Self::get_optional(section, tcp_config::RX_CHECKSUM_OFFLOAD, Self::get_bool_option)?;
        let tx_checksum_offload: Option<bool> =
            Self::get_optional(section, tcp_config::TX_CHECKSUM_OFFLOAD, Self::get_bool_option)?;

        TcpConfig::new(
            mss,
            receive_window_size,
            msl_wait,
            congestion_control,
            rx_checksum_offload,
            tx_checksum_offload,
        )
    }

    /// Similar to `get_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// `&Hash`.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Runs `getter` only if `index` is present, so that a missing option is `None` but a malformed one is an error.
    fn get_optional<T, Fn>(yaml: &Yaml, index: &str, getter: Fn) -> Result<Option<T>, Fail>
    where
        Fn: FnOnce(&Yaml, &str) -> Result<T, Fail>,
    {
        match yaml.index(index) {
            Yaml::BadValue => Ok(None),
            _ => getter(yaml, index).map(Some),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            }
            let message: String = format!("parameter {} has unexpected type", index);
            return Err(Fail::new(libc::EINVAL, message.as_str()));
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// value fits in `T`.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `Self::get_typed_option` using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, Yaml::as_bool)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
