//! Daemon command line.
//!
//! Arguments are produced as an argv vector in a fixed order so the same
//! inputs always give the same command line.

use crate::config::MeshConfig;
use crate::error::{constants, ProtocolError, Result};

/// Per-launch values that are not part of the static configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub network_name: String,
    pub network_secret: String,
    /// Hostname this node announces to peers
    pub hostname: String,
    pub machine_id: Option<String>,
    /// Local port of the daemon's control RPC
    pub rpc_port: u16,
    pub tcp_whitelist: Vec<String>,
    pub udp_whitelist: Vec<String>,
    /// Bootstrap peers, in order
    pub peers: Vec<String>,
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn flag(&mut self, name: &str) -> &mut Self {
        self.0.push(format!("--{name}"));
        self
    }

    fn flag_if(&mut self, condition: bool, name: &str) -> &mut Self {
        if condition {
            self.flag(name);
        }
        self
    }

    fn opt(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.flag(name);
        self.0.push(value.into());
        self
    }

    fn short(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.0.push(format!("-{name}"));
        self.0.push(value.into());
        self
    }

    fn repeated(&mut self, name: &str, values: &[String], fallback: &str) -> &mut Self {
        if values.is_empty() {
            self.opt(name, fallback);
        }
        for value in values {
            self.opt(name, value.as_str());
        }
        self
    }
}

/// Build the daemon argv (without the program name).
///
/// # Errors
/// `InvalidArgument` when the network identity is empty, or when DHCP is off
/// and no static IPv4 address is configured.
pub fn daemon_args(config: &MeshConfig, launch: &LaunchOptions) -> Result<Vec<String>> {
    if launch.network_name.is_empty() || launch.network_secret.is_empty() {
        return Err(ProtocolError::InvalidArgument(
            constants::ERR_NETWORK_NAME_REQUIRED.into(),
        ));
    }
    if config.ipv4.is_none() && !config.dhcp {
        return Err(ProtocolError::InvalidArgument(
            constants::ERR_STATIC_IPV4_REQUIRED.into(),
        ));
    }

    let mut args = ArgList::default();
    args.flag("no-tun")
        .flag("multi-thread")
        .flag("enable-kcp-proxy")
        .flag("enable-quic-proxy")
        .flag_if(!config.try_punch_sym, "disable-sym-hole-punching")
        .flag_if(!config.enable_ipv6, "disable-ipv6")
        .flag_if(config.latency_first, "latency-first")
        .opt("encryption-algorithm", "aes-gcm")
        .opt("compression", "zstd")
        .opt("default-protocol", config.default_protocol.as_str())
        .opt("network-name", launch.network_name.as_str())
        .opt("network-secret", launch.network_secret.as_str());

    if let Some(machine_id) = &launch.machine_id {
        args.opt("machine-id", machine_id.as_str());
    }

    args.opt("rpc-portal", format!("127.0.0.1:{}", launch.rpc_port))
        .opt("hostname", launch.hostname.as_str());

    match config.ipv4 {
        Some(addr) => args.opt("ipv4", addr.to_string()),
        None => args.flag("dhcp"),
    };

    args.short("l", "tcp://0.0.0.0:0")
        .short("l", "udp://0.0.0.0:0")
        .opt("private-mode", "true")
        .flag_if(config.disable_p2p, "disable-p2p");

    if !config.relay_for_others {
        args.opt("relay-network-whitelist", launch.network_name.as_str());
    }

    args
        .repeated("tcp-whitelist", &launch.tcp_whitelist, "0")
        .repeated("udp-whitelist", &launch.udp_whitelist, "0");

    for peer in &launch.peers {
        args.opt("peers", peer.as_str());
    }

    Ok(args.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn launch() -> LaunchOptions {
        LaunchOptions {
            network_name: "scaffolding-mc-WJAJ-47A0".into(),
            network_secret: "KXTU-SEUQ".into(),
            hostname: "guest-1".into(),
            machine_id: Some("machine".into()),
            rpc_port: 15888,
            tcp_whitelist: vec!["0".into()],
            udp_whitelist: vec!["0".into()],
            peers: vec!["tcp://a:1".into(), "tcp://b:2".into()],
        }
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn emits_required_flags() {
        let args = daemon_args(&MeshConfig::default(), &launch()).unwrap();

        assert_eq!(value_of(&args, "--network-name"), ["scaffolding-mc-WJAJ-47A0"]);
        assert_eq!(value_of(&args, "--network-secret"), ["KXTU-SEUQ"]);
        assert_eq!(value_of(&args, "--rpc-portal"), ["127.0.0.1:15888"]);
        assert_eq!(value_of(&args, "--encryption-algorithm"), ["aes-gcm"]);
        assert_eq!(value_of(&args, "--compression"), ["zstd"]);
        assert_eq!(value_of(&args, "--private-mode"), ["true"]);
        assert_eq!(value_of(&args, "--peers"), ["tcp://a:1", "tcp://b:2"]);
        assert_eq!(value_of(&args, "--tcp-whitelist"), ["0"]);
        assert_eq!(value_of(&args, "--udp-whitelist"), ["0"]);
        assert!(args.contains(&"--dhcp".to_string()));
        assert!(args.contains(&"--latency-first".to_string()));
        assert!(!args.contains(&"--disable-ipv6".to_string()));
        assert!(!args.contains(&"--disable-p2p".to_string()));
        assert!(!args.contains(&"--ipv4".to_string()));
        assert!(!args.contains(&"--relay-network-whitelist".to_string()));
    }

    #[test]
    fn relaying_can_be_limited_to_own_network() {
        let config = MeshConfig {
            relay_for_others: false,
            ..MeshConfig::default()
        };
        let args = daemon_args(&config, &launch()).unwrap();

        assert_eq!(
            value_of(&args, "--relay-network-whitelist"),
            ["scaffolding-mc-WJAJ-47A0"]
        );
        assert_eq!(value_of(&args, "--private-mode"), ["true"]);
    }

    #[test]
    fn static_address_replaces_dhcp() {
        let config = MeshConfig {
            dhcp: false,
            ipv4: Some(Ipv4Addr::new(10, 144, 144, 9)),
            enable_ipv6: false,
            latency_first: false,
            disable_p2p: true,
            ..MeshConfig::default()
        };
        let args = daemon_args(&config, &launch()).unwrap();

        assert_eq!(value_of(&args, "--ipv4"), ["10.144.144.9"]);
        assert!(!args.contains(&"--dhcp".to_string()));
        assert!(args.contains(&"--disable-ipv6".to_string()));
        assert!(args.contains(&"--disable-p2p".to_string()));
        assert!(!args.contains(&"--latency-first".to_string()));
    }

    #[test]
    fn output_is_deterministic() {
        let config = MeshConfig::default();
        assert_eq!(
            daemon_args(&config, &launch()).unwrap(),
            daemon_args(&config, &launch()).unwrap()
        );
    }

    #[test]
    fn missing_options_fail_before_launch() {
        let config = MeshConfig {
            dhcp: false,
            ipv4: None,
            ..MeshConfig::default()
        };
        assert!(matches!(
            daemon_args(&config, &launch()),
            Err(ProtocolError::InvalidArgument(_))
        ));

        let mut no_name = launch();
        no_name.network_name.clear();
        assert!(matches!(
            daemon_args(&MeshConfig::default(), &no_name),
            Err(ProtocolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_whitelists_fall_back_to_zero() {
        let mut l = launch();
        l.tcp_whitelist.clear();
        l.udp_whitelist = vec!["25565".into(), "25566".into()];
        let args = daemon_args(&MeshConfig::default(), &l).unwrap();
        assert_eq!(value_of(&args, "--tcp-whitelist"), ["0"]);
        assert_eq!(value_of(&args, "--udp-whitelist"), ["25565", "25566"]);
    }
}
