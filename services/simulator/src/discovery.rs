//! UDP discovery beacon.
//!
//! Every few seconds the beacon enumerates the host's non-loopback IPv4
//! interface addresses and, for each, sends an identity string to the
//! broadcast address so clients on the LAN can find the telescope without
//! configuration.  Enumeration and send failures are logged once and
//! otherwise ignored; discovery must never take the simulator down.

use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::SimulatorConfig;

pub(crate) async fn run(cfg: SimulatorConfig) {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "discovery disabled: cannot bind UDP socket");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!(error = %e, "discovery disabled: cannot enable broadcast");
        return;
    }

    let mut ticker = tokio::time::interval(cfg.broadcast_interval);
    let mut enumeration_failure_logged = false;
    let mut send_failure_logged = false;
    loop {
        ticker.tick().await;
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                if !enumeration_failure_logged {
                    warn!(error = %e, "cannot enumerate network interfaces");
                    enumeration_failure_logged = true;
                }
                continue;
            }
        };
        for ip in beacon_targets(interfaces.iter().map(|interface| interface.ip())) {
            let message = beacon_message(cfg.broadcast_id, ip);
            match socket
                .send_to(message.as_bytes(), (Ipv4Addr::BROADCAST, cfg.broadcast_port))
                .await
            {
                Ok(_) => debug!(%message, "sent discovery beacon"),
                Err(e) => {
                    if !send_failure_logged {
                        warn!(error = %e, "discovery beacon send failed");
                        send_failure_logged = true;
                    }
                }
            }
        }
    }
}

/// One beacon goes out per non-loopback IPv4 address.
pub(crate) fn beacon_targets(addresses: impl Iterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    addresses
        .filter_map(|addr| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        })
        .collect()
}

pub(crate) fn beacon_message(broadcast_id: u32, local_ip: Ipv4Addr) -> String {
    format!("Identity:Origin-{broadcast_id}Z Origin IP Address = {local_ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_message_has_the_identity_shape() {
        let message = beacon_message(140020, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(
            message,
            "Identity:Origin-140020Z Origin IP Address = 192.168.1.20"
        );
    }

    #[test]
    fn beacon_targets_keep_every_non_loopback_ipv4() {
        let addresses = vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            IpAddr::V6("fe80::1".parse().unwrap()),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
        ];
        assert_eq!(
            beacon_targets(addresses.into_iter()),
            vec![
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(10, 0, 0, 7),
            ]
        );
    }

    #[test]
    fn real_interface_enumeration_never_yields_loopback() {
        // Whatever this host has, loopback must be filtered out.
        let interfaces = if_addrs::get_if_addrs().expect("interface enumeration");
        for ip in beacon_targets(interfaces.iter().map(|interface| interface.ip())) {
            assert!(!ip.is_loopback());
        }
    }
}
