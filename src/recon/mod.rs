//! Scanner collaborator.
//!
//! Scans only ever feed `seed_services` before an episode starts. Nothing
//! here touches the network: [`StaticScanner`] answers from fixed port and
//! banner tables, deterministically per target.

use crate::error::{Result, SimError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Well-known ports and the service usually behind them
pub const COMMON_PORTS: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (3306, "MySQL"),
    (5432, "PostgreSQL"),
    (6379, "Redis"),
    (8080, "HTTP-Proxy"),
    (8443, "HTTPS-Alt"),
    (9000, "SonarQube"),
    (9200, "Elasticsearch"),
    (27017, "MongoDB"),
];

/// Ports that are open more often than the rest
const LIKELY_OPEN: [u16; 4] = [21, 22, 80, 443];

/// What a service announces about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub text: String,
    pub product: String,
    pub version: String,
}

impl Banner {
    pub fn new(text: &str, product: &str, version: &str) -> Self {
        Self {
            text: text.to_string(),
            product: product.to_string(),
            version: version.to_string(),
        }
    }
}

fn default_banners() -> BTreeMap<String, Banner> {
    [
        ("SSH", Banner::new("SSH-2.0-OpenSSH_8.2", "openssh", "8.2")),
        ("HTTP", Banner::new("Apache/2.4.41", "apache", "2.4.41")),
        ("HTTPS", Banner::new("nginx/1.18.0", "nginx", "1.18.0")),
        ("MySQL", Banner::new("5.7.33-log", "mysql", "5.7.33")),
        ("PostgreSQL", Banner::new("PostgreSQL 13.2", "postgresql", "13.2")),
        ("FTP", Banner::new("vsftpd 3.0.3", "vsftpd", "3.0.3")),
        ("SMTP", Banner::new("Postfix smtpd", "postfix", "")),
    ]
    .into_iter()
    .map(|(service, banner)| (service.to_string(), banner))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: u16,
    pub service: String,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl ServiceInfo {
    /// `product-version` in lowercase, or the bare service name when the
    /// version is unknown
    pub fn fingerprint(&self) -> String {
        match (&self.product, &self.version) {
            (Some(product), Some(version)) if !version.is_empty() => {
                format!("{}-{}", product, version).to_lowercase()
            }
            (Some(product), _) => product.to_lowercase(),
            _ => self.name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub open_ports: Vec<PortInfo>,
    pub services: Vec<ServiceInfo>,
    pub vulnerabilities: Vec<String>,
    pub ports_scanned: usize,
}

impl ScanReport {
    /// Fingerprints of every discovered service
    pub fn seed_services(&self) -> BTreeSet<String> {
        self.services.iter().map(ServiceInfo::fingerprint).collect()
    }
}

pub trait Scanner {
    fn scan(&self, target: &str) -> Result<ScanReport>;
}

/// Scan `target` and turn the result into episode seeds. A failed scan is
/// logged and yields an empty set.
pub fn seed_services_from_scan(scanner: &dyn Scanner, target: &str) -> BTreeSet<String> {
    match scanner.scan(target) {
        Ok(report) => {
            let seeds = report.seed_services();
            tracing::info!(
                "Scan of {}: {} open ports, seeds {:?}",
                target,
                report.open_ports.len(),
                seeds
            );
            seeds
        }
        Err(e) => {
            tracing::warn!("Scan of {} failed, continuing without seeds: {}", target, e);
            BTreeSet::new()
        }
    }
}

/// Simulated scanner over the common port table
#[derive(Debug, Clone)]
pub struct StaticScanner {
    ports: Vec<u16>,
    banners: BTreeMap<String, Banner>,
    /// Fixed open ports, bypassing the per-target simulation
    forced_open: Option<BTreeSet<u16>>,
}

impl Default for StaticScanner {
    fn default() -> Self {
        Self {
            ports: COMMON_PORTS.iter().map(|(port, _)| *port).collect(),
            banners: default_banners(),
            forced_open: None,
        }
    }
}

impl StaticScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always report exactly these ports as open
    pub fn with_open_ports(mut self, ports: &[u16]) -> Self {
        self.forced_open = Some(ports.iter().copied().collect());
        self
    }

    pub fn with_banner(mut self, service: &str, banner: Banner) -> Self {
        self.banners.insert(service.to_string(), banner);
        self
    }

    fn service_name(port: u16) -> String {
        COMMON_PORTS
            .iter()
            .find(|(p, _)| *p == port)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| format!("Unknown-{}", port))
    }

    fn is_open(&self, rng: &mut ChaCha8Rng, port: u16) -> bool {
        // one draw per port keeps the result stable for a given target
        let roll = rng.gen::<f64>();
        match &self.forced_open {
            Some(open) => open.contains(&port),
            None => {
                let probability = if LIKELY_OPEN.contains(&port) { 0.3 } else { 0.1 };
                roll < probability
            }
        }
    }
}

/// FNV-1a, stable across runs and platforms
fn target_seed(target: &str) -> u64 {
    target.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

impl Scanner for StaticScanner {
    fn scan(&self, target: &str) -> Result<ScanReport> {
        if target.trim().is_empty() {
            return Err(SimError::ScanFailed {
                target: target.to_string(),
                reason: "empty target".to_string(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(target_seed(target));
        let mut open_ports = Vec::new();
        let mut services = Vec::new();

        for &port in &self.ports {
            if !self.is_open(&mut rng, port) {
                continue;
            }

            let name = Self::service_name(port);
            let banner = self.banners.get(&name);

            open_ports.push(PortInfo {
                port,
                service: name.clone(),
                banner: banner.map(|b| b.text.clone()),
            });
            services.push(ServiceInfo {
                name,
                port,
                protocol: "tcp".to_string(),
                product: banner.map(|b| b.product.clone()),
                version: banner
                    .filter(|b| !b.version.is_empty())
                    .map(|b| b.version.clone()),
            });
        }

        Ok(ScanReport {
            target: target.to_string(),
            open_ports,
            services,
            vulnerabilities: Vec::new(),
            ports_scanned: self.ports.len(),
        })
    }
}
