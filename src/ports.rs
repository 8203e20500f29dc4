//! Host port conflict resolution.
//!
//! Each published service has a desired host port. [`PortConflictResolver`]
//! probes them in service-name order and moves a taken port up in steps of
//! [`PORT_STEP`], at most [`MAX_REASSIGNMENTS`] times. Ports handed out
//! earlier in the same run count as taken, so the result never contains a
//! port twice.

use crate::config::{Configuration, keys};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use tracing::{debug, info};

/// Logical service name → host port.
pub type PortMap = BTreeMap<String, u16>;

pub const PORT_STEP: u16 = 1000;
pub const MAX_REASSIGNMENTS: u32 = 3;

/// A published service and the port it listens on inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub name: &'static str,
    pub setting: &'static str,
    pub container_port: u16,
}

pub const SERVICES: [Service; 3] = [
    Service {
        name: "debug",
        setting: keys::DEBUG_PORT,
        container_port: 5678,
    },
    Service {
        name: "http",
        setting: keys::HTTP_PORT,
        container_port: 8080,
    },
    Service {
        name: "notebook",
        setting: keys::NOTEBOOK_PORT,
        container_port: 8888,
    },
];

pub fn service(name: &str) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.name == name)
}

/// Desired host ports from configuration.
pub fn desired_ports(config: &Configuration) -> PortMap {
    SERVICES
        .iter()
        .filter_map(|s| config.port(s.setting).map(|p| (s.name.to_string(), p)))
        .collect()
}

/// Checks whether a host port can be bound.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Binds a TCP listener on all interfaces and drops it immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }
}

/// A service was moved off its desired port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassignmentNotice {
    pub service: String,
    pub desired: u16,
    pub assigned: u16,
}

impl std::fmt::Display for ReassignmentNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "port {} for {} is in use, using {} instead",
            self.desired, self.service, self.assigned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no free port for {service}: tried {desired} through {last_tried}")]
pub struct PortExhaustionError {
    pub service: String,
    pub desired: u16,
    pub last_tried: u16,
}

impl PortExhaustionError {
    pub fn remediation(&self) -> String {
        format!(
            "free port {} or set {} to an unused port",
            self.desired,
            service(&self.service)
                .map(|s| s.setting)
                .unwrap_or("the service port")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortResolution {
    pub ports: PortMap,
    pub notices: Vec<ReassignmentNotice>,
}

pub struct PortConflictResolver<'a> {
    probe: &'a dyn PortProbe,
}

impl<'a> PortConflictResolver<'a> {
    pub fn new(probe: &'a dyn PortProbe) -> Self {
        Self { probe }
    }

    /// Assign a free, distinct host port to every service.
    ///
    /// # Errors
    ///
    /// Returns [`PortExhaustionError`] for the first service whose desired
    /// port and all reassignment candidates are taken.
    pub fn resolve(&self, desired: &PortMap) -> Result<PortResolution, PortExhaustionError> {
        self.resolve_excluding(desired, &BTreeSet::new())
    }

    /// Like [`resolve`](Self::resolve), treating `excluded` ports as taken.
    pub fn resolve_excluding(
        &self,
        desired: &PortMap,
        excluded: &BTreeSet<u16>,
    ) -> Result<PortResolution, PortExhaustionError> {
        let mut claimed = excluded.clone();
        let mut ports = PortMap::new();
        let mut notices = Vec::new();

        for (service, &want) in desired {
            let assigned = self.assign(service, want, &claimed)?;
            claimed.insert(assigned);
            if assigned != want {
                let notice = ReassignmentNotice {
                    service: service.clone(),
                    desired: want,
                    assigned,
                };
                info!("{}", notice);
                notices.push(notice);
            }
            ports.insert(service.clone(), assigned);
        }

        Ok(PortResolution { ports, notices })
    }

    fn assign(&self, service: &str, desired: u16, claimed: &BTreeSet<u16>) -> Result<u16, PortExhaustionError> {
        let mut candidate = desired;
        let mut reassignments = 0;

        loop {
            if !claimed.contains(&candidate) && self.probe.is_free(candidate) {
                return Ok(candidate);
            }
            debug!("Port {} unavailable for {}", candidate, service);

            let next = candidate.checked_add(PORT_STEP);
            match next {
                Some(port) if reassignments < MAX_REASSIGNMENTS => {
                    candidate = port;
                    reassignments += 1;
                }
                _ => {
                    return Err(PortExhaustionError {
                        service: service.to_string(),
                        desired,
                        last_tried: candidate,
                    });
                }
            }
        }
    }
}
