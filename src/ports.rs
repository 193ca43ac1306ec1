//! Port allocation for the STS flow topology
//!
//! Every test run gets a fixed window of loopback ports derived from its test
//! identifier, so concurrent runs with different identifiers never collide.
//! Ports are reserved by binding a listener and stay reserved until a service
//! takes its listener over or the reservation is released for an external
//! process.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use serde::Serialize;
use tracing::debug;

use crate::errors::PortError;

/// First port of the allocation range
const PORT_RANGE_START: u16 = 30000;

/// Ports in each test's window
const PORTS_PER_TEST: u16 = 16;

/// Number of disjoint windows that fit in the range
const TEST_WINDOWS: u16 = (u16::MAX - PORT_RANGE_START) / PORTS_PER_TEST;

/// Logical port roles in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortRole {
    /// Mock OAuth token backend
    Auth,
    /// STS server
    Sts,
    /// Listener pushed to the proxy over xDS
    DynamicListener,
    /// Listener defined in the proxy bootstrap
    StaticListener,
    /// Discovery (ADS) server
    Discovery,
    /// Test backend behind the proxy listeners
    Backend,
    /// Proxy admin endpoint
    Admin,
}

impl PortRole {
    /// All roles, in allocation order
    pub const ALL: [PortRole; 7] = [
        PortRole::Auth,
        PortRole::Sts,
        PortRole::DynamicListener,
        PortRole::StaticListener,
        PortRole::Discovery,
        PortRole::Backend,
        PortRole::Admin,
    ];

    /// Roles whose sockets are opened by the proxy process itself
    pub const PROXY_OWNED: [PortRole; 3] =
        [PortRole::DynamicListener, PortRole::StaticListener, PortRole::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortRole::Auth => "auth",
            PortRole::Sts => "sts",
            PortRole::DynamicListener => "dynamic-listener",
            PortRole::StaticListener => "static-listener",
            PortRole::Discovery => "discovery",
            PortRole::Backend => "backend",
            PortRole::Admin => "admin",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable role → port mapping for one test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMap {
    pub auth: u16,
    pub sts: u16,
    pub dynamic_listener: u16,
    pub static_listener: u16,
    pub discovery: u16,
    pub backend: u16,
    pub admin: u16,
}

impl PortMap {
    /// Port assigned to a role
    pub fn get(&self, role: PortRole) -> u16 {
        match role {
            PortRole::Auth => self.auth,
            PortRole::Sts => self.sts,
            PortRole::DynamicListener => self.dynamic_listener,
            PortRole::StaticListener => self.static_listener,
            PortRole::Discovery => self.discovery,
            PortRole::Backend => self.backend,
            PortRole::Admin => self.admin,
        }
    }

    /// Loopback socket address for a role
    pub fn addr(&self, role: PortRole) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.get(role)))
    }

    /// Iterate over `(role, port)` pairs in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (PortRole, u16)> + '_ {
        PortRole::ALL.into_iter().map(move |role| (role, self.get(role)))
    }
}

/// Port allocator that reserves one loopback port per role and holds the
/// reservations until they are taken, released or dropped
#[derive(Debug)]
pub struct PortAllocator {
    test_id: u16,
    ports: PortMap,
    reservations: HashMap<PortRole, TcpListener>,
}

impl PortAllocator {
    /// Reserve the full port set for a test identifier
    pub fn for_test(test_id: u16) -> Result<Self, PortError> {
        let (window_start, window_end) = window_for(test_id);
        let mut candidates = window_start..window_end;
        let mut reservations = HashMap::with_capacity(PortRole::ALL.len());
        let mut assigned = HashMap::with_capacity(PortRole::ALL.len());

        for role in PortRole::ALL {
            let (port, listener) = loop {
                let port = candidates.next().ok_or(PortError::Exhausted {
                    test_id,
                    role,
                    window_start,
                    window_end,
                })?;
                match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                    Ok(listener) => break (port, listener),
                    Err(e) => debug!(port, role = %role, error = %e, "Port unavailable, trying next"),
                }
            };
            assigned.insert(role, port);
            reservations.insert(role, listener);
        }

        let ports = PortMap {
            auth: assigned[&PortRole::Auth],
            sts: assigned[&PortRole::Sts],
            dynamic_listener: assigned[&PortRole::DynamicListener],
            static_listener: assigned[&PortRole::StaticListener],
            discovery: assigned[&PortRole::Discovery],
            backend: assigned[&PortRole::Backend],
            admin: assigned[&PortRole::Admin],
        };

        Ok(Self { test_id, ports, reservations })
    }

    pub fn test_id(&self) -> u16 {
        self.test_id
    }

    /// The allocated port map
    pub fn ports(&self) -> PortMap {
        self.ports
    }

    /// Hand a reserved socket over to an in-process service.
    ///
    /// Must be called from within a tokio runtime.
    pub fn take_listener(&mut self, role: PortRole) -> Result<tokio::net::TcpListener, PortError> {
        let listener = self.reservations.remove(&role).ok_or(PortError::NotReserved { role })?;
        let port = self.ports.get(role);
        let handover = |source| PortError::Handover { role, port, source };
        listener.set_nonblocking(true).map_err(handover)?;
        tokio::net::TcpListener::from_std(listener).map_err(handover)
    }

    /// Release a reservation so an external process can bind the port
    pub fn release(&mut self, role: PortRole) -> Option<u16> {
        self.reservations.remove(&role).map(|_| self.ports.get(role))
    }

    /// Bind a released role's port again. No-op if the role is still reserved.
    pub fn reserve(&mut self, role: PortRole) -> Result<(), PortError> {
        if self.is_reserved(role) {
            return Ok(());
        }
        let port = self.ports.get(role);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .map_err(|source| PortError::Rebind { role, port, source })?;
        self.reservations.insert(role, listener);
        Ok(())
    }

    /// Release every remaining reservation
    pub fn release_all(&mut self) {
        self.reservations.clear();
    }

    /// Whether a role's port is still held by this allocator
    pub fn is_reserved(&self, role: PortRole) -> bool {
        self.reservations.contains_key(&role)
    }
}

fn window_for(test_id: u16) -> (u16, u16) {
    let start = PORT_RANGE_START + (test_id % TEST_WINDOWS) * PORTS_PER_TEST;
    (start, start + PORTS_PER_TEST)
}
