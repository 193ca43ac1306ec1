//! The listener the discovery server pushes to the proxy

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier, Address, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{filter::ConfigType, Filter, FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier, TcpProxy,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use prost::Message;

/// Listener resource type URL
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";

/// Name of the pushed listener
pub const DYNAMIC_LISTENER_NAME: &str = "dynamic-listener";

/// Static bootstrap cluster the pushed listener proxies to
pub const BACKEND_CLUSTER: &str = "backend";

/// A TCP proxy listener on the `dynamic-listener` port forwarding to [`BACKEND_CLUSTER`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicListener {
    pub port: u16,
}

impl DynamicListener {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn to_listener(&self) -> Listener {
        let tcp_proxy = TcpProxy {
            cluster_specifier: Some(ClusterSpecifier::Cluster(BACKEND_CLUSTER.to_string())),
            stat_prefix: DYNAMIC_LISTENER_NAME.to_string(),
            ..Default::default()
        };

        let filter = Filter {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            config_type: Some(ConfigType::TypedConfig(EnvoyAny {
                type_url: TCP_PROXY_TYPE_URL.to_string(),
                value: tcp_proxy.encode_to_vec(),
            })),
        };

        let socket_address = SocketAddress {
            address: "127.0.0.1".to_string(),
            port_specifier: Some(PortSpecifier::PortValue(u32::from(self.port))),
            ..Default::default()
        };

        Listener {
            name: DYNAMIC_LISTENER_NAME.to_string(),
            address: Some(Address { address: Some(AddressType::SocketAddress(socket_address)) }),
            filter_chains: vec![FilterChain { filters: vec![filter], ..Default::default() }],
            ..Default::default()
        }
    }

    pub fn to_any(&self) -> EnvoyAny {
        EnvoyAny { type_url: LISTENER_TYPE_URL.to_string(), value: self.to_listener().encode_to_vec() }
    }
}
