use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const BRIDGE_HOST: &str = "BRIDGE_HOST";

const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";

pub fn get_default_bridge_host() -> String {
    DEFAULT_BRIDGE_HOST.to_string()
}

pub fn get_bridge_host() -> Option<String> {
    std::env::var(BRIDGE_HOST).ok().filter(|host| !host.is_empty())
}

const BRIDGE_BASE_PORT: &str = "BRIDGE_BASE_PORT";

const DEFAULT_BASE_PORT: u16 = 5000;

pub fn get_default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

pub fn get_base_port() -> Option<u16> {
    let port_from_env = std::env::var(BRIDGE_BASE_PORT);
    port_from_env.ok().and_then(|res| res.parse().ok())
}

const DEFAULT_AGENT_HOST: &str = "DEFAULT_AGENT_HOST";

pub fn get_default_agent_host() -> Option<String> {
    std::env::var(DEFAULT_AGENT_HOST)
        .ok()
        .filter(|host| !host.is_empty())
}

const INTEGRATION_PORT: &str = "INTEGRATION_PORT";

const PORT: &str = "PORT";

const DEFAULT_INTEGRATION_PORT: u16 = 3002;

/// Port of the webhook front-end; `INTEGRATION_PORT` wins over `PORT`
pub fn get_integration_port() -> Option<u16> {
    [INTEGRATION_PORT, PORT]
        .into_iter()
        .find_map(|key| std::env::var(key).ok()?.parse().ok())
}

pub fn get_default_api_bind() -> SocketAddr {
    SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        DEFAULT_INTEGRATION_PORT,
    )
}

const INTEGRATION_URL: &str = "INTEGRATION_URL";

pub fn get_integration_url() -> Option<String> {
    std::env::var(INTEGRATION_URL).ok().filter(|url| !url.is_empty())
}

pub fn get_default_integration_url() -> String {
    format!("http://localhost:{DEFAULT_INTEGRATION_PORT}")
}
