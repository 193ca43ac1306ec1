//! Bootstrap template rendering
//!
//! Templates reference values as `{{ name }}`. Every name must be known to
//! [`BootstrapValues`]; the rendered document must parse as YAML.

use std::collections::BTreeMap;
use std::path::Path;

use crate::credentials::CredentialPaths;
use crate::errors::ProxyError;
use crate::ports::PortMap;

/// Template shipped with the harness
pub const DEFAULT_BOOTSTRAP_TEMPLATE: &str = include_str!("../../testdata/bootstrap.yaml");

/// Values available to bootstrap templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapValues {
    values: BTreeMap<&'static str, String>,
}

impl BootstrapValues {
    pub fn new(node_id: &str, ports: &PortMap, credentials: &CredentialPaths) -> Self {
        let values = BTreeMap::from([
            ("node_id", node_id.to_string()),
            ("admin_port", ports.admin.to_string()),
            ("discovery_port", ports.discovery.to_string()),
            ("sts_port", ports.sts.to_string()),
            ("auth_port", ports.auth.to_string()),
            ("backend_port", ports.backend.to_string()),
            ("static_listener_port", ports.static_listener.to_string()),
            ("dynamic_listener_port", ports.dynamic_listener.to_string()),
            ("token_path", credentials.token.display().to_string()),
            ("ca_cert_path", credentials.ca_cert.display().to_string()),
        ]);
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Substitute every `{{ name }}` in `template`
pub fn render(template: &str, values: &BootstrapValues) -> Result<String, ProxyError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(ProxyError::UnterminatedPlaceholder(offset + start))?;

        let name = after_open[..end].trim();
        let value = values.get(name).ok_or_else(|| ProxyError::UnknownPlaceholder(name.to_string()))?;
        rendered.push_str(value);

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    rendered.push_str(rest);

    serde_yaml::from_str::<serde_yaml::Value>(&rendered)?;
    Ok(rendered)
}

/// Read a template from disk, or fall back to [`DEFAULT_BOOTSTRAP_TEMPLATE`]
pub fn load_template(path: Option<&Path>) -> Result<String, ProxyError> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|source| ProxyError::Io { path: path.to_path_buf(), source }),
        None => Ok(DEFAULT_BOOTSTRAP_TEMPLATE.to_string()),
    }
}
