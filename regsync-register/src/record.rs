//! Registration records and their JSON wire shape

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// RPC flavour of a registered interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcType {
    #[default]
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "dubbo")]
    Dubbo,
    #[serde(rename = "sofa")]
    Sofa,
    #[serde(rename = "tars")]
    Tars,
    #[serde(rename = "springCloud")]
    SpringCloud,
    #[serde(rename = "motan")]
    Motan,
    #[serde(rename = "grpc")]
    Grpc,
    #[serde(rename = "websocket")]
    WebSocket,
}

impl RpcType {
    /// Every known type; metadata is watched for all of them
    pub const ALL: [RpcType; 8] = [
        RpcType::Http,
        RpcType::Dubbo,
        RpcType::Sofa,
        RpcType::Tars,
        RpcType::SpringCloud,
        RpcType::Motan,
        RpcType::Grpc,
        RpcType::WebSocket,
    ];

    /// Types whose producers also publish endpoint records
    pub const WITH_URI: [RpcType; 3] = [RpcType::Http, RpcType::Tars, RpcType::Grpc];

    /// Wire name, also used as a path segment
    pub fn name(&self) -> &'static str {
        match self {
            RpcType::Http => "http",
            RpcType::Dubbo => "dubbo",
            RpcType::Sofa => "sofa",
            RpcType::Tars => "tars",
            RpcType::SpringCloud => "springCloud",
            RpcType::Motan => "motan",
            RpcType::Grpc => "grpc",
            RpcType::WebSocket => "websocket",
        }
    }

    pub fn supports_uri(&self) -> bool {
        Self::WITH_URI.contains(self)
    }

    /// HTTP-style routes are identified by context path and rule name,
    /// everything else by service and method.
    pub fn is_route_based(&self) -> bool {
        matches!(self, RpcType::Http | RpcType::SpringCloud)
    }
}

impl FromStr for RpcType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        RpcType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| RegistryError::InvalidArgument(format!("unknown rpc type: {}", s)))
    }
}

impl fmt::Display for RpcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which of the two parallel subtrees a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Metadata,
    Uri,
}

impl RecordKind {
    pub fn segment(&self) -> &'static str {
        match self {
            RecordKind::Metadata => "metadata",
            RecordKind::Uri => "uri",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// One exposed interface or route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataRecord {
    pub app_name: String,
    pub context_path: String,
    pub path: String,
    pub path_desc: String,
    pub rpc_type: RpcType,
    pub service_name: String,
    pub method_name: String,
    pub rule_name: String,
    pub parameter_types: String,
    pub rpc_ext: String,
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub plugin_names: Vec<String>,
    pub register_meta_data: bool,
}

impl MetadataRecord {
    /// Route-style record (`http`, `springCloud`)
    pub fn route(
        rpc_type: RpcType,
        context_path: impl Into<String>,
        rule_name: impl Into<String>,
    ) -> Self {
        let rule_name = rule_name.into();
        Self {
            rpc_type,
            context_path: context_path.into(),
            path: rule_name.clone(),
            rule_name,
            enabled: true,
            ..Default::default()
        }
    }

    /// RPC-style record identified by service and method
    pub fn rpc(
        rpc_type: RpcType,
        context_path: impl Into<String>,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            rpc_type,
            context_path: context_path.into(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Storage identity of this record within its context path.
    ///
    /// Route-based types join the context path and rule name with `-`,
    /// each stripped of its leading `/` with inner `/` turned into `-`.
    /// Other types use `service#method`.
    pub fn node_name(&self) -> Result<String> {
        let name = if self.rpc_type.is_route_based() {
            let context = flatten_segment(&self.context_path);
            let rule = flatten_segment(&self.rule_name);
            if context.is_empty() || rule.is_empty() {
                return Err(RegistryError::InvalidArgument(format!(
                    "{} record needs a context path and rule name",
                    self.rpc_type
                )));
            }
            format!("{}-{}", context, rule)
        } else {
            if self.service_name.is_empty() || self.method_name.is_empty() {
                return Err(RegistryError::InvalidArgument(format!(
                    "{} record needs a service and method name",
                    self.rpc_type
                )));
            }
            let name = format!("{}#{}", self.service_name, self.method_name);
            name.trim_start_matches('/').to_string()
        };
        Ok(name)
    }
}

fn flatten_segment(raw: &str) -> String {
    raw.trim_start_matches('/').replace('/', "-")
}

/// One live network endpoint serving a context path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UriRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(default)]
    pub context_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_type: Option<RpcType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl UriRecord {
    pub fn new(
        rpc_type: RpcType,
        context_path: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            app_name: None,
            context_path: context_path.into(),
            rpc_type: Some(rpc_type),
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Endpoint record advertised alongside a metadata registration
    pub fn from_metadata(metadata: &MetadataRecord) -> Self {
        Self {
            app_name: Some(metadata.app_name.clone()).filter(|s| !s.is_empty()),
            context_path: metadata.context_path.clone(),
            rpc_type: Some(metadata.rpc_type),
            host: Some(metadata.host.clone()).filter(|s| !s.is_empty()),
            port: Some(metadata.port).filter(|p| *p != 0),
        }
    }

    /// Marker telling consumers a context path has no live endpoints left
    pub fn withdrawal(context_path: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            ..Default::default()
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        self.host.is_none() && self.port.is_none()
    }

    /// Leaf name under the URI subtree: `host:port`
    pub fn node_name(&self) -> Result<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) if !host.is_empty() => Ok(format!("{}:{}", host, port)),
            _ => Err(RegistryError::InvalidArgument(format!(
                "uri record for {} has no host/port",
                self.context_path
            ))),
        }
    }
}

/// A batch of same-kind records handed to the publisher
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBatch {
    Metadata(Vec<MetadataRecord>),
    Uri(Vec<UriRecord>),
}

impl RecordBatch {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBatch::Metadata(_) => RecordKind::Metadata,
            RecordBatch::Uri(_) => RecordKind::Uri,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Metadata(records) => records.len(),
            RecordBatch::Uri(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
