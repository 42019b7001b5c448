//! Mapping between registrations and tree paths
//!
//! Layout under the configured root:
//!
//! ```text
//! {root}/{rpcType}/metadata/{contextPath}/{nodeName}
//! {root}/{rpcType}/uri/{contextPath}/{host:port}
//! ```
//!
//! Context paths are stored without their leading `/`.

use crate::error::{RegistryError, Result};
use crate::record::RecordKind;

/// Pure path arithmetic over a fixed root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScheme {
    root: String,
}

impl PathScheme {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/');
        Self {
            root: if root.starts_with('/') {
                root.to_string()
            } else {
                format!("/{}", root)
            },
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Parent of every context path of one kind: `{root}/{rpcType}/{kind}`
    pub fn context_path_parent(&self, rpc_type: &str, kind: RecordKind) -> Result<String> {
        let rpc_type = non_empty(rpc_type, "rpc type")?;
        Ok(format!("{}/{}/{}", self.root, rpc_type, kind.segment()))
    }

    /// Parent of the metadata leaves of one context path
    pub fn metadata_parent_path(&self, rpc_type: &str, context_path: &str) -> Result<String> {
        self.parent_path(rpc_type, RecordKind::Metadata, context_path)
    }

    /// Parent of the endpoint leaves of one context path
    pub fn uri_parent_path(&self, rpc_type: &str, context_path: &str) -> Result<String> {
        self.parent_path(rpc_type, RecordKind::Uri, context_path)
    }

    pub fn parent_path(&self, rpc_type: &str, kind: RecordKind, context_path: &str) -> Result<String> {
        let segment = context_segment(context_path)?;
        Ok(format!("{}/{}", self.context_path_parent(rpc_type, kind)?, segment))
    }

    /// `parent/leaf`
    pub fn real_node(parent: &str, leaf: &str) -> String {
        format!("{}/{}", parent.trim_end_matches('/'), leaf)
    }

    /// Last segment of a path
    pub fn leaf_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Context path (with leading `/`) a parent path was built from
    pub fn context_path_of(parent: &str) -> String {
        format!("/{}", Self::leaf_name(parent))
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(value)
}

/// `"/order"` -> `"order"`; inner separators would split the tree level, so
/// they are flattened to `-`.
fn context_segment(context_path: &str) -> Result<String> {
    let segment = context_path.trim_start_matches('/').trim_end_matches('/');
    non_empty(segment, "context path")?;
    Ok(segment.replace('/', "-"))
}
