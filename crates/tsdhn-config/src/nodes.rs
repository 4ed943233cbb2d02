// Helper functions for extracting values from KDL nodes

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// `name "path" "message"` pairs.
pub(crate) fn get_path_and_message(node: &KdlNode) -> ConfigResult<(String, String)> {
    let args = get_all_string_args(node);
    match args.as_slice() {
        [path, message] => Ok((path.clone(), message.clone())),
        [path] => Ok((path.clone(), format!("{path} missing"))),
        _ => Err(ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: "expected a path and an optional message".to_string(),
        }),
    }
}

pub(crate) fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children()
        .map(|c| c.nodes())
        .unwrap_or_default()
        .iter()
}
