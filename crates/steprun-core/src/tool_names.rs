// Tool function names
//
// Tools are offered to the model as functions named
// `identifier____api_name[____type]`. Providers cap function names at 64
// characters, so an API name that would push the full name to that limit is
// replaced by `SHA256_` plus a short digest of the API name. If the identifier
// alone is still too long it is digested the same way. Resolution reverses
// this by hashing the identifiers and API names found in the manifests.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::llm::ToolFunction;
use crate::tool_types::{
    ChatToolPayload, RawToolCall, ToolManifestMap, ToolSourceMap, ToolType,
};

pub const NAME_SEPARATOR: &str = "____";
pub const MAX_FUNCTION_NAME_LENGTH: usize = 64;
/// Marks a name segment that was replaced by a truncated SHA-256 digest
pub const HASHED_NAME_PREFIX: &str = "SHA256_";

const DIGEST_HEX_LEN: usize = 12;

fn name_digest(segment: &str) -> String {
    let digest = hex::encode(Sha256::digest(segment.as_bytes()));
    digest[..DIGEST_HEX_LEN].to_string()
}

fn hashed(segment: &str) -> String {
    format!("{HASHED_NAME_PREFIX}{}", name_digest(segment))
}

/// Function name for one API of a tool
pub fn generate(identifier: &str, api_name: &str, tool_type: ToolType) -> String {
    let suffix = match tool_type {
        ToolType::Default => String::new(),
        other => format!("{NAME_SEPARATOR}{other}"),
    };

    let name = format!("{identifier}{NAME_SEPARATOR}{api_name}{suffix}");
    if name.len() < MAX_FUNCTION_NAME_LENGTH {
        return name;
    }

    let api = hashed(api_name);
    let name = format!("{identifier}{NAME_SEPARATOR}{api}{suffix}");
    if name.len() < MAX_FUNCTION_NAME_LENGTH {
        return name;
    }

    format!("{}{NAME_SEPARATOR}{api}{suffix}", hashed(identifier))
}

/// Function definitions for the given tool identifiers.
/// Identifiers without a manifest are skipped.
pub fn tool_functions(tools: &[String], manifests: &ToolManifestMap) -> Vec<ToolFunction> {
    tools
        .iter()
        .filter_map(|identifier| {
            let manifest = manifests.get(identifier);
            if manifest.is_none() {
                warn!(identifier = %identifier, "No manifest for tool, not offering it");
            }
            manifest
        })
        .flat_map(|manifest| {
            manifest.api.iter().map(|api| ToolFunction {
                name: generate(&manifest.identifier, &api.name, manifest.tool_type),
                description: api.description.clone(),
                parameters: api.parameters.clone(),
            })
        })
        .collect()
}

/// Map a raw model tool call back to a routed payload.
///
/// Returns `None` when the name is malformed or a hashed segment matches no
/// manifest identifier or API.
pub fn resolve(
    call: &RawToolCall,
    manifests: &ToolManifestMap,
    sources: &ToolSourceMap,
) -> Option<ChatToolPayload> {
    let mut parts = call.name.split(NAME_SEPARATOR);
    let identifier_part = parts.next().filter(|s| !s.is_empty())?;
    let api_part = parts.next().filter(|s| !s.is_empty())?;
    let type_part = parts.next();

    let (identifier, manifest) = match identifier_part.strip_prefix(HASHED_NAME_PREFIX) {
        Some(digest) => {
            let manifest = manifests
                .values()
                .find(|m| name_digest(&m.identifier) == digest)?;
            (manifest.identifier.as_str(), Some(manifest))
        }
        None => (identifier_part, manifests.get(identifier_part)),
    };

    let api_name = match api_part.strip_prefix(HASHED_NAME_PREFIX) {
        Some(digest) => manifest?
            .api
            .iter()
            .find(|api| name_digest(&api.name) == digest)?
            .name
            .clone(),
        None => api_part.to_string(),
    };

    let tool_type = type_part
        .and_then(ToolType::parse)
        .or_else(|| manifest.map(|m| m.tool_type))
        .unwrap_or_default();

    let mut payload = ChatToolPayload::new(&call.id, identifier, api_name, &call.arguments);
    payload.tool_type = tool_type;
    payload.source = Some(sources.get(identifier).copied().unwrap_or_default());
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_types::{ToolManifest, ToolSource};

    #[test]
    fn test_generate_short_name() {
        assert_eq!(generate("calc", "add", ToolType::Default), "calc____add");
        assert_eq!(
            generate("calc", "add", ToolType::Builtin),
            "calc____add____builtin"
        );
    }

    #[test]
    fn test_long_api_name_is_hashed_and_resolved() {
        let long_api = "a".repeat(70);
        let manifest = ToolManifest::new("search").with_api(long_api.clone(), "long one");
        let manifests = ToolManifestMap::from([("search".to_string(), manifest)]);
        let sources = ToolSourceMap::from([("search".to_string(), ToolSource::Mcp)]);

        let name = generate("search", &long_api, ToolType::Default);
        assert!(name.starts_with("search____SHA256_"));
        assert!(name.len() < MAX_FUNCTION_NAME_LENGTH);

        let payload = resolve(&RawToolCall::new("call_1", name, "{}"), &manifests, &sources).unwrap();
        assert_eq!(payload.api_name, long_api);
        assert_eq!(payload.source, Some(ToolSource::Mcp));
    }

    #[test]
    fn test_long_identifier_stays_under_limit() {
        let identifier = format!("mcp-{}", "server".repeat(12));
        let manifest = ToolManifest::new(identifier.clone()).with_api("query", "Run a query");
        let manifests = ToolManifestMap::from([(identifier.clone(), manifest)]);

        for tool_type in [ToolType::Default, ToolType::Standalone] {
            let name = generate(&identifier, "query", tool_type);
            assert!(name.len() < MAX_FUNCTION_NAME_LENGTH, "{name}");
            assert!(name.starts_with(HASHED_NAME_PREFIX));

            let call = RawToolCall::new("call_1", name, "{}");
            let payload = resolve(&call, &manifests, &ToolSourceMap::new()).unwrap();
            assert_eq!(payload.identifier, identifier);
            assert_eq!(payload.api_name, "query");
            assert_eq!(payload.tool_type, tool_type);
        }

        let unknown = RawToolCall::new("call_2", "SHA256_000000000000____query", "{}");
        assert!(resolve(&unknown, &manifests, &ToolSourceMap::new()).is_none());
    }

    #[test]
    fn test_resolve_defaults_to_builtin_source() {
        let payload = resolve(
            &RawToolCall::new("call_2", "calc____add____standalone", r#"{"a":1}"#),
            &ToolManifestMap::new(),
            &ToolSourceMap::new(),
        )
        .unwrap();

        assert_eq!(payload.identifier, "calc");
        assert_eq!(payload.api_name, "add");
        assert_eq!(payload.tool_type, ToolType::Standalone);
        assert_eq!(payload.source, Some(ToolSource::Builtin));
        assert_eq!(payload.arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_resolve_rejects_malformed_names() {
        let manifests = ToolManifestMap::new();
        let sources = ToolSourceMap::new();
        assert!(resolve(&RawToolCall::new("c", "no_separator", ""), &manifests, &sources).is_none());
        assert!(resolve(&RawToolCall::new("c", "x____SHA256_abc", ""), &manifests, &sources).is_none());
    }

    #[test]
    fn test_tool_functions_skip_unknown() {
        let manifest = ToolManifest::new("calc")
            .with_api("add", "Add numbers")
            .with_api("sub", "Subtract numbers");
        let manifests = ToolManifestMap::from([("calc".to_string(), manifest)]);

        let functions = tool_functions(&["calc".to_string(), "missing".to_string()], &manifests);
        let names: Vec<_> = functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["calc____add", "calc____sub"]);
    }
}
