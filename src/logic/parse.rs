//! Turns uploaded or fetched specification bytes into a [`ParsedDocument`].

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::model::{
    collect_extensions, ComponentContent, ComponentKind, ExternalDocs, HttpMethod, Info,
    OperationContent, OperationKey, ParsedDocument, RootPatch, SecurityRequirement, Server, Tag,
};

/// Extension field carrying a server's assigned numeric identity
pub const SERVER_ID_EXTENSION: &str = "x-server-id";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    version: String,
    description: Option<String>,
    terms_of_service: Option<String>,
    contact: Option<Value>,
    license: Option<Value>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RawServer {
    url: String,
    description: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTag {
    name: String,
    description: Option<String>,
    external_docs: Option<ExternalDocs>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    operation_id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    request_body: Option<Value>,
    #[serde(default)]
    responses: BTreeMap<String, Value>,
    #[serde(default)]
    deprecated: bool,
    security: Option<Vec<SecurityRequirement>>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

/// Parse a JSON or YAML OpenAPI 3.x document, optionally gzip-compressed
pub fn parse_document(bytes: &[u8]) -> Result<ParsedDocument, ReconcileError> {
    let raw = decompress(bytes)?;
    let text = std::str::from_utf8(&raw)
        .map_err(|e| ReconcileError::validation(format!("document is not UTF-8: {e}")))?;

    let value: Value = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)
            .map_err(|e| ReconcileError::validation(format!("invalid JSON document: {e}")))?
    } else {
        serde_norway::from_str(text)
            .map_err(|e| ReconcileError::validation(format!("invalid YAML document: {e}")))?
    };

    let Value::Object(mut root) = value else {
        return Err(ReconcileError::validation("document root must be an object"));
    };
    check_version(&root)?;

    let components = match root.remove("components") {
        Some(Value::Object(sections)) => parse_components(sections)?,
        Some(Value::Null) | None => BTreeMap::new(),
        Some(_) => return Err(ReconcileError::validation("components must be an object")),
    };
    let operations = match root.remove("paths") {
        Some(Value::Object(paths)) => parse_paths(paths)?,
        Some(Value::Null) | None => BTreeMap::new(),
        Some(_) => return Err(ReconcileError::validation("paths must be an object")),
    };

    Ok(ParsedDocument {
        root: parse_root(root)?,
        components,
        operations,
    })
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>, ReconcileError> {
    // gzip magic bytes (1f 8b)
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        let mut decoder = GzDecoder::new(bytes);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ReconcileError::validation(format!("corrupt gzip payload: {e}")))?;
        Ok(decompressed)
    } else {
        Ok(bytes.to_vec())
    }
}

fn check_version(root: &Map<String, Value>) -> Result<(), ReconcileError> {
    if root.contains_key("swagger") {
        return Err(ReconcileError::validation(
            "Swagger 2.0 documents are not supported; convert to OpenAPI 3",
        ));
    }
    match root.get("openapi").and_then(Value::as_str) {
        Some(version) if version.starts_with("3.") => Ok(()),
        Some(version) => Err(ReconcileError::validation(format!(
            "unsupported OpenAPI version {version}"
        ))),
        None => Err(ReconcileError::validation("missing openapi version field")),
    }
}

fn from_value<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ReconcileError> {
    serde_json::from_value(value).map_err(|e| ReconcileError::validation(format!("invalid {what}: {e}")))
}

fn parse_root(mut root: Map<String, Value>) -> Result<RootPatch, ReconcileError> {
    let info = root
        .remove("info")
        .map(|value| from_value::<RawInfo>(value, "info"))
        .transpose()?
        .map(|raw| Info {
            title: raw.title,
            version: raw.version,
            description: raw.description,
            terms_of_service: raw.terms_of_service,
            contact: raw.contact,
            license: raw.license,
            extensions: collect_extensions(raw.rest),
        });

    let external_docs = root
        .remove("externalDocs")
        .map(|value| from_value::<ExternalDocs>(value, "externalDocs"))
        .transpose()?;

    let security = root
        .remove("security")
        .map(|value| from_value::<Vec<SecurityRequirement>>(value, "security"))
        .transpose()?;

    let servers = root
        .remove("servers")
        .map(|value| from_value::<Vec<RawServer>>(value, "servers"))
        .transpose()?
        .map(|raw| raw.into_iter().map(lift_server).collect());

    let tags = root
        .remove("tags")
        .map(|value| from_value::<Vec<RawTag>>(value, "tags"))
        .transpose()?
        .map(|raw| {
            raw.into_iter()
                .map(|tag| Tag {
                    name: tag.name,
                    description: tag.description,
                    external_docs: tag.external_docs,
                    extensions: collect_extensions(tag.rest),
                })
                .collect()
        });

    let extensions = collect_extensions(root.into_iter().collect());

    Ok(RootPatch {
        info,
        external_docs,
        security,
        servers,
        tags,
        extensions: (!extensions.is_empty()).then_some(extensions),
    })
}

fn lift_server(mut raw: RawServer) -> Server {
    let id = raw.rest.remove(SERVER_ID_EXTENSION).and_then(|value| match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });
    Server {
        id,
        url: raw.url,
        description: raw.description,
        variables: raw.variables,
        extensions: collect_extensions(raw.rest),
    }
}

fn parse_components(
    sections: Map<String, Value>,
) -> Result<BTreeMap<String, ComponentContent>, ReconcileError> {
    let mut components = BTreeMap::new();
    for (section, entries) in sections {
        // Extensions and sections this model does not track are skipped
        let Some(kind) = ComponentKind::parse(&section) else {
            continue;
        };
        let Value::Object(entries) = entries else {
            return Err(ReconcileError::validation(format!(
                "components.{section} must be an object"
            )));
        };
        for (name, model) in entries {
            if !model.is_object() {
                return Err(ReconcileError::validation(format!(
                    "components.{section}.{name} must be an object"
                )));
            }
            let content = ComponentContent::new(kind, name, model);
            components.insert(content.reference(), content);
        }
    }
    Ok(components)
}

fn parse_paths(
    paths: Map<String, Value>,
) -> Result<BTreeMap<OperationKey, OperationContent>, ReconcileError> {
    let mut operations = BTreeMap::new();
    for (path, item) in paths {
        let Value::Object(mut item) = item else {
            return Err(ReconcileError::validation(format!(
                "path item {path} must be an object"
            )));
        };
        let shared_parameters = match item.remove("parameters") {
            Some(value) => from_value::<Vec<Value>>(value, &format!("parameters of {path}"))?,
            None => Vec::new(),
        };

        for (field, value) in item {
            let Some(method) = HttpMethod::parse(&field) else {
                continue;
            };
            let key = OperationKey::new(method, path.clone());
            if !value.is_object() {
                return Err(ReconcileError::validation(format!(
                    "operation {key} must be an object"
                )));
            }
            let raw: RawOperation = from_value(value, &format!("operation {key}"))?;
            let content = OperationContent {
                operation_id: raw.operation_id,
                summary: raw.summary,
                description: raw.description,
                tags: raw.tags,
                parameters: inherit_parameters(&shared_parameters, raw.parameters),
                request_body: raw.request_body,
                responses: raw.responses,
                deprecated: raw.deprecated,
                security: raw.security,
                extensions: collect_extensions(raw.rest),
            };
            operations.insert(key, content);
        }
    }
    Ok(operations)
}

/// Path-level parameters apply unless the operation declares the same (in, name)
fn inherit_parameters(shared: &[Value], own: Vec<Value>) -> Vec<Value> {
    let identity = |parameter: &Value| {
        (
            parameter.get("in").and_then(Value::as_str).map(str::to_string),
            parameter.get("name").and_then(Value::as_str).map(str::to_string),
            parameter.get("$ref").and_then(Value::as_str).map(str::to_string),
        )
    };

    let mut parameters: Vec<Value> = shared
        .iter()
        .filter(|candidate| {
            let id = identity(candidate);
            !own.iter().any(|parameter| identity(parameter) == id)
        })
        .cloned()
        .collect();
    parameters.extend(own);
    parameters
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    const PETSTORE_YAML: &str = r#"
openapi: 3.0.3
info:
  title: Petstore
  version: "1.0"
  x-audience: public
servers:
  - url: https://api.example.com
    x-server-id: 7
  - url: https://staging.example.com
tags:
  - name: pets
    description: Pet operations
security:
  - apiKey: []
x-owner: team-pets
paths:
  /pets/{petId}:
    parameters:
      - name: petId
        in: path
        required: true
        schema:
          type: string
      - name: trace
        in: header
        schema:
          type: string
    get:
      operationId: getPet
      tags: [pets]
      parameters:
        - name: trace
          in: header
          required: true
          schema:
            type: string
      responses:
        '200':
          description: A pet
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/Pet'
      x-rate-limit: 10
    delete:
      responses:
        '204':
          description: Deleted
    summary: ignored path summary
components:
  schemas:
    Pet:
      type: object
      properties:
        id:
          type: string
  securitySchemes:
    apiKey:
      type: apiKey
      in: header
      name: X-API-Key
"#;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_parse_yaml_document() {
        let parsed = parse_document(PETSTORE_YAML.as_bytes()).unwrap();

        let info = parsed.root.info.as_ref().unwrap();
        assert_eq!(info.title, "Petstore");
        assert_eq!(info.extensions["x-audience"], json!("public"));

        let servers = parsed.root.servers.as_ref().unwrap();
        assert_eq!(servers[0].id, Some(7));
        assert!(servers[0].extensions.is_empty());
        assert_eq!(servers[1].id, None);

        assert_eq!(parsed.root.tags.as_ref().unwrap()[0].name, "pets");
        assert_eq!(parsed.root.extensions.as_ref().unwrap()["x-owner"], json!("team-pets"));

        assert_eq!(parsed.operations.len(), 2);
        let get = &parsed.operations[&OperationKey::new(HttpMethod::Get, "/pets/{petId}")];
        assert_eq!(get.operation_id.as_deref(), Some("getPet"));
        assert_eq!(get.extensions["x-rate-limit"], json!(10));
        assert!(get.responses.contains_key("200"));

        assert_eq!(parsed.components.len(), 2);
        assert!(parsed.components.contains_key("#/components/schemas/Pet"));
        assert!(parsed
            .components
            .contains_key("#/components/securitySchemes/apiKey"));
    }

    #[test]
    fn test_path_parameters_are_inherited_unless_overridden() {
        let parsed = parse_document(PETSTORE_YAML.as_bytes()).unwrap();
        let get = &parsed.operations[&OperationKey::new(HttpMethod::Get, "/pets/{petId}")];

        assert_eq!(get.parameters.len(), 2);
        let trace = get
            .parameters
            .iter()
            .find(|p| p["name"] == json!("trace"))
            .unwrap();
        assert_eq!(trace["required"], json!(true));

        let delete = &parsed.operations[&OperationKey::new(HttpMethod::Delete, "/pets/{petId}")];
        assert_eq!(delete.parameters.len(), 2);
    }

    #[test]
    fn test_parse_json_and_gzip() {
        let document = json!({
            "openapi": "3.1.0",
            "info": {"title": "Tiny", "version": "0.1"},
            "paths": {"/ping": {"get": {"responses": {"200": {"description": "pong"}}}}}
        });
        let bytes = serde_json::to_vec(&document).unwrap();

        let plain = parse_document(&bytes).unwrap();
        let compressed = parse_document(&gzip(&bytes)).unwrap();
        assert_eq!(plain, compressed);
        assert!(plain
            .operations
            .contains_key(&OperationKey::new(HttpMethod::Get, "/ping")));
        assert!(plain.root.servers.is_none());
        assert!(plain.root.extensions.is_none());
    }

    #[test]
    fn test_swagger_2_is_rejected() {
        let err = parse_document(br#"{"swagger": "2.0", "paths": {}}"#).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.to_string().contains("Swagger 2.0"));
    }

    #[test]
    fn test_invalid_documents_are_validation_errors() {
        for bytes in [
            &b"{not json"[..],
            &b"openapi: [unclosed"[..],
            &b"- just\n- a list\n"[..],
            &br#"{"info": {"title": "no version field"}}"#[..],
            &br#"{"openapi": "3.0.0", "paths": {"/a": {"get": "nope"}}}"#[..],
            &br#"{"openapi": "3.0.0", "components": {"schemas": {"Pet": 3}}}"#[..],
            &[0x1f, 0x8b, 0x00][..],
        ] {
            let err = parse_document(bytes).unwrap_err();
            assert!(
                matches!(err, ReconcileError::Validation(_)),
                "expected validation error, got {err}"
            );
        }
    }
}
