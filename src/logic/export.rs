use serde_json::{json, Map, Value};

use crate::logic::parse::SERVER_ID_EXTENSION;
use crate::model::{ComponentDefinition, Extensions, Operation, SchemaDocument};

const EXPORT_VERSION: &str = "3.0.3";

/// Render the persisted schema of a service as an OpenAPI 3 document.
///
/// Soft-deleted operations are left out. Server identities are written back
/// as `x-server-id` so a re-import matches the same servers.
pub fn export_document(
    document: &SchemaDocument,
    operations: &[Operation],
    components: &[ComponentDefinition],
) -> Value {
    let mut root = Map::new();
    root.insert("openapi".to_string(), json!(EXPORT_VERSION));

    if let Some(info) = &document.info {
        let mut rendered = Map::new();
        rendered.insert("title".to_string(), json!(info.title));
        rendered.insert("version".to_string(), json!(info.version));
        insert_opt(&mut rendered, "description", info.description.as_ref().map(|v| json!(v)));
        insert_opt(
            &mut rendered,
            "termsOfService",
            info.terms_of_service.as_ref().map(|v| json!(v)),
        );
        insert_opt(&mut rendered, "contact", info.contact.clone());
        insert_opt(&mut rendered, "license", info.license.clone());
        extend(&mut rendered, &info.extensions);
        root.insert("info".to_string(), Value::Object(rendered));
    }

    if let Some(external_docs) = &document.external_docs {
        root.insert("externalDocs".to_string(), json!(external_docs));
    }
    if !document.security.is_empty() {
        root.insert("security".to_string(), json!(document.security));
    }

    if !document.servers.is_empty() {
        let servers = document
            .servers
            .iter()
            .map(|server| {
                let mut rendered = Map::new();
                rendered.insert("url".to_string(), json!(server.url));
                insert_opt(&mut rendered, "description", server.description.as_ref().map(|v| json!(v)));
                if !server.variables.is_empty() {
                    rendered.insert("variables".to_string(), json!(server.variables));
                }
                extend(&mut rendered, &server.extensions);
                insert_opt(&mut rendered, SERVER_ID_EXTENSION, server.id.map(|id| json!(id)));
                Value::Object(rendered)
            })
            .collect();
        root.insert("servers".to_string(), Value::Array(servers));
    }

    if !document.tags.is_empty() {
        let tags = document
            .tags
            .iter()
            .map(|tag| {
                let mut rendered = Map::new();
                rendered.insert("name".to_string(), json!(tag.name));
                insert_opt(&mut rendered, "description", tag.description.as_ref().map(|v| json!(v)));
                insert_opt(
                    &mut rendered,
                    "externalDocs",
                    tag.external_docs.as_ref().map(|v| json!(v)),
                );
                extend(&mut rendered, &tag.extensions);
                Value::Object(rendered)
            })
            .collect();
        root.insert("tags".to_string(), Value::Array(tags));
    }

    let mut paths = Map::new();
    for operation in operations.iter().filter(|operation| !operation.deleted) {
        let item = paths
            .entry(operation.path.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(item) = item {
            item.insert(
                operation.method.as_str().to_ascii_lowercase(),
                render_operation(operation),
            );
        }
    }
    root.insert("paths".to_string(), Value::Object(paths));

    if !components.is_empty() {
        let mut sections = Map::new();
        for component in components {
            let section = sections
                .entry(component.kind.as_str().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(section) = section {
                section.insert(component.name.clone(), component.model.clone());
            }
        }
        root.insert("components".to_string(), Value::Object(sections));
    }

    extend(&mut root, &document.extensions);
    Value::Object(root)
}

fn render_operation(operation: &Operation) -> Value {
    let content = &operation.content;
    let mut rendered = Map::new();
    insert_opt(&mut rendered, "operationId", content.operation_id.as_ref().map(|v| json!(v)));
    insert_opt(&mut rendered, "summary", content.summary.as_ref().map(|v| json!(v)));
    insert_opt(&mut rendered, "description", content.description.as_ref().map(|v| json!(v)));
    if !content.tags.is_empty() {
        rendered.insert("tags".to_string(), json!(content.tags));
    }
    if !content.parameters.is_empty() {
        rendered.insert("parameters".to_string(), json!(content.parameters));
    }
    insert_opt(&mut rendered, "requestBody", content.request_body.clone());
    rendered.insert("responses".to_string(), json!(content.responses));
    if content.deprecated {
        rendered.insert("deprecated".to_string(), json!(true));
    }
    insert_opt(&mut rendered, "security", content.security.as_ref().map(|v| json!(v)));
    extend(&mut rendered, &content.extensions);
    Value::Object(rendered)
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

fn extend(map: &mut Map<String, Value>, extensions: &Extensions) {
    for (key, value) in extensions {
        map.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::fingerprint::fingerprint_operation;
    use crate::logic::parse::parse_document;
    use crate::model::{
        ApiSource, ComponentContent, ComponentKind, HttpMethod, OperationContent, OperationKey,
        Server,
    };
    use std::collections::BTreeMap;

    #[test]
    fn test_export_writes_server_identity_and_skips_deleted() {
        let mut document = SchemaDocument::empty("svc".to_string());
        document.servers.push(Server {
            id: Some(3),
            url: "https://api.example.com".to_string(),
            description: None,
            variables: BTreeMap::new(),
            extensions: Extensions::new(),
        });

        let content = OperationContent {
            operation_id: Some("listPets".to_string()),
            responses: [("200".to_string(), json!({"description": "ok"}))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let key = OperationKey::new(HttpMethod::Get, "/pets");
        let live = Operation::new(
            "svc".to_string(),
            key.clone(),
            content.clone(),
            fingerprint_operation(&key, &content),
            ApiSource::Import,
            None,
        );
        let mut gone = Operation::new(
            "svc".to_string(),
            OperationKey::new(HttpMethod::Delete, "/pets"),
            OperationContent::default(),
            0,
            ApiSource::Import,
            None,
        );
        gone.deleted = true;

        let component = ComponentDefinition::new(
            "svc".to_string(),
            ComponentContent::new(ComponentKind::Schemas, "Pet", json!({"type": "object"})),
            0,
        );

        let exported = export_document(&document, &[live, gone], &[component]);
        assert_eq!(exported["servers"][0][SERVER_ID_EXTENSION], json!(3));
        assert!(exported["paths"]["/pets"].get("delete").is_none());
        assert_eq!(exported["components"]["schemas"]["Pet"]["type"], json!("object"));

        // Exported documents import back to the same content
        let reparsed = parse_document(&serde_json::to_vec(&exported).unwrap()).unwrap();
        assert_eq!(reparsed.root.servers.unwrap()[0].id, Some(3));
        let reparsed_content = &reparsed.operations[&key];
        assert_eq!(
            fingerprint_operation(&key, reparsed_content),
            fingerprint_operation(&key, &content)
        );
    }
}
