use crate::error::ReconcileError;
use crate::model::{RootPatch, SchemaDocument, SecurityRequirement, Server, Tag};

/// Merge document-level metadata into the persisted schema document.
///
/// Fields absent from the patch are left alone. Servers and tags are never
/// removed here. Fails when no server identity is left to assign.
pub fn merge_root(document: &mut SchemaDocument, patch: RootPatch) -> Result<(), ReconcileError> {
    if let Some(info) = patch.info {
        document.info = Some(info);
    }
    if let Some(external_docs) = patch.external_docs {
        document.external_docs = Some(external_docs);
    }
    if let Some(extensions) = patch.extensions {
        document.extensions = extensions;
    }
    if let Some(security) = patch.security {
        merge_security(&mut document.security, security);
    }
    if let Some(servers) = patch.servers {
        merge_servers(&mut document.servers, servers)?;
    }
    if let Some(tags) = patch.tags {
        merge_tags(&mut document.tags, tags);
    }
    Ok(())
}

/// Only the first requirement on each side takes part in the merge
fn merge_security(existing: &mut Vec<SecurityRequirement>, incoming: Vec<SecurityRequirement>) {
    let Some(requirement) = incoming.into_iter().next() else {
        return;
    };

    match existing.first_mut() {
        Some(current) => {
            for (scheme, scopes) in requirement {
                current.insert(scheme, scopes);
            }
        }
        None => existing.push(requirement),
    }
}

fn merge_servers(existing: &mut Vec<Server>, incoming: Vec<Server>) -> Result<(), ReconcileError> {
    // Highest identity in use; new servers get the next one
    let mut last_id = existing.iter().filter_map(|s| s.id).max().unwrap_or(0);

    for mut server in incoming {
        let matched = server
            .id
            .and_then(|id| existing.iter_mut().find(|s| s.id == Some(id)));

        match matched {
            Some(current) => {
                current.url = server.url;
                current.description = server.description;
                current.variables = server.variables;
                current.extensions = server.extensions;
            }
            None => {
                match server.id {
                    Some(id) => last_id = last_id.max(id),
                    None => {
                        last_id = last_id.checked_add(1).ok_or_else(|| {
                            ReconcileError::validation(format!(
                                "cannot assign an identity to server {}: ids exhausted after {}",
                                server.url, last_id
                            ))
                        })?;
                        server.id = Some(last_id);
                    }
                }
                existing.push(server);
            }
        }
    }
    Ok(())
}

fn merge_tags(existing: &mut Vec<Tag>, incoming: Vec<Tag>) {
    for tag in incoming {
        match existing.iter_mut().find(|t| t.name == tag.name) {
            Some(current) => {
                current.description = tag.description;
                current.external_docs = tag.external_docs;
                current.extensions = tag.extensions;
            }
            None => existing.push(tag),
        }
    }
}
