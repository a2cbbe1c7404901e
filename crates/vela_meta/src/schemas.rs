//! Tag and edge schema lifecycle: create, versioned alter, reads.

use tracing::{error, info};

use vela_common::schema::{AlterSchemaItem, AlterSchemaOp, Schema};
use vela_common::{EdgeType, ErrorCode, SpaceId, TagId};

use crate::keys;
use crate::locks::LockName;
use crate::processor::{index_check, MetaResult, Processor};

/// Create a tag schema at version 0.
pub async fn create_tag(
    proc: &Processor,
    space: SpaceId,
    name: &str,
    schema: Schema,
    if_not_exists: bool,
) -> MetaResult<TagId> {
    let _guard = proc.locks().write(LockName::Space).await;
    proc.space_exists(space)?;

    // A tag may not shadow an edge type of the same name.
    match proc.get_edge_type(space, name) {
        Ok(_) => {
            error!(name = %name, "create tag failed, edge with same name exists");
            return Err(ErrorCode::Conflict);
        }
        Err(ErrorCode::NotFound) => {}
        Err(other) => return Err(other),
    }

    match proc.get_tag_id(space, name) {
        Ok(existing) => {
            return if if_not_exists {
                Ok(existing)
            } else {
                Err(ErrorCode::Existed)
            };
        }
        Err(ErrorCode::NotFound) => {}
        Err(other) => return Err(other),
    }

    let tag_id = proc.auto_increment_id().await?;
    proc.do_sync_put_and_update(vec![
        (keys::index_tag_key(space, name), keys::id_val(tag_id)),
        (keys::schema_tag_key(space, tag_id, 0), keys::schema_val(name, &schema)),
    ])
    .await?;
    info!(space, tag = %name, id = tag_id, "created tag");
    Ok(tag_id)
}

/// Create an edge schema at version 0.
pub async fn create_edge(
    proc: &Processor,
    space: SpaceId,
    name: &str,
    schema: Schema,
    if_not_exists: bool,
) -> MetaResult<EdgeType> {
    let _guard = proc.locks().write(LockName::Space).await;
    proc.space_exists(space)?;

    match proc.get_tag_id(space, name) {
        Ok(_) => {
            error!(name = %name, "create edge failed, tag with same name exists");
            return Err(ErrorCode::Conflict);
        }
        Err(ErrorCode::NotFound) => {}
        Err(other) => return Err(other),
    }

    match proc.get_edge_type(space, name) {
        Ok(existing) => {
            return if if_not_exists {
                Ok(existing)
            } else {
                Err(ErrorCode::Existed)
            };
        }
        Err(ErrorCode::NotFound) => {}
        Err(other) => return Err(other),
    }

    let edge_type = proc.auto_increment_id().await?;
    proc.do_sync_put_and_update(vec![
        (keys::index_edge_key(space, name), keys::id_val(edge_type)),
        (
            keys::schema_edge_key(space, edge_type, 0),
            keys::schema_val(name, &schema),
        ),
    ])
    .await?;
    info!(space, edge = %name, id = edge_type, "created edge");
    Ok(edge_type)
}

/// Alter a tag schema. Rejected with `Conflict` when a CHANGE or DROP item
/// touches a column referenced by any index over the tag; success writes the
/// next schema version.
pub async fn alter_tag(
    proc: &Processor,
    space: SpaceId,
    name: &str,
    items: &[AlterSchemaItem],
) -> MetaResult<()> {
    let _guard = proc.locks().write(LockName::Space).await;
    let tag_id = proc.get_tag_id(space, name).map_err(|code| {
        if code == ErrorCode::NotFound {
            ErrorCode::TagNotFound
        } else {
            code
        }
    })?;
    let (ver, mut schema) = proc.get_latest_tag_schema(space, tag_id)?;

    let indexes = proc.get_indexes(space, tag_id)?;
    index_check(&indexes, items)?;
    apply_alter(&mut schema, items)?;

    proc.do_sync_put_and_update(vec![(
        keys::schema_tag_key(space, tag_id, ver + 1),
        keys::schema_val(name, &schema),
    )])
    .await?;
    info!(space, tag = %name, version = ver + 1, "altered tag");
    Ok(())
}

/// Edge counterpart of `alter_tag`.
pub async fn alter_edge(
    proc: &Processor,
    space: SpaceId,
    name: &str,
    items: &[AlterSchemaItem],
) -> MetaResult<()> {
    let _guard = proc.locks().write(LockName::Space).await;
    let edge_type = proc.get_edge_type(space, name).map_err(|code| {
        if code == ErrorCode::NotFound {
            ErrorCode::EdgeNotFound
        } else {
            code
        }
    })?;
    let (ver, mut schema) = proc.get_latest_edge_schema(space, edge_type)?;

    let indexes = proc.get_indexes(space, edge_type)?;
    index_check(&indexes, items)?;
    apply_alter(&mut schema, items)?;

    proc.do_sync_put_and_update(vec![(
        keys::schema_edge_key(space, edge_type, ver + 1),
        keys::schema_val(name, &schema),
    )])
    .await?;
    info!(space, edge = %name, version = ver + 1, "altered edge");
    Ok(())
}

fn apply_alter(schema: &mut Schema, items: &[AlterSchemaItem]) -> MetaResult<()> {
    for item in items {
        for col in &item.columns {
            let existing = schema.columns.iter().position(|c| c.name == col.name);
            match item.op {
                AlterSchemaOp::Add => {
                    if existing.is_some() {
                        return Err(ErrorCode::Existed);
                    }
                    schema.columns.push(col.clone());
                }
                AlterSchemaOp::Change => {
                    let Some(idx) = existing else {
                        return Err(ErrorCode::NotFound);
                    };
                    schema.columns[idx] = col.clone();
                }
                AlterSchemaOp::Drop => {
                    let Some(idx) = existing else {
                        return Err(ErrorCode::NotFound);
                    };
                    schema.columns.remove(idx);
                }
            }
        }
    }
    Ok(())
}

/// All schema versions of one tag, oldest first.
pub fn get_all_tag_schemas(
    proc: &Processor,
    space: SpaceId,
    tag: TagId,
) -> MetaResult<Vec<(i64, Schema)>> {
    let mut iter = proc.do_prefix(&keys::schema_tag_prefix(space, tag))?;
    let mut out = Vec::new();
    while iter.valid() {
        let ver = keys::parse_schema_ver(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
        let schema = keys::parse_schema(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        out.push((ver, schema));
        iter.next();
    }
    // Prefix order is newest-first; callers expect ascending versions.
    out.reverse();
    Ok(out)
}

pub fn get_all_edge_schemas(
    proc: &Processor,
    space: SpaceId,
    edge: EdgeType,
) -> MetaResult<Vec<(i64, Schema)>> {
    let mut iter = proc.do_prefix(&keys::schema_edge_prefix(space, edge))?;
    let mut out = Vec::new();
    while iter.valid() {
        let ver = keys::parse_schema_ver(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
        let schema = keys::parse_schema(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        out.push((ver, schema));
        iter.next();
    }
    out.reverse();
    Ok(out)
}
