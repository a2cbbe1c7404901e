//! Secondary index lifecycle over tag and edge schemas.

use tracing::{error, info};

use vela_common::schema::{ColumnDef, IndexItem, SchemaId};
use vela_common::{ErrorCode, IndexId, SpaceId};

use crate::keys;
use crate::locks::LockName;
use crate::processor::{check_index_exist, MetaResult, Processor};

/// Create an index over an ordered field list of one tag.
pub async fn create_tag_index(
    proc: &Processor,
    space: SpaceId,
    index_name: &str,
    tag_name: &str,
    field_names: &[String],
    if_not_exists: bool,
) -> MetaResult<IndexId> {
    let _guard = proc.locks().write(LockName::Space).await;
    proc.space_exists(space)?;

    match proc.get_index_id(space, index_name) {
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

    let tag_id = proc.get_tag_id(space, tag_name).map_err(|code| {
        if code == ErrorCode::NotFound {
            ErrorCode::TagNotFound
        } else {
            code
        }
    })?;

    let fields = resolve_fields(proc, space, SchemaId::Tag(tag_id), field_names)?;
    reject_duplicate(proc, space, tag_id, &fields)?;

    let index_id = proc.auto_increment_id().await?;
    let item = IndexItem {
        index_id,
        index_name: index_name.to_string(),
        schema_id: SchemaId::Tag(tag_id),
        schema_name: tag_name.to_string(),
        fields,
    };
    proc.do_sync_put_and_update(vec![
        (keys::index_index_key(space, index_name), keys::id_val(index_id)),
        (keys::index_key(space, index_id), keys::index_val(&item)),
    ])
    .await?;
    info!(space, index = %index_name, id = index_id, "created tag index");
    Ok(index_id)
}

/// Create an index over an ordered field list of one edge type.
pub async fn create_edge_index(
    proc: &Processor,
    space: SpaceId,
    index_name: &str,
    edge_name: &str,
    field_names: &[String],
    if_not_exists: bool,
) -> MetaResult<IndexId> {
    let _guard = proc.locks().write(LockName::Space).await;
    proc.space_exists(space)?;

    match proc.get_index_id(space, index_name) {
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

    let edge_type = proc.get_edge_type(space, edge_name).map_err(|code| {
        if code == ErrorCode::NotFound {
            ErrorCode::EdgeNotFound
        } else {
            code
        }
    })?;

    let fields = resolve_fields(proc, space, SchemaId::Edge(edge_type), field_names)?;
    reject_duplicate(proc, space, edge_type, &fields)?;

    let index_id = proc.auto_increment_id().await?;
    let item = IndexItem {
        index_id,
        index_name: index_name.to_string(),
        schema_id: SchemaId::Edge(edge_type),
        schema_name: edge_name.to_string(),
        fields,
    };
    proc.do_sync_put_and_update(vec![
        (keys::index_index_key(space, index_name), keys::id_val(index_id)),
        (keys::index_key(space, index_id), keys::index_val(&item)),
    ])
    .await?;
    info!(space, index = %index_name, id = index_id, "created edge index");
    Ok(index_id)
}

pub async fn drop_index(
    proc: &Processor,
    space: SpaceId,
    index_name: &str,
    if_exists: bool,
) -> MetaResult<()> {
    let _guard = proc.locks().write(LockName::Space).await;
    let index_id = match proc.get_index_id(space, index_name) {
        Ok(id) => id,
        Err(ErrorCode::NotFound) if if_exists => return Ok(()),
        Err(ErrorCode::NotFound) => return Err(ErrorCode::IndexNotFound),
        Err(other) => return Err(other),
    };
    proc.do_sync_multi_remove_and_update(vec![
        keys::index_index_key(space, index_name),
        keys::index_key(space, index_id),
    ])
    .await?;
    info!(space, index = %index_name, "dropped index");
    Ok(())
}

pub fn get_index(proc: &Processor, space: SpaceId, index_name: &str) -> MetaResult<IndexItem> {
    let index_id = proc.get_index_id(space, index_name).map_err(|code| {
        if code == ErrorCode::NotFound {
            ErrorCode::IndexNotFound
        } else {
            code
        }
    })?;
    let raw = proc.do_get(&keys::index_key(space, index_id))?;
    keys::parse_index(&raw).map_err(|_| ErrorCode::StoreFailure)
}

pub fn list_indexes(proc: &Processor, space: SpaceId) -> MetaResult<Vec<IndexItem>> {
    let mut iter = proc.do_prefix(&keys::index_prefix(space))?;
    let mut out = Vec::new();
    while iter.valid() {
        out.push(keys::parse_index(iter.val()).map_err(|_| ErrorCode::StoreFailure)?);
        iter.next();
    }
    Ok(out)
}

/// Map requested field names onto the newest schema version's columns.
fn resolve_fields(
    proc: &Processor,
    space: SpaceId,
    schema_id: SchemaId,
    field_names: &[String],
) -> MetaResult<Vec<ColumnDef>> {
    if field_names.is_empty() {
        return Err(ErrorCode::InvalidOperation);
    }
    let (_ver, schema) = match schema_id {
        SchemaId::Tag(tag) => proc.get_latest_tag_schema(space, tag)?,
        SchemaId::Edge(edge) => proc.get_latest_edge_schema(space, edge)?,
    };

    let mut fields = Vec::with_capacity(field_names.len());
    for name in field_names {
        if fields.iter().any(|f: &ColumnDef| &f.name == name) {
            error!(field = %name, "duplicate field in index definition");
            return Err(ErrorCode::Conflict);
        }
        let Some(col) = schema.column(name) else {
            error!(field = %name, "index field not found in schema");
            return Err(ErrorCode::NotFound);
        };
        fields.push(col.clone());
    }
    Ok(fields)
}

/// Reject an index whose ordered field list duplicates an existing index
/// over the same schema.
fn reject_duplicate(
    proc: &Processor,
    space: SpaceId,
    tag_or_edge: i32,
    fields: &[ColumnDef],
) -> MetaResult<()> {
    for item in proc.get_indexes(space, tag_or_edge)? {
        if check_index_exist(fields, &item) {
            return Err(ErrorCode::Existed);
        }
    }
    Ok(())
}
