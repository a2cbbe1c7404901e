//! Populates the storage-node schema/index caches from the catalog.

use vela_common::schema::SchemaId;
use vela_common::ErrorCode;
use vela_lookup::{IndexCache, SchemaCache, SpaceInfo};

use crate::indexes::list_indexes;
use crate::keys;
use crate::processor::{MetaResult, Processor};
use crate::schemas::{get_all_edge_schemas, get_all_tag_schemas};
use crate::spaces::list_spaces;

/// Snapshot every space's schemas and indexes into planner caches.
pub fn load_caches(proc: &Processor) -> MetaResult<(SchemaCache, IndexCache)> {
    let mut schemas = SchemaCache::new();
    let mut indexes = IndexCache::new();

    for (space, _name) in list_spaces(proc)? {
        let raw = proc.do_get(&keys::space_key(space))?;
        let desc = keys::parse_space_val(&raw).map_err(|_| ErrorCode::StoreFailure)?;
        schemas.add_space(
            space,
            SpaceInfo {
                vid_len: desc.vid_len,
                is_int_vid: desc.is_int_vid(),
            },
        );

        let mut iter = proc.do_prefix(&keys::tag_name_prefix(space))?;
        while iter.valid() {
            let name = keys::parse_space_scoped_name(iter.key())
                .map_err(|_| ErrorCode::StoreFailure)?;
            let tag_id = keys::parse_id_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            schemas.add_tag(space, tag_id, name, get_all_tag_schemas(proc, space, tag_id)?);
            iter.next();
        }

        let mut iter = proc.do_prefix(&keys::edge_name_prefix(space))?;
        while iter.valid() {
            let name = keys::parse_space_scoped_name(iter.key())
                .map_err(|_| ErrorCode::StoreFailure)?;
            let edge_type = keys::parse_id_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            schemas.add_edge(
                space,
                edge_type,
                name,
                get_all_edge_schemas(proc, space, edge_type)?,
            );
            iter.next();
        }

        for item in list_indexes(proc, space)? {
            match item.schema_id {
                SchemaId::Tag(_) => indexes.add_tag_index(space, item),
                SchemaId::Edge(_) => indexes.add_edge_index(space, item),
            }
        }
    }

    Ok((schemas, indexes))
}
