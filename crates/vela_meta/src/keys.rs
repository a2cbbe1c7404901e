//! Byte layout of every persisted catalog record.
//!
//! Each logical family carries a fixed single-byte tag prefix, so a prefix
//! scan over the tag enumerates exactly that family. Integer value payloads
//! are fixed-width little-endian and always decoded explicitly. The schema
//! version key component is big-endian and order-inverted so a prefix scan
//! yields the newest version first. Value parsers tolerate extra trailing
//! bytes so old binaries can read records written by newer ones.

use anyhow::{ensure, Context};

use vela_common::schema::{
    ColumnDef, IndexItem, PropertyType, Schema, SchemaId, SpaceDesc, VidType,
};
use vela_common::value::Value;
use vela_common::{
    EdgeType, HostAddr, IndexId, PartitionId, SchemaVer, SnapshotStatus, SpaceId, TagId, TermId,
};

pub const TAG_SPACE: u8 = 0x01;
pub const TAG_SPACE_NAME: u8 = 0x02;
pub const TAG_PART: u8 = 0x03;
pub const TAG_TAG: u8 = 0x04;
pub const TAG_TAG_NAME: u8 = 0x05;
pub const TAG_EDGE: u8 = 0x06;
pub const TAG_EDGE_NAME: u8 = 0x07;
pub const TAG_INDEX: u8 = 0x08;
pub const TAG_INDEX_NAME: u8 = 0x09;
pub const TAG_HOST: u8 = 0x0A;
pub const TAG_LEADER: u8 = 0x0B;
pub const TAG_ROLE: u8 = 0x0C;
pub const TAG_USER: u8 = 0x0D;
pub const TAG_LISTENER: u8 = 0x0E;
pub const TAG_SNAPSHOT: u8 = 0x0F;
pub const TAG_GROUP: u8 = 0x10;
pub const TAG_GROUP_NAME: u8 = 0x11;
pub const TAG_ZONE: u8 = 0x12;
pub const TAG_ZONE_NAME: u8 = 0x13;
pub const TAG_REBUILD_STATUS: u8 = 0x14;
pub const TAG_STATIS: u8 = 0x15;

/// The single id-counter key.
pub const ID_KEY: &[u8] = b"__id__";
/// Wall-clock revision cursor stamped by `*_and_update` writes.
pub const LAST_UPDATE_TIME_KEY: &[u8] = b"__last_update_time__";

/// Record format version written ahead of structured values.
const RECORD_VER: u8 = 1;

// ---- space ----

pub fn space_prefix() -> Vec<u8> {
    vec![TAG_SPACE]
}

pub fn space_key(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_SPACE];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn parse_space_key_id(key: &[u8]) -> anyhow::Result<SpaceId> {
    ensure!(key.len() >= 5 && key[0] == TAG_SPACE, "not a space key");
    let mut offset = 1;
    read_i32(key, &mut offset)
}

pub fn space_val(desc: &SpaceDesc) -> Vec<u8> {
    let mut out = vec![RECORD_VER];
    write_str(&mut out, &desc.space_name);
    out.extend_from_slice(&desc.partition_num.to_le_bytes());
    out.extend_from_slice(&desc.replica_factor.to_le_bytes());
    out.push(match desc.vid_type {
        VidType::FixedString => 0,
        VidType::Int64 => 1,
    });
    out.extend_from_slice(&desc.vid_len.to_le_bytes());
    match &desc.group_name {
        Some(group) => {
            out.push(1);
            write_str(&mut out, group);
        }
        None => out.push(0),
    }
    out
}

pub fn parse_space_val(val: &[u8]) -> anyhow::Result<SpaceDesc> {
    let mut offset = 0;
    let _ver = read_u8(val, &mut offset)?;
    let space_name = read_str(val, &mut offset)?;
    let partition_num = read_i32(val, &mut offset)?;
    let replica_factor = read_i32(val, &mut offset)?;
    let vid_type = match read_u8(val, &mut offset)? {
        0 => VidType::FixedString,
        1 => VidType::Int64,
        other => anyhow::bail!("unknown vid type {other}"),
    };
    let vid_len = read_i16(val, &mut offset)?;
    let group_name = if read_u8(val, &mut offset)? == 1 {
        Some(read_str(val, &mut offset)?)
    } else {
        None
    };
    Ok(SpaceDesc {
        space_name,
        partition_num,
        replica_factor,
        vid_type,
        vid_len,
        group_name,
    })
}

/// Name-to-id index entry of the space family.
pub fn index_space_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_SPACE_NAME];
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn id_val(id: i32) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

/// Decode an id payload written by `id_val`. Ids are little-endian; the
/// explicit decode replaces the original's reinterpret-cast.
pub fn parse_id_val(val: &[u8]) -> anyhow::Result<i32> {
    let mut offset = 0;
    read_i32(val, &mut offset)
}

// ---- partitions ----

pub fn part_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_PART];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn all_parts_prefix() -> Vec<u8> {
    vec![TAG_PART]
}

pub fn part_key(space: SpaceId, part: PartitionId) -> Vec<u8> {
    let mut out = part_prefix(space);
    out.extend_from_slice(&part.to_le_bytes());
    out
}

pub fn parse_part_key_space_id(key: &[u8]) -> anyhow::Result<SpaceId> {
    ensure!(key.len() >= 9 && key[0] == TAG_PART, "not a part key");
    let mut offset = 1;
    read_i32(key, &mut offset)
}

pub fn parse_part_key_part_id(key: &[u8]) -> anyhow::Result<PartitionId> {
    ensure!(key.len() >= 9 && key[0] == TAG_PART, "not a part key");
    let mut offset = 5;
    read_i32(key, &mut offset)
}

pub fn part_val(hosts: &[HostAddr]) -> Vec<u8> {
    let mut out = Vec::new();
    for host in hosts {
        write_host(&mut out, host);
    }
    out
}

pub fn parse_part_val(val: &[u8]) -> anyhow::Result<Vec<HostAddr>> {
    let mut offset = 0;
    let mut hosts = Vec::new();
    while offset < val.len() {
        hosts.push(read_host(val, &mut offset)?);
    }
    Ok(hosts)
}

// ---- tag / edge schemas ----

pub fn schema_tag_prefix(space: SpaceId, tag: TagId) -> Vec<u8> {
    let mut out = vec![TAG_TAG];
    out.extend_from_slice(&space.to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out
}

pub fn schema_tags_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_TAG];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

/// Schema keys append the big-endian complement of the version so the first
/// row of a prefix scan is the newest version.
pub fn schema_tag_key(space: SpaceId, tag: TagId, ver: SchemaVer) -> Vec<u8> {
    let mut out = schema_tag_prefix(space, tag);
    out.extend_from_slice(&(u64::MAX - ver as u64).to_be_bytes());
    out
}

pub fn parse_schema_ver(key: &[u8]) -> anyhow::Result<SchemaVer> {
    ensure!(key.len() >= 8, "schema key too short");
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[key.len() - 8..]);
    Ok((u64::MAX - u64::from_be_bytes(raw)) as SchemaVer)
}

pub fn schema_edge_prefix(space: SpaceId, edge: EdgeType) -> Vec<u8> {
    let mut out = vec![TAG_EDGE];
    out.extend_from_slice(&space.to_le_bytes());
    out.extend_from_slice(&edge.to_le_bytes());
    out
}

pub fn schema_edges_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_EDGE];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn schema_edge_key(space: SpaceId, edge: EdgeType, ver: SchemaVer) -> Vec<u8> {
    let mut out = schema_edge_prefix(space, edge);
    out.extend_from_slice(&(u64::MAX - ver as u64).to_be_bytes());
    out
}

/// Schema payload: the schema name followed by its column list.
pub fn schema_val(name: &str, schema: &Schema) -> Vec<u8> {
    let mut out = vec![RECORD_VER];
    write_str(&mut out, name);
    out.extend_from_slice(&(schema.columns.len() as u16).to_le_bytes());
    for col in &schema.columns {
        write_column(&mut out, col);
    }
    out
}

pub fn parse_schema_name(val: &[u8]) -> anyhow::Result<String> {
    let mut offset = 0;
    let _ver = read_u8(val, &mut offset)?;
    read_str(val, &mut offset)
}

pub fn parse_schema(val: &[u8]) -> anyhow::Result<Schema> {
    let mut offset = 0;
    let _ver = read_u8(val, &mut offset)?;
    let _name = read_str(val, &mut offset)?;
    let count = read_u16(val, &mut offset)? as usize;
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        columns.push(read_column(val, &mut offset)?);
    }
    Ok(Schema { columns })
}

pub fn index_tag_key(space: SpaceId, name: &str) -> Vec<u8> {
    let mut out = vec![TAG_TAG_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn index_edge_key(space: SpaceId, name: &str) -> Vec<u8> {
    let mut out = vec![TAG_EDGE_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn tag_name_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_TAG_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn edge_name_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_EDGE_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

// ---- indexes ----

/// Entity name carried behind a `[tag, space]` key header.
pub fn parse_space_scoped_name(key: &[u8]) -> anyhow::Result<String> {
    ensure!(key.len() > 5, "name index key too short");
    String::from_utf8(key[5..].to_vec()).context("entity name not utf8")
}

pub fn index_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_INDEX];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn index_key(space: SpaceId, index: IndexId) -> Vec<u8> {
    let mut out = index_prefix(space);
    out.extend_from_slice(&index.to_le_bytes());
    out
}

pub fn index_index_key(space: SpaceId, name: &str) -> Vec<u8> {
    let mut out = vec![TAG_INDEX_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn index_name_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_INDEX_NAME];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn index_val(item: &IndexItem) -> Vec<u8> {
    let mut out = vec![RECORD_VER];
    out.extend_from_slice(&item.index_id.to_le_bytes());
    write_str(&mut out, &item.index_name);
    match item.schema_id {
        SchemaId::Tag(id) => {
            out.push(0);
            out.extend_from_slice(&id.to_le_bytes());
        }
        SchemaId::Edge(id) => {
            out.push(1);
            out.extend_from_slice(&id.to_le_bytes());
        }
    }
    write_str(&mut out, &item.schema_name);
    out.extend_from_slice(&(item.fields.len() as u16).to_le_bytes());
    for field in &item.fields {
        write_column(&mut out, field);
    }
    out
}

pub fn parse_index(val: &[u8]) -> anyhow::Result<IndexItem> {
    let mut offset = 0;
    let _ver = read_u8(val, &mut offset)?;
    let index_id = read_i32(val, &mut offset)?;
    let index_name = read_str(val, &mut offset)?;
    let schema_id = match read_u8(val, &mut offset)? {
        0 => SchemaId::Tag(read_i32(val, &mut offset)?),
        1 => SchemaId::Edge(read_i32(val, &mut offset)?),
        other => anyhow::bail!("unknown schema id kind {other}"),
    };
    let schema_name = read_str(val, &mut offset)?;
    let count = read_u16(val, &mut offset)? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(read_column(val, &mut offset)?);
    }
    Ok(IndexItem {
        index_id,
        index_name,
        schema_id,
        schema_name,
        fields,
    })
}

// ---- hosts / leaders ----

pub fn host_prefix() -> Vec<u8> {
    vec![TAG_HOST]
}

pub fn host_key(host: &HostAddr) -> Vec<u8> {
    let mut out = vec![TAG_HOST];
    write_host(&mut out, host);
    out
}

pub fn parse_host_key(key: &[u8]) -> anyhow::Result<HostAddr> {
    ensure!(!key.is_empty() && key[0] == TAG_HOST, "not a host key");
    let mut offset = 1;
    read_host(key, &mut offset)
}

pub fn leader_prefix() -> Vec<u8> {
    vec![TAG_LEADER]
}

pub fn leader_space_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_LEADER];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn leader_key(space: SpaceId, part: PartitionId) -> Vec<u8> {
    let mut out = leader_space_prefix(space);
    out.extend_from_slice(&part.to_le_bytes());
    out
}

pub fn parse_leader_key(key: &[u8]) -> anyhow::Result<(SpaceId, PartitionId)> {
    ensure!(key.len() >= 9 && key[0] == TAG_LEADER, "not a leader key");
    let mut offset = 1;
    let space = read_i32(key, &mut offset)?;
    let part = read_i32(key, &mut offset)?;
    Ok((space, part))
}

pub fn leader_val(host: &HostAddr, term: TermId, status: u8) -> Vec<u8> {
    let mut out = vec![RECORD_VER];
    write_host(&mut out, host);
    out.extend_from_slice(&term.to_le_bytes());
    out.push(status);
    out
}

/// Returns `(host, term, status)`; status 0 means the record is usable.
pub fn parse_leader_val(val: &[u8]) -> anyhow::Result<(HostAddr, TermId, u8)> {
    let mut offset = 0;
    let _ver = read_u8(val, &mut offset)?;
    let host = read_host(val, &mut offset)?;
    let term = read_i64(val, &mut offset)?;
    let status = read_u8(val, &mut offset)?;
    Ok((host, term, status))
}

// ---- roles / users / listeners ----

pub fn role_space_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_ROLE];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn role_key(space: SpaceId, user: &str) -> Vec<u8> {
    let mut out = role_space_prefix(space);
    out.extend_from_slice(user.as_bytes());
    out
}

pub fn parse_role_user(key: &[u8]) -> anyhow::Result<String> {
    ensure!(key.len() >= 5 && key[0] == TAG_ROLE, "not a role key");
    String::from_utf8(key[5..].to_vec()).context("role user not utf8")
}

pub fn user_key(account: &str) -> Vec<u8> {
    let mut out = vec![TAG_USER];
    out.extend_from_slice(account.as_bytes());
    out
}

pub fn listener_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_LISTENER];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn listener_key(space: SpaceId, kind: u8, host: &HostAddr) -> Vec<u8> {
    let mut out = listener_prefix(space);
    out.push(kind);
    write_host(&mut out, host);
    out
}

// ---- snapshots ----

pub fn snapshot_prefix() -> Vec<u8> {
    vec![TAG_SNAPSHOT]
}

pub fn snapshot_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_SNAPSHOT];
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn parse_snapshot_name(key: &[u8]) -> anyhow::Result<String> {
    ensure!(!key.is_empty() && key[0] == TAG_SNAPSHOT, "not a snapshot key");
    String::from_utf8(key[1..].to_vec()).context("snapshot name not utf8")
}

pub fn snapshot_val(status: SnapshotStatus, hosts: &str) -> Vec<u8> {
    let mut out = vec![status.as_u8()];
    out.extend_from_slice(hosts.as_bytes());
    out
}

pub fn parse_snapshot_val(val: &[u8]) -> anyhow::Result<(SnapshotStatus, String)> {
    ensure!(!val.is_empty(), "empty snapshot value");
    let status = SnapshotStatus::from_u8(val[0]);
    let hosts = String::from_utf8(val[1..].to_vec()).context("snapshot hosts not utf8")?;
    Ok((status, hosts))
}

/// Serialize a host list into the comma-joined form stored in snapshot
/// records.
pub fn join_hosts(hosts: &[HostAddr]) -> String {
    hosts
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_hosts(raw: &str) -> anyhow::Result<Vec<HostAddr>> {
    let mut out = Vec::new();
    for part in raw.split(',').filter(|s| !s.is_empty()) {
        let (host, port) = part
            .rsplit_once(':')
            .with_context(|| format!("malformed host '{part}'"))?;
        out.push(HostAddr::new(host, port.parse::<u16>()?));
    }
    Ok(out)
}

// ---- groups / zones ----

pub fn group_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_GROUP];
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn index_group_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_GROUP_NAME];
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn zone_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_ZONE];
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn index_zone_key(name: &str) -> Vec<u8> {
    let mut out = vec![TAG_ZONE_NAME];
    out.extend_from_slice(name.as_bytes());
    out
}

// ---- rebuild status / statistics ----

pub fn rebuild_index_status_prefix() -> Vec<u8> {
    vec![TAG_REBUILD_STATUS]
}

pub fn rebuild_index_status_space_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_REBUILD_STATUS];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

pub fn rebuild_index_status_key(space: SpaceId, index_name: &str) -> Vec<u8> {
    let mut out = rebuild_index_status_space_prefix(space);
    out.extend_from_slice(index_name.as_bytes());
    out
}

pub fn statis_key(space: SpaceId) -> Vec<u8> {
    let mut out = vec![TAG_STATIS];
    out.extend_from_slice(&space.to_le_bytes());
    out
}

// ---- shared scalar codecs ----

pub fn i64_val(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn parse_i64_val(val: &[u8]) -> anyhow::Result<i64> {
    let mut offset = 0;
    read_i64(val, &mut offset)
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_str(data: &[u8], offset: &mut usize) -> anyhow::Result<String> {
    let len = read_u16(data, offset)? as usize;
    ensure!(*offset + len <= data.len(), "short string payload");
    let out = String::from_utf8(data[*offset..*offset + len].to_vec())
        .context("string payload not utf8")?;
    *offset += len;
    Ok(out)
}

fn write_host(out: &mut Vec<u8>, host: &HostAddr) {
    write_str(out, &host.host);
    out.extend_from_slice(&host.port.to_le_bytes());
}

fn read_host(data: &[u8], offset: &mut usize) -> anyhow::Result<HostAddr> {
    let host = read_str(data, offset)?;
    let port = read_u16(data, offset)?;
    Ok(HostAddr { host, port })
}

fn write_column(out: &mut Vec<u8>, col: &ColumnDef) {
    write_str(out, &col.name);
    out.push(col.prop_type.as_u8());
    out.push(col.nullable as u8);
    out.extend_from_slice(&col.fixed_len.to_le_bytes());
    match &col.default {
        Some(value) => {
            out.push(1);
            write_value(out, value);
        }
        None => out.push(0),
    }
}

fn read_column(data: &[u8], offset: &mut usize) -> anyhow::Result<ColumnDef> {
    let name = read_str(data, offset)?;
    let raw_type = read_u8(data, offset)?;
    let prop_type =
        PropertyType::from_u8(raw_type).with_context(|| format!("bad prop type {raw_type}"))?;
    let nullable = read_u8(data, offset)? != 0;
    let fixed_len = read_u16(data, offset)?;
    let default = if read_u8(data, offset)? == 1 {
        Some(read_value(data, offset)?)
    } else {
        None
    };
    Ok(ColumnDef {
        name,
        prop_type,
        nullable,
        default,
        fixed_len,
    })
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0),
        Value::Bool(v) => {
            out.push(1);
            out.push(*v as u8);
        }
        Value::Int(v) => {
            out.push(2);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            out.push(3);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(v) => {
            out.push(4);
            write_str(out, v);
        }
    }
}

fn read_value(data: &[u8], offset: &mut usize) -> anyhow::Result<Value> {
    match read_u8(data, offset)? {
        0 => Ok(Value::Null),
        1 => Ok(Value::Bool(read_u8(data, offset)? != 0)),
        2 => Ok(Value::Int(read_i64(data, offset)?)),
        3 => {
            ensure!(*offset + 8 <= data.len(), "short f64");
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[*offset..*offset + 8]);
            *offset += 8;
            Ok(Value::Float(f64::from_le_bytes(raw)))
        }
        4 => Ok(Value::Str(read_str(data, offset)?)),
        other => anyhow::bail!("unknown value tag {other}"),
    }
}

fn read_u8(data: &[u8], offset: &mut usize) -> anyhow::Result<u8> {
    ensure!(*offset + 1 <= data.len(), "short u8");
    let out = data[*offset];
    *offset += 1;
    Ok(out)
}

fn read_u16(data: &[u8], offset: &mut usize) -> anyhow::Result<u16> {
    ensure!(*offset + 2 <= data.len(), "short u16");
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&data[*offset..*offset + 2]);
    *offset += 2;
    Ok(u16::from_le_bytes(raw))
}

fn read_i16(data: &[u8], offset: &mut usize) -> anyhow::Result<i16> {
    ensure!(*offset + 2 <= data.len(), "short i16");
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&data[*offset..*offset + 2]);
    *offset += 2;
    Ok(i16::from_le_bytes(raw))
}

fn read_i32(data: &[u8], offset: &mut usize) -> anyhow::Result<i32> {
    ensure!(*offset + 4 <= data.len(), "short i32");
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    Ok(i32::from_le_bytes(raw))
}

fn read_i64(data: &[u8], offset: &mut usize) -> anyhow::Result<i64> {
    ensure!(*offset + 8 <= data.len(), "short i64");
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[*offset..*offset + 8]);
    *offset += 8;
    Ok(i64::from_le_bytes(raw))
}
