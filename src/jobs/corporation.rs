//! Corporation-owned resources.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::JobDefinition;
use crate::db::LocalRecord;
use crate::model::{OwnerKind, SyncScope};

#[derive(Debug, Deserialize)]
struct Asset {
    item_id: i64,
    type_id: i64,
    quantity: i64,
    location_id: i64,
    location_type: String,
    location_flag: String,
    is_singleton: bool,
}

fn map_asset(item: &Value, scope: &SyncScope, now: DateTime<Utc>) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let asset = Asset::deserialize(item)?;
    Ok(vec![LocalRecord::for_owner(&scope.owner)
        .with("item_id", asset.item_id)
        .with("type_id", asset.type_id)
        .with("quantity", asset.quantity)
        .with("location_id", asset.location_id)
        .with("location_type", asset.location_type)
        .with("location_flag", asset.location_flag)
        .with("is_singleton", asset.is_singleton)
        .stamped(now)])
}

pub static ASSETS: JobDefinition = JobDefinition {
    name: "corporation_assets",
    owner_kind: OwnerKind::Corporation,
    endpoint: "/corporations/{corporation_id}/assets/",
    version: "v5",
    required_scope: Some("esi-assets.read_corporation_assets.v1"),
    required_roles: &["Director"],
    tags: &["corporation", "asset"],
    table: "corporation_assets",
    chunk_size: 1000,
    conflict_keys: &["corporation_id", "item_id"],
    value_columns: &[
        "type_id",
        "quantity",
        "location_id",
        "location_type",
        "location_flag",
        "is_singleton",
    ],
    known_key: Some(&["item_id"]),
    mapper: map_asset,
};

#[derive(Debug, Deserialize)]
struct Blueprint {
    item_id: i64,
    type_id: i64,
    location_id: i64,
    location_flag: String,
    /// -1 for an original, -2 for a copy, otherwise the stack size.
    quantity: i64,
    time_efficiency: i64,
    material_efficiency: i64,
    /// -1 for an original.
    runs: i64,
}

fn map_blueprint(item: &Value, scope: &SyncScope, now: DateTime<Utc>) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let bp = Blueprint::deserialize(item)?;
    Ok(vec![LocalRecord::for_owner(&scope.owner)
        .with("item_id", bp.item_id)
        .with("type_id", bp.type_id)
        .with("location_id", bp.location_id)
        .with("location_flag", bp.location_flag)
        .with("quantity", bp.quantity)
        .with("time_efficiency", bp.time_efficiency)
        .with("material_efficiency", bp.material_efficiency)
        .with("runs", bp.runs)
        .stamped(now)])
}

pub static BLUEPRINTS: JobDefinition = JobDefinition {
    name: "corporation_blueprints",
    owner_kind: OwnerKind::Corporation,
    endpoint: "/corporations/{corporation_id}/blueprints/",
    version: "v2",
    required_scope: Some("esi-corporations.read_blueprints.v1"),
    required_roles: &["Director"],
    tags: &["corporation", "industry"],
    table: "corporation_blueprints",
    chunk_size: 100,
    conflict_keys: &["corporation_id", "item_id"],
    value_columns: &[
        "type_id",
        "location_id",
        "location_flag",
        "quantity",
        "time_efficiency",
        "material_efficiency",
        "runs",
    ],
    known_key: Some(&["item_id"]),
    mapper: map_blueprint,
};

#[derive(Debug, Deserialize)]
struct Structure {
    structure_id: i64,
    #[serde(default)]
    services: Vec<StructureService>,
}

#[derive(Debug, Deserialize)]
struct StructureService {
    name: String,
    state: String,
}

/// One row per service; a structure without services contributes nothing.
fn map_structure_services(
    item: &Value,
    scope: &SyncScope,
    now: DateTime<Utc>,
) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let structure = Structure::deserialize(item)?;
    Ok(structure
        .services
        .into_iter()
        .map(|service| {
            LocalRecord::for_owner(&scope.owner)
                .with("structure_id", structure.structure_id)
                .with("name", service.name)
                .with("state", service.state)
                .stamped(now)
        })
        .collect())
}

pub static STRUCTURE_SERVICES: JobDefinition = JobDefinition {
    name: "corporation_structure_services",
    owner_kind: OwnerKind::Corporation,
    endpoint: "/corporations/{corporation_id}/structures/",
    version: "v4",
    required_scope: Some("esi-corporations.read_structures.v1"),
    required_roles: &["Station_Manager"],
    tags: &["corporation", "structure"],
    table: "corporation_structure_services",
    chunk_size: 100,
    conflict_keys: &["corporation_id", "structure_id", "name"],
    value_columns: &["state"],
    known_key: Some(&["structure_id", "name"]),
    mapper: map_structure_services,
};
