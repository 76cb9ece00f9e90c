//! Character-owned resources.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::JobDefinition;
use crate::db::LocalRecord;
use crate::model::{OwnerKind, SyncScope};

#[derive(Debug, Deserialize)]
struct Info {
    name: String,
    description: Option<String>,
    birthday: DateTime<Utc>,
    gender: String,
    race_id: i64,
    bloodline_id: i64,
    ancestry_id: Option<i64>,
    security_status: Option<f64>,
}

fn map_info(item: &Value, scope: &SyncScope, now: DateTime<Utc>) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let info = Info::deserialize(item)?;
    Ok(vec![LocalRecord::for_owner(&scope.owner)
        .with("name", info.name)
        .with("description", info.description)
        .with("birthday", info.birthday)
        .with("gender", info.gender)
        .with("race_id", info.race_id)
        .with("bloodline_id", info.bloodline_id)
        .with("ancestry_id", info.ancestry_id)
        .with("security_status", info.security_status)
        .stamped(now)])
}

/// Public character sheet. The endpoint returns one object, so there is
/// nothing to reconcile.
pub static INFO: JobDefinition = JobDefinition {
    name: "character_info",
    owner_kind: OwnerKind::Character,
    endpoint: "/characters/{character_id}/",
    version: "v4",
    required_scope: None,
    required_roles: &[],
    tags: &["character"],
    table: "character_infos",
    chunk_size: 100,
    conflict_keys: &["character_id"],
    value_columns: &[
        "name",
        "description",
        "birthday",
        "gender",
        "race_id",
        "bloodline_id",
        "ancestry_id",
        "security_status",
    ],
    known_key: None,
    mapper: map_info,
};

#[derive(Debug, Deserialize)]
struct AgentResearch {
    agent_id: i64,
    skill_type_id: i64,
    started_at: DateTime<Utc>,
    points_per_day: f64,
    remainder_points: f64,
}

fn map_agent_research(
    item: &Value,
    scope: &SyncScope,
    now: DateTime<Utc>,
) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let research = AgentResearch::deserialize(item)?;
    Ok(vec![LocalRecord::for_owner(&scope.owner)
        .with("agent_id", research.agent_id)
        .with("skill_type_id", research.skill_type_id)
        .with("started_at", research.started_at)
        .with("points_per_day", research.points_per_day)
        .with("remainder_points", research.remainder_points)
        .stamped(now)])
}

pub static AGENTS_RESEARCH: JobDefinition = JobDefinition {
    name: "character_agents_research",
    owner_kind: OwnerKind::Character,
    endpoint: "/characters/{character_id}/agents_research/",
    version: "v1",
    required_scope: Some("esi-characters.read_agents_research.v1"),
    required_roles: &[],
    tags: &["character", "industry"],
    table: "character_agent_research",
    chunk_size: 100,
    conflict_keys: &["character_id", "agent_id"],
    value_columns: &[
        "skill_type_id",
        "started_at",
        "points_per_day",
        "remainder_points",
    ],
    known_key: Some(&["agent_id"]),
    mapper: map_agent_research,
};

#[derive(Debug, Deserialize)]
struct Contact {
    contact_id: i64,
    contact_type: String,
    standing: f64,
    is_watched: Option<bool>,
    is_blocked: Option<bool>,
    label_ids: Option<Vec<i64>>,
}

fn map_contact(item: &Value, scope: &SyncScope, now: DateTime<Utc>) -> Result<Vec<LocalRecord>, serde_json::Error> {
    let contact = Contact::deserialize(item)?;
    let label_ids = contact
        .label_ids
        .map(|ids| serde_json::to_string(&ids))
        .transpose()?;
    Ok(vec![LocalRecord::for_owner(&scope.owner)
        .with("contact_id", contact.contact_id)
        .with("contact_type", contact.contact_type)
        .with("standing", contact.standing)
        .with("is_watched", contact.is_watched)
        .with("is_blocked", contact.is_blocked)
        .with("label_ids", label_ids)
        .stamped(now)])
}

pub static CONTACTS: JobDefinition = JobDefinition {
    name: "character_contacts",
    owner_kind: OwnerKind::Character,
    endpoint: "/characters/{character_id}/contacts/",
    version: "v2",
    required_scope: Some("esi-characters.read_contacts.v1"),
    required_roles: &[],
    tags: &["character", "social"],
    table: "character_contacts",
    chunk_size: 100,
    conflict_keys: &["character_id", "contact_id"],
    value_columns: &[
        "contact_type",
        "standing",
        "is_watched",
        "is_blocked",
        "label_ids",
    ],
    known_key: Some(&["contact_id"]),
    mapper: map_contact,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use crate::model::Owner;
    use serde_json::json;

    #[test]
    fn info_defaults_optional_fields_to_null() {
        let scope = INFO.scope(Owner::Character(90000001));
        let record = (INFO.mapper)(
            &json!({
                "name": "Pilot One",
                "birthday": "2015-03-24T11:37:00Z",
                "gender": "female",
                "race_id": 1,
                "bloodline_id": 3,
                "corporation_id": 1000171
            }),
            &scope,
            Utc::now(),
        )
        .unwrap()
        .remove(0);
        assert_eq!(record.int("character_id"), Some(90000001));
        assert_eq!(record.get("description"), Some(&SqlValue::Null));
        assert_eq!(record.get("ancestry_id"), Some(&SqlValue::Null));
        assert_eq!(record.get("security_status"), Some(&SqlValue::Null));
        assert!(matches!(record.get("birthday"), Some(SqlValue::Timestamp(_))));
    }

    #[test]
    fn contact_serializes_labels() {
        let scope = CONTACTS.scope(Owner::Character(1));
        let record = (CONTACTS.mapper)(
            &json!({
                "contact_id": 2112625428,
                "contact_type": "character",
                "standing": 9.9,
                "label_ids": [1, 2]
            }),
            &scope,
            Utc::now(),
        )
        .unwrap()
        .remove(0);
        assert_eq!(record.get("label_ids"), Some(&SqlValue::Text("[1,2]".into())));
        assert_eq!(record.get("is_watched"), Some(&SqlValue::Null));
    }

    #[test]
    fn research_requires_started_at() {
        let scope = AGENTS_RESEARCH.scope(Owner::Character(1));
        let err = (AGENTS_RESEARCH.mapper)(
            &json!({
                "agent_id": 3009358,
                "skill_type_id": 11450,
                "points_per_day": 53.5,
                "remainder_points": 53604.0
            }),
            &scope,
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("started_at"));
    }
}
