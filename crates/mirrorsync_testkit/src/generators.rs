//! Property-based test generators using proptest.

use mirrorsync_protocol::{Entity, EntityId, OperationKind};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for server-style entity ids.
pub fn server_id_strategy() -> impl Strategy<Value = EntityId> {
    "[a-f0-9]{8}".prop_map(EntityId::new)
}

/// Strategy for game field maps.
pub fn game_fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    (
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex"),
        0i64..500,
        any::<bool>(),
    )
        .prop_map(|(name, price, cracked)| {
            let mut fields = Map::new();
            fields.insert("name".into(), Value::from(name));
            fields.insert("price".into(), Value::from(price));
            fields.insert("isCracked".into(), Value::from(cracked));
            fields
        })
}

/// Strategy for synced entities.
pub fn synced_entity_strategy() -> impl Strategy<Value = Entity> {
    (server_id_strategy(), 1u64..20, game_fields_strategy())
        .prop_map(|(id, version, fields)| Entity::synced(id, version, fields).with_owner("u1"))
}

/// Strategy for operation kinds.
pub fn operation_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::Create),
        Just(OperationKind::Update),
        Just(OperationKind::Delete),
    ]
}

/// A local mutation a user could make while offline.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    /// Create a new entity.
    Create(Map<String, Value>),
    /// Change the price of the n-th existing entity.
    Reprice(usize, i64),
    /// Delete the n-th existing entity.
    Delete(usize),
}

/// Strategy for sequences of offline edits.
pub fn local_edits_strategy(max_len: usize) -> impl Strategy<Value = Vec<LocalEdit>> {
    let edit = prop_oneof![
        3 => game_fields_strategy().prop_map(LocalEdit::Create),
        2 => (0usize..8, 0i64..500).prop_map(|(n, price)| LocalEdit::Reprice(n, price)),
        1 => (0usize..8).prop_map(LocalEdit::Delete),
    ];
    prop::collection::vec(edit, 1..max_len.max(2))
}
