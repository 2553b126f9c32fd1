//! Write operations - the redo and undo logs of a transaction.
//!
//! Insert operations carry the inserted row's `id` value when it is known.
//! Replaying an insert allocates a fresh entity regardless; the recorded id
//! only lets coalescing match later operations against the insert.

use serde::{Deserialize, Serialize};
use strata_ecs::{ComponentId, Entity, Patch, Row};

/// One recorded mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOperation {
    Insert { values: Row },
    Update { entity: Entity, values: Patch },
    Delete { entity: Entity },
}

impl WriteOperation {
    /// Entity this operation targets, if known.
    #[must_use]
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Self::Insert { values } => values.get(&ComponentId::ID).and_then(Entity::from_value),
            Self::Update { entity, .. } | Self::Delete { entity } => Some(*entity),
        }
    }
}

/// Shrink an operation log without changing its effect.
///
/// - consecutive updates of one entity merge, later values winning;
/// - an update directly following the insert of its entity folds into the
///   insert;
/// - a delete drops directly preceding updates of its entity, and cancels
///   out together with a directly preceding insert of it.
#[must_use]
pub fn coalesce_write_operations(
    operations: impl IntoIterator<Item = WriteOperation>,
) -> Vec<WriteOperation> {
    let mut result: Vec<WriteOperation> = Vec::new();

    for operation in operations {
        match operation {
            WriteOperation::Update { entity, values } => match result.last_mut() {
                Some(WriteOperation::Update {
                    entity: last,
                    values: merged,
                }) if *last == entity => merged.extend(values),
                Some(WriteOperation::Insert { values: row })
                    if row.get(&ComponentId::ID).and_then(Entity::from_value) == Some(entity) =>
                {
                    for (component, value) in values {
                        match value {
                            Some(value) => row.insert(component, value),
                            None => row.remove(&component),
                        };
                    }
                }
                _ => result.push(WriteOperation::Update { entity, values }),
            },
            WriteOperation::Delete { entity } => {
                while matches!(
                    result.last(),
                    Some(WriteOperation::Update { entity: last, .. }) if *last == entity
                ) {
                    result.pop();
                }
                let inserted_here = matches!(
                    result.last(),
                    Some(last @ WriteOperation::Insert { .. }) if last.entity() == Some(entity)
                );
                if inserted_here {
                    result.pop();
                } else {
                    result.push(WriteOperation::Delete { entity });
                }
            }
            insert @ WriteOperation::Insert { .. } => result.push(insert),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const A: ComponentId = ComponentId::from_raw(2);
    const B: ComponentId = ComponentId::from_raw(3);

    fn update(entity: u32, values: &[(ComponentId, Option<i64>)]) -> WriteOperation {
        WriteOperation::Update {
            entity: Entity::Persistent(entity),
            values: values.iter().map(|(c, v)| (*c, v.map(|v| json!(v)))).collect(),
        }
    }

    fn insert(entity: u32, a: i64) -> WriteOperation {
        WriteOperation::Insert {
            values: Row::from([
                (ComponentId::ID, Entity::Persistent(entity).to_value()),
                (A, json!(a)),
            ]),
        }
    }

    fn delete(entity: u32) -> WriteOperation {
        WriteOperation::Delete {
            entity: Entity::Persistent(entity),
        }
    }

    #[test]
    fn test_consecutive_updates_merge() {
        let ops = coalesce_write_operations([
            update(1, &[(A, Some(1))]),
            update(1, &[(A, Some(2)), (B, Some(5))]),
            update(2, &[(A, Some(3))]),
            update(1, &[(B, None)]),
        ]);
        assert_eq!(
            ops,
            [
                update(1, &[(A, Some(2)), (B, Some(5))]),
                update(2, &[(A, Some(3))]),
                update(1, &[(B, None)]),
            ]
        );
    }

    #[test]
    fn test_update_folds_into_insert_of_same_entity() {
        let ops = coalesce_write_operations([insert(4, 1), update(4, &[(A, Some(9)), (B, Some(2))])]);
        let WriteOperation::Insert { values } = &ops[0] else {
            panic!("expected insert, got {ops:?}");
        };
        assert_eq!(ops.len(), 1);
        assert_eq!(values[&A], json!(9));
        assert_eq!(values[&B], json!(2));

        // a different entity stays separate
        let ops = coalesce_write_operations([insert(4, 1), update(5, &[(A, Some(9))])]);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_insert_then_delete_cancels() {
        let ops = coalesce_write_operations([insert(7, 1), update(7, &[(B, Some(1))]), delete(7)]);
        assert!(ops.is_empty());

        let ops = coalesce_write_operations([insert(7, 1), delete(8)]);
        assert_eq!(ops, [insert(7, 1), delete(8)]);
    }

    #[test]
    fn test_delete_drops_preceding_updates() {
        let ops = coalesce_write_operations([update(3, &[(A, Some(1))]), delete(3)]);
        assert_eq!(ops, [delete(3)]);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(delete(3)).unwrap();
        assert_eq!(json, json!({ "delete": { "entity": 3 } }));

        let op = update(2, &[(A, Some(1)), (B, None)]);
        let text = serde_json::to_string(&op).unwrap();
        assert_eq!(serde_json::from_str::<WriteOperation>(&text).unwrap(), op);
    }
}
