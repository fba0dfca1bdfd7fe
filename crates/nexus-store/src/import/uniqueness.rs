//! Uniqueness constraint enforcement during import

use super::collector::Collector;
use crate::property::{ArrayValue, PropertyValue};
use crate::schema::{EntityType, SchemaRule};
use crate::Result;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;

type ValueKey = (EntityType, u32, u32, String);

/// Numbers compare by value across types, so integral floats fold onto integers
fn number_key(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        format!("n{}", value as i64)
    } else {
        format!("f{:x}", value.to_bits())
    }
}

/// Canonical text of a value for equality under a uniqueness constraint
fn value_key(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Bool(v) => format!("b{}", v),
        PropertyValue::Byte(v) => format!("n{}", v),
        PropertyValue::Short(v) => format!("n{}", v),
        PropertyValue::Int(v) => format!("n{}", v),
        PropertyValue::Long(v) => format!("n{}", v),
        PropertyValue::Float(v) => number_key(*v as f64),
        PropertyValue::Double(v) => number_key(*v),
        PropertyValue::Char(v) => format!("s{:?}", v.to_string()),
        PropertyValue::String(v) => format!("s{:?}", v),
        PropertyValue::Array(array) => {
            let items: Vec<String> = match array {
                ArrayValue::Bool(v) => v.iter().map(|x| format!("b{}", x)).collect(),
                ArrayValue::Byte(v) => v.iter().map(|x| format!("n{}", x)).collect(),
                ArrayValue::Short(v) => v.iter().map(|x| format!("n{}", x)).collect(),
                ArrayValue::Int(v) => v.iter().map(|x| format!("n{}", x)).collect(),
                ArrayValue::Long(v) => v.iter().map(|x| format!("n{}", x)).collect(),
                ArrayValue::Float(v) => v.iter().map(|x| number_key(*x as f64)).collect(),
                ArrayValue::Double(v) => v.iter().map(|x| number_key(*x)).collect(),
                ArrayValue::Char(v) => v.iter().map(|x| format!("s{:?}", x.to_string())).collect(),
                ArrayValue::String(v) => v.iter().map(|x| format!("s{:?}", x)).collect(),
            };
            format!("[{}]", items.join(","))
        }
    }
}

/// Enforces single-property uniqueness constraints during an import
///
/// For every constrained `(token, key, value)` the entity with the lowest id
/// keeps the value; every other entity with it becomes a violator, whatever
/// order processors see them in.
#[derive(Debug, Default)]
pub struct UniquenessMonitor {
    constraints: HashMap<(EntityType, u32), Vec<u32>>,
    owners: DashMap<ValueKey, (u64, String)>,
    violating_nodes: DashMap<u64, String>,
    violating_relationships: DashSet<u64>,
}

impl UniquenessMonitor {
    /// Monitor for the unique single-property constraints among `rules`
    pub fn new(rules: &[SchemaRule]) -> Self {
        let mut constraints: HashMap<(EntityType, u32), Vec<u32>> = HashMap::new();
        for (entity, token, key) in rules.iter().filter_map(SchemaRule::unique_single_property) {
            let keys = constraints.entry((entity, token)).or_default();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Self {
            constraints,
            ..Default::default()
        }
    }

    /// Whether any constraint applies
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Claim the value for `id`; returns the losing entity, if any
    fn claim(&self, key: ValueKey, id: u64, input_id: &str) -> Option<(u64, String)> {
        match self.owners.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((id, input_id.to_string()));
                None
            }
            Entry::Occupied(mut slot) => {
                if id < slot.get().0 {
                    Some(slot.insert((id, input_id.to_string())))
                } else {
                    Some((id, input_id.to_string()))
                }
            }
        }
    }

    fn constrained<'a>(
        &'a self,
        entity: EntityType,
        tokens: &'a [u32],
        properties: &'a [(u32, PropertyValue)],
    ) -> impl Iterator<Item = (ValueKey, &'a PropertyValue)> + 'a {
        tokens.iter().flat_map(move |&token| {
            let keys = self.constraints.get(&(entity, token)).map(Vec::as_slice).unwrap_or(&[]);
            keys.iter().filter_map(move |&key| {
                // the last value of a repeated key is the stored one
                properties
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == key)
                    .map(|(_, value)| ((entity, token, key, value_key(value)), value))
            })
        })
    }

    /// Check a node's constrained properties
    pub fn check_node(
        &self,
        node_id: u64,
        input_id: &str,
        labels: &[u32],
        properties: &[(u32, PropertyValue)],
        collector: &dyn Collector,
    ) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        for (key, value) in self.constrained(EntityType::Node, labels, properties) {
            let (label, property) = (key.1, key.2);
            if let Some((loser, loser_input)) = self.claim(key, node_id, input_id) {
                collector.collect_constraint_violation(&format!(
                    "Node {} ('{}') with label {} has non-unique value {} for key {}",
                    loser, loser_input, label, value, property
                ))?;
                self.violating_nodes.insert(loser, loser_input);
            }
        }
        Ok(())
    }

    /// Check a relationship's constrained properties
    pub fn check_relationship(
        &self,
        relationship_id: u64,
        rel_type: u32,
        properties: &[(u32, PropertyValue)],
        collector: &dyn Collector,
    ) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let types = [rel_type];
        for (key, value) in self.constrained(EntityType::Relationship, &types, properties) {
            let property = key.2;
            if let Some((loser, _)) = self.claim(key, relationship_id, "") {
                collector.collect_constraint_violation(&format!(
                    "Relationship {} of type {} has non-unique value {} for key {}",
                    loser, rel_type, value, property
                ))?;
                self.violating_relationships.insert(loser);
            }
        }
        Ok(())
    }

    /// Nodes that lost a value, with their input ids, ascending by id
    pub fn violating_nodes(&self) -> Vec<(u64, String)> {
        let mut nodes: Vec<(u64, String)> = self
            .violating_nodes
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Relationships that lost a value, ascending
    pub fn violating_relationships(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.violating_relationships.iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::collector::BadCollector;
    use crate::schema::{ConstraintKind, ConstraintRule, SchemaDescriptor};

    fn unique(id: u64, descriptor: SchemaDescriptor) -> SchemaRule {
        SchemaRule::Constraint(ConstraintRule {
            id,
            descriptor,
            kind: ConstraintKind::Unique { owned_index: None },
            name: format!("c{}", id),
        })
    }

    fn monitor() -> UniquenessMonitor {
        UniquenessMonitor::new(&[
            unique(1, SchemaDescriptor::for_label(7, &[2])),
            unique(2, SchemaDescriptor::for_rel_type(3, &[5])),
            // composite constraints are not enforced here
            unique(3, SchemaDescriptor::for_label(7, &[2, 4])),
        ])
    }

    #[test]
    fn test_lowest_node_id_keeps_value() {
        let monitor = monitor();
        let collector = BadCollector::silent(100);
        let name = [(2, PropertyValue::from("ann"))];
        monitor.check_node(9, "n9", &[7], &name, &collector).unwrap();
        monitor.check_node(4, "n4", &[7], &name, &collector).unwrap();
        monitor.check_node(12, "n12", &[7], &name, &collector).unwrap();
        // other label, same value: no constraint
        monitor.check_node(13, "n13", &[8], &name, &collector).unwrap();

        assert_eq!(
            monitor.violating_nodes(),
            vec![(9, "n9".to_string()), (12, "n12".to_string())]
        );
        assert_eq!(collector.bad_entries(), 2);
    }

    #[test]
    fn test_relationship_violations() {
        let monitor = monitor();
        let collector = BadCollector::silent(100);
        let weight = [(5, PropertyValue::Long(1))];
        monitor.check_relationship(0, 3, &weight, &collector).unwrap();
        monitor.check_relationship(1, 3, &weight, &collector).unwrap();
        monitor.check_relationship(2, 3, &[(5, PropertyValue::Long(2))], &collector).unwrap();
        monitor.check_relationship(3, 4, &weight, &collector).unwrap();
        assert_eq!(monitor.violating_relationships(), vec![1]);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let monitor = monitor();
        let collector = BadCollector::silent(100);
        monitor.check_relationship(0, 3, &[(5, PropertyValue::Long(1))], &collector).unwrap();
        monitor.check_relationship(1, 3, &[(5, PropertyValue::Double(1.0))], &collector).unwrap();
        monitor.check_relationship(2, 3, &[(5, PropertyValue::Int(1))], &collector).unwrap();
        monitor.check_relationship(3, 3, &[(5, PropertyValue::Double(1.5))], &collector).unwrap();
        assert_eq!(monitor.violating_relationships(), vec![1, 2]);

        let char_and_string = [(2, PropertyValue::Char('x'))];
        monitor.check_node(0, "a", &[7], &char_and_string, &collector).unwrap();
        monitor.check_node(1, "b", &[7], &[(2, PropertyValue::from("x"))], &collector).unwrap();
        assert_eq!(monitor.violating_nodes(), vec![(1, "b".to_string())]);
    }

    #[test]
    fn test_value_key_folding() {
        assert_eq!(value_key(&PropertyValue::Float(-3.0)), value_key(&PropertyValue::Byte(-3)));
        assert_ne!(value_key(&PropertyValue::Double(f64::NAN)), value_key(&PropertyValue::Long(0)));
        assert_eq!(
            value_key(&PropertyValue::Array(ArrayValue::Int(vec![1, 2]))),
            value_key(&PropertyValue::Array(ArrayValue::Double(vec![1.0, 2.0])))
        );
        assert_ne!(value_key(&PropertyValue::from("1")), value_key(&PropertyValue::Long(1)));
    }

    #[test]
    fn test_no_constraints() {
        let monitor = UniquenessMonitor::new(&[]);
        assert!(monitor.is_empty());
        let collector = BadCollector::silent(0);
        let value = [(2, PropertyValue::Int(1))];
        monitor.check_node(0, "a", &[7], &value, &collector).unwrap();
        monitor.check_node(1, "b", &[7], &value, &collector).unwrap();
        assert!(monitor.violating_nodes().is_empty());
    }
}
