//! Schema rule byte encoding
//!
//! Big-endian. Unified rules start with `i32 -1` and a kind byte; anything
//! else is read as a legacy rule whose first `i32` is the label or
//! relationship type id.

use super::{
    check_name, default_constraint_name, default_index_name, ConstraintKind, ConstraintRule,
    EntityType, IndexKind, IndexProvider, IndexRule, PropertySchemaType, SchemaDescriptor,
    SchemaRule,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut};

const UNIFIED_MARKER: i32 = -1;

const INDEX_RULE: i8 = 11;
const CONSTRAINT_RULE: i8 = 12;

const GENERAL_INDEX: i8 = 31;
const UNIQUE_INDEX: i8 = 32;

const EXISTS_CONSTRAINT: i8 = 61;
const UNIQUE_CONSTRAINT: i8 = 62;
const UNIQUE_EXISTS_CONSTRAINT: i8 = 63;

const LABEL_SCHEMA: i8 = 91;
const REL_TYPE_SCHEMA: i8 = 92;
const MULTI_TOKEN_SCHEMA: i8 = 93;

const LEGACY_INDEX: i8 = 1;
const LEGACY_CONSTRAINT_INDEX: i8 = 2;
const LEGACY_UNIQUE_CONSTRAINT: i8 = 3;
const LEGACY_NODE_EXISTS: i8 = 4;
const LEGACY_REL_EXISTS: i8 = 5;

const NO_REFERENCE: i64 = -1;

/// Encode a rule in the unified format
pub fn serialize(rule: &SchemaRule) -> Result<Vec<u8>> {
    check_name(rule.name())?;
    let mut out = Vec::new();
    out.put_i32(UNIFIED_MARKER);
    match rule {
        SchemaRule::Index(index) => {
            out.put_i8(INDEX_RULE);
            put_string(&mut out, &index.provider.key);
            put_string(&mut out, &index.provider.version);
            match index.kind {
                IndexKind::General => out.put_i8(GENERAL_INDEX),
                IndexKind::Unique { owning_constraint } => {
                    out.put_i8(UNIQUE_INDEX);
                    out.put_i64(reference(owning_constraint));
                }
            }
            put_descriptor(&mut out, &index.descriptor)?;
            put_string(&mut out, &index.name);
        }
        SchemaRule::Constraint(constraint) => {
            out.put_i8(CONSTRAINT_RULE);
            match constraint.kind {
                ConstraintKind::Exists => out.put_i8(EXISTS_CONSTRAINT),
                ConstraintKind::Unique { owned_index } => {
                    out.put_i8(UNIQUE_CONSTRAINT);
                    out.put_i64(reference(owned_index));
                }
                ConstraintKind::UniqueExists { owned_index } => {
                    out.put_i8(UNIQUE_EXISTS_CONSTRAINT);
                    out.put_i64(reference(owned_index));
                }
            }
            put_descriptor(&mut out, &constraint.descriptor)?;
            put_string(&mut out, &constraint.name);
        }
    }
    Ok(out)
}

fn reference(id: Option<u64>) -> i64 {
    id.map_or(NO_REFERENCE, |id| id as i64)
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    out.put_i32(value.len() as i32);
    out.put_slice(value.as_bytes());
}

fn put_descriptor(out: &mut Vec<u8>, descriptor: &SchemaDescriptor) -> Result<()> {
    match descriptor {
        SchemaDescriptor::Label { label, properties } => {
            out.put_i8(LABEL_SCHEMA);
            out.put_i32(*label as i32);
            put_short_list(out, properties)?;
        }
        SchemaDescriptor::RelationshipType { rel_type, properties } => {
            out.put_i8(REL_TYPE_SCHEMA);
            out.put_i32(*rel_type as i32);
            put_short_list(out, properties)?;
        }
        SchemaDescriptor::MultiToken {
            entity,
            schema_type,
            tokens,
            properties,
        } => {
            out.put_i8(MULTI_TOKEN_SCHEMA);
            out.put_i8(*entity as i8);
            out.put_i8(*schema_type as i8);
            out.put_i32(tokens.len() as i32);
            for token in tokens {
                out.put_i32(*token as i32);
            }
            put_short_list(out, properties)?;
        }
    }
    Ok(())
}

fn put_short_list(out: &mut Vec<u8>, values: &[u32]) -> Result<()> {
    let count = i16::try_from(values.len())
        .map_err(|_| Error::invalid_argument(format!("Schema has {} properties", values.len())))?;
    out.put_i16(count);
    for value in values {
        out.put_i32(*value as i32);
    }
    Ok(())
}

/// Reader over rule bytes that reports failures against the rule id and kind
struct RuleReader<'a> {
    buf: &'a [u8],
    rule_id: u64,
    kind: i8,
}

impl RuleReader<'_> {
    fn fail(&self, message: impl Into<String>) -> Error {
        Error::malformed_rule(self.rule_id, self.kind, message)
    }

    fn need(&self, bytes: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < bytes {
            return Err(self.fail(format!("buffer ends before {}", what)));
        }
        Ok(())
    }

    fn i8(&mut self, what: &str) -> Result<i8> {
        self.need(1, what)?;
        Ok(self.buf.get_i8())
    }

    fn i16(&mut self, what: &str) -> Result<i16> {
        self.need(2, what)?;
        Ok(self.buf.get_i16())
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    fn token(&mut self, what: &str) -> Result<u32> {
        let value = self.i32(what)?;
        u32::try_from(value).map_err(|_| self.fail(format!("negative {} {}", what, value)))
    }

    fn long_token(&mut self, what: &str) -> Result<u32> {
        let value = self.i64(what)?;
        u32::try_from(value).map_err(|_| self.fail(format!("{} {} out of range", what, value)))
    }

    fn reference(&mut self, what: &str) -> Result<Option<u64>> {
        match self.i64(what)? {
            NO_REFERENCE => Ok(None),
            id if id >= 0 => Ok(Some(id as u64)),
            id => Err(self.fail(format!("invalid {} {}", what, id))),
        }
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let length = self.i32(what)?;
        let length = usize::try_from(length).map_err(|_| self.fail(format!("negative {} length", what)))?;
        self.need(length, what)?;
        let value = String::from_utf8(self.buf[..length].to_vec())
            .map_err(|_| self.fail(format!("{} is not UTF-8", what)))?;
        self.buf.advance(length);
        Ok(value)
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let count = self.i16(what)?;
        usize::try_from(count).map_err(|_| self.fail(format!("negative {} count", what)))
    }

    fn properties(&mut self) -> Result<Vec<u32>> {
        let count = self.count("property count")?;
        (0..count).map(|_| self.token("property key")).collect()
    }

    fn descriptor(&mut self) -> Result<SchemaDescriptor> {
        match self.i8("schema descriptor type")? {
            LABEL_SCHEMA => Ok(SchemaDescriptor::Label {
                label: self.token("label")?,
                properties: self.properties()?,
            }),
            REL_TYPE_SCHEMA => Ok(SchemaDescriptor::RelationshipType {
                rel_type: self.token("relationship type")?,
                properties: self.properties()?,
            }),
            MULTI_TOKEN_SCHEMA => {
                let entity = match self.i8("entity type")? {
                    0 => EntityType::Node,
                    1 => EntityType::Relationship,
                    other => return Err(self.fail(format!("unknown entity type {}", other))),
                };
                let schema_type = match self.i8("property schema type")? {
                    0 => PropertySchemaType::CompleteAllTokens,
                    1 => PropertySchemaType::PartialAnyToken,
                    other => return Err(self.fail(format!("unknown property schema type {}", other))),
                };
                let count = self.i32("token count")?;
                let count = usize::try_from(count).map_err(|_| self.fail("negative token count"))?;
                let tokens = (0..count).map(|_| self.token("token")).collect::<Result<Vec<_>>>()?;
                Ok(SchemaDescriptor::MultiToken {
                    entity,
                    schema_type,
                    tokens,
                    properties: self.properties()?,
                })
            }
            other => Err(self.fail(format!("unknown schema descriptor type {}", other))),
        }
    }

    /// Trailing name; missing or empty names fall back to `default`
    fn name(&mut self, default: String) -> Result<String> {
        if self.buf.remaining() < 4 {
            return Ok(default);
        }
        let name = self.string("rule name")?;
        if name.is_empty() {
            return Ok(default);
        }
        check_name(&name).map_err(|e| self.fail(e.to_string()))?;
        Ok(name)
    }
}

/// Decode a rule stored under `rule_id`, in unified or legacy format
pub fn deserialize(rule_id: u64, bytes: &[u8]) -> Result<SchemaRule> {
    let mut reader = RuleReader {
        buf: bytes,
        rule_id,
        kind: 0,
    };
    let first = reader.i32("rule header")?;
    if first == UNIFIED_MARKER {
        reader.kind = reader.i8("rule kind")?;
        match reader.kind {
            INDEX_RULE => read_index_rule(&mut reader),
            CONSTRAINT_RULE => read_constraint_rule(&mut reader),
            other => Err(reader.fail(format!("unknown rule kind {}", other))),
        }
    } else {
        let token = u32::try_from(first).map_err(|_| reader.fail(format!("negative token {}", first)))?;
        reader.kind = reader.i8("legacy rule kind")?;
        read_legacy_rule(&mut reader, token)
    }
}

fn read_index_rule(reader: &mut RuleReader<'_>) -> Result<SchemaRule> {
    let provider = IndexProvider::new(reader.string("provider key")?, reader.string("provider version")?);
    let kind = match reader.i8("index type")? {
        GENERAL_INDEX => IndexKind::General,
        UNIQUE_INDEX => IndexKind::Unique {
            owning_constraint: reader.reference("owning constraint")?,
        },
        other => return Err(reader.fail(format!("unknown index type {}", other))),
    };
    let descriptor = reader.descriptor()?;
    let name = reader.name(default_index_name(reader.rule_id))?;
    Ok(SchemaRule::Index(IndexRule {
        id: reader.rule_id,
        descriptor,
        provider,
        kind,
        name,
    }))
}

fn read_constraint_rule(reader: &mut RuleReader<'_>) -> Result<SchemaRule> {
    let kind = match reader.i8("constraint type")? {
        EXISTS_CONSTRAINT => ConstraintKind::Exists,
        UNIQUE_CONSTRAINT => ConstraintKind::Unique {
            owned_index: reader.reference("owned index")?,
        },
        UNIQUE_EXISTS_CONSTRAINT => ConstraintKind::UniqueExists {
            owned_index: reader.reference("owned index")?,
        },
        other => return Err(reader.fail(format!("unknown constraint type {}", other))),
    };
    let descriptor = reader.descriptor()?;
    let name = reader.name(default_constraint_name(reader.rule_id))?;
    Ok(SchemaRule::Constraint(ConstraintRule {
        id: reader.rule_id,
        descriptor,
        kind,
        name,
    }))
}

fn read_legacy_rule(reader: &mut RuleReader<'_>, token: u32) -> Result<SchemaRule> {
    let rule_id = reader.rule_id;
    match reader.kind {
        LEGACY_INDEX | LEGACY_CONSTRAINT_INDEX => {
            let provider = IndexProvider::new(reader.string("provider key")?, reader.string("provider version")?);
            let count = reader.count("property count")?;
            let properties = (0..count)
                .map(|_| reader.long_token("property key"))
                .collect::<Result<Vec<_>>>()?;
            let kind = if reader.kind == LEGACY_INDEX {
                IndexKind::General
            } else {
                IndexKind::Unique {
                    owning_constraint: reader.reference("owning constraint")?,
                }
            };
            Ok(SchemaRule::Index(IndexRule {
                id: rule_id,
                descriptor: SchemaDescriptor::Label {
                    label: token,
                    properties,
                },
                provider,
                kind,
                name: default_index_name(rule_id),
            }))
        }
        LEGACY_UNIQUE_CONSTRAINT => {
            let count = reader.i8("property count")? as u8 as usize;
            let properties = (0..count)
                .map(|_| reader.long_token("property key"))
                .collect::<Result<Vec<_>>>()?;
            let owned_index = reader.reference("owned index")?;
            Ok(SchemaRule::Constraint(ConstraintRule {
                id: rule_id,
                descriptor: SchemaDescriptor::Label {
                    label: token,
                    properties,
                },
                kind: ConstraintKind::Unique { owned_index },
                name: default_constraint_name(rule_id),
            }))
        }
        LEGACY_NODE_EXISTS | LEGACY_REL_EXISTS => {
            let property = reader.token("property key")?;
            let descriptor = if reader.kind == LEGACY_NODE_EXISTS {
                SchemaDescriptor::for_label(token, &[property])
            } else {
                SchemaDescriptor::for_rel_type(token, &[property])
            };
            Ok(SchemaRule::Constraint(ConstraintRule {
                id: rule_id,
                descriptor,
                kind: ConstraintKind::Exists,
                name: default_constraint_name(rule_id),
            }))
        }
        other => Err(reader.fail(format!("unknown legacy rule kind {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    const INDEX: &str = "/////wsAAAAOaW5kZXgtcHJvdmlkZXIAAAAEMjUuMB9bAAACAAABAAAABA==";
    const LEGACY_INDEX_RULE: &str = "AAACAAEAAAAOaW5kZXgtcHJvdmlkZXIAAAAEMjUuMAABAAAAAAAAAAQ=";
    const UNIQUE_INDEX: &str = "/////wsAAAAOaW5kZXgtcHJvdmlkZXIAAAAEMjUuMCAAAAAAAAAAC1sAAAA9AAEAAAPc";
    const LEGACY_UNIQUE_INDEX: &str = "AAAAPQIAAAAOaW5kZXgtcHJvdmlkZXIAAAAEMjUuMAABAAAAAAAAA9wAAAAAAAAACw==";
    const UNIQUE_CONSTRAINT_RULE: &str = "/////ww+AAAAAAAAAAJbAAAANwABAAAAAw==";
    const LEGACY_UNIQUE_CONSTRAINT_RULE: &str = "AAAANwMBAAAAAAAAAAMAAAAAAAAAAg==";
    const NODE_KEY: &str = "/////ww/AAAAAAAAAAJbAAAANwABAAAAAw==";
    const NODE_EXISTS: &str = "/////ww9WwAAAC0AAQAAADM=";
    const LEGACY_NODE_EXISTS_RULE: &str = "AAAALQQAAAAz";
    const REL_EXISTS: &str = "/////ww9XAAAIUAAAQAAF+c=";
    const LEGACY_REL_EXISTS_RULE: &str = "AAAhQAUAABfn";
    const CUSTOM_NAME: &str = "AAAAC2N1c3RvbV9uYW1l";

    fn decode(serialized: &str) -> Vec<u8> {
        STANDARD.decode(serialized).unwrap()
    }

    fn named(serialized: &str) -> Vec<u8> {
        let mut bytes = decode(serialized);
        bytes.extend(decode(CUSTOM_NAME));
        bytes
    }

    fn with_null_bytes(serialized: &str, count: usize) -> Vec<u8> {
        let mut bytes = decode(serialized);
        bytes.extend(std::iter::repeat_n(0u8, count));
        bytes
    }

    /// Every fixture variant: plain, custom name, and 1-5 trailing null bytes
    fn variants(serialized: &str) -> Vec<(Vec<u8>, bool)> {
        let mut all = vec![(decode(serialized), false), (named(serialized), true)];
        all.extend((1..=5).map(|n| (with_null_bytes(serialized, n), false)));
        all
    }

    fn index_rule(rule: SchemaRule) -> IndexRule {
        match rule {
            SchemaRule::Index(index) => index,
            other => panic!("expected index rule, got {:?}", other),
        }
    }

    fn constraint_rule(rule: SchemaRule) -> ConstraintRule {
        match rule {
            SchemaRule::Constraint(constraint) => constraint,
            other => panic!("expected constraint rule, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_index_rule() {
        for (bytes, has_name) in variants(INDEX) {
            let rule = index_rule(deserialize(24, &bytes).unwrap());
            assert_eq!(rule.id, 24);
            assert_eq!(rule.descriptor, SchemaDescriptor::for_label(512, &[4]));
            assert_eq!(rule.provider, IndexProvider::new("index-provider", "25.0"));
            assert_eq!(rule.kind, IndexKind::General);
            assert_eq!(rule.name, if has_name { "custom_name" } else { "index_24" });
        }
        let legacy = index_rule(deserialize(24, &decode(LEGACY_INDEX_RULE)).unwrap());
        assert_eq!(legacy.descriptor, SchemaDescriptor::for_label(512, &[4]));
        assert_eq!(legacy.kind, IndexKind::General);
        assert_eq!(legacy.name, "index_24");
    }

    #[test]
    fn test_parse_unique_index_rule() {
        for (bytes, has_name) in variants(UNIQUE_INDEX) {
            let rule = index_rule(deserialize(33, &bytes).unwrap());
            assert_eq!(rule.descriptor, SchemaDescriptor::for_label(61, &[988]));
            assert_eq!(rule.kind, IndexKind::Unique { owning_constraint: Some(11) });
            assert_eq!(rule.name, if has_name { "custom_name" } else { "index_33" });
        }
        let legacy = index_rule(deserialize(33, &decode(LEGACY_UNIQUE_INDEX)).unwrap());
        assert_eq!(legacy.descriptor, SchemaDescriptor::for_label(61, &[988]));
        assert_eq!(legacy.kind, IndexKind::Unique { owning_constraint: Some(11) });
    }

    #[test]
    fn test_parse_unique_constraint_rule() {
        for (bytes, has_name) in variants(UNIQUE_CONSTRAINT_RULE) {
            let rule = constraint_rule(deserialize(1, &bytes).unwrap());
            assert_eq!(rule.descriptor, SchemaDescriptor::for_label(55, &[3]));
            assert_eq!(rule.kind, ConstraintKind::Unique { owned_index: Some(2) });
            assert_eq!(rule.name, if has_name { "custom_name" } else { "constraint_1" });
        }
        let legacy = constraint_rule(deserialize(1, &decode(LEGACY_UNIQUE_CONSTRAINT_RULE)).unwrap());
        assert_eq!(legacy.descriptor, SchemaDescriptor::for_label(55, &[3]));
        assert_eq!(legacy.kind, ConstraintKind::Unique { owned_index: Some(2) });
    }

    #[test]
    fn test_parse_node_key_constraint_rule() {
        for (bytes, has_name) in variants(NODE_KEY) {
            let rule = constraint_rule(deserialize(1, &bytes).unwrap());
            assert_eq!(rule.descriptor, SchemaDescriptor::for_label(55, &[3]));
            assert_eq!(rule.kind, ConstraintKind::UniqueExists { owned_index: Some(2) });
            assert_eq!(rule.name, if has_name { "custom_name" } else { "constraint_1" });
        }
    }

    #[test]
    fn test_parse_property_exists_rules() {
        for (bytes, has_name) in variants(NODE_EXISTS) {
            let rule = constraint_rule(deserialize(87, &bytes).unwrap());
            assert_eq!(rule.descriptor, SchemaDescriptor::for_label(45, &[51]));
            assert_eq!(rule.kind, ConstraintKind::Exists);
            assert_eq!(rule.name, if has_name { "custom_name" } else { "constraint_87" });
        }
        for (bytes, has_name) in variants(REL_EXISTS) {
            let rule = constraint_rule(deserialize(51, &bytes).unwrap());
            assert_eq!(rule.descriptor, SchemaDescriptor::for_rel_type(8512, &[6119]));
            assert_eq!(rule.name, if has_name { "custom_name" } else { "constraint_51" });
        }
        let legacy = constraint_rule(deserialize(87, &decode(LEGACY_NODE_EXISTS_RULE)).unwrap());
        assert_eq!(legacy.descriptor, SchemaDescriptor::for_label(45, &[51]));
        let legacy = constraint_rule(deserialize(51, &decode(LEGACY_REL_EXISTS_RULE)).unwrap());
        assert_eq!(legacy.descriptor, SchemaDescriptor::for_rel_type(8512, &[6119]));
        assert_eq!(legacy.kind, ConstraintKind::Exists);
    }

    #[test]
    fn test_serialize_matches_named_fixture() {
        let rule = SchemaRule::Constraint(ConstraintRule {
            id: 1,
            descriptor: SchemaDescriptor::for_label(55, &[3]),
            kind: ConstraintKind::Unique { owned_index: Some(2) },
            name: "custom_name".to_string(),
        });
        assert_eq!(serialize(&rule).unwrap(), named(UNIQUE_CONSTRAINT_RULE));
    }

    #[test]
    fn test_multi_token_round_trip() {
        let rule = SchemaRule::Index(IndexRule {
            id: 9,
            descriptor: SchemaDescriptor::MultiToken {
                entity: EntityType::Relationship,
                schema_type: PropertySchemaType::PartialAnyToken,
                tokens: (1..200).collect(),
                properties: (1..200).collect(),
            },
            provider: IndexProvider::new("fulltext", "1.0"),
            kind: IndexKind::Unique { owning_constraint: None },
            name: "fts".to_string(),
        });
        let bytes = serialize(&rule).unwrap();
        assert_eq!(deserialize(9, &bytes).unwrap(), rule);
    }

    #[test]
    fn test_malformed_rules() {
        let err = deserialize(7, &decode("/////w0=")).unwrap_err();
        assert!(matches!(err, Error::MalformedSchemaRule { rule_id: 7, kind: 13, .. }));

        let mut truncated = decode(UNIQUE_INDEX);
        truncated.truncate(30);
        assert!(matches!(
            deserialize(33, &truncated),
            Err(Error::MalformedSchemaRule { rule_id: 33, kind: 11, .. })
        ));

        let err = deserialize(3, &decode("AAAALQkAAAAz")).unwrap_err();
        assert!(matches!(err, Error::MalformedSchemaRule { kind: 9, .. }));
    }

    #[test]
    fn test_invalid_name_not_serialized() {
        let rule = SchemaRule::Constraint(ConstraintRule {
            id: 1,
            descriptor: SchemaDescriptor::for_label(1, &[1]),
            kind: ConstraintKind::Exists,
            name: String::new(),
        });
        assert!(serialize(&rule).is_err());
    }
}
