//! Deterministic point identity.
//!
//! A 36-character UUID segregates point types logically while sharing one
//! physical collection. The first hex group is a namespace tag; the
//! remaining groups encode the identifying tuple:
//!
//! ```text
//! graph      00000001-SSSS-TTTT-RRFF-FFFFFFFFFFFF   S=source model, T=target model,
//!                                                   R=relationship code, F=FK field id
//! data       00000002-MMMM-0000-0000-RRRRRRRRRRRR   M=model id, R=record id
//! schema     00000003-0004-0000-0000-FFFFFFFFFFFF   F=field id
//! knowledge  00000005-LLLL-MMMM-0000-IIIIIIIIIIII   L=level, M=model id, I=item
//! ```
//!
//! Identity is pure: the same tuple yields a byte-for-byte identical UUID
//! across processes and implementations. UUIDs are the only cross-reference
//! mechanism in the store.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IdentityError;

/// Namespace tag for graph-edge points.
pub const NS_GRAPH: &str = "00000001";
/// Namespace tag for data-record points.
pub const NS_DATA: &str = "00000002";
/// Namespace tag for schema-field points.
pub const NS_SCHEMA: &str = "00000003";
/// Namespace tag for knowledge points.
pub const NS_KNOWLEDGE: &str = "00000005";

/// Largest model id encodable in the 4-hex-digit model group.
pub const MAX_MODEL_ID: u32 = 0xFFFF;
/// Largest record id encodable in the 12-hex-digit record group.
pub const MAX_RECORD_ID: u64 = 0xFFFF_FFFF_FFFF;
/// Largest field id encodable in the 12-hex-digit field group.
pub const MAX_FIELD_ID: u64 = 0xFFFF_FFFF_FFFF;

/// The discriminator every point carries in its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Schema,
    Data,
    Graph,
    Knowledge,
}

impl PointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Graph => "graph",
            Self::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FK relationship codes used in the graph namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipCode {
    OneToOne = 11,
    OneToMany = 21,
    ManyToOne = 31,
    ManyToMany = 41,
}

impl RelationshipCode {
    pub fn parse(code: u8) -> Option<Self> {
        match code {
            11 => Some(Self::OneToOne),
            21 => Some(Self::OneToMany),
            31 => Some(Self::ManyToOne),
            41 => Some(Self::ManyToMany),
            _ => None,
        }
    }
}

/// Knowledge point levels (the `LLLL` group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeLevel {
    Instance,
    Model,
    Field,
}

impl KnowledgeLevel {
    pub fn code(&self) -> u16 {
        match self {
            Self::Instance => 2,
            Self::Model => 3,
            Self::Field => 4,
        }
    }

    pub fn parse(code: u16) -> Option<Self> {
        match code {
            2 => Some(Self::Instance),
            3 => Some(Self::Model),
            4 => Some(Self::Field),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Model => "model",
            Self::Field => "field",
        }
    }
}

/// A derived point identity. Always a canonical lowercase 36-char UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(String);

impl PointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn kind(&self) -> Option<PointKind> {
        classify(&self.0)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn check_model_id(model_id: u32) -> Result<(), IdentityError> {
    if model_id > MAX_MODEL_ID {
        return Err(IdentityError::ModelIdOutOfRange(model_id));
    }
    Ok(())
}

fn check_record_id(record_id: u64) -> Result<(), IdentityError> {
    if record_id > MAX_RECORD_ID {
        return Err(IdentityError::RecordIdOutOfRange(record_id));
    }
    Ok(())
}

fn check_field_id(field_id: u64) -> Result<(), IdentityError> {
    if field_id > MAX_FIELD_ID {
        return Err(IdentityError::FieldIdOutOfRange(field_id));
    }
    Ok(())
}

/// `00000002-MMMM-0000-0000-RRRRRRRRRRRR`
pub fn data_uuid(model_id: u32, record_id: u64) -> Result<PointId, IdentityError> {
    check_model_id(model_id)?;
    check_record_id(record_id)?;
    Ok(PointId(format!(
        "{NS_DATA}-{model_id:04x}-0000-0000-{record_id:012x}"
    )))
}

/// `00000003-0004-0000-0000-FFFFFFFFFFFF`
pub fn schema_uuid(field_id: u64) -> Result<PointId, IdentityError> {
    check_field_id(field_id)?;
    Ok(PointId(format!(
        "{NS_SCHEMA}-0004-0000-0000-{field_id:012x}"
    )))
}

/// `00000001-SSSS-TTTT-RRFF-FFFFFFFFFFFF`
///
/// The FK field id spans the trailing 14 hex digits: two in the fourth
/// group after the relationship code, twelve in the fifth group.
pub fn graph_uuid(
    source_model_id: u32,
    target_model_id: u32,
    rel: RelationshipCode,
    field_id: u64,
) -> Result<PointId, IdentityError> {
    check_model_id(source_model_id)?;
    check_model_id(target_model_id)?;
    if field_id > 0xFF_FFFF_FFFF_FFFF {
        return Err(IdentityError::FieldIdOutOfRange(field_id));
    }
    let hi = (field_id >> 48) as u8;
    let lo = field_id & MAX_FIELD_ID;
    Ok(PointId(format!(
        "{NS_GRAPH}-{source_model_id:04x}-{target_model_id:04x}-{:02}{hi:02x}-{lo:012x}",
        rel as u8
    )))
}

/// `00000005-LLLL-MMMM-0000-IIIIIIIIIIII`
pub fn knowledge_uuid(
    level: KnowledgeLevel,
    model_id: u32,
    item: u64,
) -> Result<PointId, IdentityError> {
    check_model_id(model_id)?;
    check_record_id(item)?;
    Ok(PointId(format!(
        "{NS_KNOWLEDGE}-{:04x}-{model_id:04x}-0000-{item:012x}",
        level.code()
    )))
}

/// Split a candidate UUID into its five hex groups, validating shape.
///
/// Canonical hyphenated form only; uuid's parser rejects everything the
/// namespace scheme cannot have produced (braces, URNs, simple form).
fn groups(uuid: &str) -> Result<[&str; 5], IdentityError> {
    if uuid.len() != 36 || uuid::Uuid::try_parse_ascii(uuid.as_bytes()).is_err() {
        return Err(IdentityError::Malformed(uuid.to_string()));
    }
    let parts: Vec<&str> = uuid.split('-').collect();
    if parts.len() != 5 {
        return Err(IdentityError::Malformed(uuid.to_string()));
    }
    Ok([parts[0], parts[1], parts[2], parts[3], parts[4]])
}

/// Route a UUID to its point type, or `None` for foreign/invalid ids.
pub fn classify(uuid: &str) -> Option<PointKind> {
    let [ns, ..] = groups(uuid).ok()?;
    match ns {
        NS_GRAPH => Some(PointKind::Graph),
        NS_DATA => Some(PointKind::Data),
        NS_SCHEMA => Some(PointKind::Schema),
        NS_KNOWLEDGE => Some(PointKind::Knowledge),
        _ => None,
    }
}

/// Inverse of [`data_uuid`].
pub fn parse_data(uuid: &str) -> Result<(u32, u64), IdentityError> {
    let [ns, model, z1, z2, record] = groups(uuid)?;
    if ns != NS_DATA || z1 != "0000" || z2 != "0000" {
        return Err(IdentityError::WrongNamespace {
            uuid: uuid.to_string(),
            expected: PointKind::Data,
        });
    }
    let model_id = u32::from_str_radix(model, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    let record_id =
        u64::from_str_radix(record, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    Ok((model_id, record_id))
}

/// Inverse of [`schema_uuid`].
pub fn parse_schema(uuid: &str) -> Result<u64, IdentityError> {
    let [ns, tag, z1, z2, field] = groups(uuid)?;
    if ns != NS_SCHEMA || tag != "0004" || z1 != "0000" || z2 != "0000" {
        return Err(IdentityError::WrongNamespace {
            uuid: uuid.to_string(),
            expected: PointKind::Schema,
        });
    }
    u64::from_str_radix(field, 16).map_err(|_| IdentityError::Malformed(uuid.into()))
}

/// Inverse of [`graph_uuid`].
pub fn parse_graph(uuid: &str) -> Result<(u32, u32, RelationshipCode, u64), IdentityError> {
    let [ns, source, target, rel_hi, lo] = groups(uuid)?;
    if ns != NS_GRAPH {
        return Err(IdentityError::WrongNamespace {
            uuid: uuid.to_string(),
            expected: PointKind::Graph,
        });
    }
    let source_id =
        u32::from_str_radix(source, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    let target_id =
        u32::from_str_radix(target, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    // Relationship code is printed in decimal; the field-id spillover is hex.
    let rel_code: u8 = rel_hi[..2]
        .parse()
        .map_err(|_| IdentityError::Malformed(uuid.to_string()))?;
    let rel = RelationshipCode::parse(rel_code)
        .ok_or_else(|| IdentityError::Malformed(uuid.to_string()))?;
    let hi = u64::from_str_radix(&rel_hi[2..], 16)
        .map_err(|_| IdentityError::Malformed(uuid.to_string()))?;
    let lo = u64::from_str_radix(lo, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    Ok((source_id, target_id, rel, (hi << 48) | lo))
}

/// Inverse of [`knowledge_uuid`].
pub fn parse_knowledge(uuid: &str) -> Result<(KnowledgeLevel, u32, u64), IdentityError> {
    let [ns, level, model, z, item] = groups(uuid)?;
    if ns != NS_KNOWLEDGE || z != "0000" {
        return Err(IdentityError::WrongNamespace {
            uuid: uuid.to_string(),
            expected: PointKind::Knowledge,
        });
    }
    let level_code =
        u16::from_str_radix(level, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    let level = KnowledgeLevel::parse(level_code)
        .ok_or_else(|| IdentityError::Malformed(uuid.to_string()))?;
    let model_id =
        u32::from_str_radix(model, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    let item = u64::from_str_radix(item, 16).map_err(|_| IdentityError::Malformed(uuid.into()))?;
    Ok((level, model_id, item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn data_uuid_is_deterministic() {
        let a = data_uuid(73, 1234).unwrap();
        let b = data_uuid(73, 1234).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "00000002-0049-0000-0000-0000000004d2");
        assert_eq!(classify(a.as_str()), Some(PointKind::Data));
    }

    #[test]
    fn schema_uuid_shape() {
        let id = schema_uuid(2001).unwrap();
        assert_eq!(id.as_str(), "00000003-0004-0000-0000-0000000007d1");
        assert_eq!(parse_schema(id.as_str()).unwrap(), 2001);
    }

    #[test]
    fn graph_uuid_roundtrip_with_spillover() {
        let field_id = (0xab << 48) | 0x0123_4567_89ab;
        let id = graph_uuid(10, 20, RelationshipCode::ManyToOne, field_id).unwrap();
        let (s, t, rel, f) = parse_graph(id.as_str()).unwrap();
        assert_eq!((s, t), (10, 20));
        assert_eq!(rel, RelationshipCode::ManyToOne);
        assert_eq!(f, field_id);
    }

    #[test]
    fn knowledge_levels_encode_distinctly() {
        let a = knowledge_uuid(KnowledgeLevel::Instance, 0, 1).unwrap();
        let b = knowledge_uuid(KnowledgeLevel::Model, 0, 1).unwrap();
        let c = knowledge_uuid(KnowledgeLevel::Field, 0, 1).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a.as_str().starts_with("00000005-0002"));
        assert!(b.as_str().starts_with("00000005-0003"));
        assert!(c.as_str().starts_with("00000005-0004"));
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        assert!(data_uuid(0x1_0000, 1).is_err());
        assert!(data_uuid(1, MAX_RECORD_ID + 1).is_err());
        assert!(schema_uuid(MAX_FIELD_ID + 1).is_err());
        assert!(knowledge_uuid(KnowledgeLevel::Model, MAX_MODEL_ID + 1, 0).is_err());
    }

    #[test]
    fn classify_rejects_foreign_uuids() {
        assert_eq!(classify("6ba7b810-9dad-11d1-80b4-00c04fd430c8"), None);
        assert_eq!(classify("not-a-uuid"), None);
        assert_eq!(classify(""), None);
        // Right length, bad hex.
        assert_eq!(classify("0000000z-0000-0000-0000-000000000000"), None);
    }

    #[test]
    fn parse_data_rejects_other_namespaces() {
        let schema = schema_uuid(5).unwrap();
        assert!(parse_data(schema.as_str()).is_err());
    }

    proptest! {
        #[test]
        fn data_roundtrip(model in 0u32..=MAX_MODEL_ID, record in 0u64..=MAX_RECORD_ID) {
            let id = data_uuid(model, record).unwrap();
            prop_assert_eq!(parse_data(id.as_str()).unwrap(), (model, record));
            prop_assert_eq!(classify(id.as_str()), Some(PointKind::Data));
        }

        #[test]
        fn schema_roundtrip(field in 0u64..=MAX_FIELD_ID) {
            let id = schema_uuid(field).unwrap();
            prop_assert_eq!(parse_schema(id.as_str()).unwrap(), field);
            prop_assert_eq!(classify(id.as_str()), Some(PointKind::Schema));
        }

        #[test]
        fn graph_roundtrip(
            source in 0u32..=MAX_MODEL_ID,
            target in 0u32..=MAX_MODEL_ID,
            code in prop::sample::select(vec![11u8, 21, 31, 41]),
            field in 0u64..=0xFF_FFFF_FFFF_FFFF,
        ) {
            let rel = RelationshipCode::parse(code).unwrap();
            let id = graph_uuid(source, target, rel, field).unwrap();
            prop_assert_eq!(parse_graph(id.as_str()).unwrap(), (source, target, rel, field));
            prop_assert_eq!(classify(id.as_str()), Some(PointKind::Graph));
        }

        #[test]
        fn knowledge_roundtrip(
            level in prop::sample::select(vec![KnowledgeLevel::Instance, KnowledgeLevel::Model, KnowledgeLevel::Field]),
            model in 0u32..=MAX_MODEL_ID,
            item in 0u64..=MAX_RECORD_ID,
        ) {
            let id = knowledge_uuid(level, model, item).unwrap();
            prop_assert_eq!(parse_knowledge(id.as_str()).unwrap(), (level, model, item));
            prop_assert_eq!(classify(id.as_str()), Some(PointKind::Knowledge));
        }
    }
}
