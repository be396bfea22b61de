use dashmap::DashMap;
use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

lazy_static::lazy_static! {
    // Interned identifier strings, leaked once per unique name
    static ref ASSET_NAMES: DashMap<u128, &'static str> = DashMap::new();
}

// The textual form of an unnamed id, `0x` followed by exactly 32 hex digits
fn parse_hash_literal(name: &str) -> Option<u128> {
    let hex = name.strip_prefix("0x")?;
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(hex, 16).ok()
}

const fn hash_name(name: &str) -> u128 {
    if name.is_empty() {
        0u128
    } else {
        const_fnv1a_hash::fnv1a_hash_str_128(name) | 1u128
    }
}

/// Stable, cheaply copyable identifier of a loadable asset.
///
/// Ids are created from a textual name like `"texture:white"`. The name is hashed (fnv1a, 128
/// bits) and interned so that equality and hashing only touch the hash while the original name
/// remains available for logging. The empty name maps to the null id.
///
/// Names of the form `0x` followed by 32 hex digits are reserved: they are parsed as the raw hash
/// instead of being hashed, which is also how unnamed ids are displayed and serialized.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct AssetId(u128);

impl AssetId {
    pub const fn null() -> Self {
        AssetId(0)
    }

    pub fn from_name(name: &str) -> Self {
        if let Some(hash) = parse_hash_literal(name) {
            return AssetId(hash);
        }

        let hash = hash_name(name);
        if hash == 0 {
            return AssetId::null();
        }

        match ASSET_NAMES.get(&hash) {
            Some(existing) => {
                if *existing != name {
                    log::error!(
                        "AssetId hash collision between {:?} and {:?}",
                        *existing,
                        name
                    );
                }
            }
            None => {
                ASSET_NAMES
                    .entry(hash)
                    .or_insert_with(|| Box::leak(name.to_string().into_boxed_str()));
            }
        }

        AssetId(hash)
    }

    /// Builds an id from a raw hash. The name is only known if it was interned previously.
    pub fn from_u128(hash: u128) -> Self {
        AssetId(hash)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn name(&self) -> Option<&'static str> {
        ASSET_NAMES.get(&self.0).map(|name| *name)
    }
}

impl Default for AssetId {
    fn default() -> Self {
        AssetId::null()
    }
}

impl From<&str> for AssetId {
    fn from(name: &str) -> Self {
        AssetId::from_name(name)
    }
}

impl From<&String> for AssetId {
    fn from(name: &String) -> Self {
        AssetId::from_name(name)
    }
}

impl From<String> for AssetId {
    fn from(name: String) -> Self {
        AssetId::from_name(&name)
    }
}

impl Debug for AssetId {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> fmt::Result {
        match self.name() {
            Some(name) => f.debug_tuple("AssetId").field(&name).finish(),
            None => f
                .debug_tuple("AssetId")
                .field(&format!("{:0>32x}", self.0))
                .finish(),
        }
    }
}

impl Display for AssetId {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:0>32x}", self.0),
        }
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

struct AssetIdVisitor;

impl<'a> Visitor<'a> for AssetIdVisitor {
    type Value = AssetId;

    fn expecting(
        &self,
        fmt: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(fmt, "an asset name")
    }

    fn visit_str<E: de::Error>(
        self,
        s: &str,
    ) -> Result<Self::Value, E> {
        Ok(AssetId::from_name(s))
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(AssetIdVisitor)
        } else {
            Ok(AssetId(u128::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_name_same_id() {
        let a = AssetId::from_name("texture:white");
        let b: AssetId = "texture:white".into();
        assert_eq!(a, b);
        assert_ne!(a, AssetId::from_name("texture:black"));
        assert_eq!(a.name(), Some("texture:white"));
        assert_eq!(a.to_string(), "texture:white");
    }

    #[test]
    fn empty_name_is_null() {
        assert!(AssetId::from_name("").is_null());
        assert!(!AssetId::from_name("x").is_null());
    }

    #[test]
    fn unknown_hash_displays_hex() {
        let id = AssetId::from_u128(0x10);
        assert_eq!(id.name(), None);
        assert_eq!(id.to_string(), format!("0x{:0>32x}", 0x10));
    }

    #[test]
    fn hash_literal_names_are_raw_hashes() {
        let literal = format!("0x{:0>32x}", 0xabcdu128);
        let id = AssetId::from_name(&literal);
        assert_eq!(id, AssetId::from_u128(0xabcd));
        assert_eq!(id.name(), None);
        assert_eq!(id.to_string(), literal);

        let upper = AssetId::from_name(&format!("0x{:0>32X}", 0xabcdu128));
        assert_eq!(upper, id);

        // Too short to be a hash, so it is an ordinary name
        let short = AssetId::from_name("0xabcd");
        assert_ne!(short, AssetId::from_u128(0xabcd));
        assert_eq!(short.name(), Some("0xabcd"));

        let round_tripped: AssetId = serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();
        assert_eq!(round_tripped, id);
    }

    #[test]
    fn json_uses_names() {
        let ids: Vec<AssetId> = serde_json::from_str(r#"["material:default", "mesh:cube"]"#).unwrap();
        assert_eq!(ids[0], AssetId::from_name("material:default"));
        assert_eq!(
            serde_json::to_string(&ids).unwrap(),
            r#"["material:default","mesh:cube"]"#
        );

        let unnamed = AssetId::from_u128(0x1234);
        let round_tripped: AssetId =
            serde_json::from_str(&serde_json::to_string(&unnamed).unwrap()).unwrap();
        assert_eq!(unnamed, round_tripped);
    }
}
