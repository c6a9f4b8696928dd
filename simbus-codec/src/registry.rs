//! Process-wide registry for polymorphic payload fields.
//!
//! Some payloads carry a field whose concrete type varies at runtime (a
//! replicated command, for instance). The wire form for those is a tagged
//! variant: `{Tag, Body}`, where `Tag` is a stable name registered up front
//! and `Body` is the registered type's own encoding. [`register`] and
//! [`register_by_name`] record the name and an encode/decode vtable;
//! [`Tagged`] is the value type that serializes through the table.
//!
//! Registration runs the wire-field-case check on the sample value, so a
//! mis-cased polymorphic payload is diagnosed at registration time rather
//! than mid-test.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::guard;

type EncodeFn = Arc<dyn Fn(&dyn Any) -> Result<serde_json::Value, String> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn Any + Send>, String> + Send + Sync>;

struct Entry {
    type_id: TypeId,
    encode: EncodeFn,
    decode: DecodeFn,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Entry>,
    names: HashMap<TypeId, String>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().expect("tagged-type registry poisoned")
}

/// Strip module paths from a type name, keeping generic arguments readable.
///
/// `alloc::vec::Vec<core::option::Option<u64>>` becomes `Vec<Option<u64>>`.
pub fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(&segment);
    out
}

/// Register a type for tagged serialization under its base type name.
///
/// # Panics
///
/// Panics if the derived name is already registered for a different type.
/// That is a test-setup bug, not a runtime condition.
pub fn register<T>(sample: &T)
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let name = short_type_name(std::any::type_name::<T>());
    register_by_name(&name, sample);
}

/// Register a type for tagged serialization under an explicit stable name.
///
/// Re-registering the same type under the same name is a no-op.
///
/// # Panics
///
/// Panics if `name` is taken by a different type, or if `T` was already
/// registered under a different name.
pub fn register_by_name<T>(name: &str, sample: &T)
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    guard::check_value(sample);

    let mut reg = registry();
    let type_id = TypeId::of::<T>();
    if let Some(existing) = reg.by_name.get(name) {
        if existing.type_id != type_id {
            panic!("simbus-codec: tag `{name}` is already registered for a different type");
        }
        return;
    }
    if let Some(previous) = reg.names.get(&type_id) {
        panic!(
            "simbus-codec: type `{}` is already registered as `{previous}`, cannot re-register as `{name}`",
            short_type_name(std::any::type_name::<T>())
        );
    }

    reg.names.insert(type_id, name.to_string());
    reg.by_name.insert(
        name.to_string(),
        Entry {
            type_id,
            encode: Arc::new(|any| {
                let value = any
                    .downcast_ref::<T>()
                    .ok_or_else(|| "tagged value does not match its registration".to_string())?;
                serde_json::to_value(value).map_err(|e| e.to_string())
            }),
            decode: Arc::new(|body| -> Result<Box<dyn Any + Send>, String> {
                let value: T = serde_json::from_value(body).map_err(|e| e.to_string())?;
                Ok(Box::new(value))
            }),
        },
    );
}

/// Clear the registry.
pub(crate) fn reset() {
    let mut reg = registry();
    reg.by_name.clear();
    reg.names.clear();
}

/// A polymorphic payload value that serializes as `{Tag, Body}` through the
/// process-wide registry.
pub struct Tagged(Box<dyn Any + Send>);

impl Tagged {
    /// Wrap a value. The type must be [`register`]ed before the wrapper is
    /// serialized or deserialized.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Tagged(Box::new(value))
    }

    /// Recover the concrete value, if the wrapper holds a `T`.
    pub fn downcast<T: 'static>(self) -> Option<T> {
        self.0.downcast::<T>().ok().map(|b| *b)
    }

    /// Borrow the concrete value, if the wrapper holds a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = registry();
        match reg.names.get(&self.0.as_ref().type_id()) {
            Some(name) => write!(f, "Tagged({name})"),
            None => f.write_str("Tagged(<unregistered>)"),
        }
    }
}

impl Serialize for Tagged {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;

        // Copy what we need out of the registry before encoding, so a
        // tagged value nested inside another tagged body cannot deadlock.
        let (name, encode) = {
            let reg = registry();
            let type_id = self.0.as_ref().type_id();
            let name = reg
                .names
                .get(&type_id)
                .ok_or_else(|| S::Error::custom("tagged value of an unregistered type"))?
                .clone();
            let entry = reg
                .by_name
                .get(&name)
                .ok_or_else(|| S::Error::custom("tag registry out of sync"))?;
            (name, entry.encode.clone())
        };
        let body = encode(self.0.as_ref()).map_err(S::Error::custom)?;

        let mut st = serializer.serialize_struct("Tagged", 2)?;
        st.serialize_field("Tag", &name)?;
        st.serialize_field("Body", &body)?;
        st.end()
    }
}

impl<'de> Deserialize<'de> for Tagged {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Wire {
            tag: String,
            body: serde_json::Value,
        }

        let wire = Wire::deserialize(deserializer)?;
        let decode = {
            let reg = registry();
            reg.by_name
                .get(&wire.tag)
                .ok_or_else(|| D::Error::custom(format!("unknown payload tag `{}`", wire.tag)))?
                .decode
                .clone()
        };
        let value = decode(wire.body).map_err(D::Error::custom)?;
        Ok(Tagged(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonCodec, MessageCodec};

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    #[serde(rename_all = "PascalCase")]
    struct PutCommand {
        key: String,
        value: String,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    #[serde(rename_all = "PascalCase")]
    struct GetCommand {
        key: String,
    }

    fn sample_put() -> PutCommand {
        PutCommand {
            key: "x".to_string(),
            value: "1".to_string(),
        }
    }

    #[test]
    fn tagged_roundtrip() {
        register(&sample_put());
        register_by_name("Get", &GetCommand { key: String::new() });

        let codec = JsonCodec;
        let bytes = codec
            .encode(&Tagged::new(sample_put()))
            .expect("encode should succeed");
        let back: Tagged = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(back.downcast::<PutCommand>(), Some(sample_put()));

        let bytes = codec
            .encode(&Tagged::new(GetCommand {
                key: "y".to_string(),
            }))
            .expect("encode should succeed");
        let back: Tagged = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(
            back.downcast_ref::<GetCommand>().map(|g| g.key.as_str()),
            Some("y")
        );
    }

    #[test]
    fn registration_is_idempotent() {
        register(&sample_put());
        register(&sample_put());
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        let codec = JsonCodec;
        let result: Result<Tagged, _> = codec.decode(br#"{"Tag":"NoSuchTag","Body":null}"#);
        assert!(result.is_err());
    }

    #[test]
    fn short_type_name_strips_paths() {
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(
            short_type_name("alloc::vec::Vec<core::option::Option<u64>>"),
            "Vec<Option<u64>>"
        );
        assert_eq!(short_type_name("u64"), "u64");
    }
}
