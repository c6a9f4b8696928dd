//! Payload-shape inspection.
//!
//! The fabric's wire convention is PascalCase field names: payload structs
//! opt in with `#[serde(rename_all = "PascalCase")]`, and independent
//! implementations of the same protocol match frames by those names. A field
//! that serializes under a lower-case name silently fails to line up with
//! the peer's decoder and comes back as a default value, which tends to
//! surface as an impossible state machine transition rather than an error.
//!
//! The inspector here is a no-output [`serde::Serializer`]: driving a value
//! through it walks the same struct/field structure the real codec would
//! emit, without producing bytes. Two checks ride on that walk:
//!
//! - **Wire-field case** (encode and decode paths): each struct's field
//!   names are inspected the first time that struct name is seen, process
//!   wide. Offenders get one `tracing::warn!` line each.
//! - **Non-default decode target** (decode path): primitive leaves down to
//!   depth 3 are compared against their zero value. Decoding into a
//!   non-default destination is legal but almost always a bug, so the first
//!   occurrence process-wide gets a warning.
//!
//! Neither check alters control flow. State lives behind one global mutex;
//! [`reset`] clears it for embeddings that run independent simulations in
//! one process.

use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::Serialize;
use serde::ser;

/// Depth past which the non-default check stops descending. Bounds the walk
/// over cyclic pointer-ish graphs (`Option`/`Box` chains).
const MAX_DEFAULT_DEPTH: u32 = 3;

struct GuardState {
    /// Struct (and enum-variant) names whose fields were already inspected.
    checked: HashSet<String>,
    /// Total diagnostics emitted or suppressed; also the one-shot gate for
    /// the non-default warning.
    diagnostics: u64,
}

static STATE: LazyLock<Mutex<GuardState>> = LazyLock::new(|| {
    Mutex::new(GuardState {
        checked: HashSet::new(),
        diagnostics: 0,
    })
});

fn state() -> MutexGuard<'static, GuardState> {
    STATE.lock().expect("codec guard state poisoned")
}

/// Run the wire-field-case check over a value's serialized shape.
///
/// Each struct name is inspected at most once per process; diagnostics go
/// through `tracing::warn!` and never fail the caller.
pub fn check_value<T: Serialize + ?Sized>(value: &T) {
    let _ = value.serialize(Inspector::fields());
}

/// Run the non-default-target check over a decode destination.
///
/// Warns (once, process-wide) when a primitive leaf within depth 3 differs
/// from its type's zero value.
pub fn check_default<T: Serialize + ?Sized>(value: &T) {
    let _ = value.serialize(Inspector::defaults());
}

/// Number of shape diagnostics recorded so far (including suppressed
/// repeats of the non-default warning).
pub fn diagnostic_count() -> u64 {
    state().diagnostics
}

/// Clear the visited-type set and the diagnostic counter.
pub(crate) fn reset() {
    let mut st = state();
    st.checked.clear();
    st.diagnostics = 0;
}

/// Record a struct name as visited; true if this is the first sighting.
fn mark_checked(name: &str) -> bool {
    let mut st = state();
    if st.checked.contains(name) {
        false
    } else {
        st.checked.insert(name.to_string());
        true
    }
}

fn report_field(struct_name: &str, field: &str) {
    state().diagnostics += 1;
    tracing::warn!(
        "codec guard: lower-case wire field `{field}` of `{struct_name}` in an RPC or \
         persisted payload will not match the peer's decoder"
    );
}

fn report_non_default(what: &str) {
    let mut st = state();
    let first = st.diagnostics < 1;
    st.diagnostics += 1;
    drop(st);
    if first {
        tracing::warn!("codec guard: decoding into a non-default variable/field `{what}` may not work");
    }
}

/// Serialization error for the inspector. Inspection itself never fails,
/// but user `Serialize` impls may; those errors are swallowed by the
/// checks (the real codec will surface them).
#[derive(Debug)]
pub(crate) struct InspectError(String);

impl fmt::Display for InspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InspectError {}

impl ser::Error for InspectError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        InspectError(msg.to_string())
    }
}

/// The walking serializer. One instance covers one value position; children
/// are fresh instances with adjusted depth/path.
struct Inspector {
    check_fields: bool,
    check_defaults: bool,
    /// Current depth for the non-default check; top level is 1.
    depth: u32,
    /// Inside a sequence or map. The non-default check does not descend
    /// into containers, only into structs and pointer-like wrappers.
    in_container: bool,
    /// Dotted field path for diagnostics, empty at top level.
    path: String,
}

impl Inspector {
    fn fields() -> Self {
        Inspector {
            check_fields: true,
            check_defaults: false,
            depth: 1,
            in_container: false,
            path: String::new(),
        }
    }

    fn defaults() -> Self {
        Inspector {
            check_fields: false,
            check_defaults: true,
            depth: 1,
            in_container: false,
            path: String::new(),
        }
    }

    /// Child inspector for a named struct field.
    fn field_child(&self, field: &str) -> Inspector {
        let path = if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        };
        Inspector {
            check_fields: self.check_fields,
            check_defaults: self.check_defaults,
            depth: self.depth + 1,
            in_container: self.in_container,
            path,
        }
    }

    /// Child inspector one dereference down (`Option::Some`, newtypes).
    fn deref_child(&self) -> Inspector {
        Inspector {
            check_fields: self.check_fields,
            check_defaults: self.check_defaults,
            depth: self.depth + 1,
            in_container: self.in_container,
            path: self.path.clone(),
        }
    }

    /// Child inspector for sequence elements and map keys/values.
    fn container_child(&self) -> Inspector {
        Inspector {
            check_fields: self.check_fields,
            check_defaults: self.check_defaults,
            depth: self.depth,
            in_container: true,
            path: self.path.clone(),
        }
    }

    /// A primitive leaf was observed; `non_default` says whether it differs
    /// from its type's zero value.
    fn leaf(&self, type_name: &str, non_default: bool) {
        if self.check_defaults
            && !self.in_container
            && self.depth <= MAX_DEFAULT_DEPTH
            && non_default
        {
            let what = if self.path.is_empty() {
                type_name
            } else {
                self.path.as_str()
            };
            report_non_default(what);
        }
    }
}

impl ser::Serializer for Inspector {
    type Ok = ();
    type Error = InspectError;
    type SerializeSeq = ContainerInspector;
    type SerializeTuple = ContainerInspector;
    type SerializeTupleStruct = ContainerInspector;
    type SerializeTupleVariant = ContainerInspector;
    type SerializeMap = ContainerInspector;
    type SerializeStruct = StructInspector;
    type SerializeStructVariant = StructInspector;

    fn serialize_bool(self, v: bool) -> Result<(), InspectError> {
        self.leaf("bool", v);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), InspectError> {
        self.leaf("i8", v != 0);
        Ok(())
    }

    fn serialize_i16(self, v: i16) -> Result<(), InspectError> {
        self.leaf("i16", v != 0);
        Ok(())
    }

    fn serialize_i32(self, v: i32) -> Result<(), InspectError> {
        self.leaf("i32", v != 0);
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<(), InspectError> {
        self.leaf("i64", v != 0);
        Ok(())
    }

    fn serialize_i128(self, v: i128) -> Result<(), InspectError> {
        self.leaf("i128", v != 0);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), InspectError> {
        self.leaf("u8", v != 0);
        Ok(())
    }

    fn serialize_u16(self, v: u16) -> Result<(), InspectError> {
        self.leaf("u16", v != 0);
        Ok(())
    }

    fn serialize_u32(self, v: u32) -> Result<(), InspectError> {
        self.leaf("u32", v != 0);
        Ok(())
    }

    fn serialize_u64(self, v: u64) -> Result<(), InspectError> {
        self.leaf("u64", v != 0);
        Ok(())
    }

    fn serialize_u128(self, v: u128) -> Result<(), InspectError> {
        self.leaf("u128", v != 0);
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), InspectError> {
        self.leaf("f32", v != 0.0);
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), InspectError> {
        self.leaf("f64", v != 0.0);
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), InspectError> {
        self.leaf("char", v != '\0');
        Ok(())
    }

    fn serialize_str(self, v: &str) -> Result<(), InspectError> {
        self.leaf("str", !v.is_empty());
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), InspectError> {
        // Byte blobs are container-like; neither check applies inside.
        Ok(())
    }

    fn serialize_none(self) -> Result<(), InspectError> {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.deref_child())
    }

    fn serialize_unit(self) -> Result<(), InspectError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), InspectError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), InspectError> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), InspectError> {
        value.serialize(self.deref_child())
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), InspectError> {
        value.serialize(self.deref_child())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<ContainerInspector, InspectError> {
        Ok(ContainerInspector { base: self })
    }

    fn serialize_tuple(self, _len: usize) -> Result<ContainerInspector, InspectError> {
        Ok(ContainerInspector { base: self })
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<ContainerInspector, InspectError> {
        Ok(ContainerInspector { base: self })
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<ContainerInspector, InspectError> {
        Ok(ContainerInspector { base: self })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<ContainerInspector, InspectError> {
        Ok(ContainerInspector { base: self })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> Result<StructInspector, InspectError> {
        let first_visit = self.check_fields && mark_checked(name);
        Ok(StructInspector {
            name: name.to_string(),
            first_visit,
            base: self,
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<StructInspector, InspectError> {
        let key = format!("{name}::{variant}");
        let first_visit = self.check_fields && mark_checked(&key);
        Ok(StructInspector {
            name: key,
            first_visit,
            base: self,
        })
    }

    fn is_human_readable(&self) -> bool {
        true
    }
}

/// Compound inspector for sequences, tuples and maps.
struct ContainerInspector {
    base: Inspector,
}

impl ser::SerializeSeq for ContainerInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.base.container_child())
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

impl ser::SerializeTuple for ContainerInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.base.container_child())
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for ContainerInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.base.container_child())
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for ContainerInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.base.container_child())
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

impl ser::SerializeMap for ContainerInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), InspectError> {
        key.serialize(self.base.container_child())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InspectError> {
        value.serialize(self.base.container_child())
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

/// Compound inspector for structs and struct variants. Field names are
/// checked only on the struct's first process-wide sighting.
struct StructInspector {
    name: String,
    first_visit: bool,
    base: Inspector,
}

impl StructInspector {
    fn field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<(), InspectError> {
        if self.first_visit && !key.chars().next().is_some_and(char::is_uppercase) {
            report_field(&self.name, key);
        }
        value.serialize(self.base.field_child(key))
    }
}

impl ser::SerializeStruct for StructInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), InspectError> {
        self.field(key, value)
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for StructInspector {
    type Ok = ();
    type Error = InspectError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), InspectError> {
        self.field(key, value)
    }

    fn end(self) -> Result<(), InspectError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::sync::{Mutex, MutexGuard};

    // Guard state is process-global; tests that assert on the counter take
    // this lock and reset first.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn isolated() -> MutexGuard<'static, ()> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let lock = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reset();
        lock
    }

    #[derive(Serialize, Default)]
    #[serde(rename_all = "PascalCase")]
    struct WellCased {
        term: u64,
        leader: String,
    }

    #[derive(Serialize, Default)]
    struct BadlyCased {
        term: u64,
        votes: u32,
    }

    #[derive(Serialize, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Outer {
        round: u64,
        inner: BadlyCasedInner,
    }

    #[derive(Serialize, Default)]
    struct BadlyCasedInner {
        count: u64,
    }

    #[test]
    fn well_cased_struct_is_silent() {
        let _lock = isolated();
        check_value(&WellCased {
            term: 1,
            leader: "s0".to_string(),
        });
        assert_eq!(diagnostic_count(), 0);
    }

    #[test]
    fn lower_case_fields_warn_once_per_type() {
        let _lock = isolated();
        check_value(&BadlyCased::default());
        assert_eq!(diagnostic_count(), 2, "one diagnostic per offending field");

        // Second and third sightings of the same struct are memoized.
        check_value(&BadlyCased::default());
        check_value(&BadlyCased { term: 9, votes: 1 });
        assert_eq!(diagnostic_count(), 2);
    }

    #[test]
    fn nested_offender_is_found_through_clean_parent() {
        let _lock = isolated();
        check_value(&Outer::default());
        assert_eq!(diagnostic_count(), 1);
    }

    #[test]
    fn offender_inside_sequence_is_found() {
        let _lock = isolated();
        check_value(&vec![BadlyCasedInner::default()]);
        assert_eq!(diagnostic_count(), 1);
    }

    #[test]
    fn non_default_destination_warns_once_globally() {
        let _lock = isolated();
        check_default(&WellCased {
            term: 4,
            leader: String::new(),
        });
        let after_first = diagnostic_count();
        assert!(after_first >= 1);

        // Further offenders are counted but the warning is one-shot; the
        // count still moves so tests can observe suppressed repeats.
        check_default(&7u64);
        assert!(diagnostic_count() > after_first);
    }

    #[test]
    fn default_destination_is_silent() {
        let _lock = isolated();
        check_default(&WellCased::default());
        check_default(&0i64);
        check_default(&String::new());
        assert_eq!(diagnostic_count(), 0);
    }

    #[derive(Serialize, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Depth1 {
        two: Depth2,
    }

    #[derive(Serialize, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Depth2 {
        three: Depth3,
    }

    #[derive(Serialize, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Depth3 {
        value: u64,
    }

    #[test]
    fn non_default_check_stops_at_depth_three() {
        let _lock = isolated();
        // `value` sits at depth 4: Depth1 (1) -> two (2) -> three (3) -> value (4).
        check_default(&Depth1 {
            two: Depth2 {
                three: Depth3 { value: 42 },
            },
        });
        assert_eq!(diagnostic_count(), 0);

        // One level up it is visible.
        check_default(&Depth2 {
            three: Depth3 { value: 42 },
        });
        assert_eq!(diagnostic_count(), 1);
    }

    #[test]
    fn non_default_check_skips_container_contents() {
        let _lock = isolated();
        check_default(&vec![1u64, 2, 3]);
        assert_eq!(diagnostic_count(), 0);
    }

    #[test]
    fn option_follows_through_when_present() {
        let _lock = isolated();
        check_default(&None::<u64>);
        assert_eq!(diagnostic_count(), 0);
        check_default(&Some(5u64));
        assert_eq!(diagnostic_count(), 1);
    }

    #[test]
    fn registering_a_lower_case_type_warns_exactly_once() {
        let _lock = isolated();
        crate::registry::reset();

        #[derive(Serialize, serde::Deserialize)]
        struct BadCommand {
            op: String,
        }

        crate::register(&BadCommand { op: String::new() });
        assert_eq!(diagnostic_count(), 1);

        // Re-registration re-runs the check, but the type is memoized.
        crate::register(&BadCommand { op: String::new() });
        assert_eq!(diagnostic_count(), 1);
    }
}
