//! Argument marshaling - outgoing call arguments to transport-safe JSON.
//!
//! The caller states each argument's shape by how it builds the [`Arg`]; the
//! marshaler applies the rules in order:
//!
//! 1. `Arg::null()` and `None` → `null`
//! 2. enumerations → their wire name, never the ordinal
//! 3. scalars, timestamps and element references → unchanged
//! 4. union wrappers → unwrapped, rules re-applied to the content
//! 5. callables → a fresh callback registration, substituted by its token
//! 6. proxies → `{"id": ...}`
//! 7. anything else → structural JSON
//!
//! Registrations created under rule 5 belong to the caller. The marshaler never
//! disposes them.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::callback::{Callback, CallbackRegistration, CallbackTable};
use crate::error::{BridgeError, Result};
use crate::handles::{RemoteBacked, RemoteHandle};
use crate::resolve::{OneOf2, OneOf3};

/// An enumeration with declared wire names.
pub trait WireEnum {
    fn wire_name(&self) -> &'static str;
}

/// Reference to a platform UI element, passed through to the remote side as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementRef {
    #[serde(rename = "elementRef")]
    id: String,
}

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// One outgoing call argument.
///
/// Built through the constructors and `From` impls, which fix the rule the
/// argument is marshaled under.
#[derive(Debug)]
pub struct Arg(Shape);

#[derive(Debug)]
enum Shape {
    Null,
    Enum(&'static str),
    Scalar(Value),
    Element(ElementRef),
    Union(Box<Arg>),
    Callback(Callback),
    Proxy(RemoteHandle),
    Json(Value),
}

impl Arg {
    pub fn null() -> Self {
        Self(Shape::Null)
    }

    pub fn enumeration<E: WireEnum>(value: E) -> Self {
        Self(Shape::Enum(value.wire_name()))
    }

    pub fn callback(callback: Callback) -> Self {
        Self(Shape::Callback(callback))
    }

    pub fn proxy<P: RemoteBacked>(proxy: &P) -> Self {
        Self(Shape::Proxy(proxy.handle().clone()))
    }

    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self(Shape::Scalar(Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))))
    }

    /// Structural encoding for anything without a dedicated variant.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(|value| Self(Shape::Json(value)))
            .map_err(BridgeError::Serialize)
    }

    pub fn union(inner: impl Into<Arg>) -> Self {
        Self(Shape::Union(Box::new(inner.into())))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self(Shape::Scalar(Value::String(value.to_string())))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self(Shape::Scalar(Value::String(value)))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self(Shape::Scalar(Value::Bool(value)))
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Self(Shape::Scalar(Value::from(value)))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self(Shape::Scalar(Value::from(value)))
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Self(Shape::Scalar(Value::from(value)))
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self(Shape::Scalar(Value::from(value)))
    }
}

/// Non-finite floats have no JSON form and become `null`.
impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        let number = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        Self(Shape::Scalar(number))
    }
}

impl From<DateTime<Utc>> for Arg {
    fn from(value: DateTime<Utc>) -> Self {
        Self::timestamp(value)
    }
}

impl From<ElementRef> for Arg {
    fn from(value: ElementRef) -> Self {
        Self(Shape::Element(value))
    }
}

impl From<Callback> for Arg {
    fn from(value: Callback) -> Self {
        Self(Shape::Callback(value))
    }
}

impl From<RemoteHandle> for Arg {
    fn from(value: RemoteHandle) -> Self {
        Self(Shape::Proxy(value))
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Self::null, Into::into)
    }
}

impl<A: Into<Arg>, B: Into<Arg>> From<OneOf2<A, B>> for Arg {
    fn from(value: OneOf2<A, B>) -> Self {
        match value {
            OneOf2::First(a) => Self::union(a),
            OneOf2::Second(b) => Self::union(b),
        }
    }
}

impl<A: Into<Arg>, B: Into<Arg>, C: Into<Arg>> From<OneOf3<A, B, C>> for Arg {
    fn from(value: OneOf3<A, B, C>) -> Self {
        match value {
            OneOf3::First(a) => Self::union(a),
            OneOf3::Second(b) => Self::union(b),
            OneOf3::Third(c) => Self::union(c),
        }
    }
}

/// Marshal `args` in order. Callback registrations are appended to `created`.
pub fn marshal(
    args: Vec<Arg>,
    callbacks: &Arc<CallbackTable>,
    created: &mut Vec<CallbackRegistration>,
) -> Result<Vec<Value>> {
    args.into_iter()
        .map(|arg| marshal_one(arg, callbacks, created))
        .collect()
}

fn marshal_one(
    arg: Arg,
    callbacks: &Arc<CallbackTable>,
    created: &mut Vec<CallbackRegistration>,
) -> Result<Value> {
    match arg.0 {
        Shape::Null => Ok(Value::Null),
        Shape::Enum(wire_name) => Ok(Value::String(wire_name.to_string())),
        Shape::Scalar(value) => Ok(value),
        Shape::Element(element) => serde_json::to_value(element).map_err(BridgeError::Serialize),
        Shape::Union(inner) => marshal_one(*inner, callbacks, created),
        Shape::Callback(callback) => {
            let registration = callbacks.register(callback);
            let token = serde_json::to_value(registration.token());
            created.push(registration);
            token.map_err(BridgeError::Serialize)
        }
        Shape::Proxy(handle) => serde_json::to_value(handle).map_err(BridgeError::Serialize),
        Shape::Json(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::tests::Marker;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Debug, Clone, Copy)]
    enum RouteMode {
        Fast,
        Short,
    }

    impl WireEnum for RouteMode {
        fn wire_name(&self) -> &'static str {
            match self {
                Self::Fast => "fast",
                Self::Short => "short",
            }
        }
    }

    fn table() -> Arc<CallbackTable> {
        CallbackTable::new("invoke")
    }

    #[test]
    fn mixed_argument_list() {
        let callbacks = table();
        let proxy = Marker::attach(RemoteHandle::new("marker-3"));
        let mut created = Vec::new();

        let out = marshal(
            vec![
                Arg::from("hello"),
                Arg::enumeration(RouteMode::Fast),
                Arg::callback(Callback::action(|| {})),
                Arg::proxy(&proxy),
            ],
            &callbacks,
            &mut created,
        )
        .unwrap();

        assert_eq!(created.len(), 1);
        let token = json!({
            "callbackId": created[0].id().to_string(),
            "method": "invoke",
        });
        assert_eq!(
            out,
            vec![json!("hello"), json!("fast"), token, json!({"id": "marker-3"})]
        );
        assert!(callbacks.is_registered(created[0].id()));
    }

    #[test]
    fn enum_uses_wire_name_not_ordinal() {
        let mut created = Vec::new();
        let out = marshal(
            vec![Arg::enumeration(RouteMode::Short)],
            &table(),
            &mut created,
        )
        .unwrap();
        assert_eq!(out, vec![json!("short")]);
    }

    #[test]
    fn scalars_pass_through() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut created = Vec::new();
        let out = marshal(
            vec![
                Arg::null(),
                Arg::from(true),
                Arg::from(42i64),
                Arg::from(2.5f64),
                Arg::from(at),
                Arg::from(ElementRef::new("map-container")),
                Arg::from(None::<String>),
            ],
            &table(),
            &mut created,
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                Value::Null,
                json!(true),
                json!(42),
                json!(2.5),
                json!("2024-05-01T12:00:00Z"),
                json!({"elementRef": "map-container"}),
                Value::Null,
            ]
        );
        assert!(created.is_empty());
    }

    #[test]
    fn json_text_stays_a_string() {
        let mut created = Vec::new();
        let out = marshal(vec![Arg::from(r#"{"lat": 1}"#)], &table(), &mut created).unwrap();
        assert_eq!(out, vec![json!(r#"{"lat": 1}"#)]);
    }

    #[test]
    fn non_finite_float_becomes_null() {
        let mut created = Vec::new();
        let out = marshal(vec![Arg::from(f64::NAN)], &table(), &mut created).unwrap();
        assert_eq!(out, vec![Value::Null]);
    }

    #[test]
    fn union_wrapper_is_unwrapped() {
        let callbacks = table();
        let mut created = Vec::new();

        let out = marshal(
            vec![
                Arg::from(OneOf2::<&str, i64>::First("text")),
                Arg::from(OneOf3::<&str, i64, bool>::Third(false)),
                Arg::union(Arg::union(Arg::enumeration(RouteMode::Fast))),
                Arg::from(OneOf2::<Callback, i64>::First(Callback::action(|| {}))),
            ],
            &callbacks,
            &mut created,
        )
        .unwrap();

        assert_eq!(&out[..3], &[json!("text"), json!(false), json!("fast")]);
        assert_eq!(created.len(), 1);
        assert_eq!(out[3]["callbackId"], json!(created[0].id().to_string()));
    }

    #[test]
    fn structural_fallback() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct BoundingBox {
            top_left: (f64, f64),
            bottom_right: (f64, f64),
        }

        let arg = Arg::json(&BoundingBox {
            top_left: (52.5, 13.3),
            bottom_right: (52.4, 13.5),
        })
        .unwrap();

        let mut created = Vec::new();
        let out = marshal(vec![arg], &table(), &mut created).unwrap();
        assert_eq!(
            out,
            vec![json!({
                "topLeft": [52.5, 13.3],
                "bottomRight": [52.4, 13.5],
            })]
        );
    }

    #[test]
    fn each_callback_gets_its_own_registration() {
        let callbacks = table();
        let mut created = Vec::new();
        marshal(
            vec![
                Arg::callback(Callback::action(|| {})),
                Arg::callback(Callback::function(|_: String| {})),
            ],
            &callbacks,
            &mut created,
        )
        .unwrap();

        assert_eq!(created.len(), 2);
        assert_ne!(created[0].id(), created[1].id());
        assert_eq!(callbacks.len(), 2);
    }

    #[test]
    fn marshaler_never_disposes() {
        let callbacks = table();
        let mut created = Vec::new();
        marshal(
            vec![Arg::callback(Callback::action(|| {}))],
            &callbacks,
            &mut created,
        )
        .unwrap();
        drop(created);
        assert_eq!(callbacks.len(), 1);
    }
}
