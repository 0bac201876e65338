//! Result resolution - raw transport payloads to typed values.
//!
//! The caller states the expected shape statically:
//! - a plain `DeserializeOwned` type,
//! - a proxy type (`RemoteBacked`), resolved through the handle registry,
//! - a closed union of 2 or 3 candidates ([`OneOf2`], [`OneOf3`]).
//!
//! # Union resolution
//!
//! A structural payload carrying the discriminator field resolves to the candidate
//! declaring that tag; an unknown tag is an error listing the declared tags. Without
//! a discriminator, or when the payload is not structural (plain text, a bare number,
//! JSON text that fails to parse), the whole payload becomes the string candidate if
//! the union declares one. The same holds when a tagged payload fails to decode into
//! its candidate. There is no other fallback.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::handles::{HandleRegistry, RemoteBacked, RemoteHandle};

/// How a union candidate is recognized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateTag {
    /// Selected when the discriminator equals this value.
    Tagged(&'static str),
    /// String-shaped; target of the no-discriminator fallback.
    Text,
}

impl CandidateTag {
    pub fn label(&self) -> &'static str {
        match *self {
            Self::Tagged(tag) => tag,
            Self::Text => "string",
        }
    }
}

/// What a resolver needs besides the payload.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub type_tag_field: &'a str,
    pub registry: &'a HandleRegistry,
}

/// A type that can be one member of a union contract.
pub trait Candidate: Sized {
    const TAG: CandidateTag;

    fn from_payload(payload: Value, ctx: &ResolveContext<'_>) -> Result<Self>;
}

/// A structural result shape with a declared discriminator value.
pub trait Tagged: DeserializeOwned {
    const TYPE_TAG: &'static str;
}

impl<T: Tagged> Candidate for T {
    const TAG: CandidateTag = CandidateTag::Tagged(T::TYPE_TAG);

    fn from_payload(payload: Value, _ctx: &ResolveContext<'_>) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| BridgeError::malformed(T::TYPE_TAG, e))
    }
}

impl Candidate for String {
    const TAG: CandidateTag = CandidateTag::Text;

    fn from_payload(payload: Value, _ctx: &ResolveContext<'_>) -> Result<Self> {
        match payload {
            Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }
}

/// Proxies are candidates too: the envelope carries `id` beside the discriminator.
impl<P: RemoteBacked> Candidate for Arc<P> {
    const TAG: CandidateTag = CandidateTag::Tagged(P::TYPE_TAG);

    fn from_payload(payload: Value, ctx: &ResolveContext<'_>) -> Result<Self> {
        let handle: RemoteHandle =
            serde_json::from_value(payload).map_err(|e| BridgeError::malformed(P::TYPE_TAG, e))?;
        ctx.registry.resolve_or_attach::<P>(handle)
    }
}

/// A closed set of candidate result shapes.
pub trait UnionContract: Sized {
    /// Declared candidates, in declaration order.
    fn candidates() -> Vec<CandidateTag>;

    /// Build the candidate at `index` from `payload`.
    fn pick(index: usize, payload: Value, ctx: &ResolveContext<'_>) -> Result<Self>;
}

/// Result that is one of two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOf2<A, B> {
    First(A),
    Second(B),
}

impl<A, B> OneOf2<A, B> {
    pub fn as_first(&self) -> Option<&A> {
        match self {
            Self::First(a) => Some(a),
            Self::Second(_) => None,
        }
    }

    pub fn as_second(&self) -> Option<&B> {
        match self {
            Self::Second(b) => Some(b),
            Self::First(_) => None,
        }
    }
}

impl<A: Candidate, B: Candidate> UnionContract for OneOf2<A, B> {
    fn candidates() -> Vec<CandidateTag> {
        vec![A::TAG, B::TAG]
    }

    fn pick(index: usize, payload: Value, ctx: &ResolveContext<'_>) -> Result<Self> {
        match index {
            0 => A::from_payload(payload, ctx).map(Self::First),
            _ => B::from_payload(payload, ctx).map(Self::Second),
        }
    }
}

/// Result that is one of three shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOf3<A, B, C> {
    First(A),
    Second(B),
    Third(C),
}

impl<A, B, C> OneOf3<A, B, C> {
    pub fn as_first(&self) -> Option<&A> {
        match self {
            Self::First(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_second(&self) -> Option<&B> {
        match self {
            Self::Second(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_third(&self) -> Option<&C> {
        match self {
            Self::Third(c) => Some(c),
            _ => None,
        }
    }
}

impl<A: Candidate, B: Candidate, C: Candidate> UnionContract for OneOf3<A, B, C> {
    fn candidates() -> Vec<CandidateTag> {
        vec![A::TAG, B::TAG, C::TAG]
    }

    fn pick(index: usize, payload: Value, ctx: &ResolveContext<'_>) -> Result<Self> {
        match index {
            0 => A::from_payload(payload, ctx).map(Self::First),
            1 => B::from_payload(payload, ctx).map(Self::Second),
            _ => C::from_payload(payload, ctx).map(Self::Third),
        }
    }
}

/// Decode a plain result.
pub fn resolve_plain<T: DeserializeOwned>(raw: Value) -> Result<T> {
    serde_json::from_value(raw).map_err(|e| BridgeError::malformed(std::any::type_name::<T>(), e))
}

/// Resolve a `{"id": ...}` reference token (or `null`) to its registered proxy,
/// attaching one on first sight.
pub fn resolve_proxy<P: RemoteBacked>(
    raw: Value,
    registry: &HandleRegistry,
) -> Result<Option<Arc<P>>> {
    if raw.is_null() {
        return Ok(None);
    }
    let handle: RemoteHandle =
        serde_json::from_value(raw).map_err(|e| BridgeError::malformed(P::TYPE_TAG, e))?;
    registry.resolve_or_attach::<P>(handle).map(Some)
}

/// Resolve a raw payload against a union contract.
pub fn resolve_union<U: UnionContract>(raw: Value, ctx: &ResolveContext<'_>) -> Result<U> {
    let resolver = UnionResolver {
        candidates: U::candidates(),
        ctx,
    };

    match raw {
        Value::Object(map) => resolver.structural::<U>(map, None),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => resolver.structural::<U>(map, Some(text)),
            Ok(_) => resolver.text::<U>(text, "payload is not structural"),
            Err(e) => {
                tracing::trace!(error = %e, "Union payload is not JSON text");
                resolver.text::<U>(text, "payload is not valid JSON")
            }
        },
        Value::Number(n) => match resolver.text_index() {
            Some(index) => U::pick(index, Value::String(n.to_string()), ctx),
            None => Err(resolver.unresolvable(n.to_string())),
        },
        Value::Null => Err(BridgeError::malformed(resolver.label(), "null result")),
        other => resolver.text::<U>(other.to_string(), "payload has no discriminator"),
    }
}

struct UnionResolver<'c, 'a> {
    candidates: Vec<CandidateTag>,
    ctx: &'c ResolveContext<'a>,
}

impl UnionResolver<'_, '_> {
    fn text_index(&self) -> Option<usize> {
        self.candidates.iter().position(|c| *c == CandidateTag::Text)
    }

    fn label(&self) -> String {
        let labels: Vec<&str> = self.candidates.iter().map(CandidateTag::label).collect();
        format!("OneOf<{}>", labels.join(", "))
    }

    fn unresolvable(&self, tag: String) -> BridgeError {
        BridgeError::UnresolvableUnion {
            tag,
            candidates: self
                .candidates
                .iter()
                .map(|c| c.label().to_string())
                .collect(),
        }
    }

    /// `original` is the JSON text the map was parsed from, if any.
    fn structural<U: UnionContract>(
        &self,
        map: Map<String, Value>,
        original: Option<String>,
    ) -> Result<U> {
        let field = self.ctx.type_tag_field;
        let tag = match map.get(field) {
            Some(Value::String(tag)) => Some(tag.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        };

        match tag {
            Some(tag) => {
                let index = self
                    .candidates
                    .iter()
                    .position(|c| matches!(c, CandidateTag::Tagged(t) if *t == tag))
                    .ok_or_else(|| self.unresolvable(tag.clone()))?;
                tracing::trace!(tag = %tag, index, "Resolved union by discriminator");

                let payload = Value::Object(map);
                let fallback = self
                    .text_index()
                    .map(|_| original.unwrap_or_else(|| payload.to_string()));
                match (U::pick(index, payload, self.ctx), fallback) {
                    (Err(BridgeError::MalformedPayload { reason, .. }), Some(text)) => {
                        tracing::debug!(
                            tag = %tag,
                            %reason,
                            "Tagged payload did not decode, using string candidate"
                        );
                        self.text::<U>(text, &reason)
                    }
                    (result, _) => result,
                }
            }
            None => {
                let text = original.unwrap_or_else(|| Value::Object(map).to_string());
                self.text::<U>(text, &format!("missing discriminator field '{field}'"))
            }
        }
    }

    fn text<U: UnionContract>(&self, text: String, reason: &str) -> Result<U> {
        match self.text_index() {
            Some(index) => U::pick(index, Value::String(text), self.ctx),
            None => Err(BridgeError::malformed(self.label(), reason)),
        }
    }
}
