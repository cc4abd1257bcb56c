//! The activity envelope exchanged between federation nodes.
//!
//! Activities are modeled as a single struct with a parsed kind discriminator
//! and a flattened map that preserves any fields this node does not interpret,
//! so re-emitting an activity never drops vocabulary a peer attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// The ActivityStreams JSON-LD context.
pub const CONTEXT_ACTIVITY_STREAMS: &str = "https://www.w3.org/ns/activitystreams";

/// Activity kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Create,
    Follow,
    Accept,
    Reject,
    Announce,
    Like,
    Offer,
    Undo,
}

impl ActivityKind {
    /// The wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Announce => "Announce",
            Self::Like => "Like",
            Self::Offer => "Offer",
            Self::Undo => "Undo",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity's `object` or `target`: either a reference IRI, an embedded
/// activity, or an embedded plain object (e.g. an anchor credential).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectProperty {
    /// A bare IRI reference.
    Iri(Url),
    /// An embedded activity (Accept embeds the Follow, Undo may embed the
    /// activity being undone).
    Activity(Box<Activity>),
    /// Any other embedded object, kept as raw JSON.
    Object(Value),
}

impl ObjectProperty {
    /// The IRI identifying the referenced or embedded object, if any.
    #[must_use]
    pub fn id(&self) -> Option<Url> {
        match self {
            Self::Iri(iri) => Some(iri.clone()),
            Self::Activity(a) => Some(a.id.clone()),
            Self::Object(v) => v
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok()),
        }
    }

    /// The embedded activity, if this property embeds one.
    #[must_use]
    pub fn activity(&self) -> Option<&Activity> {
        match self {
            Self::Activity(a) => Some(a),
            _ => None,
        }
    }

    /// The embedded raw object, if this property embeds one.
    #[must_use]
    pub const fn object(&self) -> Option<&Value> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }
}

/// A signed, typed event exchanged between federation nodes.
///
/// Two activities are equal iff their `id`s are equal; activities are
/// content-addressed and never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// JSON-LD context.
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Globally unique IRI of the activity.
    pub id: Url,
    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// IRI of the service that produced the activity.
    pub actor: Url,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Primary recipients.
    #[serde(
        default,
        deserialize_with = "one_or_many::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub to: Vec<Url>,
    /// Secondary recipients.
    #[serde(
        default,
        deserialize_with = "one_or_many::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cc: Vec<Url>,
    /// The object acted upon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectProperty>,
    /// Optional target of the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectProperty>,
    /// The activity this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Url>,
    /// Witness window start (Offer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Witness window end (Offer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Kind-specific result, e.g. the witness proof carried by a Like.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Fields this node does not interpret; preserved on re-emit.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl PartialEq for Activity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Activity {}

impl std::hash::Hash for Activity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Activity {
    /// Create a bare activity with the ActivityStreams context.
    #[must_use]
    pub fn new(id: Url, kind: ActivityKind, actor: Url) -> Self {
        Self {
            context: Some(Value::String(CONTEXT_ACTIVITY_STREAMS.to_string())),
            id,
            kind,
            actor,
            published: Some(Utc::now()),
            to: Vec::new(),
            cc: Vec::new(),
            object: None,
            target: None,
            in_reply_to: None,
            start_time: None,
            end_time: None,
            result: None,
            additional: Map::new(),
        }
    }

    /// Set the object to a bare IRI.
    #[must_use]
    pub fn with_object_iri(mut self, iri: Url) -> Self {
        self.object = Some(ObjectProperty::Iri(iri));
        self
    }

    /// Set the object to an embedded activity.
    #[must_use]
    pub fn with_embedded_activity(mut self, activity: Activity) -> Self {
        self.object = Some(ObjectProperty::Activity(Box::new(activity)));
        self
    }

    /// Set the object to an embedded plain object.
    #[must_use]
    pub fn with_embedded_object(mut self, value: Value) -> Self {
        self.object = Some(ObjectProperty::Object(value));
        self
    }

    /// Set the primary recipients.
    #[must_use]
    pub fn with_to(mut self, to: Vec<Url>) -> Self {
        self.to = to;
        self
    }

    /// Set the witness window.
    #[must_use]
    pub fn with_window(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start);
        self.end_time = end;
        self
    }

    /// Set the result attachment.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// IRI of this activity's object, following one level of embedding.
    #[must_use]
    pub fn object_id(&self) -> Option<Url> {
        self.object.as_ref().and_then(ObjectProperty::id)
    }
}

pub(crate) mod one_or_many {
    //! Accepts a single value where the vocabulary permits value-or-array.

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(OneOrMany::One(v)) => vec![v],
            Some(OneOrMany::Many(v)) => v,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = Activity::new(
            url("https://org1.example/services/anchor/activities/1"),
            ActivityKind::Create,
            url("https://org1.example/services/anchor"),
        );
        let mut b = a.clone();
        b.to = vec![url("https://org2.example/services/anchor")];

        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let input = json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "id": "https://org1.example/services/anchor/activities/1",
            "type": "Create",
            "actor": "https://org1.example/services/anchor",
            "vocabExtension": {"custom": true},
        });

        let activity: Activity = serde_json::from_value(input.clone()).unwrap();
        assert!(activity.additional.contains_key("vocabExtension"));

        let out = serde_json::to_value(&activity).unwrap();
        assert_eq!(out["vocabExtension"], input["vocabExtension"]);
    }

    #[test]
    fn test_single_recipient_accepted() {
        let input = json!({
            "id": "https://org1.example/services/anchor/activities/1",
            "type": "Follow",
            "actor": "https://org1.example/services/anchor",
            "to": "https://org2.example/services/anchor",
            "object": "https://org2.example/services/anchor",
        });

        let activity: Activity = serde_json::from_value(input).unwrap();
        assert_eq!(activity.to.len(), 1);
        assert_eq!(
            activity.object_id().unwrap().as_str(),
            "https://org2.example/services/anchor"
        );
    }

    #[test]
    fn test_embedded_activity_object() {
        let follow = Activity::new(
            url("https://org1.example/services/anchor/activities/f1"),
            ActivityKind::Follow,
            url("https://org1.example/services/anchor"),
        )
        .with_object_iri(url("https://org2.example/services/anchor"));

        let accept = Activity::new(
            url("https://org2.example/services/anchor/activities/a1"),
            ActivityKind::Accept,
            url("https://org2.example/services/anchor"),
        )
        .with_embedded_activity(follow.clone());

        let json = serde_json::to_string(&accept).unwrap();
        let parsed: Activity = serde_json::from_str(&json).unwrap();

        let inner = parsed.object.as_ref().unwrap().activity().unwrap();
        assert_eq!(inner.kind, ActivityKind::Follow);
        assert_eq!(inner.id, follow.id);
    }

    #[test]
    fn test_offer_window_roundtrip() {
        let start = Utc::now();
        let offer = Activity::new(
            url("https://org1.example/services/anchor/activities/o1"),
            ActivityKind::Offer,
            url("https://org1.example/services/anchor"),
        )
        .with_window(start, Some(start + chrono::Duration::minutes(5)));

        let json = serde_json::to_value(&offer).unwrap();
        assert!(json.get("startTime").is_some());
        assert!(json.get("endTime").is_some());

        let parsed: Activity = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.start_time, offer.start_time);
        assert_eq!(parsed.end_time, offer.end_time);
    }
}
