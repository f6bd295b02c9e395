use std::fmt;

use serde::Serialize;

use crate::core::{ArcStr, Hash32};
use crate::predicate::PredicateKind;

/// The identity of a registration, used to detect colliding actions.
///
/// Two actions collide when their discriminators are equal. Actions that can
/// never collide carry no discriminator at all (`None` at the call site).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discriminator {
    /// A singleton setting, e.g. the default permission or the root factory.
    Setting(ArcStr),
    /// A named route.
    Route(ArcStr),
    /// A named permission.
    Permission(ArcStr),
    /// A named tween in the request pipeline.
    Tween(ArcStr),
    /// A predicate factory registered for one dispatch phase.
    Predicate { kind: PredicateKind, name: ArcStr },
    /// A view, identified by what it answers for and the fingerprint of its
    /// guards.
    View {
        context: ArcStr,
        name: ArcStr,
        route: Option<ArcStr>,
        fingerprint: Hash32,
    },
    /// Anything else: a domain tag and its key parts.
    Custom { domain: ArcStr, parts: Vec<ArcStr> },
}

impl Discriminator {
    pub fn setting(name: impl Into<ArcStr>) -> Self {
        Self::Setting(name.into())
    }

    pub fn route(name: impl Into<ArcStr>) -> Self {
        Self::Route(name.into())
    }

    pub fn permission(name: impl Into<ArcStr>) -> Self {
        Self::Permission(name.into())
    }

    pub fn tween(name: impl Into<ArcStr>) -> Self {
        Self::Tween(name.into())
    }

    pub fn predicate(kind: PredicateKind, name: impl Into<ArcStr>) -> Self {
        Self::Predicate {
            kind,
            name: name.into(),
        }
    }

    pub fn view(
        context: impl Into<ArcStr>,
        name: impl Into<ArcStr>,
        route: Option<ArcStr>,
        fingerprint: Hash32,
    ) -> Self {
        Self::View {
            context: context.into(),
            name: name.into(),
            route,
            fingerprint,
        }
    }

    pub fn custom<I, S>(domain: impl Into<ArcStr>, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        Self::Custom {
            domain: domain.into(),
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setting(name) => write!(f, "setting '{name}'"),
            Self::Route(name) => write!(f, "route '{name}'"),
            Self::Permission(name) => write!(f, "permission '{name}'"),
            Self::Tween(name) => write!(f, "tween '{name}'"),
            Self::Predicate { kind, name } => write!(f, "{kind} predicate '{name}'"),
            Self::View {
                context,
                name,
                route,
                fingerprint,
            } => {
                write!(f, "view '{name}' for '{context}'")?;
                if let Some(route) = route {
                    write!(f, " on route '{route}'")?;
                }
                write!(f, " [{}]", &fingerprint.to_hex()[..12])
            }
            Self::Custom { domain, parts } => write!(f, "{domain} ({})", parts.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(Discriminator::route("home")).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "route", "value": "home" }));

        let json = serde_json::to_value(Discriminator::predicate(PredicateKind::View, "xhr")).unwrap();
        assert_eq!(json["value"]["kind"], "view");
        assert_eq!(json["value"]["name"], "xhr");
    }

    #[test]
    fn test_display() {
        let view = Discriminator::view("Root", "edit", Some("admin".into()), Hash32::hash("x"));
        let text = view.to_string();

        assert!(text.starts_with("view 'edit' for 'Root' on route 'admin' ["));
        assert_eq!(Discriminator::custom("renderer", [".html"]).to_string(), "renderer (.html)");
    }
}
