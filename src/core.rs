use std::fmt;
use std::panic::Location;

use camino::Utf8Path;
use serde::{Serialize, Serializer};

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = std::sync::Arc<str>;

/// A 32-byte BLAKE3 hash used for content fingerprints.
///
/// In `shikumi` this is the fingerprint of a predicate set: two
/// registrations guarded by the same predicates with the same values hash to
/// the same `Hash32`, which is how view discriminators tell "the same view
/// registered twice" apart from "two views that differ by their guards".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        crate::utils::hex(&self.0)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Incremental BLAKE3 hasher, finalized into a [`Hash32`].
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    pub(crate) fn update(&mut self, bytes: impl AsRef<[u8]>) {
        // length prefix keeps ["ab", "c"] and ["a", "bc"] apart
        let bytes = bytes.as_ref();
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

/// The chain of configuration units that were being included when an action
/// was recorded, root first.
///
/// Ordering is lexicographic over the tokens, so a path always sorts before
/// every path that extends it.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IncludePath(Vec<ArcStr>);

impl IncludePath {
    /// The empty path, used for actions registered directly.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Returns a new path with `token` appended.
    pub fn child(&self, token: impl Into<ArcStr>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }

    pub fn tokens(&self) -> &[ArcStr] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `base` is a proper prefix of `self`.
    pub fn is_strict_extension_of(&self, base: &IncludePath) -> bool {
        self.0.len() > base.0.len() && self.0.starts_with(&base.0)
    }
}

impl fmt::Display for IncludePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }

        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            f.write_str(token)?;
        }

        Ok(())
    }
}

/// Where an action came from.
///
/// Never interpreted by the engine, only carried into diagnostics and the
/// introspection sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionInfo {
    pub file: &'static Utf8Path,
    pub line: u32,
    pub column: u32,
    /// The configuration unit that was active when the action was recorded.
    pub unit: Option<ArcStr>,
    /// Optional free-form description supplied by the caller.
    pub description: Option<String>,
}

impl ActionInfo {
    /// Captures the source location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from_location(Location::caller())
    }

    pub fn from_location(location: &'static Location<'static>) -> Self {
        Self {
            file: Utf8Path::new(location.file()),
            line: location.line(),
            column: location.column(),
            unit: None,
            description: None,
        }
    }

    pub fn with_unit(mut self, unit: Option<ArcStr>) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for ActionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File \"{}\", line {}, column {}", self.file, self.line, self.column)?;

        if let Some(unit) = &self.unit {
            write!(f, ", in unit \"{unit}\"")?;
        }

        if let Some(description) = &self.description {
            write!(f, "\n  {description}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_extension() {
        let root = IncludePath::root();
        let app = IncludePath::new(["app"]);
        let lib = app.child("lib");

        assert!(app.is_strict_extension_of(&root));
        assert!(lib.is_strict_extension_of(&app));
        assert!(!app.is_strict_extension_of(&app));
        assert!(!root.is_strict_extension_of(&app));
        assert!(!IncludePath::new(["b"]).is_strict_extension_of(&app));
    }

    #[test]
    fn test_include_path_ordering() {
        let mut paths = vec![
            IncludePath::new(["b"]),
            IncludePath::new(["a", "x"]),
            IncludePath::root(),
            IncludePath::new(["a"]),
        ];
        paths.sort();

        assert_eq!(
            paths,
            vec![
                IncludePath::root(),
                IncludePath::new(["a"]),
                IncludePath::new(["a", "x"]),
                IncludePath::new(["b"]),
            ]
        );
    }

    #[test]
    fn test_hasher_length_prefix() {
        let mut a = Blake3Hasher::default();
        a.update("ab");
        a.update("c");

        let mut b = Blake3Hasher::default();
        b.update("a");
        b.update("bc");

        assert_ne!(Hash32::from(a), Hash32::from(b));
    }

    #[test]
    fn test_caller_info() {
        let info = ActionInfo::caller().with_unit(Some("app".into()));
        assert!(info.file.as_str().ends_with("core.rs"));
        assert!(info.to_string().contains("in unit \"app\""));
    }
}
