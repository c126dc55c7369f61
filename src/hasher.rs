//! The optional primary-key hasher (§4.2, §9 "Dynamic dispatch").
//!
//! Modeled as a function object `Fn(u32) -> u32`, late-bound once per cycle
//! by resolving the schema's hash-key field paths against the live type
//! state. Binding is represented as a tagged result rather than a plain
//! `Result` because one of its failure modes (`NotBindable`) is recoverable
//! and silently falls back to staged bucket hints, while the other
//! (`Fatal`) propagates to the caller.

use std::hash::Hasher;

use fxhash::FxHasher;

/// A dotted path to a field in another type's schema, e.g. `["user", "id"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPath(parts.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Outcome of resolving a single field path against the live type state.
pub enum FieldResolution {
    /// The path resolves; the type state can supply a stable hash input.
    Resolved,
    /// The schema references a field not present in the bound state --
    /// recoverable: the encoder logs a warning and keeps staged hints.
    NotBindable,
    /// Malformed hash key or type mismatch -- not recoverable.
    Fatal(String),
}

/// The live type state an embedding framework resolves field paths
/// against. Narrow on purpose: this crate only needs to know whether a
/// path resolves, not how the framework represents its schema.
pub trait TypeStateView {
    fn resolve(&self, path: &FieldPath) -> FieldResolution;
}

/// A bound hasher: `hash(key_ordinal) -> u32`, masked by the caller to a
/// bucket count.
pub type BoxedHasher = Box<dyn Fn(u32) -> u32 + Send + Sync>;

/// Tri-state outcome of attempting to bind a primary-key hasher for one
/// encode cycle.
pub enum HasherBinding {
    Bound(BoxedHasher),
    Skipped,
    Fatal(String),
}

/// Builds a primary-key hasher by resolving a schema's declared hash-key
/// field paths against a [`TypeStateView`].
pub struct FieldPathHasherFactory<'a, V: TypeStateView> {
    state_view: &'a V,
}

impl<'a, V: TypeStateView> FieldPathHasherFactory<'a, V> {
    pub fn new(state_view: &'a V) -> Self {
        Self { state_view }
    }

    /// Attempts to bind a hasher against every field path in `field_paths`.
    /// An empty slice means no hasher was declared for this schema --
    /// `Skipped`, not an error.
    pub fn bind(&self, field_paths: &[FieldPath]) -> HasherBinding {
        if field_paths.is_empty() {
            return HasherBinding::Skipped;
        }
        for path in field_paths {
            match self.state_view.resolve(path) {
                FieldResolution::Resolved => continue,
                FieldResolution::NotBindable => {
                    log::warn!(
                        "primary-key hasher field path '{path}' not bindable this cycle; \
                         falling back to staged bucket hints"
                    );
                    return HasherBinding::Skipped;
                }
                FieldResolution::Fatal(reason) => return HasherBinding::Fatal(reason),
            }
        }
        let seed = field_paths
            .iter()
            .fold(0x9e3779b97f4a7c15u64, |acc, p| {
                let mut h = FxHasher::default();
                h.write(p.to_string().as_bytes());
                acc ^ h.finish()
            });
        HasherBinding::Bound(Box::new(move |key_ordinal: u32| {
            let mut h = FxHasher::default();
            h.write_u32(key_ordinal);
            h.write_u64(seed);
            h.finish() as u32
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysResolves;
    impl TypeStateView for AlwaysResolves {
        fn resolve(&self, _path: &FieldPath) -> FieldResolution {
            FieldResolution::Resolved
        }
    }

    struct NeverResolves;
    impl TypeStateView for NeverResolves {
        fn resolve(&self, _path: &FieldPath) -> FieldResolution {
            FieldResolution::NotBindable
        }
    }

    struct Malformed;
    impl TypeStateView for Malformed {
        fn resolve(&self, _path: &FieldPath) -> FieldResolution {
            FieldResolution::Fatal("key field has incompatible type".to_string())
        }
    }

    #[test]
    fn empty_field_paths_skip_without_attempting() {
        let factory = FieldPathHasherFactory::new(&AlwaysResolves);
        assert!(matches!(factory.bind(&[]), HasherBinding::Skipped));
    }

    #[test]
    fn resolved_paths_bind_a_deterministic_hasher() {
        let factory = FieldPathHasherFactory::new(&AlwaysResolves);
        let paths = vec![FieldPath::new(["user", "id"])];
        let binding = factory.bind(&paths);
        let hasher = match binding {
            HasherBinding::Bound(h) => h,
            _ => panic!("expected Bound"),
        };
        assert_eq!(hasher(42), hasher(42));
        assert_ne!(hasher(42), hasher(43));
    }

    #[test]
    fn not_bindable_field_skips_recoverably() {
        let factory = FieldPathHasherFactory::new(&NeverResolves);
        let paths = vec![FieldPath::new(["missing", "field"])];
        assert!(matches!(factory.bind(&paths), HasherBinding::Skipped));
    }

    #[test]
    fn malformed_field_is_fatal() {
        let factory = FieldPathHasherFactory::new(&Malformed);
        let paths = vec![FieldPath::new(["bad"])];
        assert!(matches!(factory.bind(&paths), HasherBinding::Fatal(_)));
    }
}
