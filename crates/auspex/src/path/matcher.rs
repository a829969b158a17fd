use std::fmt;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A reference in the heap, identified by names rather than object ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferencePattern {
    /// Local variable on the stack of the thread named `thread_name`
    JavaLocal { thread_name: String },
    StaticField { class_name: String, field_name: String },
    /// Instance field declared by `class_name` or inherited from it
    InstanceField { class_name: String, field_name: String },
    /// JNI global reference to an instance of `class_name`
    NativeGlobalVariable { class_name: String },
}

impl fmt::Display for ReferencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferencePattern::JavaLocal { thread_name } => {
                write!(f, "local variable on thread {thread_name}")
            }
            ReferencePattern::StaticField { class_name, field_name } => {
                write!(f, "static field {class_name}#{field_name}")
            }
            ReferencePattern::InstanceField { class_name, field_name } => {
                write!(f, "instance field {class_name}#{field_name}")
            }
            ReferencePattern::NativeGlobalVariable { class_name } => {
                write!(f, "native global variable referencing {class_name}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceMatcher {
    /// The reference is never traversed
    Ignored { pattern: ReferencePattern },
    /// The reference is traversed, paths through it are known library leaks
    LibraryLeak {
        pattern: ReferencePattern,
        #[serde(default)]
        description: String,
    },
}

impl ReferenceMatcher {
    pub fn ignored(pattern: ReferencePattern) -> Self {
        ReferenceMatcher::Ignored { pattern }
    }

    pub fn library_leak(pattern: ReferencePattern, description: &str) -> Self {
        ReferenceMatcher::LibraryLeak { pattern, description: description.to_string() }
    }

    pub fn pattern(&self) -> &ReferencePattern {
        match self {
            ReferenceMatcher::Ignored { pattern }
            | ReferenceMatcher::LibraryLeak { pattern, .. } => pattern,
        }
    }
}

fn instance_field(class_name: &str, field_name: &str) -> ReferencePattern {
    ReferencePattern::InstanceField { class_name: class_name.into(), field_name: field_name.into() }
}

fn static_field(class_name: &str, field_name: &str) -> ReferencePattern {
    ReferencePattern::StaticField { class_name: class_name.into(), field_name: field_name.into() }
}

fn java_local(thread_name: &str) -> ReferencePattern {
    ReferencePattern::JavaLocal { thread_name: thread_name.into() }
}

static DEFAULT_MATCHERS: Lazy<Vec<ReferenceMatcher>> = Lazy::new(|| {
    use ReferenceMatcher as M;
    vec![
        M::ignored(instance_field("java.lang.ref.WeakReference", "referent")),
        M::ignored(instance_field("leakcanary.KeyedWeakReference", "referent")),
        M::ignored(instance_field("java.lang.ref.SoftReference", "referent")),
        M::ignored(instance_field("java.lang.ref.PhantomReference", "referent")),
        M::ignored(instance_field("java.lang.ref.Finalizer", "prev")),
        M::ignored(instance_field("java.lang.ref.Finalizer", "element")),
        M::ignored(instance_field("java.lang.ref.Finalizer", "next")),
        M::ignored(instance_field("java.lang.ref.FinalizerReference", "prev")),
        M::ignored(instance_field("java.lang.ref.FinalizerReference", "element")),
        M::ignored(instance_field("java.lang.ref.FinalizerReference", "next")),
        M::ignored(instance_field("sun.misc.Cleaner", "prev")),
        M::ignored(instance_field("sun.misc.Cleaner", "next")),
        M::ignored(java_local("FinalizerWatchdogDaemon")),
        M::ignored(java_local("main")),
        M::library_leak(
            instance_field("android.view.inputmethod.InputMethodManager", "mNextServedView"),
            "InputMethodManager keeps a reference to the last focused view",
        ),
        M::library_leak(
            instance_field("android.view.inputmethod.InputMethodManager", "mServedView"),
            "InputMethodManager keeps a reference to the last served view",
        ),
        M::library_leak(
            static_field("android.view.textservice.SpellCheckerSession", "sSpellCheckerSessions"),
            "SpellCheckerSession holds on to sessions of destroyed views",
        ),
        M::library_leak(
            instance_field("android.os.Message", "obj"),
            "A pending message holds on to its payload",
        ),
    ]
});

/// Ignored and library leak matchers applied when none are configured.
pub fn default_reference_matchers() -> Vec<ReferenceMatcher> {
    DEFAULT_MATCHERS.clone()
}

/// Outcome of looking a reference up in a [`MatcherTable`]. Library leaks carry
/// the position of their matcher in the configured list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matched {
    Ignored,
    LibraryLeak(usize),
}

/// Matchers keyed by the names they apply to. When several matchers name the
/// same reference, the last one wins.
#[derive(Debug, Default)]
pub struct MatcherTable<'m> {
    matchers: &'m [ReferenceMatcher],
    instance_fields: FxHashMap<&'m str, FxHashMap<&'m str, Matched>>,
    static_fields: FxHashMap<&'m str, FxHashMap<&'m str, Matched>>,
    thread_names: FxHashMap<&'m str, Matched>,
    native_globals: FxHashMap<&'m str, Matched>,
}

impl<'m> MatcherTable<'m> {
    pub fn new(matchers: &'m [ReferenceMatcher]) -> Self {
        let mut table = Self { matchers, ..Self::default() };
        for (idx, matcher) in matchers.iter().enumerate() {
            let matched = match matcher {
                ReferenceMatcher::Ignored { .. } => Matched::Ignored,
                ReferenceMatcher::LibraryLeak { .. } => Matched::LibraryLeak(idx),
            };
            match matcher.pattern() {
                ReferencePattern::JavaLocal { thread_name } => {
                    table.thread_names.insert(thread_name, matched);
                }
                ReferencePattern::StaticField { class_name, field_name } => {
                    table.static_fields.entry(class_name).or_default().insert(field_name, matched);
                }
                ReferencePattern::InstanceField { class_name, field_name } => {
                    let fields = table.instance_fields.entry(class_name).or_default();
                    fields.insert(field_name, matched);
                }
                ReferencePattern::NativeGlobalVariable { class_name } => {
                    table.native_globals.insert(class_name, matched);
                }
            }
        }
        table
    }

    pub fn matcher(&self, idx: usize) -> Option<&'m ReferenceMatcher> {
        self.matchers.get(idx)
    }

    pub fn instance_fields(&self, class_name: &str) -> Option<&FxHashMap<&'m str, Matched>> {
        self.instance_fields.get(class_name)
    }

    pub fn static_field(&self, class_name: &str, field_name: &str) -> Option<Matched> {
        self.static_fields.get(class_name).and_then(|fields| fields.get(field_name)).copied()
    }

    pub fn thread_name(&self, thread_name: &str) -> Option<Matched> {
        self.thread_names.get(thread_name).copied()
    }

    pub fn native_global(&self, class_name: &str) -> Option<Matched> {
        self.native_globals.get(class_name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookups() {
        let matchers = vec![
            ReferenceMatcher::ignored(instance_field("com.example.Holder", "cache")),
            ReferenceMatcher::library_leak(
                static_field("com.example.Registry", "INSTANCE"),
                "registry",
            ),
            ReferenceMatcher::library_leak(java_local("worker"), "worker thread"),
            ReferenceMatcher::ignored(ReferencePattern::NativeGlobalVariable {
                class_name: "com.example.Jni".into(),
            }),
        ];
        let table = MatcherTable::new(&matchers);
        let holder = table.instance_fields("com.example.Holder").unwrap();
        assert_eq!(holder.get("cache"), Some(&Matched::Ignored));
        assert!(table.instance_fields("com.example.Other").is_none());
        let registry = table.static_field("com.example.Registry", "INSTANCE");
        assert_eq!(registry, Some(Matched::LibraryLeak(1)));
        assert_eq!(table.static_field("com.example.Registry", "other"), None);
        assert_eq!(table.thread_name("worker"), Some(Matched::LibraryLeak(2)));
        assert_eq!(table.native_global("com.example.Jni"), Some(Matched::Ignored));
        assert_eq!(table.matcher(2).unwrap().pattern(), &java_local("worker"));
    }

    #[test]
    fn test_last_matcher_wins() {
        let matchers = vec![
            ReferenceMatcher::ignored(instance_field("A", "b")),
            ReferenceMatcher::library_leak(instance_field("A", "b"), "again"),
        ];
        let table = MatcherTable::new(&matchers);
        assert_eq!(table.instance_fields("A").unwrap().get("b"), Some(&Matched::LibraryLeak(1)));
    }

    #[test]
    fn test_pattern_display() {
        assert_eq!(static_field("A", "b").to_string(), "static field A#b");
        assert_eq!(java_local("main").to_string(), "local variable on thread main");
    }

    #[test]
    fn test_defaults_ignore_weak_referents() {
        let matchers = default_reference_matchers();
        let table = MatcherTable::new(&matchers);
        assert_eq!(
            table.instance_fields("java.lang.ref.WeakReference").unwrap().get("referent"),
            Some(&Matched::Ignored)
        );
        assert_eq!(table.thread_name("main"), Some(Matched::Ignored));
    }
}
