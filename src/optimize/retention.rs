use crate::jvm::{ClassId, MethodId};
use std::collections::{HashMap, HashSet};

/// Externally computed markers of what must be left untouched
///
/// These come from collaborators that run before optimization (eg. from keep rules given by the
/// user). A kept method can still have other methods inlined into it, but its own body is never
/// spliced into a caller.
#[derive(Default, Debug, Clone)]
pub struct Retention {
    classes: HashMap<ClassId, RetentionInfo>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RetentionInfo {
    /// Whole class (and all of its methods) is kept
    pub kept: bool,

    /// Indices of individually kept methods
    pub kept_methods: HashSet<usize>,
}

impl Retention {
    pub fn new() -> Retention {
        Retention::default()
    }

    pub fn keep_class(&mut self, class: ClassId) {
        self.classes.entry(class).or_default().kept = true;
    }

    pub fn keep_method(&mut self, method: MethodId) {
        self.classes
            .entry(method.class)
            .or_default()
            .kept_methods
            .insert(method.index);
    }

    pub fn info(&self, class: ClassId) -> Option<&RetentionInfo> {
        self.classes.get(&class)
    }

    pub fn is_kept_class(&self, class: ClassId) -> bool {
        self.info(class).map_or(false, |info| info.kept)
    }

    pub fn is_kept_method(&self, method: MethodId) -> bool {
        self.info(method.class).map_or(false, |info| {
            info.kept || info.kept_methods.contains(&method.index)
        })
    }
}

/// Number of call sites of each method across the program
///
/// Computed by an external pass over the whole class pool.
#[derive(Default, Debug, Clone)]
pub struct InvocationCounts {
    counts: HashMap<(String, String, String), usize>,
}

impl InvocationCounts {
    pub fn new() -> InvocationCounts {
        InvocationCounts::default()
    }

    pub fn record(&mut self, class_name: &str, name: &str, descriptor: &str, count: usize) {
        let key = (class_name.to_owned(), name.to_owned(), descriptor.to_owned());
        *self.counts.entry(key).or_insert(0) += count;
    }

    pub fn count(&self, class_name: &str, name: &str, descriptor: &str) -> usize {
        let key = (class_name.to_owned(), name.to_owned(), descriptor.to_owned());
        self.counts.get(&key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kept_class_keeps_methods() {
        let mut retention = Retention::new();
        let method = MethodId {
            class: ClassId(1),
            index: 3,
        };
        assert!(!retention.is_kept_method(method));

        retention.keep_method(MethodId {
            class: ClassId(1),
            index: 2,
        });
        assert!(!retention.is_kept_method(method));
        assert!(!retention.is_kept_class(ClassId(1)));

        retention.keep_class(ClassId(1));
        assert!(retention.is_kept_method(method));
    }

    #[test]
    fn invocation_counts_accumulate() {
        let mut counts = InvocationCounts::new();
        counts.record("a/B", "f", "()V", 1);
        counts.record("a/B", "f", "()V", 2);
        assert_eq!(counts.count("a/B", "f", "()V"), 3);
        assert_eq!(counts.count("a/B", "g", "()V"), 0);
    }
}
