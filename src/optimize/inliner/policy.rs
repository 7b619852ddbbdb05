use crate::jvm::{CodeAttribute, Method, ProgramClass};
use crate::optimize::{InvocationCounts, RuntimeProfile};

/// Decides whether a callee is worth inlining
///
/// This is only about profitability: legality of the inlining is checked separately by the
/// inliner, whatever the policy says.
pub trait InliningPolicy {
    fn should_inline(&self, class: &ProgramClass, method: &Method, code: &CodeAttribute) -> bool;
}

impl<P: InliningPolicy + ?Sized> InliningPolicy for Box<P> {
    fn should_inline(&self, class: &ProgramClass, method: &Method, code: &CodeAttribute) -> bool {
        (**self).should_inline(class, method, code)
    }
}

impl<P: InliningPolicy + ?Sized> InliningPolicy for &P {
    fn should_inline(&self, class: &ProgramClass, method: &Method, code: &CodeAttribute) -> bool {
        (**self).should_inline(class, method, code)
    }
}

/// Inline methods whose code is no longer than a threshold
///
/// The threshold depends only on the runtime profile. The boundary is inclusive: code of exactly
/// the threshold length is inlined.
#[derive(Copy, Clone, Debug)]
pub struct ShortMethodPolicy {
    threshold: usize,
}

impl ShortMethodPolicy {
    pub fn new(profile: RuntimeProfile) -> ShortMethodPolicy {
        ShortMethodPolicy {
            threshold: profile.inlining_threshold(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl InliningPolicy for ShortMethodPolicy {
    fn should_inline(&self, _class: &ProgramClass, _method: &Method, code: &CodeAttribute) -> bool {
        code.len() <= self.threshold
    }
}

/// Inline methods that are called from exactly one place in the program
///
/// Once inlined, such a method is dead (unless it is kept), so inlining never grows the program.
pub struct SingleInvocationPolicy {
    counts: InvocationCounts,
}

impl SingleInvocationPolicy {
    pub fn new(counts: InvocationCounts) -> SingleInvocationPolicy {
        SingleInvocationPolicy { counts }
    }
}

impl InliningPolicy for SingleInvocationPolicy {
    fn should_inline(&self, class: &ProgramClass, method: &Method, _code: &CodeAttribute) -> bool {
        self.counts.count(&class.name, &method.name, &method.descriptor) == 1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::opcodes::*;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags};
    use crate::optimize::Settings;

    fn method_of_length(length: usize) -> (ProgramClass, Method, CodeAttribute) {
        let class = ProgramClass::new("a/B", Some("java/lang/Object"), ClassAccessFlags::PUBLIC);
        let method = Method::new(MethodAccessFlags::STATIC, "f", "()V");
        let mut bytes = vec![NOP; length - 1];
        bytes.push(RETURN);
        (class, method, CodeAttribute::new(0, 0, bytes))
    }

    fn inlines(policy: &ShortMethodPolicy, length: usize) -> bool {
        let (class, method, code) = method_of_length(length);
        policy.should_inline(&class, &method, &code)
    }

    #[test]
    fn standard_threshold() {
        let policy = ShortMethodPolicy::new(RuntimeProfile::Standard);
        assert_eq!(policy.threshold(), 8);
        assert!(inlines(&policy, 1));
        assert!(inlines(&policy, 8));
        assert!(!inlines(&policy, 9));
    }

    #[test]
    fn constrained_threshold() {
        let policy = ShortMethodPolicy::new(RuntimeProfile::Constrained);
        assert!(inlines(&policy, 32));
        assert!(!inlines(&policy, 33));
    }

    #[test]
    fn threshold_ignores_access_modification() {
        for allow_access_modification in [false, true] {
            let mut settings = Settings::new();
            settings.allow_access_modification = allow_access_modification;
            let policy = ShortMethodPolicy::new(settings.runtime_profile());
            assert!(inlines(&policy, 8));
            assert!(!inlines(&policy, 9));

            settings.runtime_profile = RuntimeProfile::Constrained;
            let policy = ShortMethodPolicy::new(settings.runtime_profile());
            assert!(inlines(&policy, 32));
            assert!(!inlines(&policy, 33));
        }
    }

    #[test]
    fn single_invocation() {
        let mut counts = InvocationCounts::new();
        counts.record("a/B", "f", "()V", 1);
        let policy = SingleInvocationPolicy::new(counts);
        let (class, method, code) = method_of_length(40);
        assert!(policy.should_inline(&class, &method, &code));

        let other = Method::new(MethodAccessFlags::STATIC, "g", "()V");
        assert!(!policy.should_inline(&class, &other, &code));
    }
}
