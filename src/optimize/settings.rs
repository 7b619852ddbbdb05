pub struct Settings {
    /// Which runtime the optimized classes will run on
    ///
    /// This only selects the inlining threshold of the short method policy.
    pub runtime_profile: RuntimeProfile,

    /// Can access flags of classes and members be widened to `public`?
    ///
    /// When inlining moves code that references private (or package-private, or protected)
    /// members into another class, those references only stay legal if the members are made
    /// more accessible. If this is `false`, such inlining is skipped instead.
    pub allow_access_modification: bool,

    /// Largest code array a rewritten method may have
    ///
    /// Note: values above 65535 are clamped to the class file format limit.
    pub max_code_length: usize,

    /// Largest number of local variable slots a rewritten method may have
    pub max_locals: usize,

    /// Check that code attributes are still well formed after each stage
    ///
    /// A failed check aborts the whole run, since it means a stage corrupted some code.
    pub check_consistency: bool,
}

impl Settings {
    /// Format limit on code length and local count
    pub const FORMAT_LIMIT: usize = u16::MAX as usize;

    pub fn new() -> Settings {
        Settings {
            runtime_profile: RuntimeProfile::Standard,
            allow_access_modification: false,
            max_code_length: Self::FORMAT_LIMIT,
            max_locals: Self::FORMAT_LIMIT,
            check_consistency: true,
        }
    }

    pub fn runtime_profile(&self) -> RuntimeProfile {
        self.runtime_profile
    }

    pub fn access_is_widenable(&self) -> bool {
        self.allow_access_modification
    }

    /// Longest callee code (in bytes) the short method policy inlines
    pub fn inlining_threshold(&self) -> usize {
        self.runtime_profile.inlining_threshold()
    }

    pub fn code_length_limit(&self) -> usize {
        self.max_code_length.min(Self::FORMAT_LIMIT)
    }

    pub fn locals_limit(&self) -> usize {
        self.max_locals.min(Self::FORMAT_LIMIT)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RuntimeProfile {
    /// Regular JVM
    Standard,

    /// Runtime with a weaker JIT (eg. on mobile devices), where calls are relatively more costly
    Constrained,
}

impl RuntimeProfile {
    pub fn inlining_threshold(self) -> usize {
        match self {
            RuntimeProfile::Standard => 8,
            RuntimeProfile::Constrained => 32,
        }
    }
}
