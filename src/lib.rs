//! Post-compilation optimizer for JVM class files
//!
//! The crate rewrites method bodies of already compiled classes (held in a [`jvm::ClassPool`]),
//! inlining short methods, compacting local variable slots, and disambiguating line numbers of
//! inlined code. Reading and writing class files is left to the caller.

pub mod jvm;
pub mod optimize;
pub mod util;
