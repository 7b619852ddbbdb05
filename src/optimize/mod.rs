//! Optimization passes over the methods of a [`ClassPool`]
//!
//! Every method with code goes through the [`MethodInliner`] and then the [`VariableShrinker`].
//! Once all of a class's methods are done, the [`LineNumberLinearizer`] disambiguates the lines
//! that inlining brought in.

mod inliner;
mod line_numbers;
mod reachability;
mod retention;
mod settings;
mod stack_size;
mod variable_shrinker;

pub use inliner::*;
pub use line_numbers::*;
pub use reachability::*;
pub use retention::*;
pub use settings::*;
pub use stack_size::*;
pub use variable_shrinker::*;

use crate::jvm::{self, ClassId, ClassPool, CodeAttribute, MethodId};
use std::fmt;
use std::ops::AddAssign;

#[derive(Debug)]
pub enum Error {
    Bytecode(jvm::Error),

    /// Some stage produced code that breaks the structural invariants of a code attribute
    InternalInconsistency {
        class: String,
        method: String,
        detail: String,
    },
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Bytecode(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bytecode(err) => write!(f, "bytecode error: {:?}", err),
            Error::InternalInconsistency {
                class,
                method,
                detail,
            } => write!(f, "inconsistent code in {}.{}: {}", class, method, detail),
        }
    }
}

impl std::error::Error for Error {}

/// Counts of what the optimizer did
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Inlined call sites
    pub inlined: usize,

    /// Methods whose local variable slots got compacted
    pub shrunk: usize,

    /// Methods whose line numbers got shifted
    pub linearized: usize,

    /// Methods left unchanged by some stage because of malformed code or a format limit
    pub skipped_methods: usize,
}

impl AddAssign for Statistics {
    fn add_assign(&mut self, other: Statistics) {
        self.inlined += other.inlined;
        self.shrunk += other.shrunk;
        self.linearized += other.linearized;
        self.skipped_methods += other.skipped_methods;
    }
}

pub struct Optimizer<P> {
    inliner: MethodInliner<P>,
}

impl<P: InliningPolicy> Optimizer<P> {
    pub fn new(settings: Settings, retention: Retention, policy: P) -> Optimizer<P> {
        Optimizer {
            inliner: MethodInliner::new(settings, retention, policy),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.inliner.settings()
    }

    /// Optimize every program class in the pool, in order
    pub fn optimize(&mut self, pool: &mut ClassPool) -> Result<Statistics, Error> {
        let mut statistics = Statistics::default();
        for class in pool.class_ids() {
            statistics += self.optimize_class(pool, class)?;
        }
        Ok(statistics)
    }

    pub fn optimize_class(
        &mut self,
        pool: &mut ClassPool,
        class: ClassId,
    ) -> Result<Statistics, Error> {
        let mut statistics = Statistics::default();
        let mut optimized = vec![];
        for method in pool.method_ids(class) {
            if pool.method(method).code.is_none() {
                continue;
            }
            if self.optimize_method(pool, method, &mut statistics)? {
                optimized.push(method);
            }
        }

        statistics.linearized += LineNumberLinearizer::linearize(pool.class_mut(class))?;
        for method in optimized {
            self.check_consistency(pool, method)?;
        }
        Ok(statistics)
    }

    /// Inline into a method and then shrink it
    ///
    /// Returns `false` if the method had to be left as it was.
    fn optimize_method(
        &mut self,
        pool: &mut ClassPool,
        method: MethodId,
        statistics: &mut Statistics,
    ) -> Result<bool, Error> {
        let consistency = pool.method(method).code.as_ref().map(CodeAttribute::check_consistency);
        if let Some(Err(detail)) = consistency {
            log::warn!("Not optimizing malformed {}: {}", method_name(pool, method), detail);
            statistics.skipped_methods += 1;
            return Ok(false);
        }

        let snapshot = pool.method(method).code.clone();
        let checkpoint = pool.class(method.class).constants.checkpoint();
        match self.inliner.inline_method(pool, method) {
            Ok(inlined) => statistics.inlined += inlined,
            Err(err) if is_recoverable(&err) => {
                log::warn!("Leaving {} unchanged: {:?}", method_name(pool, method), err);
                pool.method_mut(method).code = snapshot;
                pool.class_mut(method.class).constants.rollback(checkpoint);
                statistics.skipped_methods += 1;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }
        self.check_consistency(pool, method)?;

        let name = method_name(pool, method);
        let parameter_size = match pool.method(method).parameter_size() {
            Ok(parameter_size) => parameter_size,
            Err(err) => {
                log::warn!("Not shrinking {}: {:?}", name, err);
                statistics.skipped_methods += 1;
                return Ok(true);
            }
        };
        let code = match pool.method_mut(method).code.as_mut() {
            Some(code) => code,
            None => return Ok(false),
        };
        let snapshot = code.clone();
        match VariableShrinker::shrink(code, parameter_size, None) {
            Ok(mapping) => {
                if mapping.max_locals() < mapping.old_max_locals() {
                    log::debug!(
                        "Shrunk locals of {} from {} to {}",
                        name,
                        mapping.old_max_locals(),
                        mapping.max_locals()
                    );
                    statistics.shrunk += 1;
                }
            }
            Err(err) if is_recoverable(&err) => {
                log::warn!("Leaving {} unshrunk: {:?}", name, err);
                *code = snapshot;
                statistics.skipped_methods += 1;
            }
            Err(err) => return Err(err.into()),
        }
        self.check_consistency(pool, method)?;
        Ok(true)
    }

    fn check_consistency(&self, pool: &ClassPool, method: MethodId) -> Result<(), Error> {
        if !self.settings().check_consistency {
            return Ok(());
        }
        let declared = pool.method(method);
        if let Some(Err(detail)) = declared.code.as_ref().map(|code| code.check_consistency()) {
            let class = pool.class(method.class).name.clone();
            log::error!("Inconsistent code in {}: {}", method_name(pool, method), detail);
            return Err(Error::InternalInconsistency {
                class,
                method: format!("{}{}", declared.name, declared.descriptor),
                detail,
            });
        }
        Ok(())
    }
}

/// Errors that only rule out optimizing one method
///
/// Bad constant references and descriptors are malformed input of that method as much as
/// undecodable code is.
fn is_recoverable(err: &jvm::Error) -> bool {
    matches!(
        err,
        jvm::Error::MalformedBytecode { .. }
            | jvm::Error::MissingConstant(_)
            | jvm::Error::UnexpectedConstant { .. }
            | jvm::Error::BadDescriptor(_)
            | jvm::Error::ConstantPoolOverflow(_)
            | jvm::Error::LimitExceeded(_)
    )
}
