//! Method inlining
//!
//! The inliner replaces invocations of short (or otherwise profitable) methods with a copy of
//! their body. Whether a callee is worth inlining is up to an [`InliningPolicy`]. Whether it is
//! legal is decided here, and every check that fails produces a [`SkipReason`] instead of an
//! error. A skipped call site leaves the caller (and its constant pool) exactly as it was.

mod access;
mod policy;
mod splice;

pub use access::{package_name, Member};
pub use policy::*;

use crate::jvm::opcodes::*;
use crate::jvm::{
    ClassAccessFlags, ClassPool, CodeAttribute, ConstantPool, Error, Instruction, Limit, LineSource,
    MalformedKind, Method, MethodAccessFlags, MethodDescriptor, MethodId, ResolvedMethod,
};
use crate::optimize::reachability::ReachableCodeMarker;
use crate::optimize::stack_size::{StackSizeComputer, StackSizes};
use crate::optimize::{Retention, Settings};
use crate::util::Offset;
use splice::{Callee, Spliced};
use std::collections::HashSet;
use std::fmt;

/// Why a call site was not inlined
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SkipReason {
    /// Instruction at the call site isn't an invocation through a method reference
    NotAnInvocation,

    LibraryMethod,
    UnresolvedMethod,

    /// Callee is the caller itself
    Recursive,

    Kept,

    /// Callee is abstract or native
    NoCode,

    /// Callee is `<init>` or `<clinit>`
    Initializer,

    Synchronized,

    /// Target of the call depends on the runtime class of the receiver
    DynamicDispatch,

    /// Call (or some call in the callee) is a `super` call that only means the same thing from
    /// the callee's class
    SuperInvocation,

    /// Callee uses `invokedynamic` and lives in another class
    InvokeDynamic,

    /// Callee uses `jsr` or `ret`
    Subroutine,

    /// Inlining policy declined
    Policy,

    /// Callee code could not be analysed
    MalformedCallee,

    /// Some return in the callee leaves more than the return value on the stack
    StackNotEmptyAtReturn,

    /// Callee catches exceptions, which would clear values the caller has on the stack
    HandlersWithNonEmptyStack,

    /// Callee references members the caller class cannot access
    Inaccessible,

    /// Call site is dead code
    Unreachable,

    LimitExceeded(Limit),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LimitExceeded(limit) => write!(f, "limit exceeded ({:?})", limit),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InlineResult {
    Inlined {
        callee: MethodId,

        /// Offset of the first instruction of the inlined block (where the invocation was)
        block_start: usize,

        /// Offset of the first instruction after the inlined block
        block_end: usize,
    },
    Skipped(SkipReason),
}

/// Analysis results for a callee that passed every check on its own body
struct CalleeBody {
    code: CodeAttribute,
    instructions: Vec<(Offset, Instruction<Offset>, usize)>,
    descriptor: MethodDescriptor,
    parameter_size: usize,
}

pub struct MethodInliner<P> {
    settings: Settings,
    retention: Retention,
    policy: P,

    /// Members already widened to `public`
    widened: HashSet<Member>,
}

impl<P: InliningPolicy> MethodInliner<P> {
    pub fn new(settings: Settings, retention: Retention, policy: P) -> MethodInliner<P> {
        MethodInliner {
            settings,
            retention,
            policy,
            widened: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    /// Members that were made `public` so that inlined code could keep referencing them
    pub fn widened_members(&self) -> &HashSet<Member> {
        &self.widened
    }

    /// Try to inline every call site in a method
    ///
    /// Code that was just inlined is not scanned again, so a method is never expanded into
    /// itself. Returns the number of call sites that got inlined.
    pub fn inline_method(
        &mut self,
        pool: &mut ClassPool,
        caller: MethodId,
    ) -> Result<usize, Error> {
        let mut inlined = 0;
        let mut sites = Self::call_sites(pool, caller, 0)?;
        let mut next = 0;
        while let Some(call_site) = sites.get(next).copied() {
            match self.try_inline(pool, caller, call_site)? {
                InlineResult::Inlined {
                    callee, block_end, ..
                } => {
                    log::debug!(
                        "Inlined {} <- {} @ {}",
                        method_name(pool, caller),
                        method_name(pool, callee),
                        call_site
                    );
                    inlined += 1;

                    // Offsets after the block have all moved
                    sites = Self::call_sites(pool, caller, block_end)?;
                    next = 0;
                }
                InlineResult::Skipped(reason) => {
                    log::trace!(
                        "Not inlining call in {} @ {}: {}",
                        method_name(pool, caller),
                        call_site,
                        reason
                    );
                    next += 1;
                }
            }
        }
        Ok(inlined)
    }

    /// Offsets of invocations at or after `from`
    fn call_sites(pool: &ClassPool, method: MethodId, from: usize) -> Result<Vec<usize>, Error> {
        let code = match &pool.method(method).code {
            Some(code) => code,
            None => return Ok(vec![]),
        };
        Ok(code
            .instructions()?
            .into_iter()
            .filter(|(offset, instruction, _)| offset.0 >= from && instruction.is_invocation())
            .map(|(offset, _, _)| offset.0)
            .collect())
    }

    /// Try to inline the invocation at one offset in the caller
    ///
    /// Errors are reserved for malformed caller code: every other reason not to inline is
    /// reported as [`InlineResult::Skipped`].
    pub fn try_inline(
        &mut self,
        pool: &mut ClassPool,
        caller: MethodId,
        call_site: usize,
    ) -> Result<InlineResult, Error> {
        let caller_code = match &pool.method(caller).code {
            Some(code) => code,
            None => return Ok(InlineResult::Skipped(SkipReason::NotAnInvocation)),
        };
        let (opcode, index) = match Instruction::decode_at(&caller_code.code, call_site)?.0 {
            Instruction::Constant(opcode @ INVOKEVIRTUAL..=INVOKESTATIC, index) => (opcode, index),
            Instruction::InvokeInterface(_, _) => {
                return Ok(InlineResult::Skipped(SkipReason::DynamicDispatch))
            }
            _ => return Ok(InlineResult::Skipped(SkipReason::NotAnInvocation)),
        };

        let callee = match pool.resolve_method_reference(caller.class, index)? {
            ResolvedMethod::Program(callee) => callee,
            ResolvedMethod::Library => return Ok(InlineResult::Skipped(SkipReason::LibraryMethod)),
            ResolvedMethod::Unresolved => {
                return Ok(InlineResult::Skipped(SkipReason::UnresolvedMethod))
            }
        };
        if let Some(reason) = self.check_callee(pool, caller, callee, opcode) {
            return Ok(InlineResult::Skipped(reason));
        }
        let body = match self.analyse_callee(pool, caller, callee) {
            Ok(body) => body,
            Err(reason) => return Ok(InlineResult::Skipped(reason)),
        };

        // Stack state at the call site
        let caller_code = match &pool.method(caller).code {
            Some(code) => code,
            None => return Ok(InlineResult::Skipped(SkipReason::NotAnInvocation)),
        };
        let caller_constants = &pool.class(caller.class).constants;
        let caller_stack = StackSizeComputer::compute(caller_code, caller_constants)?;
        let depth = match caller_stack.before(call_site) {
            Some(depth) => depth as usize,
            None => return Ok(InlineResult::Skipped(SkipReason::Unreachable)),
        };
        let below_arguments = depth
            .checked_sub(body.parameter_size)
            .ok_or_else(|| Error::malformed(call_site, MalformedKind::StackUnderflow))?;
        if !body.code.exception_table.is_empty() && below_arguments > 0 {
            return Ok(InlineResult::Skipped(SkipReason::HandlersWithNonEmptyStack));
        }

        let inaccessible = match access::inaccessible_members(
            pool,
            caller.class,
            callee.class,
            &body.code,
            &body.instructions,
        ) {
            Ok(inaccessible) => inaccessible,
            Err(err) => {
                log::warn!("Malformed callee {}: {:?}", method_name(pool, callee), err);
                return Ok(InlineResult::Skipped(SkipReason::MalformedCallee));
            }
        };
        if !inaccessible.is_empty() && !self.settings.access_is_widenable() {
            return Ok(InlineResult::Skipped(SkipReason::Inaccessible));
        }

        // Frame sizes of the combined method
        let max_locals = caller_code.max_locals as usize + body.code.max_locals as usize;
        if max_locals > self.settings.locals_limit() {
            return Ok(InlineResult::Skipped(SkipReason::LimitExceeded(Limit::MaxLocals)));
        }
        let is_static = opcode == INVOKESTATIC;
        let mut max_stack =
            (caller_code.max_stack as usize).max(below_arguments + body.code.max_stack as usize);
        if !is_static {
            // Receiver and its duplicate for the null check
            max_stack = max_stack.max(below_arguments + 2);
        }
        let max_stack = match u16::try_from(max_stack) {
            Ok(max_stack) => max_stack,
            Err(_) => return Ok(InlineResult::Skipped(SkipReason::LimitExceeded(Limit::MaxStack))),
        };

        let spliced = self.splice(pool, caller, callee, call_site, &body, is_static, max_stack)?;
        let spliced = match spliced {
            Ok(spliced) => spliced,
            Err(reason) => return Ok(InlineResult::Skipped(reason)),
        };
        let (block_start, block_end) = (spliced.block_start, spliced.block_end);
        pool.method_mut(caller).code = Some(spliced.code);

        for member in inaccessible {
            if self.widened.insert(member) && access::widen(pool, member) {
                log::debug!("Widened {:?} to public", member);
            }
        }

        Ok(InlineResult::Inlined {
            callee,
            block_start,
            block_end,
        })
    }

    /// Checks on the callee declaration and the kind of invocation
    fn check_callee(
        &self,
        pool: &ClassPool,
        caller: MethodId,
        callee: MethodId,
        opcode: u8,
    ) -> Option<SkipReason> {
        let method = pool.method(callee);
        let flags = method.access_flags;
        if callee == caller {
            return Some(SkipReason::Recursive);
        }
        if self.retention.is_kept_method(callee) {
            return Some(SkipReason::Kept);
        }
        if method.code.is_none() {
            return Some(SkipReason::NoCode);
        }
        if method.is_initializer() {
            return Some(SkipReason::Initializer);
        }
        if flags.contains(MethodAccessFlags::SYNCHRONIZED) {
            return Some(SkipReason::Synchronized);
        }
        if method.is_static() != (opcode == INVOKESTATIC) {
            return Some(SkipReason::UnresolvedMethod);
        }
        match opcode {
            INVOKEVIRTUAL => {
                let class_flags = pool.class(callee.class).access_flags;
                let class_is_final = class_flags.contains(ClassAccessFlags::FINAL);
                let method_is_final =
                    flags.intersects(MethodAccessFlags::PRIVATE | MethodAccessFlags::FINAL);
                if !class_is_final && !method_is_final {
                    return Some(SkipReason::DynamicDispatch);
                }
            }
            INVOKESPECIAL => {
                if !flags.contains(MethodAccessFlags::PRIVATE) || callee.class != caller.class {
                    return Some(SkipReason::SuperInvocation);
                }
            }
            _ => (),
        }

        let class = pool.class(callee.class);
        match &method.code {
            Some(code) if self.policy.should_inline(class, method, code) => None,
            _ => Some(SkipReason::Policy),
        }
    }

    /// Checks on the callee body
    fn analyse_callee(
        &self,
        pool: &ClassPool,
        caller: MethodId,
        callee: MethodId,
    ) -> Result<CalleeBody, SkipReason> {
        let method = pool.method(callee);
        let constants = &pool.class(callee.class).constants;
        let code = method.code.clone().ok_or(SkipReason::NoCode)?;

        if let Err(detail) = code.check_consistency() {
            log::warn!("Malformed callee {}: {}", method_name(pool, callee), detail);
            return Err(SkipReason::MalformedCallee);
        }
        let (descriptor, parameter_size, instructions, marker, stack) =
            match decode_callee(method, &code, constants) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::warn!("Malformed callee {}: {:?}", method_name(pool, callee), err);
                    return Err(SkipReason::MalformedCallee);
                }
            };

        let cross_class = caller.class != callee.class;
        for (offset, instruction, _) in &instructions {
            if instruction.is_subroutine() {
                return Err(SkipReason::Subroutine);
            }
            match instruction {
                Instruction::InvokeDynamic(_) if cross_class => {
                    return Err(SkipReason::InvokeDynamic)
                }
                Instruction::Constant(INVOKESPECIAL, index) if cross_class => {
                    let is_constructor = match constants.member_ref(*index) {
                        Ok(member) => member.name == "<init>",
                        Err(_) => return Err(SkipReason::MalformedCallee),
                    };
                    if !is_constructor {
                        return Err(SkipReason::SuperInvocation);
                    }
                }
                _ if instruction.is_return() && marker.is_reachable(offset.0) => {
                    if stack.before(offset.0) != Some(descriptor.return_width() as u16) {
                        return Err(SkipReason::StackNotEmptyAtReturn);
                    }
                }
                _ => (),
            }
        }

        Ok(CalleeBody {
            code,
            instructions,
            descriptor,
            parameter_size,
        })
    }

    /// Rewrite the caller, rolling back its constant pool if the result doesn't fit
    #[allow(clippy::too_many_arguments)]
    fn splice(
        &self,
        pool: &mut ClassPool,
        caller: MethodId,
        callee: MethodId,
        call_site: usize,
        body: &CalleeBody,
        is_static: bool,
        max_stack: u16,
    ) -> Result<Result<Spliced, SkipReason>, Error> {
        let callee_method = pool.method(callee);
        let source = LineSource {
            class_name: pool.class(callee.class).name.clone(),
            method_name: callee_method.name.clone(),
            descriptor: callee_method.descriptor.clone(),
        };
        let caller_code = match pool.method(caller).code.clone() {
            Some(code) => code,
            None => return Ok(Err(SkipReason::NotAnInvocation)),
        };
        let caller_instructions = caller_code.instructions()?;

        let (caller_class, callee_constants) = if caller.class == callee.class {
            (pool.class_mut(caller.class), None)
        } else {
            match pool.pair_mut(caller.class, callee.class) {
                Some((caller_class, callee_class)) => (caller_class, Some(&callee_class.constants)),
                None => return Ok(Err(SkipReason::UnresolvedMethod)),
            }
        };
        let callee = Callee {
            code: &body.code,
            instructions: &body.instructions,
            descriptor: &body.descriptor,
            is_static,
            source,
            foreign_constants: callee_constants,
        };

        let checkpoint = caller_class.constants.checkpoint();
        let result = splice::splice(
            &mut caller_class.constants,
            &caller_code,
            &caller_instructions,
            call_site,
            &callee,
            max_stack,
        );
        let reason = match result {
            Ok(spliced) if spliced.code.len() <= self.settings.code_length_limit() => {
                return Ok(Ok(spliced))
            }
            Ok(_) => SkipReason::LimitExceeded(Limit::CodeLength),
            Err(Error::LimitExceeded(limit)) => SkipReason::LimitExceeded(limit),
            Err(Error::ConstantPoolOverflow(_)) => SkipReason::LimitExceeded(Limit::ConstantPool),
            Err(err) => {
                caller_class.constants.rollback(checkpoint);
                return Err(err);
            }
        };
        caller_class.constants.rollback(checkpoint);
        Ok(Err(reason))
    }
}

type DecodedCallee = (
    MethodDescriptor,
    usize,
    Vec<(Offset, Instruction<Offset>, usize)>,
    ReachableCodeMarker,
    StackSizes,
);

fn decode_callee(
    method: &Method,
    code: &CodeAttribute,
    constants: &ConstantPool,
) -> Result<DecodedCallee, Error> {
    let descriptor = method.parsed_descriptor()?;
    let parameter_size = descriptor.parameter_length(!method.is_static());
    if (code.max_locals as usize) < parameter_size {
        return Err(Error::LimitExceeded(Limit::MaxLocals));
    }
    let instructions = code.instructions()?;
    let mut marker = ReachableCodeMarker::new();
    marker.mark(code)?;
    let stack = StackSizeComputer::compute(code, constants)?;
    Ok((descriptor, parameter_size, instructions, marker, stack))
}

/// Human readable `class.name(descriptor)` of a method
pub fn method_name(pool: &ClassPool, method: MethodId) -> String {
    let declared = pool.method(method);
    format!(
        "{}.{}{}",
        pool.class(method.class).name,
        declared.name,
        declared.descriptor
    )
}
