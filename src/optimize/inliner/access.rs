//! Legality of moving code between classes
//!
//! Code that is inlined into another class keeps referring to the same classes, fields, and
//! methods, but is now checked against the access rules from the caller's class. Program
//! members that would become inaccessible can be made public (when settings allow it).
//! Library members are assumed to stay accessible.

use crate::jvm::opcodes::*;
use crate::jvm::{
    AccessLevel, ClassId, ClassPool, Constant, ConstantIndex, CodeAttribute, Error, FieldId,
    Instruction, MethodId, ResolvedClass, ResolvedField, ResolvedMethod, Visibility,
};
use crate::util::Offset;

/// Some class or member of a program class
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Member {
    Class(ClassId),
    Method(MethodId),
    Field(FieldId),
}

/// Package part of a binary class name (`a/b/C` is in package `a/b`)
pub fn package_name(class_name: &str) -> &str {
    match class_name.rfind('/') {
        Some(idx) => &class_name[..idx],
        None => "",
    }
}

/// Collect program classes and members referenced by callee code that the caller class cannot
/// access
///
/// The result is deduplicated and in order of first reference.
pub fn inaccessible_members(
    pool: &ClassPool,
    caller_class: ClassId,
    callee_class: ClassId,
    callee_code: &CodeAttribute,
    callee_instructions: &[(Offset, Instruction<Offset>, usize)],
) -> Result<Vec<Member>, Error> {
    let mut inaccessible = vec![];
    if caller_class == callee_class {
        return Ok(inaccessible);
    }

    let checker = AccessChecker { pool, caller_class };
    let mut record = |member: Option<Member>| {
        if let Some(member) = member {
            if !inaccessible.contains(&member) {
                inaccessible.push(member);
            }
        }
    };

    for (_, instruction, _) in callee_instructions {
        match instruction {
            Instruction::Constant(GETSTATIC..=PUTFIELD, index) => {
                let (field, class) = checker.field_ref(callee_class, *index)?;
                record(field);
                record(class);
            }
            Instruction::Constant(INVOKEVIRTUAL..=INVOKESTATIC, index)
            | Instruction::InvokeInterface(index, _) => {
                let (method, class) = checker.method_ref(callee_class, *index)?;
                record(method);
                record(class);
            }
            Instruction::Constant(NEW | ANEWARRAY | CHECKCAST | INSTANCEOF, index)
            | Instruction::MultiANewArray(index, _) => {
                record(checker.class_ref(callee_class, *index)?);
            }
            Instruction::Constant(LDC, index) => {
                if let Constant::Class(_) = pool.class(callee_class).constants.get(*index)? {
                    record(checker.class_ref(callee_class, *index)?);
                }
            }
            _ => (),
        }
    }
    for handler in &callee_code.exception_table {
        if let Some(catch_type) = handler.catch_type {
            record(checker.class_ref(callee_class, catch_type.0)?);
        }
    }

    Ok(inaccessible)
}

/// Inaccessible member of a reference along with its inaccessible class
type MemberAndClass = (Option<Member>, Option<Member>);

struct AccessChecker<'a> {
    pool: &'a ClassPool,
    caller_class: ClassId,
}

impl<'a> AccessChecker<'a> {
    fn caller_name(&self) -> &str {
        &self.pool.class(self.caller_class).name
    }

    /// Can the caller access a member with this level declared on this class?
    fn member_accessible(&self, level: AccessLevel, declaring: ClassId) -> bool {
        if declaring == self.caller_class {
            return true;
        }
        let declaring_name = &self.pool.class(declaring).name;
        let same_package = package_name(declaring_name) == package_name(self.caller_name());
        match level {
            AccessLevel::Public => true,
            AccessLevel::Package => same_package,
            AccessLevel::Protected => {
                same_package || self.pool.is_subclass_of(self.caller_name(), declaring_name)
            }
            AccessLevel::Private => false,
        }
    }

    fn class_accessible(&self, class: ClassId) -> bool {
        let class_name = &self.pool.class(class).name;
        class == self.caller_class
            || self.pool.class(class).access_flags.access_level() == AccessLevel::Public
            || package_name(class_name) == package_name(self.caller_name())
    }

    fn class_named(&self, name: &str) -> Option<Member> {
        match self.pool.resolve_class(name) {
            ResolvedClass::Program(class) if !self.class_accessible(class) => {
                Some(Member::Class(class))
            }
            _ => None,
        }
    }

    fn class_ref(&self, from: ClassId, index: ConstantIndex) -> Result<Option<Member>, Error> {
        let name = self.pool.class(from).constants.class_name(index)?;

        // Array classes are accessible when their element class is
        let element = name.trim_start_matches('[');
        let element = match element.strip_prefix('L') {
            Some(object) if name.starts_with('[') => object.trim_end_matches(';'),
            _ if name.starts_with('[') => return Ok(None),
            _ => element,
        };
        Ok(self.class_named(element))
    }

    fn field_ref(&self, from: ClassId, index: ConstantIndex) -> Result<MemberAndClass, Error> {
        let member = self.pool.class(from).constants.member_ref(index)?;
        let class = self.class_named(member.class_name);
        let field = match self.pool.resolve_field_reference(from, index)? {
            ResolvedField::Program(field) => {
                let level = self.pool.field(field).access_flags.access_level();
                if self.member_accessible(level, field.class) {
                    None
                } else {
                    Some(Member::Field(field))
                }
            }
            ResolvedField::Library | ResolvedField::Unresolved => None,
        };
        Ok((field, class))
    }

    fn method_ref(&self, from: ClassId, index: ConstantIndex) -> Result<MemberAndClass, Error> {
        let member = self.pool.class(from).constants.member_ref(index)?;
        let class = self.class_named(member.class_name);
        let method = match self.pool.resolve_method_reference(from, index)? {
            ResolvedMethod::Program(method) => {
                let level = self.pool.method(method).access_flags.access_level();
                if self.member_accessible(level, method.class) {
                    None
                } else {
                    Some(Member::Method(method))
                }
            }
            ResolvedMethod::Library | ResolvedMethod::Unresolved => None,
        };
        Ok((method, class))
    }
}

/// Make a class or member public
///
/// Returns whether the flags actually changed.
pub fn widen(pool: &mut ClassPool, member: Member) -> bool {
    match member {
        Member::Class(class) => {
            let flags = &mut pool.class_mut(class).access_flags;
            let widened = flags.widened_to_public();
            std::mem::replace(flags, widened) != widened
        }
        Member::Method(method) => {
            let flags = &mut pool.method_mut(method).access_flags;
            let widened = flags.widened_to_public();
            std::mem::replace(flags, widened) != widened
        }
        Member::Field(field) => {
            let flags = &mut pool.field_mut(field).access_flags;
            let widened = flags.widened_to_public();
            std::mem::replace(flags, widened) != widened
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{
        ClassAccessFlags, Field, FieldAccessFlags, Method, MethodAccessFlags, ProgramClass,
    };

    fn package_private(pool: &mut ClassPool, name: &str) -> ClassId {
        pool.add_class(ProgramClass::new(name, None, ClassAccessFlags::empty()))
    }

    #[test]
    fn packages() {
        assert_eq!(package_name("a/b/C"), "a/b");
        assert_eq!(package_name("C"), "");
    }

    #[test]
    fn private_field_from_other_class() {
        let mut pool = ClassPool::new();
        let mut callee = ProgramClass::new("a/Callee", None, ClassAccessFlags::PUBLIC);
        callee.add_field(Field::new(FieldAccessFlags::PRIVATE, "secret", "I"));
        callee.add_field(Field::new(FieldAccessFlags::empty(), "shared", "I"));
        let secret = callee.constants.get_field_ref("a/Callee", "secret", "I").unwrap();
        let shared = callee.constants.get_field_ref("a/Callee", "shared", "I").unwrap();
        let callee = pool.add_class(callee);
        let same_package = package_private(&mut pool, "a/Near");
        let other_package = package_private(&mut pool, "b/Far");

        let instructions = vec![
            (Offset(0), Instruction::Constant(GETSTATIC, secret), 3),
            (Offset(3), Instruction::Constant(GETSTATIC, shared), 3),
        ];
        let code = CodeAttribute::new(2, 0, vec![]);
        let from = |pool: &ClassPool, caller: ClassId| {
            inaccessible_members(pool, caller, callee, &code, &instructions).unwrap()
        };

        let from_near = from(&pool, same_package);
        assert_eq!(
            from_near,
            vec![Member::Field(FieldId { class: callee, index: 0 })]
        );
        assert_eq!(from(&pool, other_package).len(), 2);
        assert!(from(&pool, callee).is_empty());

        assert!(widen(&mut pool, from_near[0]));
        assert!(!widen(&mut pool, from_near[0]));
        assert!(from(&pool, same_package).is_empty());
    }

    #[test]
    fn package_private_class() {
        let mut pool = ClassPool::new();
        let mut callee = ProgramClass::new("a/Callee", None, ClassAccessFlags::PUBLIC);
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        callee.add_method(Method::new(flags, "f", "()V"));
        let hidden = callee.constants.get_class("a/Hidden").unwrap();
        let callee = pool.add_class(callee);
        let hidden_class = package_private(&mut pool, "a/Hidden");
        let far = pool.add_class(ProgramClass::new("b/Far", None, ClassAccessFlags::PUBLIC));

        let instructions = vec![(Offset(0), Instruction::Constant(NEW, hidden.0), 3)];
        let code = CodeAttribute::new(2, 0, vec![]);
        assert_eq!(
            inaccessible_members(&pool, far, callee, &code, &instructions).unwrap(),
            vec![Member::Class(hidden_class)]
        );
    }
}
