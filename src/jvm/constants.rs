use crate::jvm::Error;
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use std::collections::HashMap;
use std::result::Result;

/// Class file constants pool
///
/// The pool is append only: existing entries are never moved or rewritten, since code and class
/// metadata refer to them by index. New entries are only added through [`ConstantPool::push`] or
/// through the "add or reuse" operations that first look for an equal entry. When splicing code
/// from another class, [`ConstantPool::import`] copies an entry (and everything it refers to)
/// from a foreign pool.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,

    /// First index of every distinct constant
    lookup: HashMap<ConstantKey, ConstantIndex>,
}

/// Marker for undoing constants that were added to a pool
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolCheckpoint(Offset);

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            lookup: HashMap::new(),
        }
    }

    /// Rebuild a pool from its entries in order (eg. when handed a class by a class reader)
    pub fn from_constants(
        constants: impl IntoIterator<Item = Constant>,
    ) -> Result<ConstantPool, ConstantPoolOverflow> {
        let mut pool = ConstantPool::new();
        for constant in constants {
            pool.push(constant)?;
        }
        Ok(pool)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Index the next pushed constant would get
    pub fn next_index(&self) -> usize {
        self.constants.offset_len().0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, _, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }

        let index = ConstantIndex(offset as u16);
        self.lookup.entry(constant.key()).or_insert(index);
        self.constants.push(constant);
        Ok(index)
    }

    /// Get the index of an equal constant, or push the constant
    pub fn add_or_reuse(
        &mut self,
        constant: Constant,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.lookup.get(&constant.key()) {
            Some(index) => Ok(*index),
            None => self.push(constant),
        }
    }

    /// Look up a constant
    pub fn get(&self, index: ConstantIndex) -> Result<&Constant, Error> {
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(_, constant) => Ok(constant),
            _ => Err(Error::MissingConstant(index)),
        }
    }

    pub fn checkpoint(&self) -> PoolCheckpoint {
        PoolCheckpoint(self.constants.offset_len())
    }

    /// Drop every constant added since the checkpoint was taken
    pub fn rollback(&mut self, checkpoint: PoolCheckpoint) {
        let removed = self.constants.truncate_offset(checkpoint.0);
        if !removed.is_empty() {
            let first_removed = checkpoint.0 .0;
            self.lookup
                .retain(|_, index| (index.0 as usize) < first_removed);
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        self.add_or_reuse(Constant::Utf8(utf8.to_owned()))
            .map(Utf8ConstantIndex)
    }

    /// Get or insert a class constant from the constant pool
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        self.add_or_reuse(Constant::Class(name))
            .map(ClassConstantIndex)
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        self.add_or_reuse(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.add_or_reuse(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.add_or_reuse(Constant::FieldRef(class, name_and_type))
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(&mut self, string: &str) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.get_utf8(string)?;
        self.add_or_reuse(Constant::String(utf8))
    }

    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(Error::UnexpectedConstant {
                index: index.0,
                expected: "Utf8",
            }),
        }
    }

    /// Name of the class referred to by a `CONSTANT_Class_info`
    pub fn class_name(&self, index: ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index.0)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Error::UnexpectedConstant {
                index: index.0,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a field or method reference into its textual parts
    pub fn member_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, Error> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => (MemberKind::Field, class, name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface: false,
            } => (MemberKind::Method, class, name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface: true,
            } => (MemberKind::InterfaceMethod, class, name_and_type),
            _ => {
                return Err(Error::UnexpectedConstant {
                    index,
                    expected: "FieldRef or MethodRef",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(*name_and_type)?;
        Ok(MemberRef {
            kind,
            class_name: self.class_name(class.0)?,
            name,
            descriptor,
        })
    }

    /// Descriptor of the call site of an `invokedynamic`
    pub fn invoke_dynamic_descriptor(&self, index: ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                method_descriptor, ..
            } => Ok(self.name_and_type(*method_descriptor)?.1),
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Copy a constant from another pool into this one, reusing an equal entry if there is one
    ///
    /// Constants referring to other constants get their dependencies imported first, so the
    /// resulting index is always self-contained in this pool. `InvokeDynamic` constants can't be
    /// imported: their bootstrap method index only makes sense in the class that declared them.
    pub fn import(
        &mut self,
        from: &ConstantPool,
        index: ConstantIndex,
    ) -> Result<ConstantIndex, Error> {
        let imported = match from.get(index)? {
            Constant::Utf8(string) => Constant::Utf8(string.clone()),
            Constant::Integer(i) => Constant::Integer(*i),
            Constant::Float(f) => Constant::Float(*f),
            Constant::Long(l) => Constant::Long(*l),
            Constant::Double(d) => Constant::Double(*d),
            Constant::Class(name) => Constant::Class(self.import_utf8(from, *name)?),
            Constant::String(utf8) => Constant::String(self.import_utf8(from, *utf8)?),
            Constant::FieldRef(class, name_and_type) => Constant::FieldRef(
                ClassConstantIndex(self.import(from, class.0)?),
                NameAndTypeConstantIndex(self.import(from, name_and_type.0)?),
            ),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => Constant::MethodRef {
                class: ClassConstantIndex(self.import(from, class.0)?),
                name_and_type: NameAndTypeConstantIndex(self.import(from, name_and_type.0)?),
                is_interface: *is_interface,
            },
            Constant::NameAndType { name, descriptor } => Constant::NameAndType {
                name: self.import_utf8(from, *name)?,
                descriptor: self.import_utf8(from, *descriptor)?,
            },
            Constant::MethodHandle {
                handle_kind,
                member,
            } => Constant::MethodHandle {
                handle_kind: *handle_kind,
                member: self.import(from, *member)?,
            },
            Constant::MethodType { descriptor } => Constant::MethodType {
                descriptor: self.import_utf8(from, *descriptor)?,
            },
            Constant::InvokeDynamic { .. } => {
                return Err(Error::UnexpectedConstant {
                    index,
                    expected: "constant without bootstrap method",
                })
            }
        };
        Ok(self.add_or_reuse(imported)?)
    }

    pub fn import_utf8(
        &mut self,
        from: &ConstantPool,
        index: Utf8ConstantIndex,
    ) -> Result<Utf8ConstantIndex, Error> {
        let string = from.utf8(index)?;
        Ok(self.get_utf8(string)?)
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// Note: some constant types added after Java 8 are not included (`Dynamic`, `Module`,
/// `Package`)
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: u8,

        /// `FieldRef` or `MethodRef`, depending on the handle kind
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },
}

/// Hashable identity of a constant (floating point constants compare by their bits)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Class(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16, bool),
    String(u16),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    NameAndType(u16, u16),
    Utf8(String),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

impl Constant {
    fn key(&self) -> ConstantKey {
        match self {
            Constant::Class(name) => ConstantKey::Class(name.0 .0),
            Constant::FieldRef(class, nat) => ConstantKey::FieldRef(class.0 .0, nat.0 .0),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => ConstantKey::MethodRef(class.0 .0, name_and_type.0 .0, *is_interface),
            Constant::String(utf8) => ConstantKey::String(utf8.0 .0),
            Constant::Integer(i) => ConstantKey::Integer(*i),
            Constant::Float(f) => ConstantKey::Float(f.to_bits()),
            Constant::Long(l) => ConstantKey::Long(*l),
            Constant::Double(d) => ConstantKey::Double(d.to_bits()),
            Constant::NameAndType { name, descriptor } => {
                ConstantKey::NameAndType(name.0 .0, descriptor.0 .0)
            }
            Constant::Utf8(string) => ConstantKey::Utf8(string.clone()),
            Constant::MethodHandle {
                handle_kind,
                member,
            } => ConstantKey::MethodHandle(*handle_kind, member.0),
            Constant::MethodType { descriptor } => ConstantKey::MethodType(descriptor.0 .0),
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => ConstantKey::InvokeDynamic(*bootstrap_method, method_descriptor.0 .0),
        }
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the spec:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Field or method reference, with all of its parts resolved to strings
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

impl From<Utf8ConstantIndex> for ConstantIndex {
    fn from(index: Utf8ConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<NameAndTypeConstantIndex> for ConstantIndex {
    fn from(index: NameAndTypeConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<ClassConstantIndex> for ConstantIndex {
    fn from(index: ClassConstantIndex) -> ConstantIndex {
        index.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equal_constants_are_reused() {
        let mut pool = ConstantPool::new();
        let first = pool.get_method_ref("a/B", "f", "()V", false).unwrap();
        let before = pool.len();
        let second = pool.get_method_ref("a/B", "f", "()V", false).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.len(), before);

        let interface = pool.get_method_ref("a/B", "f", "()V", true).unwrap();
        assert_ne!(first, interface);
    }

    #[test]
    fn wide_constants_take_two_indices() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.push(Constant::Long(7)).unwrap(), ConstantIndex(1));
        assert_eq!(pool.push(Constant::Integer(7)).unwrap(), ConstantIndex(3));
        assert!(matches!(
            pool.get(ConstantIndex(2)),
            Err(Error::MissingConstant(ConstantIndex(2)))
        ));
        assert!(matches!(pool.get(ConstantIndex(0)), Err(Error::MissingConstant(_))));
    }

    #[test]
    fn member_ref_lookup() {
        let mut pool = ConstantPool::new();
        let field = pool.get_field_ref("a/B", "count", "I").unwrap();
        let member = pool.member_ref(field).unwrap();
        assert_eq!(member.kind, MemberKind::Field);
        assert_eq!(member.class_name, "a/B");
        assert_eq!(member.name, "count");
        assert_eq!(member.descriptor, "I");

        let string = pool.get_string("count").unwrap();
        assert!(matches!(
            pool.member_ref(string),
            Err(Error::UnexpectedConstant { .. })
        ));
    }

    #[test]
    fn import_reuses_existing_entries() {
        let mut foreign = ConstantPool::new();
        foreign.push(Constant::Integer(42)).unwrap();
        let method = foreign.get_method_ref("a/B", "f", "(I)I", false).unwrap();

        let mut local = ConstantPool::new();
        let class = local.get_class("a/B").unwrap();
        let imported = local.import(&foreign, method).unwrap();

        let member = local.member_ref(imported).unwrap();
        assert_eq!(member.class_name, "a/B");
        assert_eq!(member.name, "f");
        assert_eq!(member.descriptor, "(I)I");
        match local.get(imported).unwrap() {
            Constant::MethodRef { class: c, .. } => assert_eq!(*c, class),
            other => panic!("unexpected {:?}", other),
        }

        let again = local.import(&foreign, method).unwrap();
        assert_eq!(imported, again);
    }

    #[test]
    fn rollback_forgets_new_entries() {
        let mut pool = ConstantPool::new();
        let existing = pool.get_utf8("kept").unwrap();
        let checkpoint = pool.checkpoint();
        pool.get_string("dropped").unwrap();
        pool.rollback(checkpoint);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.checkpoint(), checkpoint);
        assert_eq!(pool.get_utf8("kept").unwrap(), existing);

        // The dropped utf8 must be pushed again, not resolved to the stale index
        let recreated = pool.get_utf8("dropped").unwrap();
        assert_eq!(recreated, Utf8ConstantIndex(ConstantIndex(2)));
    }
}
