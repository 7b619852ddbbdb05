use super::{
    ClassAccessFlags, CodeAttribute, ConstantIndex, ConstantPool, Error, FieldAccessFlags,
    MemberKind, MethodAccessFlags, MethodDescriptor, ParseDescriptor,
};
use std::collections::HashMap;

/// Index of a class in a [`ClassPool`]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClassId(pub usize);

/// Method in a program class
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MethodId {
    pub class: ClassId,

    /// Index into the methods of the class
    pub index: usize,
}

/// Field in a program class
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FieldId {
    pub class: ClassId,
    pub index: usize,
}

/// Class whose code is being optimized
#[derive(Clone, Debug)]
pub struct ProgramClass {
    /// Binary name (eg. `java/lang/String`)
    pub name: String,

    /// Binary name of the superclass (only `java/lang/Object` has none)
    pub super_name: Option<String>,

    pub access_flags: ClassAccessFlags,
    pub constants: ConstantPool,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl ProgramClass {
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access_flags: ClassAccessFlags,
    ) -> ProgramClass {
        ProgramClass {
            name: name.to_owned(),
            super_name: super_name.map(str::to_owned),
            access_flags,
            constants: ConstantPool::new(),
            fields: vec![],
            methods: vec![],
        }
    }

    /// Add a method, returning its index in the class
    pub fn add_method(&mut self, method: Method) -> usize {
        self.methods.push(method);
        self.methods.len() - 1
    }

    pub fn add_field(&mut self, field: Field) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    /// Find a method declared directly on this class
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name == name && field.descriptor == descriptor)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

#[derive(Clone, Debug)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// `None` for abstract and native methods
    pub code: Option<CodeAttribute>,
}

impl Method {
    pub fn new(access_flags: MethodAccessFlags, name: &str, descriptor: &str) -> Method {
        Method {
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: CodeAttribute) -> Method {
        self.code = Some(code);
        self
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Instance or class initializer
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn parsed_descriptor(&self) -> Result<MethodDescriptor, Error> {
        MethodDescriptor::parse(&self.descriptor)
    }

    /// Number of local variable slots taken by the parameters (including `this`)
    pub fn parameter_size(&self) -> Result<usize, Error> {
        Ok(self.parsed_descriptor()?.parameter_length(!self.is_static()))
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
}

impl Field {
    pub fn new(access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> Field {
        Field {
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }
}

/// Class outside of the program (eg. from the runtime library)
///
/// Library classes are never modified and their members are opaque: references into them
/// resolve to [`ResolvedMethod::Library`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryClass {
    pub name: String,
    pub super_name: Option<String>,
    pub access_flags: ClassAccessFlags,
}

/// Outcome of resolving a method reference
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResolvedMethod {
    Program(MethodId),

    /// Method is found in a (superclass that is a) library class
    Library,

    /// Neither the method nor a library class to hold it were found
    Unresolved,
}

/// Outcome of resolving a field reference
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResolvedField {
    Program(FieldId),
    Library,
    Unresolved,
}

/// A resolved class name
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResolvedClass<'a> {
    Program(ClassId),
    Library(&'a LibraryClass),
    Unresolved,
}

/// Every class known to the optimizer
#[derive(Default, Debug)]
pub struct ClassPool {
    classes: Vec<ProgramClass>,
    by_name: HashMap<String, ClassId>,
    library: HashMap<String, LibraryClass>,
}

impl ClassPool {
    pub fn new() -> ClassPool {
        ClassPool::default()
    }

    /// Add a program class
    ///
    /// A class with the same name as a previous one shadows it for name lookups.
    pub fn add_class(&mut self, class: ProgramClass) -> ClassId {
        let id = ClassId(self.classes.len());
        if self.by_name.insert(class.name.clone(), id).is_some() {
            log::warn!("Duplicate program class {}", class.name);
        }
        self.classes.push(class);
        id
    }

    pub fn add_library_class(&mut self, class: LibraryClass) {
        self.library.insert(class.name.clone(), class);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len()).map(ClassId)
    }

    pub fn class(&self, id: ClassId) -> &ProgramClass {
        &self.classes[id.0]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ProgramClass {
        &mut self.classes[id.0]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.classes[id.class.0].methods[id.index]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.classes[id.class.0].methods[id.index]
    }

    pub fn method_ids(&self, class: ClassId) -> impl Iterator<Item = MethodId> {
        (0..self.classes[class.0].methods.len()).map(move |index| MethodId { class, index })
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.classes[id.class.0].fields[id.index]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.classes[id.class.0].fields[id.index]
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn resolve_class(&self, name: &str) -> ResolvedClass<'_> {
        if let Some(id) = self.find_class(name) {
            ResolvedClass::Program(id)
        } else if let Some(library) = self.library.get(name) {
            ResolvedClass::Library(library)
        } else {
            ResolvedClass::Unresolved
        }
    }

    /// Two distinct classes, mutably
    pub fn pair_mut(
        &mut self,
        a: ClassId,
        b: ClassId,
    ) -> Option<(&mut ProgramClass, &mut ProgramClass)> {
        if a == b || a.0 >= self.classes.len() || b.0 >= self.classes.len() {
            return None;
        }
        if a.0 < b.0 {
            let (low, high) = self.classes.split_at_mut(b.0);
            Some((&mut low[a.0], &mut high[0]))
        } else {
            let (low, high) = self.classes.split_at_mut(a.0);
            Some((&mut high[0], &mut low[b.0]))
        }
    }

    /// Resolve a method reference from the constant pool of a class
    ///
    /// Resolution looks for a matching method in the referenced class and then its superclasses,
    /// stopping at the first library class.
    pub fn resolve_method_reference(
        &self,
        from: ClassId,
        index: ConstantIndex,
    ) -> Result<ResolvedMethod, Error> {
        let member = self.class(from).constants.member_ref(index)?;
        if member.kind == MemberKind::Field {
            return Err(Error::UnexpectedConstant {
                index,
                expected: "MethodRef",
            });
        }
        Ok(self.resolve_method(member.class_name, member.name, member.descriptor))
    }

    pub fn resolve_method(&self, class_name: &str, name: &str, descriptor: &str) -> ResolvedMethod {
        let mut current = class_name;

        // Bounded, in case the superclass chain is cyclic
        for _ in 0..=self.classes.len() {
            match self.resolve_class(current) {
                ResolvedClass::Program(class) => {
                    let program_class = self.class(class);
                    if let Some(index) = program_class.find_method(name, descriptor) {
                        return ResolvedMethod::Program(MethodId { class, index });
                    }
                    match &program_class.super_name {
                        Some(super_name) => current = super_name.as_str(),
                        None => return ResolvedMethod::Unresolved,
                    }
                }
                ResolvedClass::Library(_) => return ResolvedMethod::Library,
                ResolvedClass::Unresolved => return ResolvedMethod::Unresolved,
            }
        }
        ResolvedMethod::Unresolved
    }

    /// Resolve a field reference from the constant pool of a class
    pub fn resolve_field_reference(
        &self,
        from: ClassId,
        index: ConstantIndex,
    ) -> Result<ResolvedField, Error> {
        let member = self.class(from).constants.member_ref(index)?;
        if member.kind != MemberKind::Field {
            return Err(Error::UnexpectedConstant {
                index,
                expected: "FieldRef",
            });
        }
        let mut current = member.class_name;
        for _ in 0..=self.classes.len() {
            match self.resolve_class(current) {
                ResolvedClass::Program(class) => {
                    let program_class = self.class(class);
                    if let Some(index) = program_class.find_field(member.name, member.descriptor) {
                        return Ok(ResolvedField::Program(FieldId { class, index }));
                    }
                    match &program_class.super_name {
                        Some(super_name) => current = super_name.as_str(),
                        None => return Ok(ResolvedField::Unresolved),
                    }
                }
                ResolvedClass::Library(_) => return Ok(ResolvedField::Library),
                ResolvedClass::Unresolved => return Ok(ResolvedField::Unresolved),
            }
        }
        Ok(ResolvedField::Unresolved)
    }

    /// Is `class_name` the same as or transitively extending `super_name`?
    pub fn is_subclass_of(&self, class_name: &str, super_name: &str) -> bool {
        let mut current = Some(class_name);
        for _ in 0..=(self.classes.len() + self.library.len()) {
            let name = match current {
                Some(name) => name,
                None => return false,
            };
            if name == super_name {
                return true;
            }
            current = match self.resolve_class(name) {
                ResolvedClass::Program(id) => self.class(id).super_name.as_deref(),
                ResolvedClass::Library(library) => library.super_name.as_deref(),
                ResolvedClass::Unresolved => None,
            };
        }
        false
    }
}
