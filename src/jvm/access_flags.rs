use bitflags::bitflags;

bitflags! {
    /// Access flags on classes
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1-200-E.1
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on methods
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6-200-A.1
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Access flags on fields
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5-200-A.1
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

/// Visibility of a class or member, ordered from most to least restrictive
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum AccessLevel {
    Private,
    Package,
    Protected,
    Public,
}

/// Flags which carry one of the JVM visibility levels
pub trait Visibility: Copy {
    fn access_level(&self) -> AccessLevel;

    /// Same flags, but with visibility replaced by `public`
    fn widened_to_public(&self) -> Self;
}

impl Visibility for ClassAccessFlags {
    fn access_level(&self) -> AccessLevel {
        if self.contains(ClassAccessFlags::PUBLIC) {
            AccessLevel::Public
        } else {
            AccessLevel::Package
        }
    }

    fn widened_to_public(&self) -> Self {
        *self | ClassAccessFlags::PUBLIC
    }
}

impl Visibility for MethodAccessFlags {
    fn access_level(&self) -> AccessLevel {
        if self.contains(MethodAccessFlags::PUBLIC) {
            AccessLevel::Public
        } else if self.contains(MethodAccessFlags::PROTECTED) {
            AccessLevel::Protected
        } else if self.contains(MethodAccessFlags::PRIVATE) {
            AccessLevel::Private
        } else {
            AccessLevel::Package
        }
    }

    fn widened_to_public(&self) -> Self {
        (*self - MethodAccessFlags::PRIVATE - MethodAccessFlags::PROTECTED)
            | MethodAccessFlags::PUBLIC
    }
}

impl Visibility for FieldAccessFlags {
    fn access_level(&self) -> AccessLevel {
        if self.contains(FieldAccessFlags::PUBLIC) {
            AccessLevel::Public
        } else if self.contains(FieldAccessFlags::PROTECTED) {
            AccessLevel::Protected
        } else if self.contains(FieldAccessFlags::PRIVATE) {
            AccessLevel::Private
        } else {
            AccessLevel::Package
        }
    }

    fn widened_to_public(&self) -> Self {
        (*self - FieldAccessFlags::PRIVATE - FieldAccessFlags::PROTECTED)
            | FieldAccessFlags::PUBLIC
    }
}
