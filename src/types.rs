use std::collections::HashMap;

use crate::{
    token::BuiltinType,
    util::intern::{Interner, Symbol},
};

/// A handle into the [`TypeTable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const INT: TypeId = TypeId(0);
    pub const UINT: TypeId = TypeId(1);
    pub const INT8: TypeId = TypeId(2);
    pub const INT16: TypeId = TypeId(3);
    pub const INT32: TypeId = TypeId(4);
    pub const INT64: TypeId = TypeId(5);
    pub const UINT8: TypeId = TypeId(6);
    pub const UINT16: TypeId = TypeId(7);
    pub const UINT32: TypeId = TypeId(8);
    pub const UINT64: TypeId = TypeId(9);
    pub const BOOL: TypeId = TypeId(10);
    pub const STRING: TypeId = TypeId(11);
    /// The type of integer literal trees which weren't yet fitted into a
    /// concrete integer type. Never nameable in source.
    pub const UNTYPED_INT: TypeId = TypeId(12);
    pub const BYTE_SLICE: TypeId = TypeId(13);
    pub const STRING_SLICE: TypeId = TypeId(14);

    pub const fn of_builtin(ty: BuiltinType) -> TypeId {
        match ty {
            BuiltinType::Int => TypeId::INT,
            BuiltinType::Uint => TypeId::UINT,
            BuiltinType::Int8 => TypeId::INT8,
            BuiltinType::Int16 => TypeId::INT16,
            BuiltinType::Int32 => TypeId::INT32,
            BuiltinType::Int64 => TypeId::INT64,
            BuiltinType::Uint8 | BuiltinType::Byte => TypeId::UINT8,
            BuiltinType::Uint16 => TypeId::UINT16,
            BuiltinType::Uint32 => TypeId::UINT32,
            BuiltinType::Uint64 => TypeId::UINT64,
            BuiltinType::Bool => TypeId::BOOL,
            BuiltinType::String => TypeId::STRING,
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Int,
    Uint,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    String,
}

const SCALARS: [Scalar; 12] = [
    Scalar::Int,
    Scalar::Uint,
    Scalar::Int8,
    Scalar::Int16,
    Scalar::Int32,
    Scalar::Int64,
    Scalar::Uint8,
    Scalar::Uint16,
    Scalar::Uint32,
    Scalar::Uint64,
    Scalar::Bool,
    Scalar::String,
];

impl Scalar {
    pub const fn name(self) -> &'static str {
        match self {
            Scalar::Int => "int",
            Scalar::Uint => "uint",
            Scalar::Int8 => "int8",
            Scalar::Int16 => "int16",
            Scalar::Int32 => "int32",
            Scalar::Int64 => "int64",
            Scalar::Uint8 => "uint8",
            Scalar::Uint16 => "uint16",
            Scalar::Uint32 => "uint32",
            Scalar::Uint64 => "uint64",
            Scalar::Bool => "bool",
            Scalar::String => "string",
        }
    }

    pub const fn info(self) -> TypeInfo {
        let (size, signed) = match self {
            Scalar::Int | Scalar::Int64 => (8, true),
            Scalar::Uint | Scalar::Uint64 => (8, false),
            Scalar::Int32 => (4, true),
            Scalar::Uint32 => (4, false),
            Scalar::Int16 => (2, true),
            Scalar::Uint16 => (2, false),
            Scalar::Int8 => (1, true),
            Scalar::Uint8 | Scalar::Bool => (1, false),
            Scalar::String => (16, false),
        };
        TypeInfo { size, signed }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, Scalar::Bool | Scalar::String)
    }
}

/// Size in bytes and signedness of a resolvable type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub size: u64,
    pub signed: bool,
}

impl TypeInfo {
    pub const WORD: TypeInfo = TypeInfo {
        size: 8,
        signed: false,
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar(Scalar),
    UntypedInt,
    Array { elem: TypeId, len: u64 },
    Slice { elem: TypeId },
    Tuple(Box<[Field]>),
    Sum(SumDefn),
    Enum(EnumDefn),
    /// A named alias, distinct from the type it wraps.
    User { name: Symbol, underlying: TypeId },
    /// A word-sized placeholder introduced by a `data` declaration.
    Param(Symbol),
    /// A nominal type whose name is known but whose definition is not yet.
    Pending(Symbol),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Option<Symbol>,
    pub ty: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SumDefn {
    pub name: Symbol,
    pub alts: Box<[TypeId]>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumDefn {
    pub name: Symbol,
    pub params: Box<[Symbol]>,
    pub ctors: Box<[Ctor]>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ctor {
    pub name: Symbol,
    pub fields: Box<[TypeId]>,
}

/// The arena holding every type of a compilation.
///
/// Structural types are hash-consed, so two structurally equal types always
/// share the same [`TypeId`]. Nominal types (enums, sum types and aliases) get
/// a fresh id per declaration.
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    structural: HashMap<TypeKind, TypeId>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> TypeTable {
        let mut table = TypeTable {
            kinds: Vec::with_capacity(64),
            structural: HashMap::with_capacity(64),
        };
        for scalar in SCALARS {
            table.intern(TypeKind::Scalar(scalar));
        }
        let untyped = table.intern(TypeKind::UntypedInt);
        let bytes = table.intern(TypeKind::Slice {
            elem: TypeId::UINT8,
        });
        let strings = table.intern(TypeKind::Slice {
            elem: TypeId::STRING,
        });
        debug_assert_eq!(untyped, TypeId::UNTYPED_INT);
        debug_assert_eq!(bytes, TypeId::BYTE_SLICE);
        debug_assert_eq!(strings, TypeId::STRING_SLICE);
        table
    }

    /// Returns the id of a structural type, allocating it if needed.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        debug_assert!(!matches!(
            kind,
            TypeKind::Sum(_) | TypeKind::Enum(_) | TypeKind::User { .. } | TypeKind::Pending(_)
        ));
        if let Some(id) = self.structural.get(&kind) {
            return *id;
        }
        let id = self.push(kind.clone());
        self.structural.insert(kind, id);
        id
    }

    /// Allocates a nominal type which is defined later by [`TypeTable::define`].
    pub fn declare(&mut self, name: Symbol) -> TypeId {
        self.push(TypeKind::Pending(name))
    }

    pub fn define(&mut self, id: TypeId, kind: TypeKind) {
        debug_assert!(matches!(self.kinds[id.index()], TypeKind::Pending(_)));
        self.kinds[id.index()] = kind;
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(u32::try_from(self.kinds.len()).expect("type table out of capacity"));
        self.kinds.push(kind);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Strips every alias around `id`.
    pub fn resolve(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::User { underlying, .. } = self.get(id) {
            id = *underlying;
        }
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        self.get(self.resolve(id))
    }

    pub fn scalar(&self, id: TypeId) -> Option<Scalar> {
        match self.kind(id) {
            TypeKind::Scalar(scalar) => Some(*scalar),
            _ => None,
        }
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.scalar(id).is_some_and(Scalar::is_integer)
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        self.scalar(id) == Some(Scalar::Bool)
    }

    pub fn is_string(&self, id: TypeId) -> bool {
        self.scalar(id) == Some(Scalar::String)
    }

    pub fn is_slice(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Slice { .. })
    }

    pub fn is_param(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Param(_))
    }

    /// Element type of arrays and slices.
    pub fn elem(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Array { elem, .. } | TypeKind::Slice { elem } => Some(*elem),
            _ => None,
        }
    }

    /// Whether values of `id` occupy a single byte in memory. Arrays and
    /// slices of such elements are stored packed.
    pub fn is_byte_sized(&self, id: TypeId) -> bool {
        self.scalar(id).is_some_and(|s| s.info().size == 1)
    }

    /// Inclusive range of the values representable by an integer type.
    pub fn int_range(&self, id: TypeId) -> Option<(i128, i128)> {
        let scalar = self.scalar(id).filter(|s| s.is_integer())?;
        let TypeInfo { size, signed } = scalar.info();
        let bits = size * 8;
        Some(if signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        })
    }

    pub fn info(&self, id: TypeId) -> TypeInfo {
        match self.kind(id) {
            TypeKind::Scalar(scalar) => scalar.info(),
            TypeKind::UntypedInt | TypeKind::Param(_) => TypeInfo::WORD,
            TypeKind::Pending(_) => TypeInfo {
                size: 0,
                signed: false,
            },
            TypeKind::Slice { .. } => TypeInfo {
                size: 16,
                signed: false,
            },
            TypeKind::Array { elem, len } => TypeInfo {
                size: self.info(*elem).size * len,
                signed: false,
            },
            TypeKind::Tuple(fields) => TypeInfo {
                size: fields.iter().map(|f| self.info(f.ty).size).sum(),
                signed: false,
            },
            TypeKind::Sum(_) | TypeKind::Enum(_) => TypeInfo {
                size: u64::from(self.words(id)) * 8,
                signed: false,
            },
            TypeKind::User { .. } => unreachable!("resolved"),
        }
    }

    /// Number of 64-bit words a value of type `id` occupies in a frame.
    pub fn words(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Scalar(Scalar::String) | TypeKind::Slice { .. } => 2,
            TypeKind::Scalar(_) | TypeKind::UntypedInt | TypeKind::Param(_) => 1,
            TypeKind::Pending(_) => 0,
            TypeKind::Array { elem, len } => {
                let len = u32::try_from(*len).unwrap_or(u32::MAX);
                if self.is_byte_sized(*elem) {
                    len.div_ceil(8)
                } else {
                    len.saturating_mul(self.words(*elem))
                }
            }
            TypeKind::Tuple(fields) => fields.iter().map(|f| self.words(f.ty)).sum(),
            TypeKind::Sum(sum) => {
                1 + sum.alts.iter().map(|&a| self.words(a)).max().unwrap_or(0)
            }
            TypeKind::Enum(defn) => {
                1 + defn
                    .ctors
                    .iter()
                    .map(|c| c.fields.iter().map(|&f| self.words(f)).sum::<u32>())
                    .max()
                    .unwrap_or(0)
            }
            TypeKind::User { .. } => unreachable!("resolved"),
        }
    }

    /// Word offsets of each payload field of a constructor, relative to the
    /// start of the enum value (the tag is word zero).
    pub fn ctor_field_offsets(&self, fields: &[TypeId]) -> Vec<u32> {
        let mut offset = 1;
        fields
            .iter()
            .map(|&f| {
                let this = offset;
                offset += self.words(f);
                this
            })
            .collect()
    }

    /// Whether a nominal type contains itself by value, which would give it
    /// an infinite size. Slices break the cycle since they are references.
    pub fn is_infinite(&self, id: TypeId) -> bool {
        let mut stack = Vec::with_capacity(8);
        self.contains_by_value(id, id, &mut stack)
    }

    fn contains_by_value(&self, root: TypeId, at: TypeId, stack: &mut Vec<TypeId>) -> bool {
        if stack.contains(&at) {
            return false;
        }
        stack.push(at);
        let children: Vec<TypeId> = match self.get(at) {
            TypeKind::Array { elem, .. } => vec![*elem],
            TypeKind::Tuple(fields) => fields.iter().map(|f| f.ty).collect(),
            TypeKind::Sum(sum) => sum.alts.to_vec(),
            TypeKind::Enum(defn) => defn
                .ctors
                .iter()
                .flat_map(|c| c.fields.iter().copied())
                .collect(),
            TypeKind::User { underlying, .. } => vec![*underlying],
            _ => Vec::new(),
        };
        let found = children
            .into_iter()
            .any(|child| child == root || self.contains_by_value(root, child, stack));
        stack.pop();
        found
    }

    /// Renders a type the way it is written in source.
    pub fn display(&self, id: TypeId, idents: &Interner) -> String {
        let mut buf = String::new();
        self.write_name(&mut buf, id, idents);
        buf
    }

    fn write_name(&self, buf: &mut String, id: TypeId, idents: &Interner) {
        match self.get(id) {
            TypeKind::Scalar(scalar) => buf.push_str(scalar.name()),
            TypeKind::UntypedInt => buf.push_str("untyped int"),
            TypeKind::Array { elem, len } => {
                buf.push('[');
                buf.push_str(&len.to_string());
                buf.push(']');
                self.write_name(buf, *elem, idents);
            }
            TypeKind::Slice { elem } => {
                buf.push_str("[]");
                self.write_name(buf, *elem, idents);
            }
            TypeKind::Tuple(fields) => {
                buf.push('(');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        buf.push_str(", ");
                    }
                    if let Some(name) = field.name {
                        buf.push_str(idents.get(name));
                        buf.push(' ');
                    }
                    self.write_name(buf, field.ty, idents);
                }
                buf.push(')');
            }
            TypeKind::Sum(SumDefn { name, .. })
            | TypeKind::Enum(EnumDefn { name, .. })
            | TypeKind::User { name, .. }
            | TypeKind::Param(name)
            | TypeKind::Pending(name) => buf.push_str(idents.get(*name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_are_shared() {
        let mut types = TypeTable::new();
        let a = types.intern(TypeKind::Array {
            elem: TypeId::INT,
            len: 3,
        });
        let b = types.intern(TypeKind::Array {
            elem: TypeId::INT,
            len: 3,
        });
        let c = types.intern(TypeKind::Array {
            elem: TypeId::INT,
            len: 4,
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            types.intern(TypeKind::Slice {
                elem: TypeId::UINT8
            }),
            TypeId::BYTE_SLICE
        );
    }

    #[test]
    fn nominal_types_are_distinct() {
        let mut i = Interner::with_capacity(4);
        let mut types = TypeTable::new();
        let name = i.intern("Age");
        let a = types.declare(name);
        types.define(
            a,
            TypeKind::User {
                name,
                underlying: TypeId::INT,
            },
        );
        let b = types.declare(name);
        types.define(
            b,
            TypeKind::User {
                name,
                underlying: TypeId::INT,
            },
        );
        assert_ne!(a, b);
        assert_eq!(types.resolve(a), types.resolve(b));
        assert_eq!(types.display(a, &i), "Age");
    }

    #[test]
    fn ranges() {
        let types = TypeTable::new();
        assert_eq!(types.int_range(TypeId::UINT8), Some((0, 255)));
        assert_eq!(types.int_range(TypeId::INT8), Some((-128, 127)));
        assert_eq!(
            types.int_range(TypeId::INT),
            Some((i128::from(i64::MIN), i128::from(i64::MAX)))
        );
        assert_eq!(types.int_range(TypeId::UINT64), Some((0, i128::from(u64::MAX))));
        assert_eq!(types.int_range(TypeId::BOOL), None);
    }

    #[test]
    fn words_and_sizes() {
        let mut i = Interner::with_capacity(4);
        let mut types = TypeTable::new();
        let bytes = types.intern(TypeKind::Array {
            elem: TypeId::UINT8,
            len: 9,
        });
        assert_eq!(types.words(bytes), 2);
        assert_eq!(types.info(bytes).size, 9);
        assert_eq!(types.words(TypeId::STRING), 2);
        assert_eq!(types.info(TypeId::STRING).size, 16);

        let name = i.intern("E");
        let e = types.declare(name);
        types.define(
            e,
            TypeKind::Enum(EnumDefn {
                name,
                params: Box::new([]),
                ctors: Box::new([
                    Ctor {
                        name: i.intern("A"),
                        fields: Box::new([]),
                    },
                    Ctor {
                        name: i.intern("B"),
                        fields: Box::new([TypeId::INT, TypeId::STRING]),
                    },
                ]),
            }),
        );
        assert_eq!(types.words(e), 4);
        assert_eq!(types.ctor_field_offsets(&[TypeId::INT, TypeId::STRING]), [1, 2]);
    }

    #[test]
    fn infinite_types() {
        let mut i = Interner::with_capacity(4);
        let mut types = TypeTable::new();
        let list = i.intern("List");
        let id = types.declare(list);
        let by_ref = types.intern(TypeKind::Slice { elem: id });
        types.define(
            id,
            TypeKind::Enum(EnumDefn {
                name: list,
                params: Box::new([]),
                ctors: Box::new([
                    Ctor {
                        name: i.intern("Nil"),
                        fields: Box::new([]),
                    },
                    Ctor {
                        name: i.intern("Cons"),
                        fields: Box::new([TypeId::INT, by_ref]),
                    },
                ]),
            }),
        );
        assert!(!types.is_infinite(id));

        let bad = i.intern("Bad");
        let bad_id = types.declare(bad);
        types.define(
            bad_id,
            TypeKind::Enum(EnumDefn {
                name: bad,
                params: Box::new([]),
                ctors: Box::new([Ctor {
                    name: i.intern("Again"),
                    fields: Box::new([bad_id]),
                }]),
            }),
        );
        assert!(types.is_infinite(bad_id));
    }
}
