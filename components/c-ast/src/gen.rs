use crate::ast::*;

pub fn new() -> File {
    File {
        scope: GlobalSyntax { items: Vec::new() },
        nested_builders: Vec::new(),
    }
}

pub mod global {
    use crate::ast::*;

    pub fn scope(items: &[GlobalSyntaxItem]) -> GlobalSyntax {
        GlobalSyntax {
            items: items.to_vec(),
        }
    }

    pub fn ws(lines: u32) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Whitespace(lines)
    }

    pub fn comment<S: AsRef<str>>(comment: S) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Comment(Comment(comment.as_ref().to_owned()))
    }

    pub fn include<S: AsRef<str>>(system: bool, path: S) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Include(Include {
            system,
            path: path.as_ref().to_owned(),
        })
    }

    pub fn define<S: AsRef<str>>(name: S, value: Option<S>) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Define(Define {
            name: name.as_ref().to_owned(),
            value: value.map(|x| x.as_ref().to_owned()),
        })
    }

    pub fn complex_conditional(
        cases: &[(ConditionalExpression, GlobalSyntax)],
        fallthrough: Option<GlobalSyntax>,
    ) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Conditional(GlobalConditional {
            cases: cases.to_vec(),
            fallthrough,
        })
    }

    pub fn typedef(decl: Declaration) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Typedef(decl)
    }

    pub fn decl(decl: Declaration) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Declaration(decl)
    }

    pub fn def(def: Definition) -> GlobalSyntaxItem {
        GlobalSyntaxItem::Definition(def)
    }
}

pub mod func {
    use crate::ast::*;
    use crate::gen::ty;

    pub fn decl<S: AsRef<str>>(
        prefix: Option<String>,
        specifiers: &[Specifier],
        ret: ty::Type,
        name: S,
        args: &[(Option<String>, ty::Type)],
    ) -> Declaration {
        ty::to_function_declaration(prefix, specifiers, &ret, name.as_ref(), args)
    }
}

pub mod record {
    use crate::ast::*;

    /// `struct tag name`, the declaration a forward typedef is built from.
    pub fn named_decl<S: AsRef<str>>(key: RecordKey, tag: S, name: S) -> Declaration {
        Declaration {
            prefix: None,
            specifiers: Vec::new(),
            ty_specifier: TypeSpecifier::Record(key, tag.as_ref().to_owned()),
            declarator: Declarator::Identifier(name.as_ref().to_owned()),
        }
    }

    pub fn def(
        key: RecordKey,
        tag: Option<String>,
        items: &[RecordSyntaxItem],
        name: Option<String>,
    ) -> Declaration {
        let record = Record {
            key,
            tag,
            scope: scope(items),
        };

        Declaration {
            prefix: None,
            specifiers: Vec::new(),
            ty_specifier: TypeSpecifier::ElaboratedRecord(record),
            declarator: name
                .map(Declarator::Identifier)
                .unwrap_or(Declarator::None),
        }
    }

    pub fn scope(items: &[RecordSyntaxItem]) -> RecordSyntax {
        RecordSyntax {
            items: items.to_vec(),
        }
    }

    pub fn member(decl: Declaration) -> RecordSyntaxItem {
        RecordSyntaxItem::Member(decl)
    }
}

pub mod enumeration {
    use crate::ast::*;

    pub fn def(tag: Option<String>, items: &[EnumSyntaxItem], name: Option<String>) -> Declaration {
        let enumeration = Enum {
            tag,
            scope: scope(items),
        };

        Declaration {
            prefix: None,
            specifiers: Vec::new(),
            ty_specifier: TypeSpecifier::ElaboratedEnum(enumeration),
            declarator: name
                .map(Declarator::Identifier)
                .unwrap_or(Declarator::None),
        }
    }

    pub fn scope(items: &[EnumSyntaxItem]) -> EnumSyntax {
        EnumSyntax {
            items: items.to_vec(),
        }
    }

    pub fn enumerator<S: AsRef<str>>(name: S, value: Option<i64>) -> EnumSyntaxItem {
        EnumSyntaxItem::Enumerator(Enumerator {
            name: name.as_ref().to_owned(),
            value,
        })
    }
}

pub mod conditional {
    use crate::ast::*;

    pub fn defined<S: AsRef<str>>(define: S) -> ConditionalExpression {
        ConditionalExpression::Defined(define.as_ref().to_owned())
    }

    pub fn not(x: ConditionalExpression) -> ConditionalExpression {
        ConditionalExpression::Not(Box::new(x))
    }
}

pub mod var {
    use crate::ast::*;
    use crate::gen::ty;

    pub fn decl<S: AsRef<str>>(specifiers: &[Specifier], ty: ty::Type, name: S) -> Declaration {
        ty::to_named_declaration(specifiers, &ty, name.as_ref())
    }

    pub fn def<S: AsRef<str>>(
        specifiers: &[Specifier],
        ty: ty::Type,
        name: S,
        init: Expression,
    ) -> Definition {
        Definition {
            decl: ty::to_named_declaration(specifiers, &ty, name.as_ref()),
            init,
        }
    }
}

pub mod ty {
    use crate::ast::*;

    #[derive(Clone, Debug)]
    pub enum Type {
        Identifier(String),
        /// The wrapped type is `const`. On a named type this becomes a
        /// specifier, on a pointer it qualifies the pointer itself.
        Const(Box<Type>),
        Pointer(Box<Type>),
        Array(Box<Type>, Option<usize>),
    }

    macro_rules! primitive {
        ($name:ident, $spelling:expr) => {
            pub fn $name() -> Type {
                Type::Identifier($spelling.to_owned())
            }
        };
    }

    primitive!(void, "void");
    primitive!(char, "char");
    primitive!(schar, "signed char");
    primitive!(uchar, "unsigned char");
    primitive!(short, "short");
    primitive!(ushort, "unsigned short");
    primitive!(int, "int");
    primitive!(uint, "unsigned int");
    primitive!(long, "long");
    primitive!(ulong, "unsigned long");
    primitive!(longlong, "long long");
    primitive!(ulonglong, "unsigned long long");
    primitive!(float, "float");
    primitive!(double, "double");

    pub fn ident<S: AsRef<str>>(name: S) -> Type {
        Type::Identifier(name.as_ref().to_owned())
    }

    pub fn ptr(ty: Type) -> Type {
        Type::Pointer(Box::new(ty))
    }

    pub fn constant(ty: Type) -> Type {
        Type::Const(Box::new(ty))
    }

    /// Pointer to a `const` value.
    pub fn const_ptr(ty: Type) -> Type {
        ptr(constant(ty))
    }

    pub fn array(ty: Type, size: Option<usize>) -> Type {
        Type::Array(Box::new(ty), size)
    }

    pub(crate) fn to_function_declaration(
        prefix: Option<String>,
        specifiers: &[Specifier],
        ret: &Type,
        name: &str,
        args: &[(Option<String>, Type)],
    ) -> Declaration {
        let base = Declarator::Function(
            Box::new(Declarator::Identifier(name.to_owned())),
            args.iter()
                .map(|&(ref name, ref ty)| match name {
                    Some(name) => to_named_declaration(&[], ty, name),
                    None => to_unnamed_declaration(&[], ty),
                })
                .collect(),
        );

        Declaration {
            prefix,
            specifiers: with_const(specifiers, ret),
            ty_specifier: get_ty_specifier(ret),
            declarator: build_declarator(ret, base),
        }
    }

    pub(crate) fn to_named_declaration(
        specifiers: &[Specifier],
        ty: &Type,
        name: &str,
    ) -> Declaration {
        Declaration {
            prefix: None,
            specifiers: with_const(specifiers, ty),
            ty_specifier: get_ty_specifier(ty),
            declarator: build_declarator(ty, Declarator::Identifier(name.to_owned())),
        }
    }

    pub(crate) fn to_unnamed_declaration(specifiers: &[Specifier], ty: &Type) -> Declaration {
        Declaration {
            prefix: None,
            specifiers: with_const(specifiers, ty),
            ty_specifier: get_ty_specifier(ty),
            declarator: build_declarator(ty, Declarator::None),
        }
    }

    fn with_const(specifiers: &[Specifier], ty: &Type) -> Vec<Specifier> {
        let mut specs = specifiers.to_vec();
        if base_is_const(ty) && !specs.contains(&Specifier::Const) {
            specs.push(Specifier::Const);
        }
        specs
    }

    fn base_is_const(ty: &Type) -> bool {
        match ty {
            &Type::Identifier(..) => false,
            &Type::Const(ref inner) => match **inner {
                Type::Identifier(..) => true,
                ref inner => base_is_const(inner),
            },
            &Type::Pointer(ref ty) => base_is_const(ty),
            &Type::Array(ref ty, _) => base_is_const(ty),
        }
    }

    pub(crate) fn get_ty_specifier(ty: &Type) -> TypeSpecifier {
        match ty {
            &Type::Identifier(ref name) => TypeSpecifier::Simple(name.clone()),
            &Type::Const(ref ty) => get_ty_specifier(ty),
            &Type::Pointer(ref ty) => get_ty_specifier(ty),
            &Type::Array(ref ty, _) => get_ty_specifier(ty),
        }
    }

    /// Wrap `inner` in the declarators of `ty`, outermost type constructor
    /// closest to the name.
    pub(crate) fn build_declarator(ty: &Type, inner: Declarator) -> Declarator {
        match ty {
            &Type::Identifier(..) => inner,
            &Type::Const(ref ty) => match **ty {
                Type::Identifier(..) => inner,
                ref ty => build_declarator(ty, Declarator::Cv(CvQualifier::Const, Box::new(inner))),
            },
            &Type::Pointer(ref ty) => build_declarator(ty, Declarator::Pointer(Box::new(inner))),
            &Type::Array(ref ty, size) => {
                build_declarator(ty, Declarator::Array(Box::new(inner), size))
            }
        }
    }
}

pub mod expr {
    use crate::ast::*;

    pub fn constant<S: AsRef<str>>(value: S) -> Expression {
        Expression::Constant(value.as_ref().to_owned())
    }
}
