use std::io;
use std::io::Write;

use crate::ast::*;
use crate::writer::Writer;

impl File {
    pub fn write<W: Write>(&self, out: W) -> io::Result<()> {
        if !self.nested_builders.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file still has an open conditional",
            ));
        }
        let mut writer = Writer::new(out);
        self.scope.write(&mut writer)?;
        writer.flush()
    }
}

impl Comment {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        for line in self.0.lines() {
            if line.is_empty() {
                writeln!(out, "//")?;
            } else {
                writeln!(out, "// {}", line)?;
            }
        }
        Ok(())
    }
}

impl Include {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        if self.system {
            writeln!(out, "#include <{}>", self.path)
        } else {
            writeln!(out, "#include \"{}\"", self.path)
        }
    }
}

impl Define {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        if let Some(value) = self.value.as_ref() {
            writeln!(out, "#define {} {}", self.name, value)
        } else {
            writeln!(out, "#define {}", self.name)
        }
    }
}

impl ConditionalExpression {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &ConditionalExpression::Defined(ref x) => write!(out, "defined({})", x),
            &ConditionalExpression::Not(ref x) => {
                write!(out, "!")?;
                x.write(out)
            }
        }
    }
}

impl GlobalConditional {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        assert!(!self.cases.is_empty());

        let mut first = true;

        for case in &self.cases {
            if first {
                write!(out, "#if ")?;
                first = false;
            } else {
                write!(out, "#elif ")?;
            }
            case.0.write(out)?;
            writeln!(out)?;
            case.1.write(out)?;
        }

        if let Some(fallthrough) = self.fallthrough.as_ref() {
            writeln!(out, "#else")?;
            fallthrough.write(out)?;
        }
        writeln!(out, "#endif")
    }
}

impl Declaration {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        if let Some(prefix) = self.prefix.as_ref() {
            write!(out, "{} ", prefix)?;
        }
        for specifier in &self.specifiers {
            specifier.write(out)?;
            write!(out, " ")?;
        }
        self.ty_specifier.write(out)?;
        if !self.declarator.is_empty() {
            write!(out, " ")?;
        }
        self.declarator.write(out)
    }
}

impl Specifier {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &Specifier::Extern => write!(out, "extern"),
            &Specifier::Const => write!(out, "const"),
        }
    }
}

impl TypeSpecifier {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &TypeSpecifier::Simple(ref x) => write!(out, "{}", x),
            &TypeSpecifier::Record(ref key, ref x) => {
                key.write(out)?;
                write!(out, " {}", x)
            }
            &TypeSpecifier::ElaboratedRecord(ref x) => x.write(out),
            &TypeSpecifier::ElaboratedEnum(ref x) => x.write(out),
        }
    }
}

impl Declarator {
    fn is_empty(&self) -> bool {
        match self {
            &Declarator::None => true,
            _ => false,
        }
    }

    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &Declarator::None => Ok(()),
            &Declarator::Identifier(ref x) => write!(out, "{}", x),
            &Declarator::Cv(ref cv, ref x) => {
                cv.write(out)?;
                if !x.is_empty() {
                    write!(out, " ")?;
                }
                self.write_inner(x, out)
            }
            &Declarator::Pointer(ref x) => {
                write!(out, "*")?;
                self.write_inner(x, out)
            }
            &Declarator::Array(ref x, ref size) => {
                self.write_inner(x, out)?;
                if let Some(size) = *size {
                    write!(out, "[{}]", size)
                } else {
                    write!(out, "[]")
                }
            }
            &Declarator::Function(ref x, ref args) => {
                self.write_inner(x, out)?;
                write!(out, "(")?;
                if args.is_empty() {
                    write!(out, "void")?;
                }
                let mut first = true;
                for arg in args {
                    if !first {
                        write!(out, ", ")?;
                    }
                    first = false;
                    arg.write(out)?;
                }
                write!(out, ")")
            }
        }
    }

    fn write_inner<F: Write>(&self, inner: &Declarator, out: &mut Writer<F>) -> io::Result<()> {
        if self.precedence() > inner.precedence() {
            write!(out, "(")?;
            inner.write(out)?;
            write!(out, ")")
        } else {
            inner.write(out)
        }
    }

    fn precedence(&self) -> usize {
        match self {
            &Declarator::None => 3,
            &Declarator::Identifier(..) => 3,
            &Declarator::Cv(..) => 1,
            &Declarator::Pointer(..) => 1,
            &Declarator::Array(..) => 2,
            &Declarator::Function(..) => 2,
        }
    }
}

impl CvQualifier {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &CvQualifier::Const => write!(out, "const"),
        }
    }
}

impl Definition {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        self.decl.write(out)?;
        write!(out, " = ")?;
        self.init.write(out)?;
        writeln!(out, ";")
    }
}

impl Expression {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &Expression::Constant(ref x) => write!(out, "{}", x),
        }
    }
}

impl GlobalSyntax {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        for item in &self.items {
            item.write(out)?;
        }
        Ok(())
    }
}

impl GlobalSyntaxItem {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &GlobalSyntaxItem::Whitespace(lines) => out.new_lines(lines),
            &GlobalSyntaxItem::Comment(ref x) => x.write(out),
            &GlobalSyntaxItem::Include(ref x) => x.write(out),
            &GlobalSyntaxItem::Define(ref x) => x.write(out),
            &GlobalSyntaxItem::Conditional(ref x) => x.write(out),
            &GlobalSyntaxItem::Typedef(ref x) => {
                write!(out, "typedef ")?;
                x.write(out)?;
                writeln!(out, ";")
            }
            &GlobalSyntaxItem::Declaration(ref x) => {
                x.write(out)?;
                writeln!(out, ";")
            }
            &GlobalSyntaxItem::Definition(ref x) => x.write(out),
        }
    }
}

impl Record {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        self.key.write(out)?;
        if let Some(tag) = self.tag.as_ref() {
            write!(out, " {}", tag)?;
        }
        out.open_brace()?;
        self.scope.write(out)?;
        out.close_brace()
    }
}

impl RecordKey {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        match self {
            &RecordKey::Struct => write!(out, "struct"),
            &RecordKey::Union => write!(out, "union"),
        }
    }
}

impl RecordSyntax {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        for item in &self.items {
            match item {
                &RecordSyntaxItem::Member(ref x) => {
                    x.write(out)?;
                    writeln!(out, ";")?;
                }
            }
        }
        Ok(())
    }
}

impl Enum {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        write!(out, "enum")?;
        if let Some(tag) = self.tag.as_ref() {
            write!(out, " {}", tag)?;
        }
        out.open_brace()?;
        self.scope.write(out)?;
        out.close_brace()
    }
}

impl EnumSyntax {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        for item in &self.items {
            match item {
                &EnumSyntaxItem::Enumerator(ref x) => x.write(out)?,
            }
        }
        Ok(())
    }
}

impl Enumerator {
    pub(crate) fn write<F: Write>(&self, out: &mut Writer<F>) -> io::Result<()> {
        if let Some(value) = self.value {
            writeln!(out, "{} = {},", self.name, value)
        } else {
            writeln!(out, "{},", self.name)
        }
    }
}
