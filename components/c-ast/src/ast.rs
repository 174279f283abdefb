#[derive(Clone, Debug)]
pub struct File {
    pub(crate) scope: GlobalSyntax,
    pub(crate) nested_builders: Vec<(NestedGlobalSyntax, GlobalSyntax)>,
}

#[derive(Clone, Debug)]
pub struct Comment(pub String);

#[derive(Clone, Debug)]
pub struct Include {
    pub system: bool,
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct Define {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Clone, Debug)]
pub enum ConditionalExpression {
    Defined(String),
    Not(Box<ConditionalExpression>),
}

#[derive(Clone, Debug)]
pub struct GlobalConditional {
    pub cases: Vec<(ConditionalExpression, GlobalSyntax)>,
    pub fallthrough: Option<GlobalSyntax>,
}

#[derive(Clone, Debug)]
pub struct Declaration {
    /// Free-form text before the specifiers, such as an export attribute.
    pub prefix: Option<String>,
    pub specifiers: Vec<Specifier>,
    pub ty_specifier: TypeSpecifier,
    pub declarator: Declarator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Specifier {
    Extern,
    Const,
}

#[derive(Clone, Debug)]
pub enum TypeSpecifier {
    Simple(String),
    Record(RecordKey, String),
    ElaboratedRecord(Record),
    ElaboratedEnum(Enum),
}

#[derive(Clone, Debug)]
pub enum Declarator {
    None,
    Identifier(String),
    Cv(CvQualifier, Box<Declarator>),
    Pointer(Box<Declarator>),
    Array(Box<Declarator>, Option<usize>),
    Function(Box<Declarator>, Vec<Declaration>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CvQualifier {
    Const,
}

/// A variable declaration together with its initializer.
#[derive(Clone, Debug)]
pub struct Definition {
    pub decl: Declaration,
    pub init: Expression,
}

#[derive(Clone, Debug)]
pub enum Expression {
    Constant(String),
}

#[derive(Clone, Debug)]
pub struct GlobalSyntax {
    pub items: Vec<GlobalSyntaxItem>,
}

#[derive(Clone, Debug)]
pub enum GlobalSyntaxItem {
    Whitespace(u32),
    Comment(Comment),
    Include(Include),
    Define(Define),
    Conditional(GlobalConditional),
    Typedef(Declaration),
    Declaration(Declaration),
    Definition(Definition),
}

#[derive(Clone, Debug)]
pub(crate) enum NestedGlobalSyntax {
    Conditional(ConditionalExpression),
}

#[derive(Clone, Debug)]
pub struct Record {
    pub key: RecordKey,
    pub tag: Option<String>,
    pub scope: RecordSyntax,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKey {
    Struct,
    Union,
}

#[derive(Clone, Debug)]
pub struct RecordSyntax {
    pub items: Vec<RecordSyntaxItem>,
}

#[derive(Clone, Debug)]
pub enum RecordSyntaxItem {
    Member(Declaration),
}

#[derive(Clone, Debug)]
pub struct Enum {
    pub tag: Option<String>,
    pub scope: EnumSyntax,
}

#[derive(Clone, Debug)]
pub struct EnumSyntax {
    pub items: Vec<EnumSyntaxItem>,
}

#[derive(Clone, Debug)]
pub enum EnumSyntaxItem {
    Enumerator(Enumerator),
}

#[derive(Clone, Debug)]
pub struct Enumerator {
    pub name: String,
    pub value: Option<i64>,
}
