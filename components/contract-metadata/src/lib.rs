//! Serializable description of a C layout contract: the items (structs,
//! unions, enums, typedefs), globals and exported functions that two
//! independently compiled components have to agree on.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::ops::Deref;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub mod layout;
pub mod model;
pub mod probe;

pub use layout::{
    compare, compute_layouts, DataModel, FieldLayout, Layout, LayoutError, LayoutMismatch,
};
pub use model::{build_model, Model, ModelError};

pub trait TopologicalVisit {
    /// Visit every item in reverse topological order of the item graph and
    /// call the closure.
    ///
    /// A true topological ordering does not exist in a graph if there is a
    /// cycle, in which case the closure will be called with a list of the
    /// paths in the current item which are part of a cycle. Those referenced
    /// items will have their callback called after the closure, instead of
    /// before it.
    fn visit_items_reverse_topological<F: FnMut(Path, Vec<Vec<Link>>)>(&self, callback: &mut F);
}

impl<'a> TopologicalVisit for &'a [Item] {
    fn visit_items_reverse_topological<F: FnMut(Path, Vec<Vec<Link>>)>(&self, callback: &mut F) {
        let mut context = TopologicalContext::new(self, callback);
        for (i, item) in self.iter().enumerate() {
            item.visit_items_reverse_topological(Path::new(i), LinkKind::Indirect, &mut context);
        }
    }
}

/// How an item refers to the next item of a link: by embedding its value
/// (`Direct`) or through a pointer (`Indirect`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkKind {
    Direct,
    Indirect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub path: Path,
    pub kind: LinkKind,
}

struct TopologicalContext<'a, F: FnMut(Path, Vec<Vec<Link>>) + 'a> {
    items: &'a [Item],
    callback: &'a mut F,
    visited: HashSet<Path>,
    processing: Vec<Link>,
    cycle_paths: Vec<Vec<Link>>,
}

impl<'a, F: FnMut(Path, Vec<Vec<Link>>)> TopologicalContext<'a, F> {
    fn new(items: &'a [Item], callback: &'a mut F) -> TopologicalContext<'a, F> {
        TopologicalContext {
            items,
            callback,
            visited: HashSet::new(),
            processing: Vec::new(),
            cycle_paths: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename = "mutability")]
pub enum Mutability {
    Const,
    Mut,
}

impl Mutability {
    pub fn is_const(&self) -> bool {
        *self == Mutability::Const
    }

    pub fn is_mutable(&self) -> bool {
        *self != Mutability::Const
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "pointer")]
pub struct Pointer {
    pub referenced: Box<Type>,
    pub mutability: Mutability,
}

impl Pointer {
    pub fn new(ty: Type, mutability: Mutability) -> Pointer {
        Pointer {
            referenced: Box::new(ty),
            mutability,
        }
    }

    pub fn for_each_path<F: FnMut(Path)>(&self, callback: &mut F) {
        self.referenced.for_each_path(callback);
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        context: &mut TopologicalContext<'a, F>,
    ) {
        self.referenced
            .visit_items_reverse_topological(true, context);
    }
}

/// Calling convention of an exported function.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename = "abi")]
pub enum Abi {
    Cdecl,
    Stdcall,
    Fastcall,
    C,
    System,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "function-signature")]
pub struct FunctionSignature {
    pub output: Box<Type>,
    pub inputs: Vec<Type>,
    pub abi: Abi,
}

impl FunctionSignature {
    pub fn new(output: Type, inputs: Vec<Type>, abi: Abi) -> FunctionSignature {
        FunctionSignature {
            output: Box::new(output),
            inputs,
            abi,
        }
    }

    pub fn for_each_path<F: FnMut(Path)>(&self, callback: &mut F) {
        self.output.for_each_path(callback);
        for arg in &self.inputs {
            arg.for_each_path(callback);
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "array")]
pub struct Array {
    pub referenced: Box<Type>,
    pub size: usize,
}

impl Array {
    pub fn new(ty: Type, size: usize) -> Array {
        Array {
            referenced: Box::new(ty),
            size,
        }
    }

    pub fn for_each_path<F: FnMut(Path)>(&self, callback: &mut F) {
        self.referenced.for_each_path(callback);
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        indirect: bool,
        context: &mut TopologicalContext<'a, F>,
    ) {
        self.referenced
            .visit_items_reverse_topological(indirect, context);
    }
}

/// Index of an item in `Contract::items`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename = "path")]
pub struct Path {
    pub index: usize,
}

impl Path {
    pub fn new(index: usize) -> Path {
        Path { index }
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        indirect: bool,
        context: &mut TopologicalContext<'a, F>,
    ) {
        let kind = if indirect {
            LinkKind::Indirect
        } else {
            LinkKind::Direct
        };

        context.items[self.index].visit_items_reverse_topological(*self, kind, context);
    }
}

/// A C type as written in a declaration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "type", rename_all = "lowercase", tag = "kind")]
pub enum Type {
    Void,

    /// Plain `char`, whose signedness is implementation-defined.
    Char,
    SChar,
    UChar,

    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,

    Float,
    Double,

    #[serde(rename = "Pointer")]
    Pointer(Pointer),

    #[serde(rename = "Array")]
    Array(Array),

    #[serde(rename = "Path")]
    Path(Path),
}

impl Type {
    pub fn ptr(ty: Type) -> Type {
        Type::Pointer(Pointer::new(ty, Mutability::Mut))
    }

    pub fn const_ptr(ty: Type) -> Type {
        Type::Pointer(Pointer::new(ty, Mutability::Const))
    }

    /// Wrap `ty` in `depth` levels of mutable pointers.
    pub fn ptr_n(ty: Type, depth: usize) -> Type {
        (0..depth).fold(ty, |ty, _| Type::ptr(ty))
    }

    pub fn array(ty: Type, size: usize) -> Type {
        Type::Array(Array::new(ty, size))
    }

    pub fn path(path: Path) -> Type {
        Type::Path(path)
    }

    /// The number of pointer levels wrapped around the innermost type.
    pub fn pointer_depth(&self) -> usize {
        match self {
            &Type::Pointer(ref pointer) => 1 + pointer.referenced.pointer_depth(),
            _ => 0,
        }
    }

    pub fn is_void(&self) -> bool {
        *self == Type::Void
    }

    pub fn for_each_path<F: FnMut(Path)>(&self, callback: &mut F) {
        match self {
            &Type::Pointer(ref pointer) => {
                pointer.for_each_path(callback);
            }
            &Type::Array(ref array) => {
                array.for_each_path(callback);
            }
            &Type::Path(path) => {
                callback(path);
            }
            _ => {}
        }
    }

    /// The item this type embeds by value, if any.
    fn is_sized_path(&self) -> Option<Path> {
        match self {
            &Type::Path(ref path) => Some(*path),
            &Type::Array(ref array) => array.referenced.is_sized_path(),
            _ => None,
        }
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        indirect: bool,
        context: &mut TopologicalContext<'a, F>,
    ) {
        match self {
            &Type::Pointer(ref pointer) => {
                pointer.visit_items_reverse_topological(context);
            }
            &Type::Array(ref array) => {
                array.visit_items_reverse_topological(indirect, context);
            }
            &Type::Path(ref path) => {
                path.visit_items_reverse_topological(indirect, context);
            }
            _ => {}
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "field")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

impl Field {
    pub fn new<S: Into<String>>(name: S, ty: Type) -> Field {
        Field {
            name: name.into(),
            ty,
        }
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        context: &mut TopologicalContext<'a, F>,
    ) {
        self.ty.visit_items_reverse_topological(false, context);
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "struct")]
pub struct Struct {
    pub fields: Vec<Field>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "union")]
pub struct Union {
    pub fields: Vec<Field>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "variant")]
pub struct Variant {
    pub name: String,
    pub discriminant: i64,
}

impl Variant {
    pub fn new<S: Into<String>>(name: S, discriminant: i64) -> Variant {
        Variant {
            name: name.into(),
            discriminant,
        }
    }
}

/// A C enumeration. Its storage is always `int`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "enum")]
pub struct Enum {
    pub variants: Vec<Variant>,
}

impl Enum {
    pub fn new(variants: Vec<Variant>) -> Enum {
        Enum { variants }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Eq, PartialEq)]
#[serde(rename = "reason", tag = "reason")]
pub enum Reason {
    /// Declared but never defined.
    Incomplete,
    #[serde(rename_all = "kebab-case")]
    DirectlyContainsOpaque { field: Option<String>, path: Path },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "item-kind", tag = "kind")]
pub enum ItemKind {
    #[serde(rename = "Struct")]
    Struct(Struct),
    #[serde(rename = "Union")]
    Union(Union),
    #[serde(rename = "Enum")]
    Enum(Enum),
    #[serde(rename = "Alias")]
    Alias {
        #[serde(rename = "type")]
        ty: Type,
    },
    #[serde(rename = "Opaque")]
    Opaque(Reason),
}

impl ItemKind {
    pub fn structure(fields: Vec<Field>) -> ItemKind {
        ItemKind::Struct(Struct { fields })
    }

    pub fn union(fields: Vec<Field>) -> ItemKind {
        ItemKind::Union(Union { fields })
    }

    pub fn alias(ty: Type) -> ItemKind {
        ItemKind::Alias { ty }
    }

    /// Fields of a struct or union, empty for every other kind.
    pub fn fields(&self) -> &[Field] {
        match self {
            &ItemKind::Struct(ref structure) => &structure.fields,
            &ItemKind::Union(ref union) => &union.fields,
            _ => &[],
        }
    }

    pub fn for_each_path<F: FnMut(Path)>(&self, callback: &mut F) {
        match self {
            &ItemKind::Struct(..) | &ItemKind::Union(..) => {
                for field in self.fields() {
                    field.ty.for_each_path(callback);
                }
            }
            &ItemKind::Alias { ref ty } => {
                ty.for_each_path(callback);
            }
            &ItemKind::Enum(..) | &ItemKind::Opaque(..) => {}
        }
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        context: &mut TopologicalContext<'a, F>,
    ) {
        match self {
            &ItemKind::Struct(..) | &ItemKind::Union(..) => {
                for field in self.fields() {
                    field.visit_items_reverse_topological(context);
                }
            }
            &ItemKind::Alias { ref ty } => {
                ty.visit_items_reverse_topological(false, context);
            }
            &ItemKind::Enum(..) | &ItemKind::Opaque(..) => {}
        }
    }
}

/// A named type. `name` is the typedef name used everywhere the type is
/// referenced; `tag` is the C tag (`struct type1`) when one exists.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "item")]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    pub node: ItemKind,
}

impl Item {
    pub fn new<S: Into<String>>(name: S, tag: Option<S>, node: ItemKind) -> Item {
        Item {
            name: name.into(),
            tag: tag.map(Into::into),
            node,
        }
    }

    fn visit_items_reverse_topological<'a, F: FnMut(Path, Vec<Vec<Link>>)>(
        &self,
        path: Path,
        kind: LinkKind,
        context: &mut TopologicalContext<'a, F>,
    ) {
        if context.visited.contains(&path) {
            return;
        }

        let link = Link { path, kind };

        if let Some(cycle_start) = context.processing.iter().rposition(|x| x.path == path) {
            let mut cycle: Vec<_> = (&context.processing[cycle_start..]).into();
            cycle.push(link);

            debug_assert!(cycle.len() >= 2);
            debug_assert!(cycle[0].path == cycle[cycle.len() - 1].path);
            // The link into this cycle doesn't matter, replace it with the
            // link from the end of the cycle to the beginning
            cycle[0].kind = cycle[cycle.len() - 1].kind;

            context.cycle_paths.push(cycle);
            return;
        }

        context.processing.push(link);

        self.node.visit_items_reverse_topological(context);

        context.processing.pop();
        context.visited.insert(path);

        let cycle_paths = mem::replace(&mut context.cycle_paths, Vec::new());
        (context.callback)(path, cycle_paths);
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "function")]
pub struct Function {
    pub name: String,
    #[serde(flatten)]
    pub signature: FunctionSignature,
}

impl Function {
    pub fn new<S: Into<String>>(name: S, signature: FunctionSignature) -> Function {
        Function {
            name: name.into(),
            signature,
        }
    }
}

/// An exported variable with an optional initializer expression.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "global")]
pub struct Global {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub init: Option<String>,
}

/// A preprocessor definition the contract depends on. With a `condition`,
/// `value` only applies when that macro is defined and `fallback` otherwise.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "define")]
pub struct Define {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename = "contract")]
pub struct Contract {
    #[serde(rename = "contract-name")]
    pub name: String,
    pub items: Vec<Item>,
    #[serde(default)]
    pub defines: Vec<Define>,
    #[serde(default)]
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Contract {
    pub fn item(&self, path: Path) -> &Item {
        &self.items[path.index]
    }

    pub fn find_item(&self, name: &str) -> Option<Path> {
        self.items
            .iter()
            .position(|item| item.name == name)
            .map(Path::new)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    /// Check that every path resolves and that names are unique.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let mut paths = PathCheck::new(self.items.len());
        for item in &self.items {
            item.node.for_each_path(&mut |path| paths.check(path));
        }
        for global in &self.globals {
            global.ty.for_each_path(&mut |path| paths.check(path));
        }
        for function in &self.functions {
            function.signature.for_each_path(&mut |path| paths.check(path));
        }
        paths.finish()?;

        let mut names = HashSet::new();
        for name in self
            .items
            .iter()
            .map(|x| &x.name)
            .chain(self.functions.iter().map(|x| &x.name))
            .chain(self.globals.iter().map(|x| &x.name))
        {
            if !names.insert(name) {
                return Err(AnalysisError::DuplicateName(name.to_owned()));
            }
        }

        Ok(())
    }
}

/// Remembers the first path that is out of bounds for `len` items.
struct PathCheck {
    len: usize,
    dangling: Option<usize>,
}

impl PathCheck {
    fn new(len: usize) -> PathCheck {
        PathCheck {
            len,
            dangling: None,
        }
    }

    fn check(&mut self, path: Path) {
        if path.index >= self.len && self.dangling.is_none() {
            self.dangling = Some(path.index);
        }
    }

    fn finish(self) -> Result<(), AnalysisError> {
        match self.dangling {
            Some(index) => Err(AnalysisError::DanglingPath {
                index,
                len: self.len,
            }),
            None => Ok(()),
        }
    }
}

impl TopologicalVisit for Contract {
    fn visit_items_reverse_topological<F: FnMut(Path, Vec<Vec<Link>>)>(&self, callback: &mut F) {
        self.items.deref().visit_items_reverse_topological(callback);
    }
}

/// Incrementally assembles a `Contract`, handing out paths by name so items
/// can refer to each other before they are defined.
pub struct ContractBuilder {
    name: String,
    items: Vec<Option<Item>>,
    names: HashMap<String, Path>,
    defines: Vec<Define>,
    globals: Vec<Global>,
    functions: Vec<Function>,
}

impl ContractBuilder {
    pub fn new<S: Into<String>>(name: S) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            items: Vec::new(),
            names: HashMap::new(),
            defines: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// The path of the item called `name`, declaring it if needed.
    pub fn path(&mut self, name: &str) -> Path {
        if let Some(path) = self.names.get(name) {
            return *path;
        }
        let path = Path::new(self.items.len());
        self.items.push(None);
        self.names.insert(name.to_owned(), path);
        path
    }

    pub fn item(&mut self, name: &str, tag: Option<&str>, node: ItemKind) -> Path {
        let path = self.path(name);
        self.items[path.index] = Some(Item::new(name, tag, node));
        path
    }

    pub fn define(&mut self, name: &str, value: Option<&str>) -> &mut ContractBuilder {
        self.defines.push(Define {
            name: name.to_owned(),
            value: value.map(|x| x.to_owned()),
            condition: None,
            fallback: None,
        });
        self
    }

    /// Define `name` as `value` when `condition` is defined, as `fallback`
    /// otherwise.
    pub fn define_if(
        &mut self,
        name: &str,
        condition: &str,
        value: &str,
        fallback: &str,
    ) -> &mut ContractBuilder {
        self.defines.push(Define {
            name: name.to_owned(),
            value: Some(value.to_owned()),
            condition: Some(condition.to_owned()),
            fallback: Some(fallback.to_owned()),
        });
        self
    }

    pub fn global(&mut self, name: &str, ty: Type, init: Option<&str>) -> &mut ContractBuilder {
        self.globals.push(Global {
            name: name.to_owned(),
            ty,
            init: init.map(|x| x.to_owned()),
        });
        self
    }

    pub fn function(&mut self, name: &str, output: Type, inputs: Vec<Type>) -> &mut ContractBuilder {
        self.functions.push(Function::new(
            name,
            FunctionSignature::new(output, inputs, Abi::C),
        ));
        self
    }

    /// Finish the contract. Items that were referenced but never defined
    /// become incomplete opaque types.
    pub fn build(self) -> Result<Contract, AnalysisError> {
        let mut names: Vec<_> = self.names.into_iter().collect();
        names.sort_by_key(|&(_, path)| path);

        let items = self
            .items
            .into_iter()
            .zip(names)
            .map(|(item, (name, _))| {
                item.unwrap_or_else(|| {
                    log::debug!("`{}` is declared but never defined", name);
                    Item::new(name.clone(), Some(name), ItemKind::Opaque(Reason::Incomplete))
                })
            })
            .collect();

        let contract = Contract {
            name: self.name,
            items,
            defines: self.defines,
            globals: self.globals,
            functions: self.functions,
        };
        contract.validate()?;
        analyze(&contract.items)?;
        Ok(contract)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub opaque_set: HashMap<Path, Reason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("infinite type size: {} embed each other by value", .names.join(" -> "))]
    InfiniteTypeSize { names: Vec<String>, cycle: Vec<Link> },
    #[error("path {index} does not refer to any of the {len} items")]
    DanglingPath { index: usize, len: usize },
    #[error("the name `{0}` is defined more than once")]
    DuplicateName(String),
}

/// Find types that can never be laid out: cycles with no pointer indirection,
/// and items that embed an opaque item by value.
pub fn analyze(items: &[Item]) -> Result<Analysis, AnalysisError> {
    let mut paths = PathCheck::new(items.len());
    for item in items {
        item.node.for_each_path(&mut |path| paths.check(path));
    }
    paths.finish()?;

    // Aliases can be direct references to opaque items, but then they
    // themselves cannot be used directly
    let mut opaque_aliases = HashSet::new();
    let mut opaque_set = HashMap::new();
    let mut failure = None;

    items.visit_items_reverse_topological(&mut |path: Path, cycles| {
        let item = &items[path.index];

        if failure.is_some() {
            return;
        }

        for cycle in cycles {
            let infinite_size = cycle.iter().all(|x| x.kind == LinkKind::Direct);
            if infinite_size {
                let names = cycle
                    .iter()
                    .map(|x| items[x.path.index].name.clone())
                    .collect();
                failure = Some(AnalysisError::InfiniteTypeSize { names, cycle });
                return;
            }
        }

        match &item.node {
            &ItemKind::Struct(..) | &ItemKind::Union(..) => {
                for field in item.node.fields() {
                    if let Some(ty_path) = field.ty.is_sized_path() {
                        if opaque_set.contains_key(&ty_path) || opaque_aliases.contains(&ty_path) {
                            opaque_set.insert(
                                path,
                                Reason::DirectlyContainsOpaque {
                                    field: Some(field.name.clone()),
                                    path: ty_path,
                                },
                            );
                            return;
                        }
                    }
                }
            }
            &ItemKind::Alias { ref ty } => {
                if let Some(ty_path) = ty.is_sized_path() {
                    if opaque_set.contains_key(&ty_path) || opaque_aliases.contains(&ty_path) {
                        opaque_aliases.insert(path);
                    }
                }
            }
            &ItemKind::Enum(..) => {}
            &ItemKind::Opaque(ref reason) => {
                opaque_set.insert(path, reason.clone());
            }
        }
    });

    if let Some(failure) = failure {
        Err(failure)
    } else {
        Ok(Analysis { opaque_set })
    }
}
