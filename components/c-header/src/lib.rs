use c_ast as c;
use contract_metadata as meta;

use c::ast;
use log::debug;
use meta::Path;

use std::collections::{HashMap, HashSet};
use std::io;
use std::io::Write;

const VERSION: &str = concat!("Generated with c-header version ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Config {
    /// Optional text to output at the beginning of the file
    pub header: Option<String>,
    /// Optional text to output at the end of the file
    pub trailer: Option<String>,
    /// Optional name to use for an include guard
    pub include_guard: Option<String>,
    /// A list of additional includes to put at the beginning of the generated header
    pub includes: Vec<String>,
    /// A list of additional system includes to put at the beginning of the generated header
    pub sys_includes: Vec<String>,
    /// Optional text to output at major sections to deter manual editing
    pub autogen_warning: Option<String>,
    /// Include a comment with the version of c-header used to generate the file
    pub include_version: bool,
    /// Text put in front of every exported function prototype
    pub export_prefix: Option<String>,
    /// Macros defined without a value ahead of the contract's own defines,
    /// such as `TESTBOOL`
    pub flags: Vec<String>,
    /// Declare globals `extern` instead of defining them with their initializer
    pub extern_globals: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            header: None,
            trailer: None,
            include_guard: None,
            includes: Vec::new(),
            sys_includes: Vec::new(),
            autogen_warning: None,
            include_version: true,
            export_prefix: Some("__declspec(dllexport)".to_owned()),
            flags: Vec::new(),
            extern_globals: false,
        }
    }
}

struct Context<'a> {
    contract: &'a meta::Contract,
    declared: HashSet<Path>,
}

impl<'a> Context<'a> {
    /// The tag a struct, union or enum is declared with.
    fn tag(&self, path: Path) -> &'a str {
        let item = self.contract.item(path);
        item.tag.as_ref().unwrap_or(&item.name)
    }
}

trait Convert {
    type Out;
    fn convert(&self, ctx: &Context) -> Self::Out;
}

impl Convert for meta::Type {
    type Out = c::ty::Type;

    fn convert(&self, ctx: &Context) -> Self::Out {
        match self {
            &meta::Type::Void => c::ty::void(),
            &meta::Type::Char => c::ty::char(),
            &meta::Type::SChar => c::ty::schar(),
            &meta::Type::UChar => c::ty::uchar(),
            &meta::Type::Short => c::ty::short(),
            &meta::Type::UShort => c::ty::ushort(),
            &meta::Type::Int => c::ty::int(),
            &meta::Type::UInt => c::ty::uint(),
            &meta::Type::Long => c::ty::long(),
            &meta::Type::ULong => c::ty::ulong(),
            &meta::Type::LongLong => c::ty::longlong(),
            &meta::Type::ULongLong => c::ty::ulonglong(),
            &meta::Type::Float => c::ty::float(),
            &meta::Type::Double => c::ty::double(),
            &meta::Type::Pointer(ref pointer) => {
                if pointer.mutability.is_const() {
                    c::ty::const_ptr(pointer.referenced.convert(ctx))
                } else {
                    c::ty::ptr(pointer.referenced.convert(ctx))
                }
            }
            &meta::Type::Array(ref array) => {
                c::ty::array(array.referenced.convert(ctx), Some(array.size))
            }
            &meta::Type::Path(path) => c::ty::ident(&ctx.contract.item(path).name),
        }
    }
}

impl Convert for meta::Field {
    type Out = ast::Declaration;

    fn convert(&self, ctx: &Context) -> Self::Out {
        c::var::decl(&[], self.ty.convert(ctx), &self.name)
    }
}

trait Record {
    fn key(&self) -> ast::RecordKey;
    fn fields(&self) -> &[meta::Field];

    /// `typedef struct tag Name;`
    fn to_declaration(&self, path: Path, ctx: &Context) -> ast::Declaration {
        let item = ctx.contract.item(path);
        c::record::named_decl(self.key(), ctx.tag(path), item.name.as_str())
    }

    /// The full definition, typedef'd to the item name unless a forward
    /// declaration already introduced it.
    fn to_definition(&self, path: Path, ctx: &Context) -> ast::GlobalSyntaxItem {
        let item = ctx.contract.item(path);
        let members: Vec<_> = self
            .fields()
            .iter()
            .map(|field| c::record::member(field.convert(ctx)))
            .collect();

        let tag = Some(ctx.tag(path).to_owned());
        if ctx.declared.contains(&path) {
            c::global::decl(c::record::def(self.key(), tag, &members, None))
        } else {
            c::global::typedef(c::record::def(
                self.key(),
                tag,
                &members,
                Some(item.name.clone()),
            ))
        }
    }
}

impl Record for meta::Struct {
    fn key(&self) -> ast::RecordKey {
        ast::RecordKey::Struct
    }

    fn fields(&self) -> &[meta::Field] {
        &self.fields
    }
}

impl Record for meta::Union {
    fn key(&self) -> ast::RecordKey {
        ast::RecordKey::Union
    }

    fn fields(&self) -> &[meta::Field] {
        &self.fields
    }
}

fn gen_enum(item: &meta::Item, enumeration: &meta::Enum) -> ast::Declaration {
    let enumerators: Vec<_> = enumeration
        .variants
        .iter()
        .map(|variant| c::enumeration::enumerator(&variant.name, Some(variant.discriminant)))
        .collect();
    c::enumeration::def(item.tag.clone(), &enumerators, Some(item.name.clone()))
}

#[derive(Debug, PartialEq)]
enum Output {
    Declaration(Path),
    Definition(Path),
}

fn is_record(item: &meta::Item) -> bool {
    match &item.node {
        &meta::ItemKind::Struct(..) | &meta::ItemKind::Union(..) => true,
        _ => false,
    }
}

/// Something an item's definition mentions. `complete` when the full type
/// must be known at that point, `false` when a forward declared record name
/// will do.
struct Need {
    path: Path,
    complete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    InProgress,
    Defined,
}

fn collect_needs(
    contract: &meta::Contract,
    ty: &meta::Type,
    behind_pointer: bool,
    needs: &mut Vec<Need>,
) {
    match ty {
        &meta::Type::Pointer(ref pointer) => {
            collect_needs(contract, &pointer.referenced, true, needs)
        }
        &meta::Type::Array(ref array) => {
            collect_needs(contract, &array.referenced, behind_pointer, needs)
        }
        &meta::Type::Path(path) => needs.push(Need {
            path,
            // Aliases, enums and opaque typedefs can't be introduced ahead of
            // their definition.
            complete: !behind_pointer || !is_record(contract.item(path)),
        }),
        _ => {}
    }
}

struct Order<'a> {
    contract: &'a meta::Contract,
    state: HashMap<Path, State>,
    declared: HashSet<Path>,
    outputs: Vec<Output>,
}

impl<'a> Order<'a> {
    fn needs(&self, path: Path) -> Vec<Need> {
        let node = &self.contract.item(path).node;
        let mut needs = Vec::new();
        match node {
            &meta::ItemKind::Struct(..) | &meta::ItemKind::Union(..) => {
                for field in node.fields() {
                    collect_needs(self.contract, &field.ty, false, &mut needs);
                }
            }
            &meta::ItemKind::Alias { ref ty } => collect_needs(self.contract, ty, false, &mut needs),
            &meta::ItemKind::Enum(..) | &meta::ItemKind::Opaque(..) => {}
        }
        needs
    }

    /// Whether defining `start` would need the complete type of an item
    /// that is still being defined.
    fn reaches_in_progress(&self, start: Path) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(path) = stack.pop() {
            match self.state.get(&path) {
                Some(&State::InProgress) => return true,
                Some(&State::Defined) => continue,
                None => {}
            }
            if !seen.insert(path) {
                continue;
            }
            stack.extend(
                self.needs(path)
                    .into_iter()
                    .filter(|need| need.complete)
                    .map(|need| need.path),
            );
        }
        false
    }

    fn declare(&mut self, path: Path) {
        if self.declared.insert(path) {
            self.outputs.push(Output::Declaration(path));
        }
    }

    fn define(&mut self, path: Path) -> io::Result<()> {
        self.state.insert(path, State::InProgress);

        for need in self.needs(path) {
            match self.state.get(&need.path).cloned() {
                Some(State::Defined) => {}
                Some(State::InProgress) if need.complete => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "`{}` closes a reference cycle but cannot be forward declared",
                            self.contract.item(need.path).name
                        ),
                    ));
                }
                Some(State::InProgress) => self.declare(need.path),
                None if !need.complete && self.declared.contains(&need.path) => {}
                None if need.complete || !self.reaches_in_progress(need.path) => {
                    self.define(need.path)?
                }
                None => self.declare(need.path),
            }
        }

        self.state.insert(path, State::Defined);
        self.outputs.push(Output::Definition(path));
        Ok(())
    }
}

/// Order items so that every item is defined after the items it uses by
/// value. Records only mentioned through pointers are defined first when
/// possible and forward declared when they are part of a reference cycle.
fn compute_order(contract: &meta::Contract) -> io::Result<Vec<Output>> {
    let mut order = Order {
        contract,
        state: HashMap::new(),
        declared: HashSet::new(),
        outputs: Vec::new(),
    };

    for index in 0..contract.items.len() {
        let path = Path::new(index);
        if !order.state.contains_key(&path) {
            order.define(path)?;
        }
    }
    Ok(order.outputs)
}

fn build(contract: &meta::Contract, config: &Config) -> io::Result<ast::File> {
    contract
        .validate()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let order = compute_order(contract)?;
    debug!(
        "emitting {} items of `{}` in {} steps",
        contract.items.len(),
        contract.name,
        order.len()
    );

    let mut ctx = Context {
        contract,
        declared: HashSet::new(),
    };

    let mut file = c::new();

    if config.include_version {
        file.append(c::global::comment(VERSION));
    }

    if let Some(header) = config.header.as_ref() {
        file.append(c::global::comment(header));
    }

    if let Some(include_guard) = config.include_guard.as_ref() {
        file.enter_conditional(c::conditional::not(c::conditional::defined(
            include_guard.to_owned(),
        )));
        file.append(c::global::define(include_guard, None));
    }

    if !config.sys_includes.is_empty() || !config.includes.is_empty() {
        file.append(c::global::ws(1));
    }
    for include in &config.sys_includes {
        file.append(c::global::include(true, include));
    }
    for include in &config.includes {
        file.append(c::global::include(false, include));
    }

    if !config.flags.is_empty() || !contract.defines.is_empty() {
        file.append(c::global::ws(1));
    }
    for flag in &config.flags {
        file.append(c::global::define(flag, None));
    }
    for define in &contract.defines {
        let item = c::global::define(&define.name, define.value.as_ref());
        match define.condition.as_ref() {
            Some(condition) => {
                let fallback = c::global::define(&define.name, define.fallback.as_ref());
                file.append(c::global::complex_conditional(
                    &[(c::conditional::defined(condition), c::global::scope(&[item]))],
                    Some(c::global::scope(&[fallback])),
                ));
            }
            None => {
                file.append(item);
            }
        }
    }

    if let Some(autogen_warning) = config.autogen_warning.as_ref() {
        file.append(c::global::ws(1));
        file.append(c::global::comment(autogen_warning));
    }

    // Items
    for output in order {
        file.append(c::global::ws(1));

        match output {
            Output::Declaration(path) => {
                let item = contract.item(path);
                debug!("forward declaring `{}`", item.name);

                let decl = match &item.node {
                    &meta::ItemKind::Struct(ref structure) => structure.to_declaration(path, &ctx),
                    &meta::ItemKind::Union(ref union) => union.to_declaration(path, &ctx),
                    // Only records are ever forward declared
                    _ => continue,
                };
                file.append(c::global::typedef(decl));
                ctx.declared.insert(path);
            }
            Output::Definition(path) => {
                let item = contract.item(path);

                match &item.node {
                    &meta::ItemKind::Struct(ref structure) => {
                        file.append(structure.to_definition(path, &ctx));
                    }
                    &meta::ItemKind::Union(ref union) => {
                        file.append(union.to_definition(path, &ctx));
                    }
                    &meta::ItemKind::Enum(ref enumeration) => {
                        file.append(c::global::typedef(gen_enum(item, enumeration)));
                    }
                    &meta::ItemKind::Alias { ref ty } => {
                        let def = c::var::decl(&[], ty.convert(&ctx), &item.name);
                        file.append(c::global::typedef(def));
                    }
                    &meta::ItemKind::Opaque(..) => {
                        let decl = c::record::named_decl(
                            ast::RecordKey::Struct,
                            ctx.tag(path),
                            item.name.as_str(),
                        );
                        file.append(c::global::typedef(decl));
                    }
                }
            }
        }
    }

    // Globals
    if !contract.globals.is_empty() {
        file.append(c::global::ws(1));
    }
    for global in &contract.globals {
        let ty = global.ty.convert(&ctx);
        match global.init.as_ref() {
            Some(init) if !config.extern_globals => {
                file.append(c::global::def(c::var::def(
                    &[],
                    ty,
                    &global.name,
                    c::expr::constant(init),
                )));
            }
            _ => {
                let specifiers: &[ast::Specifier] = if config.extern_globals {
                    &[ast::Specifier::Extern]
                } else {
                    &[]
                };
                file.append(c::global::decl(c::var::decl(specifiers, ty, &global.name)));
            }
        }
    }

    if let Some(autogen_warning) = config.autogen_warning.as_ref() {
        file.append(c::global::ws(1));
        file.append(c::global::comment(autogen_warning));
    }

    // Functions
    if !contract.functions.is_empty() {
        file.append(c::global::ws(1));
    }
    for function in &contract.functions {
        let decl = c::func::decl(
            config.export_prefix.clone(),
            &[],
            function.signature.output.convert(&ctx),
            &function.name,
            &function
                .signature
                .inputs
                .iter()
                .map(|x| (None, x.convert(&ctx)))
                .collect::<Vec<_>>(),
        );
        file.append(c::global::decl(decl));
    }

    if config.include_guard.is_some() {
        file.append(c::global::ws(1));
        file.leave();
    }

    if let Some(trailer) = config.trailer.as_ref() {
        file.append(c::global::comment(trailer));
    }

    Ok(file)
}

/// Render `contract` as a C header.
pub fn generate<W: Write>(contract: &meta::Contract, config: &Config, out: W) -> io::Result<()> {
    build(contract, config)?.write(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meta::{ContractBuilder, Field, ItemKind, Type};

    fn render(contract: &meta::Contract, config: &Config) -> String {
        let mut out = Vec::new();
        generate(contract, config, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn bare() -> Config {
        Config {
            include_version: false,
            export_prefix: None,
            ..Config::default()
        }
    }

    #[test]
    fn self_reference_is_forward_declared() {
        let mut builder = ContractBuilder::new("list");
        let node = builder.path("Node");
        builder.item(
            "Node",
            Some("node"),
            ItemKind::structure(vec![
                Field::new("value", Type::Int),
                Field::new("next", Type::ptr(Type::Path(node))),
            ]),
        );
        builder.function("walk", Type::Int, vec![Type::ptr(Type::Path(node))]);
        let contract = builder.build().unwrap();

        assert_eq!(
            render(&contract, &bare()),
            "\n\
             typedef struct node Node;\n\
             \n\
             struct node {\n    int value;\n    Node *next;\n};\n\
             \n\
             int walk(Node *);\n"
        );
    }

    #[test]
    fn mutual_records_declare_one_side() {
        let mut builder = ContractBuilder::new("mutual");
        let a = builder.path("A");
        let b = builder.path("B");
        builder.item(
            "A",
            Some("a"),
            ItemKind::structure(vec![Field::new("b", Type::ptr(Type::Path(b)))]),
        );
        builder.item(
            "B",
            Some("b"),
            ItemKind::union(vec![Field::new("a", Type::ptr(Type::Path(a)))]),
        );
        let contract = builder.build().unwrap();

        let order = compute_order(&contract).unwrap();
        assert_eq!(
            order,
            vec![Output::Declaration(a), Output::Definition(b), Output::Definition(a)]
        );

        let header = render(&contract, &bare());
        assert!(header.contains("typedef struct a A;\n"));
        assert!(header.contains("typedef union b {\n    A *a;\n} B;\n"));
        assert!(header.contains("struct a {\n    B *b;\n};\n"));
    }

    #[test]
    fn embedded_record_is_defined_before_its_embedder() {
        let mut builder = ContractBuilder::new("embedded");
        let b = builder.path("B");
        let a = builder.path("A");
        builder.item(
            "B",
            Some("b"),
            ItemKind::structure(vec![Field::new("a", Type::ptr(Type::Path(a)))]),
        );
        builder.item(
            "A",
            Some("a"),
            ItemKind::structure(vec![Field::new("b", Type::Path(b))]),
        );
        let contract = builder.build().unwrap();

        assert_eq!(
            compute_order(&contract).unwrap(),
            vec![Output::Declaration(a), Output::Definition(b), Output::Definition(a)]
        );
        assert_eq!(
            render(&contract, &bare()),
            "\n\
             typedef struct a A;\n\
             \n\
             typedef struct b {\n    A *a;\n} B;\n\
             \n\
             struct a {\n    B b;\n};\n"
        );
    }

    #[test]
    fn pointer_only_dependencies_are_defined_first() {
        let mut builder = ContractBuilder::new("tree");
        let root = builder.path("Root");
        let leaf = builder.path("Leaf");
        builder.item(
            "Root",
            Some("root"),
            ItemKind::structure(vec![Field::new("leaves", Type::ptr(Type::Path(leaf)))]),
        );
        builder.item("Leaf", Some("leaf"), ItemKind::structure(vec![Field::new("x", Type::Int)]));
        let contract = builder.build().unwrap();

        assert_eq!(
            compute_order(&contract).unwrap(),
            vec![Output::Definition(leaf), Output::Definition(root)]
        );
    }

    fn alias_cycle(alias_first: bool) -> meta::Contract {
        let mut builder = ContractBuilder::new("alias-cycle");
        let (link, node) = if alias_first {
            (builder.path("Link"), builder.path("Node"))
        } else {
            let node = builder.path("Node");
            (builder.path("Link"), node)
        };
        builder.item("Link", None, ItemKind::alias(Type::ptr(Type::Path(node))));
        builder.item(
            "Node",
            Some("node"),
            ItemKind::structure(vec![Field::new("next", Type::Path(link))]),
        );
        builder.build().unwrap()
    }

    #[test]
    fn alias_inside_a_cycle() {
        for &alias_first in &[false, true] {
            let header = render(&alias_cycle(alias_first), &bare());
            assert!(header.contains(
                "typedef struct node Node;\n\ntypedef Node *Link;\n\nstruct node {\n    Link next;\n};\n"
            ));
        }
    }

    #[test]
    fn alias_pointing_at_itself_is_rejected() {
        let mut builder = ContractBuilder::new("self-alias");
        let link = builder.path("Link");
        builder.item("Link", None, ItemKind::alias(Type::ptr(Type::Path(link))));
        let contract = builder.build().unwrap();

        let err = generate(&contract, &bare(), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("`Link`"));
    }

    #[test]
    fn dangling_paths_are_rejected() {
        let mut contract = ContractBuilder::new("dangling").build().unwrap();
        contract.globals.push(meta::Global {
            name: "g".to_owned(),
            ty: Type::Path(Path::new(4)),
            init: None,
        });

        let err = generate(&contract, &bare(), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn config_sections() {
        let mut builder = ContractBuilder::new("globals");
        builder.define_if("TESTVAL", "TESTBOOL", "1", "0");
        builder.global("global_1", Type::Int, Some("TESTVAL"));
        builder.global("global_2", Type::Char, Some("'A'"));
        builder.function("testten", Type::Int, vec![]);
        let contract = builder.build().unwrap();

        let config = Config {
            header: Some("testdll.h".to_owned()),
            include_guard: Some("TESTDLL_H_".to_owned()),
            sys_includes: vec!["windows.h".to_owned()],
            flags: vec!["TESTBOOL".to_owned()],
            trailer: Some("end".to_owned()),
            ..Config::default()
        };
        let header = render(&contract, &config);

        assert!(header.starts_with(&format!("// {}\n// testdll.h\n", VERSION)));
        assert!(header.contains(
            "#if !defined(TESTDLL_H_)\n#define TESTDLL_H_\n\n#include <windows.h>\n\n#define TESTBOOL\n#if defined(TESTBOOL)\n#define TESTVAL 1\n#else\n#define TESTVAL 0\n#endif\n"
        ));
        assert!(header.contains("int global_1 = TESTVAL;\nchar global_2 = 'A';\n"));
        assert!(header.contains("__declspec(dllexport) int testten(void);\n"));
        assert!(header.ends_with("\n#endif\n// end\n"));

        let externs = render(
            &contract,
            &Config {
                extern_globals: true,
                ..bare()
            },
        );
        assert!(externs.contains("extern int global_1;\nextern char global_2;\n"));
    }
}
