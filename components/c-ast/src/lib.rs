//! A small syntax tree for C headers. Build a `File` with the helpers in
//! `global`, `record`, `enumeration`, `func`, `var` and `ty`, then `write` it.

pub mod ast;
mod gen;
mod mutate;
mod write;
mod writer;

pub use crate::gen::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn render(file: &ast::File) -> String {
        let mut out = Vec::new();
        file.write(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn render_item(item: ast::GlobalSyntaxItem) -> String {
        let mut file = new();
        file.append(item);
        render(&file)
    }

    fn render_decl(decl: ast::Declaration) -> String {
        render_item(global::decl(decl))
    }

    #[test]
    fn declarators_nest_in_c_order() {
        let p = |ty| render_decl(var::decl(&[], ty, "p"));

        assert_eq!(p(ty::ptr(ty::ptr(ty::ptr(ty::long())))), "long ***p;\n");
        assert_eq!(p(ty::array(ty::ptr(ty::int()), Some(3))), "int *p[3];\n");
        assert_eq!(p(ty::ptr(ty::array(ty::int(), Some(3)))), "int (*p)[3];\n");
        assert_eq!(p(ty::const_ptr(ty::char())), "const char *p;\n");
        assert_eq!(p(ty::constant(ty::ptr(ty::char()))), "char *const p;\n");
        assert_eq!(p(ty::array(ty::char(), None)), "char p[];\n");
    }

    #[test]
    fn prototypes() {
        let decl = func::decl(
            Some("__declspec(dllexport)".to_owned()),
            &[],
            ty::int(),
            "testfour",
            &[(None, ty::ptr(ty::long())), (None, ty::ptr(ty::ushort()))],
        );
        assert_eq!(
            render_decl(decl),
            "__declspec(dllexport) int testfour(long *, unsigned short *);\n"
        );

        let empty = func::decl(None, &[], ty::int(), "testten", &[]);
        assert_eq!(render_decl(empty), "int testten(void);\n");

        let named = func::decl(None, &[], ty::void(), "fill", &[(Some("n".to_owned()), ty::uint())]);
        assert_eq!(render_decl(named), "void fill(unsigned int n);\n");
    }

    #[test]
    fn records_and_enums() {
        let type2 = record::def(
            ast::RecordKey::Union,
            Some("type2".to_owned()),
            &[
                record::member(var::decl(&[], ty::char(), "a")),
                record::member(var::decl(&[], ty::double(), "c")),
            ],
            Some("Type2".to_owned()),
        );
        assert_eq!(
            render_item(global::typedef(type2)),
            "typedef union type2 {\n    char a;\n    double c;\n} Type2;\n"
        );

        let day = enumeration::def(
            Some("DAY".to_owned()),
            &[
                enumeration::enumerator("WORKDAY", Some(0)),
                enumeration::enumerator("WEEKDAY", None),
            ],
            Some("day".to_owned()),
        );
        assert_eq!(
            render_item(global::typedef(day)),
            "typedef enum DAY {\n    WORKDAY = 0,\n    WEEKDAY,\n} day;\n"
        );

        let forward = record::named_decl(ast::RecordKey::Struct, "mutual1", "Mutual1");
        assert_eq!(
            render_item(global::typedef(forward)),
            "typedef struct mutual1 Mutual1;\n"
        );
    }

    #[test]
    fn conditionals_and_definitions() {
        let mut file = new();
        file.append(global::comment("generated\n\nby hand"));
        file.enter_conditional(conditional::not(conditional::defined("TESTDLL_H_")));
        file.append(global::define("TESTDLL_H_", None));
        file.append(global::complex_conditional(
            &[(
                conditional::defined("TESTBOOL"),
                global::scope(&[global::define("TESTVAL", Some("1"))]),
            )],
            Some(global::scope(&[global::define("TESTVAL", Some("0"))])),
        ));
        file.append(global::def(var::def(
            &[],
            ty::int(),
            "global_1",
            expr::constant("TESTVAL"),
        )));
        file.leave();
        file.append(global::decl(var::decl(
            &[ast::Specifier::Extern],
            ty::char(),
            "global_2",
        )));

        assert_eq!(
            render(&file),
            "// generated\n\
             //\n\
             // by hand\n\
             #if !defined(TESTDLL_H_)\n\
             #define TESTDLL_H_\n\
             #if defined(TESTBOOL)\n\
             #define TESTVAL 1\n\
             #else\n\
             #define TESTVAL 0\n\
             #endif\n\
             int global_1 = TESTVAL;\n\
             #endif\n\
             extern char global_2;\n"
        );
    }

    #[test]
    fn chained_cases_use_elif() {
        let item = global::complex_conditional(
            &[
                (
                    conditional::defined("_WIN32"),
                    global::scope(&[global::include(true, "windows.h")]),
                ),
                (
                    conditional::not(conditional::defined("NDEBUG")),
                    global::scope(&[global::include(false, "debug.h")]),
                ),
            ],
            None,
        );
        assert_eq!(
            render_item(item),
            "#if defined(_WIN32)\n\
             #include <windows.h>\n\
             #elif !defined(NDEBUG)\n\
             #include \"debug.h\"\n\
             #endif\n"
        );
    }

    #[test]
    fn open_conditional_is_an_error() {
        let mut file = new();
        file.enter_conditional(conditional::defined("X"));
        assert!(file.write(Vec::new()).is_err());
    }
}
