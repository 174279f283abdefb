//! The `testdll` layout contract: C-compatible types, two exported globals
//! and twelve exported functions for binding harnesses to check themselves
//! against.
//!
//! The exports only exist to be linked and called; they never look at their
//! arguments and always return `0`.
//!
//! `write` is exported under its own name on Windows only. Elsewhere the
//! symbol is `testdll_write`, since a `write` symbol would interpose the libc
//! call; use [`symbol`] to map an export name to the symbol to resolve.

#![allow(non_upper_case_globals)]

use std::mem::{self, MaybeUninit};
use std::os::raw::{c_char, c_double, c_int, c_long, c_short, c_uint, c_ushort, c_void};
use std::ptr;

use contract_metadata::{
    AnalysisError, Contract, ContractBuilder, Enum, Field, FieldLayout, ItemKind, Layout, Type,
    Variant,
};
use log::trace;

pub type UnsignedInt = c_uint;
pub type Uint = UnsignedInt;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Day {
    Workday,
    Weekday,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Type1 {
    pub a: c_char,
    pub b: c_short,
    pub c: c_double,
    pub d: c_char,
}

/// `Type1`'s members sharing one storage. Which member is live is up to the
/// caller.
#[repr(C)]
#[derive(Clone, Copy)]
pub union Type2 {
    pub a: c_char,
    pub b: c_short,
    pub c: c_double,
    pub d: c_char,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct StructWrapper {
    pub a: Type1,
    pub b: c_char,
    pub c: Type2,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union UnionWrapper {
    pub a: Type1,
    pub b: c_char,
    pub c: Type2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Mutual1 {
    pub a: *mut *mut Uint,
    pub b: *mut Mutual2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Mutual2 {
    pub a: *mut c_int,
    pub b: *mut Mutual1,
}

/// A node of a doubly linked list. Nodes don't own their neighbours or
/// their payload.
#[repr(C)]
#[derive(Debug)]
pub struct LinkedList {
    pub index: c_int,
    pub next: *mut LinkedList,
    pub prev: *mut LinkedList,
    pub data: *mut c_void,
}

#[cfg(feature = "testbool")]
pub const TESTVAL: c_int = 1;
#[cfg(not(feature = "testbool"))]
pub const TESTVAL: c_int = 0;

#[no_mangle]
pub static mut global_1: c_int = TESTVAL;
#[no_mangle]
pub static mut global_2: c_char = b'A' as c_char;

/// Names of the exported functions, in declaration order.
pub const EXPORTS: &[&str] = &[
    "write",
    "overflow",
    "testone",
    "testtwo",
    "testthree",
    "testfour",
    "testfive",
    "testsix",
    "testseven",
    "testeight",
    "testnine",
    "testten",
];

/// The symbol `write` is exported under. Outside Windows a `write` symbol
/// would interpose `write(2)`.
#[cfg(windows)]
pub const WRITE_SYMBOL: &str = "write";
#[cfg(not(windows))]
pub const WRITE_SYMBOL: &str = "testdll_write";

/// The linker symbol of the export called `name`.
pub fn symbol(name: &str) -> &str {
    if name == "write" {
        WRITE_SYMBOL
    } else {
        name
    }
}

/// Exported as `write` on Windows and as `testdll_write` everywhere else.
#[cfg_attr(windows, export_name = "write")]
#[cfg_attr(not(windows), export_name = "testdll_write")]
pub extern "C" fn write(dest: *mut c_long, value: c_long) -> c_int {
    trace!("write({:p}, {})", dest, value);
    0
}

#[no_mangle]
pub extern "C" fn overflow(count: c_int, fill: c_char) -> c_int {
    trace!("overflow({}, {})", count, fill);
    0
}

#[no_mangle]
pub extern "C" fn testone(c: c_char, _: Type1, _: Type2) -> c_int {
    trace!("testone({}, ..)", c);
    0
}

#[no_mangle]
pub extern "C" fn testtwo(_: StructWrapper, _: UnionWrapper) -> c_int {
    trace!("testtwo(..)");
    0
}

#[no_mangle]
pub extern "C" fn testthree(a: *mut c_long, b: *mut c_long) -> c_int {
    trace!("testthree({:p}, {:p})", a, b);
    0
}

#[no_mangle]
pub extern "C" fn testfour(a: *mut c_long, b: *mut c_ushort) -> c_int {
    trace!("testfour({:p}, {:p})", a, b);
    0
}

#[no_mangle]
pub extern "C" fn testfive(a: *mut *mut *mut c_long, b: *mut *mut c_ushort) -> c_int {
    trace!("testfive({:p}, {:p})", a, b);
    0
}

#[no_mangle]
pub extern "C" fn testsix(a: *mut Type1, b: *mut Type1) -> c_int {
    trace!("testsix({:p}, {:p})", a, b);
    0
}

#[no_mangle]
pub extern "C" fn testseven(a: *mut Type1, b: *mut Type2) -> c_int {
    trace!("testseven({:p}, {:p})", a, b);
    0
}

#[no_mangle]
pub extern "C" fn testeight(mutual: Mutual1) -> c_int {
    trace!("testeight({:?})", mutual);
    0
}

#[no_mangle]
pub extern "C" fn testnine(list: *mut LinkedList) -> c_int {
    trace!("testnine({:p})", list);
    0
}

#[no_mangle]
pub extern "C" fn testten() -> c_int {
    trace!("testten()");
    0
}

/// Describe everything above as contract metadata, under the C names.
pub fn contract() -> Result<Contract, AnalysisError> {
    let mut builder = ContractBuilder::new("testdll");

    if cfg!(feature = "testbool") {
        builder.define("TESTBOOL", None);
    }
    builder.define_if("TESTVAL", "TESTBOOL", "1", "0");
    builder.global("global_1", Type::Int, Some("TESTVAL"));
    builder.global("global_2", Type::Char, Some("'A'"));

    builder.item(
        "day",
        Some("DAY"),
        ItemKind::Enum(Enum::new(vec![
            Variant::new("WORKDAY", Day::Workday as i64),
            Variant::new("WEEKDAY", Day::Weekday as i64),
        ])),
    );
    let unsigned_int = builder.item("unsigned_int", None, ItemKind::alias(Type::UInt));
    let uint = builder.item("uint", None, ItemKind::alias(Type::Path(unsigned_int)));

    let scalars = vec![
        Field::new("a", Type::Char),
        Field::new("b", Type::Short),
        Field::new("c", Type::Double),
        Field::new("d", Type::Char),
    ];
    let type1 = builder.item("Type1", Some("type1"), ItemKind::structure(scalars.clone()));
    let type2 = builder.item("Type2", Some("type2"), ItemKind::union(scalars));

    let wrapped = vec![
        Field::new("a", Type::Path(type1)),
        Field::new("b", Type::Char),
        Field::new("c", Type::Path(type2)),
    ];
    let struct_wrapper = builder.item(
        "StructWrapper",
        Some("structwrapper"),
        ItemKind::structure(wrapped.clone()),
    );
    let union_wrapper = builder.item(
        "UnionWrapper",
        Some("unionwrapper"),
        ItemKind::union(wrapped),
    );

    let mutual1 = builder.path("Mutual1");
    let mutual2 = builder.path("Mutual2");
    builder.item(
        "Mutual1",
        Some("mutual1"),
        ItemKind::structure(vec![
            Field::new("a", Type::ptr_n(Type::Path(uint), 2)),
            Field::new("b", Type::ptr(Type::Path(mutual2))),
        ]),
    );
    builder.item(
        "Mutual2",
        Some("mutual2"),
        ItemKind::structure(vec![
            Field::new("a", Type::ptr(Type::Int)),
            Field::new("b", Type::ptr(Type::Path(mutual1))),
        ]),
    );

    let linked_list = builder.path("LinkedList");
    builder.item(
        "LinkedList",
        Some("linkedlist"),
        ItemKind::structure(vec![
            Field::new("index", Type::Int),
            Field::new("next", Type::ptr(Type::Path(linked_list))),
            Field::new("prev", Type::ptr(Type::Path(linked_list))),
            Field::new("data", Type::ptr(Type::Void)),
        ]),
    );

    builder
        .function("write", Type::Int, vec![Type::ptr(Type::Long), Type::Long])
        .function("overflow", Type::Int, vec![Type::Int, Type::Char])
        .function(
            "testone",
            Type::Int,
            vec![Type::Char, Type::Path(type1), Type::Path(type2)],
        )
        .function(
            "testtwo",
            Type::Int,
            vec![Type::Path(struct_wrapper), Type::Path(union_wrapper)],
        )
        .function(
            "testthree",
            Type::Int,
            vec![Type::ptr(Type::Long), Type::ptr(Type::Long)],
        )
        .function(
            "testfour",
            Type::Int,
            vec![Type::ptr(Type::Long), Type::ptr(Type::UShort)],
        )
        .function(
            "testfive",
            Type::Int,
            vec![Type::ptr_n(Type::Long, 3), Type::ptr_n(Type::UShort, 2)],
        )
        .function(
            "testsix",
            Type::Int,
            vec![Type::ptr(Type::Path(type1)), Type::ptr(Type::Path(type1))],
        )
        .function(
            "testseven",
            Type::Int,
            vec![Type::ptr(Type::Path(type1)), Type::ptr(Type::Path(type2))],
        )
        .function("testeight", Type::Int, vec![Type::Path(mutual1)])
        .function("testnine", Type::Int, vec![Type::ptr(Type::Path(linked_list))])
        .function("testten", Type::Int, vec![]);

    builder.build()
}

fn size_of_pointee<T>(_: *const T) -> u64 {
    mem::size_of::<T>() as u64
}

macro_rules! measure {
    ($name:expr, $ty:ty) => {
        Layout {
            name: $name.to_owned(),
            size: mem::size_of::<$ty>() as u64,
            align: mem::align_of::<$ty>() as u64,
            fields: Vec::new(),
        }
    };
    ($name:expr, $ty:ty { $($field:ident),+ }) => {{
        let uninit = MaybeUninit::<$ty>::uninit();
        let base = uninit.as_ptr();
        Layout {
            name: $name.to_owned(),
            size: mem::size_of::<$ty>() as u64,
            align: mem::align_of::<$ty>() as u64,
            fields: vec![$(FieldLayout {
                name: stringify!($field).to_owned(),
                offset: mem::offset_of!($ty, $field) as u64,
                // Only the address is taken, nothing is read.
                size: size_of_pointee(unsafe { ptr::addr_of!((*base).$field) }),
            }),+],
        }
    }};
}

/// The layouts the Rust compiler actually gave the contract types on this
/// target, named like the contract items.
pub fn measure() -> Vec<Layout> {
    vec![
        measure!("day", Day),
        measure!("unsigned_int", UnsignedInt),
        measure!("uint", Uint),
        measure!("Type1", Type1 { a, b, c, d }),
        measure!("Type2", Type2 { a, b, c, d }),
        measure!("StructWrapper", StructWrapper { a, b, c }),
        measure!("UnionWrapper", UnionWrapper { a, b, c }),
        measure!("Mutual1", Mutual1 { a, b }),
        measure!("Mutual2", Mutual2 { a, b }),
        measure!("LinkedList", LinkedList { index, next, prev, data }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use contract_metadata::{analyze, compute_layouts, DataModel};

    #[test]
    fn exports_match_contract_functions() {
        let contract = contract().unwrap();
        let names: Vec<_> = contract.functions.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(names, EXPORTS);
        assert_eq!(symbol("testone"), "testone");
        assert_eq!(symbol("write"), WRITE_SYMBOL);
        let expected = if cfg!(windows) { "write" } else { "testdll_write" };
        assert_eq!(symbol("write"), expected);
    }

    #[test]
    fn contract_has_no_opaque_items() {
        let contract = contract().unwrap();
        let analysis = analyze(&contract.items).unwrap();
        assert!(analysis.opaque_set.is_empty());
    }

    #[test]
    fn known_layouts_per_data_model() {
        let contract = contract().unwrap();

        let lp64 = compute_layouts(&contract, DataModel::Lp64).unwrap();
        let find = |layouts: &[Layout], name: &str| {
            layouts.iter().find(|x| x.name == name).cloned().unwrap()
        };

        let type1 = find(&lp64, "Type1");
        assert_eq!((type1.size, type1.align), (24, 8));
        let offsets: Vec<_> = type1.fields.iter().map(|x| x.offset).collect();
        assert_eq!(offsets, vec![0, 2, 8, 16]);
        let wrapper = find(&lp64, "StructWrapper");
        assert_eq!(wrapper.size, 40);
        assert_eq!(wrapper.field("c").unwrap().offset, 32);
        assert_eq!(find(&lp64, "UnionWrapper").size, 24);
        assert_eq!(find(&lp64, "LinkedList").field("data").unwrap().offset, 24);
        assert_eq!(find(&lp64, "day").size, 4);

        let sysv = compute_layouts(&contract, DataModel::Ilp32SysV).unwrap();
        let type1 = find(&sysv, "Type1");
        assert_eq!((type1.size, type1.align), (16, 4));
        assert_eq!(find(&sysv, "LinkedList").size, 16);
    }

    #[test]
    fn globals_follow_testbool() {
        let (first, second) = unsafe { (global_1, global_2) };
        assert_eq!(first, TESTVAL);
        assert_eq!(second, b'A' as c_char);
        assert_eq!(TESTVAL, if cfg!(feature = "testbool") { 1 } else { 0 });
    }

    #[test]
    fn testval_define_picks_the_compiled_value() {
        let contract = contract().unwrap();
        let testbool = contract.defines.iter().any(|x| x.name == "TESTBOOL");
        let testval = contract.defines.iter().find(|x| x.name == "TESTVAL").unwrap();

        assert_eq!(testval.condition.as_deref(), Some("TESTBOOL"));
        let chosen = if testbool { &testval.value } else { &testval.fallback };
        assert_eq!(chosen.as_deref(), Some(TESTVAL.to_string().as_str()));
    }
}
