//! C layout rules: size, alignment and field offsets of contract items under
//! a given data model.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AnalysisError, Contract, ItemKind, Path, Type};

/// Widths and alignments of the C scalar types on a family of targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DataModel {
    /// 64-bit Unix: 8-byte `long` and pointers.
    #[serde(rename = "lp64")]
    Lp64,
    /// 64-bit Windows: 4-byte `long`, 8-byte pointers.
    #[serde(rename = "llp64")]
    Llp64,
    /// 32-bit targets where `double` and `long long` keep 8-byte alignment
    /// inside aggregates (Windows x86, ARM EABI).
    #[serde(rename = "ilp32")]
    Ilp32,
    /// i386 System V: `double` and `long long` are 4-byte aligned inside
    /// aggregates.
    #[serde(rename = "ilp32-sysv")]
    Ilp32SysV,
}

impl DataModel {
    pub const ALL: [DataModel; 4] = [
        DataModel::Lp64,
        DataModel::Llp64,
        DataModel::Ilp32,
        DataModel::Ilp32SysV,
    ];

    /// The data model of the target this crate is compiled for.
    pub fn host() -> DataModel {
        if cfg!(target_pointer_width = "64") {
            if cfg!(windows) {
                DataModel::Llp64
            } else {
                DataModel::Lp64
            }
        } else if cfg!(all(target_arch = "x86", not(windows))) {
            DataModel::Ilp32SysV
        } else {
            DataModel::Ilp32
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataModel::Lp64 => "lp64",
            DataModel::Llp64 => "llp64",
            DataModel::Ilp32 => "ilp32",
            DataModel::Ilp32SysV => "ilp32-sysv",
        }
    }

    pub fn pointer_size(&self) -> u64 {
        match self {
            DataModel::Lp64 | DataModel::Llp64 => 8,
            DataModel::Ilp32 | DataModel::Ilp32SysV => 4,
        }
    }

    pub fn long_size(&self) -> u64 {
        match self {
            DataModel::Lp64 => 8,
            DataModel::Llp64 | DataModel::Ilp32 | DataModel::Ilp32SysV => 4,
        }
    }

    fn wide_align(&self) -> u64 {
        match self {
            DataModel::Ilp32SysV => 4,
            _ => 8,
        }
    }

    /// Size and alignment of a scalar or pointer type; `None` for `void`,
    /// arrays and named items.
    pub fn scalar(&self, ty: &Type) -> Option<Scalar> {
        let scalar = match ty {
            &Type::Char | &Type::SChar | &Type::UChar => Scalar::natural(1),
            &Type::Short | &Type::UShort => Scalar::natural(2),
            &Type::Int | &Type::UInt | &Type::Float => Scalar::natural(4),
            &Type::Long | &Type::ULong => Scalar::natural(self.long_size()),
            &Type::LongLong | &Type::ULongLong | &Type::Double => Scalar {
                size: 8,
                align: self.wide_align(),
            },
            &Type::Pointer(..) => Scalar::natural(self.pointer_size()),
            &Type::Void | &Type::Array(..) | &Type::Path(..) => return None,
        };
        Some(scalar)
    }
}

impl fmt::Display for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown data model `{0}`, expected one of lp64, llp64, ilp32, ilp32-sysv")]
pub struct UnknownDataModel(pub String);

impl FromStr for DataModel {
    type Err = UnknownDataModel;

    fn from_str(s: &str) -> Result<DataModel, UnknownDataModel> {
        DataModel::ALL
            .iter()
            .find(|model| model.name() == s)
            .cloned()
            .ok_or_else(|| UnknownDataModel(s.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scalar {
    pub size: u64,
    pub align: u64,
}

impl Scalar {
    fn natural(size: u64) -> Scalar {
        Scalar { size, align: size }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub name: String,
    pub size: u64,
    pub align: u64,
    pub fields: Vec<FieldLayout>,
}

impl Layout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("`{0}` is opaque and cannot be embedded by value")]
    Opaque(String),
    #[error("`{0}` embeds `void` by value")]
    Void(String),
    #[error("`{0}` contains itself by value")]
    Recursive(String),
    #[error("`{0}` has no members")]
    Empty(String),
    #[error("`{0}` is too large to lay out")]
    TooLarge(String),
    #[error(transparent)]
    Invalid(#[from] AnalysisError),
}

/// The first difference found between two sets of layouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutMismatch {
    #[error("`{0}` has no expected layout")]
    Missing(String),
    #[error("`{name}` is {measured} bytes, expected {expected}")]
    Size {
        name: String,
        expected: u64,
        measured: u64,
    },
    #[error("`{name}` is {measured}-byte aligned, expected {expected}")]
    Align {
        name: String,
        expected: u64,
        measured: u64,
    },
    #[error("`{name}` has {measured} fields, expected {expected}")]
    FieldCount {
        name: String,
        expected: usize,
        measured: usize,
    },
    #[error("field {index} of `{name}` is `{measured}`, expected `{expected}`")]
    FieldName {
        name: String,
        index: usize,
        expected: String,
        measured: String,
    },
    #[error("`{name}.{field}` is at offset {measured}, expected {expected}")]
    FieldOffset {
        name: String,
        field: String,
        expected: u64,
        measured: u64,
    },
    #[error("`{name}.{field}` is {measured} bytes, expected {expected}")]
    FieldSize {
        name: String,
        field: String,
        expected: u64,
        measured: u64,
    },
}

fn round_up(value: u64, align: u64) -> Option<u64> {
    value.checked_add(align - 1).map(|x| x / align * align)
}

struct Calculator<'a> {
    contract: &'a Contract,
    model: DataModel,
    cache: HashMap<Path, Layout>,
    active: Vec<Path>,
}

impl<'a> Calculator<'a> {
    fn item(&mut self, path: Path) -> Result<Layout, LayoutError> {
        if let Some(layout) = self.cache.get(&path) {
            return Ok(layout.clone());
        }

        let contract = self.contract;
        let item = contract.item(path);
        if self.active.contains(&path) {
            return Err(LayoutError::Recursive(item.name.clone()));
        }

        self.active.push(path);
        let layout = self.compute(path);
        self.active.pop();

        let layout = layout?;
        debug!(
            "{} layout of `{}`: size {}, align {}",
            self.model, layout.name, layout.size, layout.align
        );
        self.cache.insert(path, layout.clone());
        Ok(layout)
    }

    fn compute(&mut self, path: Path) -> Result<Layout, LayoutError> {
        let contract = self.contract;
        let item = contract.item(path);
        let name = item.name.clone();

        match &item.node {
            &ItemKind::Struct(ref structure) => {
                if structure.fields.is_empty() {
                    return Err(LayoutError::Empty(name));
                }

                let mut offset = 0;
                let mut align = 1;
                let mut fields = Vec::new();
                for field in &structure.fields {
                    let (size, field_align) = self.ty(&field.ty, &name)?;
                    offset = round_up(offset, field_align)
                        .ok_or_else(|| LayoutError::TooLarge(name.clone()))?;
                    fields.push(FieldLayout {
                        name: field.name.clone(),
                        offset,
                        size,
                    });
                    offset = offset
                        .checked_add(size)
                        .ok_or_else(|| LayoutError::TooLarge(name.clone()))?;
                    align = align.max(field_align);
                }

                let size = round_up(offset, align).ok_or_else(|| LayoutError::TooLarge(name.clone()))?;
                Ok(Layout {
                    name,
                    size,
                    align,
                    fields,
                })
            }
            &ItemKind::Union(ref union) => {
                if union.fields.is_empty() {
                    return Err(LayoutError::Empty(name));
                }

                let mut size = 0;
                let mut align = 1;
                let mut fields = Vec::new();
                for field in &union.fields {
                    let (field_size, field_align) = self.ty(&field.ty, &name)?;
                    fields.push(FieldLayout {
                        name: field.name.clone(),
                        offset: 0,
                        size: field_size,
                    });
                    size = size.max(field_size);
                    align = align.max(field_align);
                }

                let size = round_up(size, align).ok_or_else(|| LayoutError::TooLarge(name.clone()))?;
                Ok(Layout {
                    name,
                    size,
                    align,
                    fields,
                })
            }
            &ItemKind::Enum(..) => {
                let int = Scalar::natural(4);
                Ok(Layout {
                    name,
                    size: int.size,
                    align: int.align,
                    fields: Vec::new(),
                })
            }
            &ItemKind::Alias { ref ty } => {
                let (size, align) = self.ty(ty, &name)?;
                let fields = match ty {
                    &Type::Path(target) => self.item(target)?.fields,
                    _ => Vec::new(),
                };
                Ok(Layout {
                    name,
                    size,
                    align,
                    fields,
                })
            }
            &ItemKind::Opaque(..) => Err(LayoutError::Opaque(name)),
        }
    }

    /// Size and alignment of `ty` when stored by value inside `owner`.
    fn ty(&mut self, ty: &Type, owner: &str) -> Result<(u64, u64), LayoutError> {
        if let Some(scalar) = self.model.scalar(ty) {
            return Ok((scalar.size, scalar.align));
        }

        match ty {
            &Type::Array(ref array) => {
                let (size, align) = self.ty(&array.referenced, owner)?;
                let size = size
                    .checked_mul(array.size as u64)
                    .ok_or_else(|| LayoutError::TooLarge(owner.to_owned()))?;
                Ok((size, align))
            }
            &Type::Path(path) => {
                let layout = self.item(path)?;
                Ok((layout.size, layout.align))
            }
            _ => Err(LayoutError::Void(owner.to_owned())),
        }
    }
}

/// Compute the layout of every item of `contract` that can be laid out.
/// Opaque items are skipped; embedding one by value is an error.
pub fn compute_layouts(contract: &Contract, model: DataModel) -> Result<Vec<Layout>, LayoutError> {
    contract.validate()?;

    let mut calculator = Calculator {
        contract,
        model,
        cache: HashMap::new(),
        active: Vec::new(),
    };

    let mut layouts = Vec::new();
    for (i, item) in contract.items.iter().enumerate() {
        if let ItemKind::Opaque(..) = item.node {
            continue;
        }
        layouts.push(calculator.item(Path::new(i))?);
    }
    Ok(layouts)
}

/// Check every `measured` layout against the `expected` layout of the same
/// name.
pub fn compare(expected: &[Layout], measured: &[Layout]) -> Result<(), LayoutMismatch> {
    for actual in measured {
        let name = actual.name.clone();
        let wanted = expected
            .iter()
            .find(|x| x.name == actual.name)
            .ok_or_else(|| LayoutMismatch::Missing(name.clone()))?;

        if wanted.size != actual.size {
            return Err(LayoutMismatch::Size {
                name,
                expected: wanted.size,
                measured: actual.size,
            });
        }
        if wanted.align != actual.align {
            return Err(LayoutMismatch::Align {
                name,
                expected: wanted.align,
                measured: actual.align,
            });
        }
        if wanted.fields.len() != actual.fields.len() {
            return Err(LayoutMismatch::FieldCount {
                name,
                expected: wanted.fields.len(),
                measured: actual.fields.len(),
            });
        }

        for (index, (x, y)) in wanted.fields.iter().zip(&actual.fields).enumerate() {
            if x.name != y.name {
                return Err(LayoutMismatch::FieldName {
                    name,
                    index,
                    expected: x.name.clone(),
                    measured: y.name.clone(),
                });
            }
            if x.offset != y.offset {
                return Err(LayoutMismatch::FieldOffset {
                    name,
                    field: x.name.clone(),
                    expected: x.offset,
                    measured: y.offset,
                });
            }
            if x.size != y.size {
                return Err(LayoutMismatch::FieldSize {
                    name,
                    field: x.name.clone(),
                    expected: x.size,
                    measured: y.size,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContractBuilder, Field, Type};

    fn mixed_fields() -> Vec<Field> {
        vec![
            Field::new("a", Type::Char),
            Field::new("b", Type::Short),
            Field::new("c", Type::Double),
            Field::new("d", Type::Char),
        ]
    }

    fn layout_of(contract: &Contract, model: DataModel, name: &str) -> Layout {
        compute_layouts(contract, model)
            .unwrap()
            .into_iter()
            .find(|x| x.name == name)
            .unwrap()
    }

    fn offsets(layout: &Layout) -> Vec<u64> {
        layout.fields.iter().map(|x| x.offset).collect()
    }

    #[test]
    fn struct_padding_per_model() {
        let mut builder = ContractBuilder::new("padding");
        builder.item("Type1", Some("type1"), ItemKind::structure(mixed_fields()));
        let contract = builder.build().unwrap();

        for &model in &[DataModel::Lp64, DataModel::Llp64, DataModel::Ilp32] {
            let layout = layout_of(&contract, model, "Type1");
            assert_eq!((layout.size, layout.align), (24, 8), "{}", model);
            assert_eq!(offsets(&layout), vec![0, 2, 8, 16]);
        }

        let layout = layout_of(&contract, DataModel::Ilp32SysV, "Type1");
        assert_eq!((layout.size, layout.align), (16, 4));
        assert_eq!(offsets(&layout), vec![0, 2, 4, 12]);
    }

    #[test]
    fn union_members_overlap() {
        let mut builder = ContractBuilder::new("overlap");
        builder.item("Type2", Some("type2"), ItemKind::union(mixed_fields()));
        let contract = builder.build().unwrap();

        let layout = layout_of(&contract, DataModel::Lp64, "Type2");
        assert_eq!((layout.size, layout.align), (8, 8));
        assert!(layout.fields.iter().all(|x| x.offset == 0));
        assert_eq!(layout.field("b").map(|x| x.size), Some(2));

        let layout = layout_of(&contract, DataModel::Ilp32SysV, "Type2");
        assert_eq!((layout.size, layout.align), (8, 4));
    }

    #[test]
    fn union_size_rounds_to_alignment() {
        let mut builder = ContractBuilder::new("round");
        builder.item(
            "Odd",
            None,
            ItemKind::union(vec![
                Field::new("bytes", Type::array(Type::Char, 5)),
                Field::new("word", Type::Int),
            ]),
        );
        let contract = builder.build().unwrap();
        let layout = layout_of(&contract, DataModel::Lp64, "Odd");
        assert_eq!((layout.size, layout.align), (8, 4));
    }

    #[test]
    fn long_width_depends_on_model() {
        let mut builder = ContractBuilder::new("long");
        builder.item(
            "Pair",
            None,
            ItemKind::structure(vec![
                Field::new("tag", Type::Char),
                Field::new("value", Type::Long),
            ]),
        );
        let contract = builder.build().unwrap();

        assert_eq!(layout_of(&contract, DataModel::Lp64, "Pair").size, 16);
        assert_eq!(layout_of(&contract, DataModel::Llp64, "Pair").size, 8);
        assert_eq!(layout_of(&contract, DataModel::Ilp32, "Pair").size, 8);
    }

    #[test]
    fn pointers_break_cycles() {
        let mut builder = ContractBuilder::new("mutual");
        let m1 = builder.path("Mutual1");
        let m2 = builder.path("Mutual2");
        builder.item(
            "Mutual1",
            Some("mutual1"),
            ItemKind::structure(vec![
                Field::new("a", Type::ptr_n(Type::UInt, 2)),
                Field::new("b", Type::ptr(Type::Path(m2))),
            ]),
        );
        builder.item(
            "Mutual2",
            Some("mutual2"),
            ItemKind::structure(vec![
                Field::new("a", Type::ptr(Type::Int)),
                Field::new("b", Type::ptr(Type::Path(m1))),
            ]),
        );
        let contract = builder.build().unwrap();

        let layouts = compute_layouts(&contract, DataModel::Lp64).unwrap();
        assert!(layouts.iter().all(|x| x.size == 16 && x.align == 8));
        let layouts = compute_layouts(&contract, DataModel::Ilp32).unwrap();
        assert!(layouts.iter().all(|x| x.size == 8 && x.align == 4));
    }

    #[test]
    fn alias_inherits_target_layout() {
        let mut builder = ContractBuilder::new("alias");
        let target = builder.item("Inner", None, ItemKind::structure(mixed_fields()));
        builder.item("Outer", None, ItemKind::alias(Type::Path(target)));
        let contract = builder.build().unwrap();

        let inner = layout_of(&contract, DataModel::Lp64, "Inner");
        let outer = layout_of(&contract, DataModel::Lp64, "Outer");
        assert_eq!(inner.fields, outer.fields);
        assert_eq!(inner.size, outer.size);
    }

    #[test]
    fn embedded_opaque_has_no_layout() {
        let mut builder = ContractBuilder::new("opaque");
        let handle = builder.path("Handle");
        builder.item(
            "Holder",
            None,
            ItemKind::structure(vec![Field::new("handle", Type::Path(handle))]),
        );
        let contract = builder.build().unwrap();

        assert_eq!(
            compute_layouts(&contract, DataModel::Lp64),
            Err(LayoutError::Opaque("Handle".to_owned()))
        );
    }

    #[test]
    fn compare_reports_first_difference() {
        let expected = vec![Layout {
            name: "Type1".to_owned(),
            size: 24,
            align: 8,
            fields: vec![
                FieldLayout {
                    name: "a".to_owned(),
                    offset: 0,
                    size: 1,
                },
                FieldLayout {
                    name: "c".to_owned(),
                    offset: 8,
                    size: 8,
                },
            ],
        }];

        assert_eq!(compare(&expected, &expected), Ok(()));

        let mut packed = expected.clone();
        packed[0].fields[1].offset = 1;
        assert_eq!(
            compare(&expected, &packed),
            Err(LayoutMismatch::FieldOffset {
                name: "Type1".to_owned(),
                field: "c".to_owned(),
                expected: 8,
                measured: 1,
            })
        );

        let mut renamed = expected.clone();
        renamed[0].name = "Type9".to_owned();
        assert_eq!(
            compare(&expected, &renamed),
            Err(LayoutMismatch::Missing("Type9".to_owned()))
        );
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        let mut builder = ContractBuilder::new("huge");
        builder.item(
            "Huge",
            Some("huge"),
            ItemKind::structure(vec![Field::new(
                "data",
                Type::array(Type::array(Type::Double, usize::MAX), usize::MAX),
            )]),
        );
        builder.item(
            "Pair",
            Some("pair"),
            ItemKind::structure(vec![
                Field::new("a", Type::array(Type::Char, usize::MAX)),
                Field::new("b", Type::array(Type::Char, usize::MAX)),
            ]),
        );
        let contract = builder.build().unwrap();

        assert_eq!(
            compute_layouts(&contract, DataModel::Lp64),
            Err(LayoutError::TooLarge("Huge".to_owned()))
        );
        let pair = Contract {
            items: contract.items[1..].to_vec(),
            ..contract
        };
        assert_eq!(
            compute_layouts(&pair, DataModel::Lp64),
            Err(LayoutError::TooLarge("Pair".to_owned()))
        );
    }

    #[test]
    fn data_model_names_parse() {
        for model in DataModel::ALL.iter() {
            assert_eq!(model.name().parse::<DataModel>(), Ok(*model));
        }
        assert!("ilp64".parse::<DataModel>().is_err());
    }
}
