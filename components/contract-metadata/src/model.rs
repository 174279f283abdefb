//! Compact signature model of the exported functions. Every parameter is
//! described with a `struct`-module style format code; pointer levels add a
//! `P` prefix, enums read as `i`, and structs and unions are referenced by a
//! numeric user type id whose members are listed separately.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AnalysisError, Contract, Field, ItemKind, Path, Type};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserTypeKind {
    Struct,
    Union,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UserType {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: UserTypeKind,
    /// Member codes in declaration order, arrays expanded element by element.
    pub params: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionModel {
    pub name: String,
    pub params: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Model {
    pub functions: Vec<FunctionModel>,
    pub usertypes: Vec<UserType>,
}

impl Model {
    pub fn function(&self, name: &str) -> Option<&FunctionModel> {
        self.functions.iter().find(|x| x.name == name)
    }

    pub fn usertype(&self, id: u32) -> Option<&UserType> {
        self.usertypes.iter().find(|x| x.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("`{0}` is opaque and cannot be passed by value")]
    Opaque(String),
    #[error("`{0}` uses `void` by value")]
    Void(String),
    #[error("no exported function named `{0}`")]
    UnknownFunction(String),
    #[error("no user type with id {0}")]
    UnknownUserType(u32),
    #[error("`{0}` is not a format code")]
    UnknownCode(String),
    #[error("`{value}` is not a value of format code `{code}`")]
    BadValue { code: String, value: String },
    #[error(transparent)]
    Invalid(#[from] AnalysisError),
}

/// The single-character code of a scalar type.
pub fn scalar_code(ty: &Type) -> Option<char> {
    let code = match ty {
        &Type::Char => 'c',
        &Type::SChar => 'b',
        &Type::UChar => 'B',
        &Type::Short => 'h',
        &Type::UShort => 'H',
        &Type::Int => 'i',
        &Type::UInt => 'I',
        &Type::Long => 'l',
        &Type::ULong => 'L',
        &Type::LongLong => 'q',
        &Type::ULongLong => 'Q',
        &Type::Float => 'f',
        &Type::Double => 'd',
        _ => return None,
    };
    Some(code)
}

struct ModelBuilder<'a> {
    contract: &'a Contract,
    ids: HashMap<Path, u32>,
    usertypes: Vec<UserType>,
}

impl<'a> ModelBuilder<'a> {
    fn code(&mut self, ty: &Type, owner: &str) -> Result<String, ModelError> {
        match ty {
            &Type::Void => Err(ModelError::Void(owner.to_owned())),
            &Type::Pointer(ref pointer) => {
                Ok(format!("P{}", self.pointee(&pointer.referenced, owner)?))
            }
            // Array parameters decay to pointers.
            &Type::Array(ref array) => Ok(format!("P{}", self.pointee(&array.referenced, owner)?)),
            &Type::Path(path) => self.path(path),
            scalar => Ok(scalar_code(scalar)
                .map(|code| code.to_string())
                .unwrap_or_default()),
        }
    }

    /// The code of a pointee, where `void` and opaque items are untyped.
    fn pointee(&mut self, ty: &Type, owner: &str) -> Result<String, ModelError> {
        match ty {
            &Type::Void => Ok(String::new()),
            &Type::Path(path) => {
                let contract = self.contract;
                match contract.item(path).node {
                    ItemKind::Opaque(..) => Ok(String::new()),
                    _ => self.path(path),
                }
            }
            _ => self.code(ty, owner),
        }
    }

    fn path(&mut self, path: Path) -> Result<String, ModelError> {
        let contract = self.contract;
        let item = contract.item(path);

        let kind = match &item.node {
            &ItemKind::Enum(..) => return Ok("i".to_owned()),
            &ItemKind::Alias { ref ty } => return self.code(ty, &item.name),
            &ItemKind::Opaque(..) => return Err(ModelError::Opaque(item.name.clone())),
            &ItemKind::Struct(..) => UserTypeKind::Struct,
            &ItemKind::Union(..) => UserTypeKind::Union,
        };

        if let Some(id) = self.ids.get(&path) {
            return Ok(id.to_string());
        }

        let id = self.usertypes.len() as u32 + 1;
        self.ids.insert(path, id);
        self.usertypes.push(UserType {
            id,
            name: item.name.clone(),
            kind,
            params: Vec::new(),
        });

        let params = self.members(item.node.fields(), &item.name)?;
        self.usertypes[id as usize - 1].params = params;
        Ok(id.to_string())
    }

    fn members(&mut self, fields: &[Field], owner: &str) -> Result<Vec<String>, ModelError> {
        let mut params = Vec::new();
        for field in fields {
            let mut count = 1;
            let mut ty = &field.ty;
            while let &Type::Array(ref array) = ty {
                count *= array.size;
                ty = &*array.referenced;
            }

            let code = self.code(ty, owner)?;
            for _ in 0..count {
                params.push(code.clone());
            }
        }
        Ok(params)
    }
}

/// Describe every exported function of `contract` with format codes.
pub fn build_model(contract: &Contract) -> Result<Model, ModelError> {
    contract.validate()?;

    let mut builder = ModelBuilder {
        contract,
        ids: HashMap::new(),
        usertypes: Vec::new(),
    };

    let mut functions = Vec::new();
    for function in &contract.functions {
        let params = function
            .signature
            .inputs
            .iter()
            .map(|ty| builder.code(ty, &function.name))
            .collect::<Result<Vec<_>, _>>()?;
        functions.push(FunctionModel {
            name: function.name.clone(),
            params,
        });
    }

    Ok(Model {
        functions,
        usertypes: builder.usertypes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContractBuilder;

    #[test]
    fn pointer_levels_prefix_codes() {
        let mut builder = ContractBuilder::new("codes");
        builder.function(
            "chain",
            Type::Int,
            vec![Type::ptr_n(Type::Long, 3), Type::ptr_n(Type::UShort, 2)],
        );
        builder.function("untyped", Type::Int, vec![Type::ptr(Type::Void)]);
        let model = build_model(&builder.build().unwrap()).unwrap();

        assert_eq!(model.function("chain").unwrap().params, vec!["PPPl", "PPH"]);
        assert_eq!(model.function("untyped").unwrap().params, vec!["P"]);
        assert!(model.usertypes.is_empty());
    }

    #[test]
    fn composites_become_user_types() {
        let mut builder = ContractBuilder::new("composites");
        let node = builder.path("Node");
        builder.item(
            "Node",
            Some("node"),
            ItemKind::structure(vec![
                Field::new("tag", Type::array(Type::Char, 3)),
                Field::new("next", Type::ptr(Type::Path(node))),
            ]),
        );
        let day = builder.item("day", Some("DAY"), ItemKind::Enum(crate::Enum::new(vec![])));
        builder.function("walk", Type::Int, vec![Type::ptr(Type::Path(node)), Type::Path(day)]);
        let model = build_model(&builder.build().unwrap()).unwrap();

        assert_eq!(model.function("walk").unwrap().params, vec!["P1", "i"]);
        let node = model.usertype(1).unwrap();
        assert_eq!(node.kind, UserTypeKind::Struct);
        assert_eq!(node.params, vec!["c", "c", "c", "P1"]);
    }

    #[test]
    fn opaque_by_value_is_rejected() {
        let mut builder = ContractBuilder::new("opaque");
        let handle = builder.path("Handle");
        builder.function("take", Type::Int, vec![Type::Path(handle)]);
        builder.function("borrow", Type::Int, vec![Type::ptr(Type::Path(handle))]);
        let contract = builder.build().unwrap();

        assert_eq!(
            build_model(&contract),
            Err(ModelError::Opaque("Handle".to_owned()))
        );
    }
}
