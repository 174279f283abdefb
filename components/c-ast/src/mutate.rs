use std::ops::{Deref, DerefMut};

use crate::ast::*;

impl File {
    /// Route everything appended from now on into an `#if` block, until the
    /// matching `leave`.
    pub fn enter_conditional(&mut self, conditional: ConditionalExpression) {
        self.nested_builders.push((
            NestedGlobalSyntax::Conditional(conditional),
            GlobalSyntax { items: Vec::new() },
        ))
    }

    pub fn leave(&mut self) {
        let (builder, scope) = match self.nested_builders.pop() {
            Some(nested) => nested,
            None => return,
        };

        match builder {
            NestedGlobalSyntax::Conditional(expression) => {
                self.append(GlobalSyntaxItem::Conditional(GlobalConditional {
                    cases: vec![(expression, scope)],
                    fallthrough: None,
                }));
            }
        }
    }
}

impl Deref for File {
    type Target = GlobalSyntax;

    fn deref(&self) -> &Self::Target {
        match self.nested_builders.last() {
            Some(&(_, ref scope)) => scope,
            None => &self.scope,
        }
    }
}

impl DerefMut for File {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.nested_builders.last_mut() {
            Some(&mut (_, ref mut scope)) => scope,
            None => &mut self.scope,
        }
    }
}

impl GlobalSyntax {
    pub fn append(&mut self, item: GlobalSyntaxItem) -> &mut GlobalSyntax {
        self.items.push(item);
        self
    }
}
