//! The callable surface of the function library.

use sheetgraph_common::{CellError, CellValue};

use crate::traits::{ArgumentHandle, EvalContext};

/// A spreadsheet-style callable. Object-safe; implementations receive
/// lazy argument handles so branch-selecting functions can skip work.
pub trait Function: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn min_args(&self) -> usize {
        0
    }
    fn variadic(&self) -> bool {
        false
    }
    /// Maximum accepted arguments for non-variadic functions.
    fn max_args(&self) -> usize {
        self.min_args()
    }

    fn eval<'a, 'c>(
        &self,
        args: &'a [ArgumentHandle<'a, 'c>],
        ctx: &dyn EvalContext,
    ) -> Result<CellValue, CellError>;
}

type EvalFn =
    for<'a, 'c> fn(&'a [ArgumentHandle<'a, 'c>], &dyn EvalContext) -> Result<CellValue, CellError>;

/// Adapter that turns a plain function pointer into a [`Function`].
/// Every builtin is one of these; the registry stores them behind `Arc`.
pub struct BuiltinFn {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    variadic: bool,
    eval: EvalFn,
}

impl BuiltinFn {
    pub const fn new(name: &'static str, min_args: usize, max_args: usize, eval: EvalFn) -> Self {
        BuiltinFn {
            name,
            min_args,
            max_args,
            variadic: false,
            eval,
        }
    }

    pub const fn variadic(name: &'static str, min_args: usize, eval: EvalFn) -> Self {
        BuiltinFn {
            name,
            min_args,
            max_args: usize::MAX,
            variadic: true,
            eval,
        }
    }
}

impl Function for BuiltinFn {
    fn name(&self) -> &'static str {
        self.name
    }
    fn min_args(&self) -> usize {
        self.min_args
    }
    fn variadic(&self) -> bool {
        self.variadic
    }
    fn max_args(&self) -> usize {
        self.max_args
    }
    fn eval<'a, 'c>(
        &self,
        args: &'a [ArgumentHandle<'a, 'c>],
        ctx: &dyn EvalContext,
    ) -> Result<CellValue, CellError> {
        (self.eval)(args, ctx)
    }
}
