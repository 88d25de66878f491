// Macros must be declared before any module that expands them.

#[macro_use]
pub mod print;
