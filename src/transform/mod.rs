//! String-level helpers backing the `stdlib::*_keys` / `stdlib::*_values`
//! hook constructors in [`crate::hooks`] (snake/camel/pascal case, trim,
//! upper/lowercase, substring, regex replace).

pub mod string_ops;
