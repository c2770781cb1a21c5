//! Default implementations of the external tools the pipeline calls.
//!
//! Every one of them is a [`Transform`](crate::Transform) and can be swapped
//! out through [`Toolchain`](crate::pipeline::Toolchain).

pub mod inline;
pub mod lint;
pub mod script;
pub mod style;
pub mod tag;
pub mod template;

pub use inline::Inliner;
pub use lint::{Eslint, StyleChecker};
pub use script::ScriptCompiler;
pub use style::StyleProcessor;
pub use tag::TagCompiler;
pub use template::TemplateCompiler;
