//! Backend expression IR, dialects and the translation passes over it.

pub mod backend;
pub mod dialect;
pub mod multi;
pub mod translator;

pub use backend::{BackendExpr, CaseWhen, OrderItem};
pub use dialect::{Dialect, DialectSet};
pub use multi::{MultiLevelTranslator, TranslatedMultiQuery, TranslatedQuery};
pub use translator::{TranslationEnvironment, Translator};
