//! Source-to-program entry point for workspace callers.

use std::rc::Rc;

use macl_interp::{Program, SymbolTable};
use macl_types::CompileErrors;

/// Compile macro source and install any definitions it contains.
///
/// Returns the file's top-level program, or `None` for a
/// definitions-only file. On any compile error nothing is installed
/// and the errors come back whole, ready to be shown to the user.
pub fn read_check_macro_string(
    name: &str,
    source: &str,
    symbols: &mut SymbolTable,
) -> Result<Option<Rc<Program>>, CompileErrors> {
    let result = macl_parser::compile(name, source, symbols);
    if result.errors.has_errors() {
        Err(result.errors)
    } else {
        Ok(result.main)
    }
}
