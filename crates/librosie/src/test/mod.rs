mod test_concurrency;
mod test_ffi;
mod test_source;

use crate::{Engine, Installation, PatternHandle};

pub(crate) fn installation() -> Installation {
    Installation::at(env!("CARGO_MANIFEST_DIR")).unwrap()
}

/// An engine booted from the installation inside this crate.
pub(crate) fn engine() -> Engine {
    Engine::boot(&installation()).unwrap()
}

pub(crate) fn compile(engine: &Engine, expression: &str) -> PatternHandle {
    let compiled = engine.compile(expression).unwrap();
    compiled
        .pattern
        .unwrap_or_else(|| panic!("{} did not compile: {:?}", expression, compiled.messages))
}
