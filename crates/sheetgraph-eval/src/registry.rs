//! Global function registry, keyed case-insensitively by name.
//!
//! Built-ins register themselves on first lookup; hosts can register
//! additional functions or aliases at any time.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::function::Function;

static REG: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(DashMap::new);

// alias -> canonical name, both uppercase
static ALIASES: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

static BUILTINS_LOADED: Lazy<()> = Lazy::new(crate::builtins::register_all);

#[inline]
fn norm(s: &str) -> String {
    s.to_uppercase()
}

pub fn register_function(f: Arc<dyn Function>) {
    REG.insert(norm(f.name()), f);
}

/// Register an alternate spelling for an existing function.
pub fn register_alias(alias: &str, target: &str) {
    ALIASES.insert(norm(alias), norm(target));
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    Lazy::force(&BUILTINS_LOADED);
    let key = norm(name);
    if let Some(f) = REG.get(&key) {
        return Some(Arc::clone(f.value()));
    }
    if let Some(canon) = ALIASES.get(&key) {
        if let Some(f) = REG.get(canon.value()) {
            return Some(Arc::clone(f.value()));
        }
    }
    None
}
