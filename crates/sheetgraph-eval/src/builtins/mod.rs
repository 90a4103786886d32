//! The builtin function library, grouped by sub-library.

pub mod criteria;
pub mod datetime;
pub mod engineering;
pub mod financial;
pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod stats;
pub mod text;
pub(crate) mod utils;

/// Register every builtin and the legacy spelling aliases. Invoked once
/// by the registry on first lookup.
pub fn register_all() {
    math::register();
    criteria::register();
    logical::register();
    info::register();
    text::register();
    datetime::register();
    engineering::register();
    lookup::register();
    stats::register();
    financial::register();

    crate::registry::register_alias("LINESTMARIO", "LINEST");
}
