//! Port-name conventions.
//!
//! Every node shape exposes ports under the shared names `in`, `out`, and
//! `error`. Shapes with dynamic arity use a textual `name[index]` encoding
//! (`out[0]`, `in[3]`, ...) so fan-out can grow without pre-declaring it.

pub const IN: &str = "in";
pub const OUT: &str = "out";
pub const ERROR: &str = "error";

/// Encode an indexed port name, e.g. `with_index("out", 2)` -> `"out[2]"`.
pub fn with_index(name: &str, index: usize) -> String {
    format!("{}[{}]", name, index)
}

/// Decode an indexed port name into its base and index.
///
/// Returns `None` when `name` carries no well-formed `[index]` suffix.
pub fn index_of(name: &str) -> Option<(&str, usize)> {
    let open = name.find('[')?;
    let close = name.strip_suffix(']')?;
    let index: usize = close.get(open + 1..)?.parse().ok()?;
    Some((&name[..open], index))
}
