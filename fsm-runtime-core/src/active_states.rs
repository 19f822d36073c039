//! Rendering of the set of currently active states.

use std::collections::HashSet;

use crate::FormatError;

/// Capability implemented by the root context of a generated state machine.
pub trait RootContext {
    /// Names of the states that are currently active, in traversal order.
    ///
    /// Concurrent regions may report the same state more than once.
    fn current_states(&self) -> Vec<String>;
}

/// Joins state names with `,`, keeping the first occurrence of each name.
///
/// `None` means the caller has no state information at all, which is a bug
/// distinct from an empty set and is reported as
/// [`FormatError::MissingActiveStates`].
///
/// ```rust
/// use fsm_runtime_core::format_active_states;
///
/// let states = ["Idle", "Blinking", "Idle"];
/// assert_eq!(format_active_states(Some(states)).unwrap(), "Idle,Blinking");
/// assert!(format_active_states(None::<Vec<&str>>).is_err());
/// ```
pub fn format_active_states<I, S>(states: Option<I>) -> Result<String, FormatError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let states = states.ok_or(FormatError::MissingActiveStates)?;
    Ok(join_distinct(states))
}

/// Renders the active states of `root`, failing if no root is available.
pub fn describe_active_states<C>(root: Option<&C>) -> Result<String, FormatError>
where
    C: RootContext + ?Sized,
{
    format_active_states(root.map(RootContext::current_states))
}

pub(crate) fn join_distinct<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut joined = String::new();
    for item in items {
        let item = item.as_ref();
        if !seen.insert(item.to_owned()) {
            continue;
        }
        if !joined.is_empty() {
            joined.push(',');
        }
        joined.push_str(item);
    }
    joined
}
