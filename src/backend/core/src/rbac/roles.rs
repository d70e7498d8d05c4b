//! Role graph resolution.
//!
//! An app-defined role resolves to itself followed by everything it inherits,
//! depth-first in declaration order:
//!
//! | Graph                                    | Chain for `A`  |
//! |------------------------------------------|----------------|
//! | `A -> [B]`, `B -> []`                    | `A, B`         |
//! | `A -> [B, C]`, `B -> [D]`, `C -> [D]`    | `A, B, D, C`   |
//! | `A -> [B]`, `B -> [A]`                   | `A, B`         |
//! | `A -> [Missing]`                         | `A`            |

use std::collections::HashSet;

use super::models::{RoleDefinition, SecurityPolicy};

/// Resolve `role` to its ordered, deduplicated inheritance chain.
///
/// Unknown names are skipped rather than reported, so an unknown root yields
/// an empty chain. Cycle edges are skipped on revisit.
pub fn resolve_role_chain<'a>(
    policy: &'a SecurityPolicy,
    role: &str,
) -> Vec<(&'a str, &'a RoleDefinition)> {
    let mut chain = Vec::new();
    let mut visited: HashSet<&'a str> = HashSet::new();
    let mut stack: Vec<&str> = vec![role];

    while let Some(name) = stack.pop() {
        let Some((name, definition)) = policy.roles.get_key_value(name) else {
            continue;
        };
        if !visited.insert(name.as_str()) {
            continue;
        }

        chain.push((name.as_str(), definition));

        // Reversed so the first declared parent is popped first.
        stack.extend(definition.inherits.iter().rev().map(String::as_str));
    }

    chain
}

/// Whether any of `candidates` appears in the chain of `role`.
pub fn chain_contains<'a, I>(policy: &SecurityPolicy, role: &str, candidates: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let chain = resolve_role_chain(policy, role);
    candidates
        .into_iter()
        .any(|candidate| chain.iter().any(|(name, _)| *name == candidate))
}
