//! Environment tag constraints.
//!
//! A constraint either names an environment (`prod`) or vetoes one (`!prod`).

/// Prefix marking a constraint as negative.
pub const NEGATION: char = '!';

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Matched,
    Unmatched,
    Forbidden,
}

/// Returns true if `environment` satisfies `constraints`.
///
/// An empty constraint list matches every environment. A negative constraint
/// naming the environment rejects it immediately, regardless of the remaining
/// constraints. Otherwise the environment matches only if at least one
/// positive constraint names it.
pub fn matches<S: AsRef<str>>(environment: &str, constraints: &[S]) -> bool {
    if constraints.is_empty() {
        return true;
    }

    let mut matched = false;
    for constraint in constraints {
        match evaluate(environment, constraint.as_ref()) {
            Outcome::Matched => matched = true,
            Outcome::Forbidden => return false,
            Outcome::Unmatched => {}
        }
    }
    matched
}

fn evaluate(environment: &str, constraint: &str) -> Outcome {
    match constraint.strip_prefix(NEGATION) {
        Some(vetoed) if vetoed == environment => Outcome::Forbidden,
        Some(_) => Outcome::Unmatched,
        None if constraint == environment => Outcome::Matched,
        None => Outcome::Unmatched,
    }
}
