use ahash::AHashMap as HashMap;

/// Tests whether every `(name, value)` attribute of a claim is offered by a
/// service.
///
/// Attributes are compared as multisets: an attribute repeated on the claim
/// side must appear at least as many times on the service side.
pub fn is_subset<'a, C, S>(claim: C, service: S) -> bool
where
    C: IntoIterator<Item = (&'a str, &'a str)>,
    S: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut offered = HashMap::<(&str, &str), usize>::new();
    for attr in service {
        *offered.entry(attr).or_default() += 1;
    }

    for attr in claim {
        match offered.get_mut(&attr) {
            Some(n) if *n > 0 => *n -= 1,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: (&str, &str) = ("type", "db");
    const GOLD: (&str, &str) = ("tier", "gold");
    const NONE: [(&str, &str); 0] = [];

    #[test]
    fn reflexive() {
        let attrs = [DB, GOLD, DB];
        assert!(is_subset(attrs, attrs));
        assert!(is_subset(NONE, NONE));
    }

    #[test]
    fn contained() {
        assert!(is_subset([DB], [DB, GOLD]));
        assert!(is_subset([GOLD, DB], [DB, GOLD]));
        assert!(is_subset(NONE, [DB]));
    }

    #[test]
    fn not_contained() {
        assert!(!is_subset([DB, GOLD], [DB]));
        assert!(!is_subset([("type", "cache")], [DB]));
        assert!(!is_subset([("kind", "db")], [DB]));
    }

    #[test]
    fn respects_multiplicity() {
        assert!(!is_subset([("a", "1"), ("a", "1")], [("a", "1")]));
        assert!(is_subset([("a", "1"), ("a", "1")], [("a", "1"), ("b", "2"), ("a", "1")]));
    }
}
