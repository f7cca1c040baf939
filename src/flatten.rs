use crate::Part;

/// Replaces every source part with its inner content, in order, leaving
/// all other parts untouched. Recursive and idempotent. Used by adapters
/// whose target provider has no native citation container.
#[must_use]
pub fn flatten_source_parts(parts: Vec<Part>) -> Vec<Part> {
    parts
        .into_iter()
        .flat_map(|part| match part {
            Part::Source(source) => flatten_source_parts(source.content),
            other => vec![other],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sources_flatten_in_order() {
        let parts = vec![Part::source(
            "s1",
            "T",
            vec![
                Part::text("a"),
                Part::source("s2", "", vec![Part::text("b")]),
            ],
        )];
        let flat = flatten_source_parts(parts);
        assert_eq!(flat, vec![Part::text("a"), Part::text("b")]);
    }

    #[test]
    fn flatten_is_idempotent() {
        let parts = vec![
            Part::text("lead"),
            Part::source("s", "T", vec![Part::text("x"), Part::image("aGk=", "image/png")]),
            Part::text("tail"),
        ];
        let once = flatten_source_parts(parts);
        let twice = flatten_source_parts(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn non_source_parts_pass_through() {
        let parts = vec![Part::text("only")];
        assert_eq!(flatten_source_parts(parts.clone()), parts);
    }
}
