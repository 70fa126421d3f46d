//! Identifier quoting.
//!
//! Two quoting styles are in play: bracket quoting for the wire form of queue
//! addresses (`[na]]me]`), and PostgreSQL double-quote quoting for SQL text.

const PREFIX: char = '[';
const SUFFIX: char = ']';
const ESCAPED_SUFFIX: &str = "]]";

/// Bracket-delimit a name, doubling any literal `]` inside
pub fn quote(name: Option<&str>) -> Option<String> {
    name.map(|n| {
        let mut quoted = String::with_capacity(n.len() + 2);
        quoted.push(PREFIX);
        quoted.push_str(&n.replace(SUFFIX, ESCAPED_SUFFIX));
        quoted.push(SUFFIX);
        quoted
    })
}

/// Exact inverse of [`quote`]. Input that is not bracket-delimited is
/// returned unchanged.
pub fn unquote(quoted: Option<&str>) -> Option<String> {
    quoted.map(|q| {
        if q.len() >= 2 && q.starts_with(PREFIX) && q.ends_with(SUFFIX) {
            q[1..q.len() - 1].replace(ESCAPED_SUFFIX, "]")
        } else {
            q.to_string()
        }
    })
}

/// Quote a PostgreSQL identifier for use in SQL text
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quote_and_unquote() {
        assert_eq!(quote(Some("orders")).as_deref(), Some("[orders]"));
        assert_eq!(quote(Some("a]b")).as_deref(), Some("[a]]b]"));
        assert_eq!(quote(Some("")).as_deref(), Some("[]"));
        assert_eq!(unquote(Some("[a]]b]")).as_deref(), Some("a]b"));
        assert_eq!(unquote(Some("plain")).as_deref(), Some("plain"));
    }

    #[test]
    fn test_null_passthrough() {
        assert_eq!(quote(None), None);
        assert_eq!(unquote(None), None);
    }

    #[test]
    fn test_sql_quoting() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    proptest! {
        #[test]
        fn unquote_inverts_quote(name in ".*") {
            let quoted = quote(Some(&name));
            prop_assert_eq!(unquote(quoted.as_deref()), Some(name));
        }

        #[test]
        fn unquote_inverts_quote_with_brackets(name in "[a-z\\]\\[@]{0,16}") {
            let quoted = quote(Some(&name));
            prop_assert_eq!(unquote(quoted.as_deref()), Some(name));
        }
    }
}
