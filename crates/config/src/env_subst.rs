/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw config text.
///
/// Unresolvable variables without a fallback are left as-is so the parse error
/// (if any) points at the placeholder.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder literally.
            out.push_str(&rest[start..]);
            return out;
        };
        let expr = &after[..end];
        let (name, fallback) = match expr.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (expr, None),
        };
        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(expr);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(name: &str) -> Option<String> {
        (name == "SWARM_PORT").then(|| "8080".to_string())
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_with("http_port = ${SWARM_PORT}", fake),
            "http_port = 8080"
        );
    }

    #[test]
    fn fallback_applies_when_unset() {
        assert_eq!(
            substitute_with("bind = \"${SWARM_BIND:-127.0.0.1}\"", fake),
            "bind = \"127.0.0.1\""
        );
        assert_eq!(substitute_with("${SWARM_PORT:-1}", fake), "8080");
    }

    #[test]
    fn leaves_unknown_and_malformed() {
        assert_eq!(
            substitute_with("${SWARM_NONEXISTENT_XYZ}", fake),
            "${SWARM_NONEXISTENT_XYZ}"
        );
        assert_eq!(substitute_with("a ${} b", fake), "a ${} b");
        assert_eq!(substitute_with("tail ${OPEN", fake), "tail ${OPEN");
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
