//! `Accept-Language` negotiation.

use swarm_config::LocaleConfig;

/// Parse an `Accept-Language` value into `(tag, quality)` pairs, lowercased
/// and sorted by descending quality. Ties keep their header order.
pub fn parse_accept_language(header: &str) -> Vec<(String, f32)> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim().to_ascii_lowercase();
            if tag.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some((tag, quality))
        })
        .collect();
    tags.sort_by(|a, b| b.1.total_cmp(&a.1));
    tags
}

/// Pick the locale for a request.
///
/// Candidates with `q=0` and the `*` wildcard never win. With a supported
/// list, a tag matches exactly or by its primary subtag (`en-us` → `en`).
/// Falls back to the configured default.
pub fn negotiate(header: Option<&str>, config: &LocaleConfig) -> String {
    let Some(header) = header else {
        return config.default.clone();
    };
    for (tag, quality) in parse_accept_language(header) {
        if quality <= 0.0 || tag == "*" {
            continue;
        }
        if config.supported.is_empty() {
            return tag;
        }
        if let Some(found) = lookup(&config.supported, &tag) {
            return found;
        }
        if let Some((primary, _)) = tag.split_once('-')
            && let Some(found) = lookup(&config.supported, primary)
        {
            return found;
        }
    }
    config.default.clone()
}

fn lookup(supported: &[String], tag: &str) -> Option<String> {
    supported
        .iter()
        .find(|s| s.eq_ignore_ascii_case(tag))
        .map(|s| s.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders_by_quality() {
        let tags = parse_accept_language("en;q=0.8, zh-TW;q=0.9 ,fr");
        assert_eq!(tags, vec![
            ("fr".to_string(), 1.0),
            ("zh-tw".to_string(), 0.9),
            ("en".to_string(), 0.8),
        ]);
    }

    #[test]
    fn highest_quality_supported_wins() {
        let cfg = LocaleConfig::default();
        assert_eq!(negotiate(Some("en;q=0.8,zh-TW;q=0.9"), &cfg), "zh-tw");
    }

    #[test]
    fn falls_back_to_primary_subtag_then_default() {
        let cfg = LocaleConfig::default();
        assert_eq!(negotiate(Some("en-GB"), &cfg), "en");
        assert_eq!(negotiate(Some("de, fr;q=0.5"), &cfg), "en");
        assert_eq!(negotiate(None, &cfg), "en");
        assert_eq!(negotiate(Some(""), &cfg), "en");
    }

    #[test]
    fn zero_quality_and_wildcard_are_skipped() {
        let cfg = LocaleConfig::default();
        assert_eq!(negotiate(Some("zh;q=0, *, en;q=0.1"), &cfg), "en");
        assert_eq!(negotiate(Some("zh-CN;q=0"), &cfg), "en");
    }

    #[test]
    fn empty_supported_list_accepts_anything() {
        let cfg = LocaleConfig {
            default: "en".into(),
            supported: Vec::new(),
        };
        assert_eq!(negotiate(Some("pt-BR,pt;q=0.9"), &cfg), "pt-br");
        assert_eq!(negotiate(Some("bogus;q=abc"), &cfg), "bogus");
    }
}
