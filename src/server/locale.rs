//! Request locale negotiation.

pub const DEFAULT_LOCALE: &str = "en-US";
pub const PREFERRED_LOCALE_COOKIE_NAME: &str = "preferredlocale";

/// Locales the site serves, in canonical case.
pub const VALID_LOCALES: &[&str] = &[
    "de", "en-US", "es", "fr", "ja", "ko", "pt-BR", "ru", "zh-CN", "zh-TW",
];

/// Canonical spelling of `locale` if the site serves it, matched case-insensitively.
pub fn canonical_locale(locale: &str) -> Option<&'static str> {
    VALID_LOCALES
        .iter()
        .copied()
        .find(|valid| valid.eq_ignore_ascii_case(locale.trim()))
}

/// One `Accept-Language` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageRange {
    pub code: String,
    pub region: Option<String>,
    pub quality: f32,
}

/// Parse an `Accept-Language` header, highest quality first.
///
/// Entries with `q=0`, wildcards and empty tags are dropped. Ties keep header order.
pub fn parse_accept_language(header: &str) -> Vec<LanguageRange> {
    let mut ranges: Vec<LanguageRange> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|value| value.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if quality <= 0.0 {
                return None;
            }
            let mut subtags = tag.split('-');
            let code = subtags.next()?.to_ascii_lowercase();
            // Skip a script subtag such as `Hant`.
            let region = subtags
                .find(|sub| sub.len() != 4)
                .map(str::to_ascii_lowercase);
            Some(LanguageRange {
                code,
                region,
                quality,
            })
        })
        .collect();
    ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    ranges
}

/// Pick the best supported locale for `header`.
///
/// Each range, in quality order, first tries an exact match (same language, and
/// same region when one is given), then any supported locale of that language.
pub fn pick(supported: &[&'static str], header: &str) -> Option<&'static str> {
    let split = |locale: &'static str| {
        let (code, region) = locale
            .split_once('-')
            .map_or((locale, None), |(code, region)| (code, Some(region)));
        (locale, code.to_ascii_lowercase(), region.map(str::to_ascii_lowercase))
    };
    let candidates: Vec<_> = supported.iter().copied().map(split).collect();
    for range in parse_accept_language(header) {
        let exact = candidates.iter().find(|(_, code, region)| {
            *code == range.code
                && range
                    .region
                    .as_ref()
                    .is_none_or(|wanted| region.as_ref() == Some(wanted))
        });
        if let Some((locale, _, _)) = exact {
            return Some(*locale);
        }
        let loose = candidates.iter().find(|(_, code, _)| *code == range.code);
        if let Some((locale, _, _)) = loose {
            return Some(*locale);
        }
    }
    None
}

/// Locale for a request: a valid `preferredlocale` cookie wins, then
/// `Accept-Language`, then `fallback`.
pub fn get_locale<'a>(
    cookie: Option<&str>,
    accept_language: Option<&str>,
    fallback: &'a str,
) -> &'a str {
    if let Some(locale) = cookie.and_then(canonical_locale) {
        return locale;
    }
    accept_language
        .and_then(|header| pick(VALID_LOCALES, header))
        .unwrap_or(fallback)
}
