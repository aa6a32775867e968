use std::convert::TryFrom;
use std::time::SystemTime;

use actix_web::http::header::{
    CacheControl, CacheDirective, HeaderMap, HeaderValue, HttpDate, CACHE_CONTROL, LAST_MODIFIED,
};
use cache_control::{Cachability, CacheControl as ParsedCacheControl};
use chrono::{DateTime, Datelike, Utc};
use log::{trace, warn};

use crate::policy::{DirectiveValue, Directives, LAST_MODIFIED_KEY};

/// `mustRevalidate` -> `must-revalidate`, `sMaxage` -> `s-maxage`.
pub fn normalize_directive_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len() + 4);
    for (index, c) in name.chars().enumerate() {
        if index == 0 {
            normalized.push(c.to_ascii_lowercase());
        } else if c.is_ascii_uppercase() {
            normalized.push('-');
            normalized.push(c.to_ascii_lowercase());
        } else {
            normalized.push(c);
        }
    }
    normalized
}

fn seconds(value: &DirectiveValue) -> Option<u32> {
    let seconds = match value {
        DirectiveValue::Integer(value) => u32::try_from(*value).ok()?,
        DirectiveValue::Text(text) => text.trim().parse::<u32>().ok()?,
        _ => return None,
    };
    if seconds == 0 {
        return None;
    }
    Some(seconds)
}

fn flag(token: &str) -> Option<CacheDirective> {
    match token {
        "no-cache" => Some(CacheDirective::NoCache),
        "no-store" => Some(CacheDirective::NoStore),
        "no-transform" => Some(CacheDirective::NoTransform),
        "must-revalidate" => Some(CacheDirective::MustRevalidate),
        "proxy-revalidate" => Some(CacheDirective::ProxyRevalidate),
        _ => None,
    }
}

fn is_token(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

/// Directive argument as a token, or as a quoted-string when it is not one.
fn argument(text: &str) -> String {
    if is_token(text) {
        return text.to_string();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn extension(token: String, value: &DirectiveValue) -> Option<CacheDirective> {
    match value {
        DirectiveValue::Flag(true) => Some(CacheDirective::Extension(token, None)),
        DirectiveValue::Integer(number) if *number != 0 => Some(CacheDirective::Extension(token, Some(number.to_string()))),
        DirectiveValue::Text(text) if value.is_truthy() => Some(CacheDirective::Extension(token, Some(argument(text)))),
        _ => None,
    }
}

// cache_control never parses s-maxage, so it is read from the raw value.
fn shared_max_age(value: &str) -> Option<u32> {
    value.split(',').find_map(|directive| {
        let (name, seconds) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("s-maxage") {
            return None;
        }
        seconds.trim().trim_matches('"').parse::<u32>().ok()
    })
}

// HttpDate only represents 1970 up to the end of year 9999.
fn in_http_date_range(timestamp: &DateTime<Utc>) -> bool {
    timestamp.timestamp() >= 0 && timestamp.year() <= 9999
}

/// Response headers derived from a resolved directive map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheHeaders {
    pub cache_control: Vec<CacheDirective>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl CacheHeaders {
    pub fn from_directives(directives: &Directives) -> CacheHeaders {
        let mut headers = CacheHeaders::default();
        let mut public = false;
        let mut private = false;

        for (name, value) in directives.iter() {
            if name == LAST_MODIFIED_KEY {
                if let DirectiveValue::Timestamp(timestamp) = value {
                    headers.last_modified = Some(*timestamp);
                }
                continue;
            }

            let token = normalize_directive_name(name);
            let directive = match token.as_str() {
                "max-age" => seconds(value).map(CacheDirective::MaxAge),
                "s-maxage" => seconds(value).map(CacheDirective::SMaxAge),
                "public" => {
                    public = value.is_truthy();
                    None
                }
                "private" => {
                    private = value.is_truthy();
                    None
                }
                _ => match flag(&token) {
                    Some(directive) if value.is_truthy() => Some(directive),
                    Some(_) => None,
                    None => extension(token.clone(), value),
                },
            };
            if let Some(directive) = directive {
                headers.cache_control.push(directive);
            }
        }

        // public and private are exclusive, private is the safer one to keep
        if private {
            headers.cache_control.push(CacheDirective::Private);
        } else if public {
            headers.cache_control.push(CacheDirective::Public);
        }
        headers
    }

    pub fn cache_control_value(&self) -> Option<String> {
        if self.cache_control.is_empty() {
            return None;
        }
        Some(CacheControl(self.cache_control.clone()).to_string())
    }

    fn has(&self, directive: &CacheDirective) -> bool {
        self.cache_control.contains(directive)
    }

    /// Directives the handler set that policies never manage.
    fn retained(&self, value: &str) -> Vec<CacheDirective> {
        let existing = ParsedCacheControl::from_value(value).unwrap_or_default();
        let mut retained = Vec::new();
        if existing.no_store && !self.has(&CacheDirective::NoStore) {
            retained.push(CacheDirective::NoStore);
        }
        if existing.no_transform && !self.has(&CacheDirective::NoTransform) {
            retained.push(CacheDirective::NoTransform);
        }
        if existing.proxy_revalidate && !self.has(&CacheDirective::ProxyRevalidate) {
            retained.push(CacheDirective::ProxyRevalidate);
        }
        let immutable = CacheDirective::Extension(String::from("immutable"), None);
        if existing.immutable && !self.has(&immutable) {
            retained.push(immutable);
        }

        let has_cachability = self.cache_control.iter().any(|directive| {
            matches!(directive, CacheDirective::Public | CacheDirective::Private | CacheDirective::NoCache)
        });
        if !has_cachability {
            match existing.cachability {
                Some(Cachability::Public) => retained.push(CacheDirective::Public),
                Some(Cachability::Private) => retained.push(CacheDirective::Private),
                Some(Cachability::NoCache) => retained.push(CacheDirective::NoCache),
                _ => (),
            }
        }

        let has_shared_max_age = self
            .cache_control
            .iter()
            .any(|directive| matches!(directive, CacheDirective::SMaxAge(_)));
        if !has_shared_max_age {
            if let Some(seconds) = shared_max_age(value) {
                retained.push(CacheDirective::SMaxAge(seconds));
            }
        }
        retained
    }

    /// Writes the headers, replacing the response's own `Cache-Control` and `Last-Modified`.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let existing = headers
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let mut directives = self.cache_control.clone();
        if let Some(existing) = &existing {
            directives.extend(self.retained(existing));
        }

        headers.remove(CACHE_CONTROL);
        headers.remove(LAST_MODIFIED);

        if !directives.is_empty() {
            let value = CacheControl(directives).to_string();
            match HeaderValue::from_str(&value) {
                Ok(header_value) => {
                    trace!("Setting Cache-Control: {}", value);
                    headers.insert(CACHE_CONTROL, header_value);
                }
                Err(e) => warn!("Cannot emit Cache-Control '{}': {}", value, e),
            }
        }

        if let Some(last_modified) = self.last_modified {
            if !in_http_date_range(&last_modified) {
                warn!("Last-Modified {} cannot be expressed as an HTTP date, skipping", last_modified);
                return;
            }
            let date = HttpDate::from(SystemTime::from(last_modified));
            match HeaderValue::from_str(&date.to_string()) {
                Ok(header_value) => {
                    headers.insert(LAST_MODIFIED, header_value);
                }
                Err(e) => warn!("Cannot emit Last-Modified '{}': {}", date, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn directives(entries: Vec<(&str, DirectiveValue)>) -> Directives {
        entries.into_iter().map(|(name, value)| (name.to_string(), value)).collect()
    }

    #[test]
    fn test_normalize_directive_name() {
        assert_eq!(normalize_directive_name("mustRevalidate"), "must-revalidate");
        assert_eq!(normalize_directive_name("sMaxage"), "s-maxage");
        assert_eq!(normalize_directive_name("MaxAge"), "max-age");
        assert_eq!(normalize_directive_name("public"), "public");
        assert_eq!(normalize_directive_name("noStore"), "no-store");
    }

    #[test]
    fn test_from_directives() {
        let headers = CacheHeaders::from_directives(&directives(vec![
            ("maxAge", 300.into()),
            ("public", true.into()),
            ("mustRevalidate", true.into()),
            ("sMaxage", 0.into()),
            ("noStore", false.into()),
        ]));

        assert_eq!(
            headers.cache_control,
            vec![CacheDirective::MaxAge(300), CacheDirective::MustRevalidate, CacheDirective::Public]
        );
        assert_eq!(headers.last_modified, None);
        assert_eq!(headers.cache_control_value(), Some(String::from("max-age=300, must-revalidate, public")));
    }

    #[test]
    fn test_private_wins_over_public() {
        let headers = CacheHeaders::from_directives(&directives(vec![("public", true.into()), ("private", true.into())]));
        assert_eq!(headers.cache_control, vec![CacheDirective::Private]);
    }

    #[test]
    fn test_extensions_and_text_values() {
        let headers = CacheHeaders::from_directives(&directives(vec![
            ("maxAge", "120".into()),
            ("staleWhileRevalidate", 30.into()),
            ("immutable", true.into()),
            ("lastModified", DirectiveValue::Null),
        ]));
        assert_eq!(
            headers.cache_control,
            vec![
                CacheDirective::Extension(String::from("immutable"), None),
                CacheDirective::MaxAge(120),
                CacheDirective::Extension(String::from("stale-while-revalidate"), Some(String::from("30"))),
            ]
        );
    }

    #[test]
    fn test_negative_max_age_skipped() {
        let headers = CacheHeaders::from_directives(&directives(vec![("maxAge", (-5).into())]));
        assert!(headers.cache_control.is_empty());
        assert_eq!(headers.cache_control_value(), None);
    }

    #[test]
    fn test_apply_writes_parseable_headers() {
        let last_modified = Utc.with_ymd_and_hms(2021, 10, 21, 7, 28, 0).unwrap();
        let headers = CacheHeaders::from_directives(&directives(vec![
            ("maxAge", 600.into()),
            ("sMaxage", 60.into()),
            ("public", true.into()),
            ("mustRevalidate", true.into()),
            (LAST_MODIFIED_KEY, last_modified.into()),
        ]));

        let mut map = HeaderMap::new();
        headers.apply(&mut map);

        let value = map.get(CACHE_CONTROL).unwrap().to_str().unwrap();
        assert_eq!(value, "max-age=600, must-revalidate, s-maxage=60, public");
        let parsed = ParsedCacheControl::from_value(value).unwrap_or_default();
        assert_eq!(parsed.max_age.map(|d| d.as_secs()), Some(600));
        assert!(matches!(parsed.cachability, Some(Cachability::Public)));
        assert!(parsed.must_revalidate);
        assert_eq!(map.get(LAST_MODIFIED).unwrap(), "Thu, 21 Oct 2021 07:28:00 GMT");
    }

    #[test]
    fn test_apply_replaces_managed_directives() {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=10, must-revalidate, no-transform, immutable"));
        map.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

        CacheHeaders::from_directives(&directives(vec![("maxAge", 300.into())])).apply(&mut map);

        assert_eq!(map.get(CACHE_CONTROL).unwrap(), "max-age=300, no-transform, immutable, private");
        assert!(map.get(LAST_MODIFIED).is_none());
    }

    #[test]
    fn test_apply_resolved_cachability_overrides_existing() {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("private"));

        CacheHeaders::from_directives(&directives(vec![("public", true.into())])).apply(&mut map);

        assert_eq!(map.get(CACHE_CONTROL).unwrap(), "public");
    }

    #[test]
    fn test_apply_keeps_handler_shared_max_age() {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("s-maxage=30, no-transform"));
        CacheHeaders::from_directives(&directives(vec![("maxAge", 300.into())])).apply(&mut map);
        assert_eq!(map.get(CACHE_CONTROL).unwrap(), "max-age=300, no-transform, s-maxage=30");

        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("s-maxage=30"));
        CacheHeaders::from_directives(&directives(vec![("sMaxage", 90.into())])).apply(&mut map);
        assert_eq!(map.get(CACHE_CONTROL).unwrap(), "s-maxage=90");
    }

    #[test]
    fn test_apply_immutable_emitted_once() {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("immutable"));

        CacheHeaders::from_directives(&directives(vec![("immutable", true.into())])).apply(&mut map);

        assert_eq!(map.get(CACHE_CONTROL).unwrap(), "immutable");
    }

    #[test]
    fn test_text_values_quoted_when_not_tokens() {
        let headers = CacheHeaders::from_directives(&directives(vec![
            ("community", "UCI".into()),
            ("note", "a, b=c".into()),
            ("quote", r#"say "hi""#.into()),
        ]));
        assert_eq!(
            headers.cache_control_value(),
            Some(String::from(r#"community=UCI, note="a, b=c", quote="say \"hi\"""#))
        );

        let mut map = HeaderMap::new();
        headers.apply(&mut map);
        assert!(map.get(CACHE_CONTROL).is_some());
    }

    #[test]
    fn test_apply_skips_last_modified_out_of_range() {
        let out_of_range = vec![
            Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 0).unwrap(),
            Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap(),
        ];
        for timestamp in out_of_range {
            let mut map = HeaderMap::new();
            map.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

            CacheHeaders::from_directives(&directives(vec![("maxAge", 60.into()), (LAST_MODIFIED_KEY, timestamp.into())]))
                .apply(&mut map);

            assert_eq!(map.get(CACHE_CONTROL).unwrap(), "max-age=60");
            assert!(map.get(LAST_MODIFIED).is_none());
        }

        let mut map = HeaderMap::new();
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        CacheHeaders::from_directives(&directives(vec![(LAST_MODIFIED_KEY, epoch.into())])).apply(&mut map);
        assert_eq!(map.get(LAST_MODIFIED).unwrap(), "Thu, 01 Jan 1970 00:00:00 GMT");

        let last_day = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        CacheHeaders::from_directives(&directives(vec![(LAST_MODIFIED_KEY, last_day.into())])).apply(&mut map);
        assert!(map.get(LAST_MODIFIED).is_some());
    }

    #[test]
    fn test_apply_nothing_to_emit() {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=10"));

        CacheHeaders::default().apply(&mut map);

        assert!(map.get(CACHE_CONTROL).is_none());
    }
}
