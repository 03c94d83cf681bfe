// src/utils/rsr.rs
//! Rule-string fields (RSR): a compact syntax naming a source field, an
//! optional chain of search-and-replace rules and an optional value filter.
//!
//! ```text
//! ^*voice                                     static value
//! Account                                     plain field
//! ~52:s/^0(\d{9})/+49${1}/(^+49123123120)     regex rewrite of field 52, then filter
//! cdrData>basicModule>userId                  hierarchical path (XML, Diameter)
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ChargingError;
use crate::utils::consts::{INFIELD_SEP, REGEXP_PREFIX, STATIC_VALUE_PREFIX};

static SEARCH_REPLACE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"s/((?:\\/|[^/])+)/((?:\\/|[^/])*)/").ok());

#[derive(Debug, Clone)]
pub struct ReSearchReplace {
    pub search: Regex,
    pub replace: String,
}

impl ReSearchReplace {
    /// Expands the template against the first match; no match leaves the value as is.
    pub fn process(&self, value: &str) -> String {
        match self.search.captures(value) {
            Some(caps) => {
                let mut out = String::new();
                caps.expand(&self.replace, &mut out);
                out
            }
            None => value.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RsrField {
    pub id: String,
    pub rules: String,
    pub static_value: Option<String>,
    pub replacers: Vec<ReSearchReplace>,
    pub filters: Vec<RsrFilter>,
}

impl RsrField {
    pub fn parse(rules: &str) -> Result<Self, ChargingError> {
        let rules = rules.trim();
        if rules.is_empty() {
            return Err(ChargingError::ParserError("empty RSR field".to_string()));
        }
        if let Some(value) = rules.strip_prefix(STATIC_VALUE_PREFIX) {
            return Ok(RsrField {
                id: String::new(),
                rules: rules.to_string(),
                static_value: Some(value.to_string()),
                replacers: Vec::new(),
                filters: Vec::new(),
            });
        }

        let (body, filter) = split_filter(rules);
        let filters = match filter {
            Some(f) => vec![RsrFilter::parse(f)?],
            None => Vec::new(),
        };

        let Some(regexp_body) = body.strip_prefix(REGEXP_PREFIX) else {
            return Ok(RsrField {
                id: body.to_string(),
                rules: rules.to_string(),
                static_value: None,
                replacers: Vec::new(),
                filters,
            });
        };

        let (id, chain) = regexp_body
            .split_once(':')
            .ok_or_else(|| ChargingError::ParserError(format!("invalid RSR rule: {}", rules)))?;
        let splitter = SEARCH_REPLACE
            .as_ref()
            .ok_or_else(|| ChargingError::ParserError("RSR splitter unavailable".to_string()))?;
        let mut replacers = Vec::new();
        for caps in splitter.captures_iter(chain) {
            let search = caps.get(1).map(|m| m.as_str()).unwrap_or_default().replace("\\/", "/");
            let replace = caps.get(2).map(|m| m.as_str()).unwrap_or_default().replace("\\/", "/");
            let search = Regex::new(&search)
                .map_err(|e| ChargingError::ParserError(format!("invalid RSR regex {}: {}", search, e)))?;
            replacers.push(ReSearchReplace { search, replace });
        }
        if replacers.is_empty() {
            return Err(ChargingError::ParserError(format!("invalid RSR rule: {}", rules)));
        }
        Ok(RsrField {
            id: id.to_string(),
            rules: rules.to_string(),
            static_value: None,
            replacers,
            filters,
        })
    }

    pub fn is_static(&self) -> bool {
        self.static_value.is_some()
    }

    /// Applies the rewrite chain to a raw field value.
    pub fn parse_value(&self, value: &str) -> String {
        if let Some(s) = &self.static_value {
            return s.clone();
        }
        self.replacers
            .iter()
            .fold(value.to_string(), |acc, r| r.process(&acc))
    }

    /// Checks the value filter against the rewritten value.
    pub fn filter_passes(&self, value: &str) -> bool {
        let parsed = self.parse_value(value);
        self.filters.iter().all(|f| f.pass(&parsed))
    }
}

fn split_filter(rules: &str) -> (&str, Option<&str>) {
    if !rules.ends_with(')') {
        return (rules, None);
    }
    let inner = &rules[..rules.len() - 1];
    if rules.starts_with(REGEXP_PREFIX) {
        if let Some(idx) = inner.rfind("/(") {
            return (&rules[..idx + 1], Some(&inner[idx + 2..]));
        }
        return (rules, None);
    }
    match inner.find('(') {
        Some(idx) => (&rules[..idx], Some(&inner[idx + 1..])),
        None => (rules, None),
    }
}

/// Parses `;` separated RSR fields.
pub fn parse_rsr_fields(rules: &str) -> Result<Vec<RsrField>, ChargingError> {
    parse_rsr_fields_sep(rules, INFIELD_SEP)
}

pub fn parse_rsr_fields_sep(rules: &str, sep: &str) -> Result<Vec<RsrField>, ChargingError> {
    if rules.trim().is_empty() {
        return Ok(Vec::new());
    }
    rules.split(sep).map(RsrField::parse).collect()
}

#[derive(Debug, Clone)]
enum FilterKind {
    All,
    Exact(String),
    Prefix(String),
    Suffix(String),
    Regexp(Regex),
}

/// Value filter: `!` negates, `~` regex, `^` prefix, trailing `$` suffix,
/// anything else is an exact match. Empty matches everything.
#[derive(Debug, Clone)]
pub struct RsrFilter {
    raw: String,
    negative: bool,
    kind: FilterKind,
}

impl RsrFilter {
    pub fn parse(raw: &str) -> Result<Self, ChargingError> {
        let (negative, body) = match raw.strip_prefix('!') {
            Some(b) => (true, b),
            None => (false, raw),
        };
        let kind = if body.is_empty() {
            FilterKind::All
        } else if let Some(re) = body.strip_prefix('~') {
            FilterKind::Regexp(
                Regex::new(re).map_err(|e| ChargingError::ParserError(e.to_string()))?,
            )
        } else if let Some(p) = body.strip_prefix('^') {
            FilterKind::Prefix(p.to_string())
        } else if let Some(s) = body.strip_suffix('$') {
            FilterKind::Suffix(s.to_string())
        } else {
            FilterKind::Exact(body.to_string())
        };
        Ok(RsrFilter {
            raw: raw.to_string(),
            negative,
            kind,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn pass(&self, value: &str) -> bool {
        let matched = match &self.kind {
            FilterKind::All => true,
            FilterKind::Exact(e) => value == e,
            FilterKind::Prefix(p) => value.starts_with(p.as_str()),
            FilterKind::Suffix(s) => value.ends_with(s.as_str()),
            FilterKind::Regexp(re) => re.is_match(value),
        };
        matched != self.negative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_field() {
        let f = RsrField::parse("^*voice").unwrap();
        assert!(f.is_static());
        assert_eq!(f.parse_value("ignored"), "*voice");
    }

    #[test]
    fn test_plain_field() {
        let f = RsrField::parse("Account").unwrap();
        assert_eq!(f.id, "Account");
        assert_eq!(f.parse_value("1001"), "1001");
    }

    #[test]
    fn test_regex_rewrite_with_filter() {
        let f = RsrField::parse(r"~52:s/^0(\d{9})/+49${1}/(^+49123123120)").unwrap();
        assert_eq!(f.id, "52");
        assert_eq!(f.parse_value("0123123120"), "+49123123120");
        assert!(f.filter_passes("0123123120"));
        assert!(!f.filter_passes("0999999999"));
    }

    #[test]
    fn test_hierarchical_regex_field() {
        let f = RsrField::parse(r"~broadWorksCDR>cdrData>basicModule>userId:s/.*@(.*)/${1}/").unwrap();
        assert_eq!(f.id, "broadWorksCDR>cdrData>basicModule>userId");
        assert_eq!(f.parse_value("1001@example.org"), "example.org");
    }

    #[test]
    fn test_chained_rules() {
        let f = RsrField::parse(r"~Destination:s/^00(\d+)/+${1}/:s/^\+49(\d+)/0${1}/").unwrap();
        assert_eq!(f.replacers.len(), 2);
        assert_eq!(f.parse_value("004930123"), "030123");
    }

    #[test]
    fn test_no_match_keeps_value() {
        let f = RsrField::parse(r"~Account:s/^9(\d+)/${1}/").unwrap();
        assert_eq!(f.parse_value("1001"), "1001");
    }

    #[test]
    fn test_plain_field_filter() {
        let f = RsrField::parse("ToR(*voice)").unwrap();
        assert_eq!(f.id, "ToR");
        assert!(f.filter_passes("*voice"));
        assert!(!f.filter_passes("*data"));
    }

    #[test]
    fn test_rsr_filters() {
        assert!(RsrFilter::parse("").unwrap().pass("anything"));
        assert!(RsrFilter::parse("^10").unwrap().pass("1001"));
        assert!(RsrFilter::parse("01$").unwrap().pass("1001"));
        assert!(RsrFilter::parse("~^1\\d+").unwrap().pass("1001"));
        assert!(!RsrFilter::parse("!1001").unwrap().pass("1001"));
        assert!(RsrFilter::parse("!1001").unwrap().pass("1002"));
    }

    #[test]
    fn test_parse_fields_list() {
        let fields = parse_rsr_fields("releaseTime;^|;answerTime").unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].parse_value(""), "|");
    }

    #[test]
    fn test_invalid_rule() {
        assert!(RsrField::parse("~Account").is_err());
        assert!(RsrField::parse("").is_err());
    }
}
