// src/utils/template.rs
//! Field templates: configured recipes that build one output field out of a
//! source record (CSV row, fixed width line, XML element, Diameter AVP tree).

use serde::{Deserialize, Deserializer};

use super::rsr::{parse_rsr_fields, RsrField};
use crate::error::ChargingError;

pub const META_COMPOSED: &str = "*composed";
pub const META_UNIX_TIMESTAMP: &str = "*unix_timestamp";
pub const META_HTTP_POST: &str = "*http_post";
pub const META_HANDLER: &str = "*handler";
pub const META_FILLER: &str = "*filler";
pub const META_CONSTANT: &str = "*constant";
pub const META_GROUPED: &str = "*grouped";

pub const HANDLER_SUBSTRACT_USAGE: &str = "*substract_usage";

/// Raw values addressed by an RSR field id.
pub trait FieldSource {
    /// `None` when the record has no such field.
    fn field_value(&self, id: &str) -> Option<String>;
}

impl<F> FieldSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn field_value(&self, id: &str) -> Option<String> {
        self(id)
    }
}

/// Serde adapter reading a `;` separated RSR rule string.
pub fn deserialize_rsr_fields<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<RsrField>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_rsr_fields(&raw).map_err(serde::de::Error::custom)
}

fn default_field_type() -> String {
    META_COMPOSED.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldTemplate {
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub field_id: String,
    #[serde(default)]
    pub handler_id: String,
    #[serde(default, deserialize_with = "deserialize_rsr_fields")]
    pub value: Vec<RsrField>,
    #[serde(default)]
    pub append: bool,
    #[serde(default, deserialize_with = "deserialize_rsr_fields")]
    pub field_filter: Vec<RsrField>,
    #[serde(default)]
    pub width: usize,
    #[serde(default)]
    pub strip: String,
    #[serde(default)]
    pub padding: String,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub mandatory: bool,
}

impl FieldTemplate {
    pub fn new(field_type: &str, field_id: &str, value: &str) -> Result<Self, ChargingError> {
        Ok(Self {
            tag: field_id.to_string(),
            field_type: field_type.to_string(),
            field_id: field_id.to_string(),
            value: parse_rsr_fields(value)?,
            ..Default::default()
        })
    }

    pub fn composed(field_id: &str, value: &str) -> Result<Self, ChargingError> {
        Self::new(META_COMPOSED, field_id, value)
    }

    pub fn with_filter(mut self, filter: &str) -> Result<Self, ChargingError> {
        self.field_filter = parse_rsr_fields(filter)?;
        Ok(self)
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    fn label(&self) -> &str {
        if self.tag.is_empty() {
            &self.field_id
        } else {
            &self.tag
        }
    }

    /// All field filters pass; a filter whose field is absent fails.
    pub fn filters_pass(&self, source: &dyn FieldSource) -> bool {
        rsr_filters_pass(&self.field_filter, source)
    }

    /// Concatenates the rewritten values of every RSR part.
    pub fn compose(&self, source: &dyn FieldSource) -> Result<String, ChargingError> {
        let mut out = String::new();
        for rsr in &self.value {
            if rsr.is_static() {
                out.push_str(&rsr.parse_value(""));
                continue;
            }
            match source.field_value(&rsr.id) {
                Some(v) => out.push_str(&rsr.parse_value(&v)),
                None => {
                    return Err(ChargingError::ParserError(format!(
                        "cannot extract field {}",
                        self.label()
                    )))
                }
            }
        }
        if self.mandatory && out.is_empty() {
            return Err(ChargingError::ParserError(format!(
                "MANDATORY_IE_MISSING: {}",
                self.label()
            )));
        }
        Ok(out)
    }

    /// Concatenates only the static parts (HTTP target addresses).
    pub fn static_value(&self) -> String {
        self.value
            .iter()
            .filter(|r| r.is_static())
            .map(|r| r.parse_value(""))
            .collect()
    }

    /// Fits `value` into the configured width: strips overflow from the
    /// `strip` side and pads short values on the `padding` side.
    pub fn fit_width(&self, value: &str) -> Result<String, ChargingError> {
        if self.width == 0 {
            return Ok(value.to_string());
        }
        let len = value.chars().count();
        if len > self.width {
            return match self.strip.as_str() {
                "left" => Ok(value.chars().skip(len - self.width).collect()),
                "right" => Ok(value.chars().take(self.width).collect()),
                _ => Err(ChargingError::ParserError(format!(
                    "field {} does not fit into {} chars",
                    self.label(),
                    self.width
                ))),
            };
        }
        let fill = self.width - len;
        Ok(match self.padding.as_str() {
            "left" => format!("{}{}", " ".repeat(fill), value),
            "zeroleft" => format!("{}{}", "0".repeat(fill), value),
            _ => format!("{}{}", value, " ".repeat(fill)),
        })
    }
}

/// Record level filters; absent fields fail the filter.
pub fn rsr_filters_pass(filters: &[RsrField], source: &dyn FieldSource) -> bool {
    filters.iter().all(|f| {
        if f.is_static() {
            return true;
        }
        source
            .field_value(&f.id)
            .map(|v| f.filter_passes(&v))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row() -> HashMap<String, String> {
        HashMap::from([
            ("0".to_string(), "dsafdsaf".to_string()),
            ("1".to_string(), "*prepaid".to_string()),
            ("2".to_string(), "1001@cgrates.org".to_string()),
        ])
    }

    #[test]
    fn test_compose_static_and_dynamic() {
        let r = row();
        let src = |id: &str| r.get(id).cloned();
        let t = FieldTemplate::composed("Tenant", r"^pre_;~2:s/.*@(.*)/${1}/").unwrap();
        assert_eq!(t.compose(&src).unwrap(), "pre_cgrates.org");
    }

    #[test]
    fn test_compose_missing_field() {
        let r = row();
        let src = |id: &str| r.get(id).cloned();
        let t = FieldTemplate::composed("Account", "7").unwrap();
        assert!(matches!(t.compose(&src), Err(ChargingError::ParserError(_))));
    }

    #[test]
    fn test_mandatory_empty() {
        let src = |_: &str| Some(String::new());
        let t = FieldTemplate::composed("Account", "3").unwrap().mandatory();
        assert!(t.compose(&src).is_err());
        let optional = FieldTemplate::composed("Account", "3").unwrap();
        assert_eq!(optional.compose(&src).unwrap(), "");
    }

    #[test]
    fn test_filters() {
        let r = row();
        let src = |id: &str| r.get(id).cloned();
        let t = FieldTemplate::composed("ToR", "^*voice")
            .unwrap()
            .with_filter("1(*prepaid)")
            .unwrap();
        assert!(t.filters_pass(&src));
        let t = t.with_filter("1(*postpaid)").unwrap();
        assert!(!t.filters_pass(&src));
        let t = t.with_filter("9(x)").unwrap();
        assert!(!t.filters_pass(&src));
    }

    #[test]
    fn test_fit_width() {
        let mut t = FieldTemplate::composed("Usage", "^1").unwrap();
        t.width = 5;
        t.padding = "zeroleft".to_string();
        assert_eq!(t.fit_width("12").unwrap(), "00012");
        t.strip = "left".to_string();
        assert_eq!(t.fit_width("1234567").unwrap(), "34567");
        t.strip = String::new();
        assert!(t.fit_width("1234567").is_err());
    }

    #[test]
    fn test_deserialize() {
        let t: FieldTemplate = serde_json::from_str(
            r#"{"tag": "Dest", "field_id": "Destination", "value": "~3:s/^00/+/", "mandatory": true}"#,
        )
        .unwrap();
        assert_eq!(t.field_type, META_COMPOSED);
        assert_eq!(t.value.len(), 1);
        assert_eq!(t.value[0].id, "3");
        assert!(t.mandatory);
    }
}
