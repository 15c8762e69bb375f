//! Directory entries and DN helpers

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// Values that are not valid UTF-8 (`jpegPhoto`, `objectGUID`, ...), kept
    /// byte for byte. Stored as base64 in fixtures.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_values")]
    pub binary_values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            binary_values: Vec::new(),
        }
    }

    /// Add a value as received on the wire.
    pub fn push_raw(&mut self, raw: Vec<u8>) {
        match String::from_utf8(raw) {
            Ok(text) => self.values.push(text),
            Err(e) => self.binary_values.push(e.into_bytes()),
        }
    }

    /// Every value as raw bytes, textual values first.
    pub fn raw_values(&self) -> impl Iterator<Item = &[u8]> {
        self.values
            .iter()
            .map(|v| v.as_bytes())
            .chain(self.binary_values.iter().map(Vec::as_slice))
    }

    /// Every value as text; binary values are converted lossily.
    pub fn text_values(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.values
            .iter()
            .map(|v| Cow::Borrowed(v.as_str()))
            .chain(self.binary_values.iter().map(|v| String::from_utf8_lossy(v)))
    }

    pub fn value_count(&self) -> usize {
        self.values.len() + self.binary_values.len()
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
        self.binary_values.clear();
    }

    pub fn has_value(&self, value: &str) -> bool {
        self.values.iter().any(|v| v.eq_ignore_ascii_case(value))
    }
}

mod base64_values {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| STANDARD.encode(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|v| STANDARD.decode(v).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style helper; merges into an existing attribute of the same name.
    pub fn with_attribute<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.values.extend(values),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                values,
                binary_values: Vec::new(),
            }),
        }
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.attribute(name).map(|a| a.values.as_slice()).unwrap_or(&[])
    }

    pub fn binary_values(&self, name: &str) -> &[Vec<u8>] {
        self.attribute(name)
            .map(|a| a.binary_values.as_slice())
            .unwrap_or(&[])
    }

    /// Values of `name` as text, for matching and display.
    pub fn text_values(&self, name: &str) -> Vec<Cow<'_, str>> {
        self.attribute(name)
            .map(|a| a.text_values().collect())
            .unwrap_or_default()
    }

    /// Builder-style helper for a value that is not text.
    pub fn with_binary_value(mut self, name: &str, value: Vec<u8>) -> Self {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.push_raw(value),
            None => {
                let mut attribute = Attribute::new(name, Vec::<String>::new());
                attribute.push_raw(value);
                self.attributes.push(attribute);
            }
        }
        self
    }

    pub fn has_object_class(&self, object_class: &str) -> bool {
        self.attribute("objectClass")
            .map(|a| a.has_value(object_class))
            .unwrap_or(false)
    }
}

pub mod dn {
    /// Split a DN into its RDNs, honouring `\,` escapes.
    pub fn rdns(dn: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        let mut escaped = false;
        for c in dn.chars() {
            if escaped {
                current.push(c);
                escaped = false;
            } else if c == '\\' {
                current.push(c);
                escaped = true;
            } else if c == ',' {
                out.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        if !current.trim().is_empty() || !out.is_empty() {
            out.push(current);
        }
        out.into_iter()
            .map(|rdn| normalize_rdn(&rdn))
            .filter(|rdn| !rdn.is_empty())
            .collect()
    }

    fn normalize_rdn(rdn: &str) -> String {
        match rdn.split_once('=') {
            Some((attr, value)) => format!(
                "{}={}",
                attr.trim().to_ascii_lowercase(),
                value.trim().to_ascii_lowercase()
            ),
            None => rdn.trim().to_ascii_lowercase(),
        }
    }

    /// Canonical comparison form: lower-cased, no padding around separators.
    pub fn normalize(dn: &str) -> String {
        rdns(dn).join(",")
    }

    pub fn parent(dn: &str) -> Option<String> {
        let rdns = rdns(dn);
        if rdns.is_empty() {
            None
        } else {
            Some(rdns[1..].join(","))
        }
    }

    /// Number of RDNs `dn` sits below `base`, or `None` when it is not inside.
    pub fn depth_below(dn: &str, base: &str) -> Option<usize> {
        let dn = rdns(dn);
        let base = rdns(base);
        if dn.len() < base.len() {
            return None;
        }
        let offset = dn.len() - base.len();
        if dn[offset..] == base[..] {
            Some(offset)
        } else {
            None
        }
    }

    pub fn is_descendant_or_self(dn: &str, base: &str) -> bool {
        depth_below(dn, base).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dn_normalization() {
        assert_eq!(dn::normalize("UID=Jdoe, OU=People ,dc=Example,dc=COM"), "uid=jdoe,ou=people,dc=example,dc=com");
        assert_eq!(dn::normalize(""), "");
        assert_eq!(dn::rdns(r"cn=Doe\, John,dc=example").len(), 2);
    }

    #[test]
    fn test_depth_below() {
        assert_eq!(dn::depth_below("dc=example,dc=com", "dc=example,dc=com"), Some(0));
        assert_eq!(dn::depth_below("ou=people,dc=example,dc=com", "dc=example,dc=com"), Some(1));
        assert_eq!(dn::depth_below("uid=a,ou=people,dc=example,dc=com", "DC=Example, DC=Com"), Some(2));
        assert_eq!(dn::depth_below("dc=other,dc=com", "dc=example,dc=com"), None);
        assert_eq!(dn::depth_below("dc=com", "dc=example,dc=com"), None);
        assert_eq!(dn::depth_below("dc=example,dc=com", ""), Some(2));
    }

    #[test]
    fn test_parent() {
        assert_eq!(dn::parent("ou=people,dc=example").as_deref(), Some("dc=example"));
        assert_eq!(dn::parent("dc=example").as_deref(), Some(""));
        assert_eq!(dn::parent(""), None);
    }

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let entry = Entry::new("uid=jdoe,dc=example")
            .with_attribute("objectClass", ["top", "inetOrgPerson"])
            .with_attribute("cn", ["John Doe"])
            .with_attribute("CN", ["Johnny"]);
        assert_eq!(entry.values("cn"), ["John Doe", "Johnny"]);
        assert!(entry.has_object_class("inetorgperson"));
        assert!(entry.values("mail").is_empty());
    }

    #[test]
    fn test_binary_values_kept_beside_text() {
        let mut photo = Attribute::new("jpegPhoto", Vec::<String>::new());
        photo.push_raw(vec![0xFF, 0xD8, 0xFF, 0xE0]);
        photo.push_raw(b"plain".to_vec());
        assert_eq!(photo.values, ["plain"]);
        assert_eq!(photo.binary_values, [vec![0xFF, 0xD8, 0xFF, 0xE0]]);
        assert_eq!(photo.value_count(), 2);
        assert_eq!(photo.raw_values().count(), 2);
        assert!(photo.text_values().any(|v| v.contains('\u{FFFD}')));
    }

    #[test]
    fn test_binary_values_round_trip_through_json() {
        let entry = Entry::new("uid=jdoe,dc=example")
            .with_attribute("cn", ["John Doe"])
            .with_binary_value("objectGUID", vec![0x00, 0x9F, 0xFF]);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"binary_values\":[\"AJ//\"]"));
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
