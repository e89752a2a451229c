//! Entity attributes: the name/value tags that scope limits and operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LimitsError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An attribute set kept sorted by name.
///
/// Duplicate names are representable so validation can report them; every
/// stored set has passed validation and therefore holds unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct Attributes(Vec<Attribute>);

impl Attributes {
    pub fn new(mut attributes: Vec<Attribute>) -> Self {
        attributes.sort();
        Self(attributes)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, value)| Attribute::new(name, value))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value.as_str())
    }

    /// True when every attribute of `self` appears with the same value in `other`.
    pub fn is_subset_of(&self, other: &Attributes) -> bool {
        self.0
            .iter()
            .all(|attribute| other.get(&attribute.name) == Some(attribute.value.as_str()))
    }

    /// Union of both sets. Fails if a name carries different values on each side.
    pub fn merge(&self, other: &Attributes) -> Result<Attributes> {
        let mut merged: BTreeMap<&str, &str> = self
            .0
            .iter()
            .map(|attribute| (attribute.name.as_str(), attribute.value.as_str()))
            .collect();

        for attribute in &other.0 {
            match merged.get(attribute.name.as_str()) {
                Some(existing) if *existing != attribute.value => {
                    return Err(LimitsError::invalid_request(format!(
                        "attribute {} has different values {} and {}",
                        attribute.name, existing, attribute.value
                    )));
                }
                Some(_) => {}
                None => {
                    merged.insert(attribute.name.as_str(), attribute.value.as_str());
                }
            }
        }

        Ok(Self::from_pairs(merged))
    }

    /// JSON object form used for the `meta` columns.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|attribute| {
                    (
                        attribute.name.clone(),
                        serde_json::Value::String(attribute.value.clone()),
                    )
                })
                .collect(),
        )
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Attributes> {
        let object = value
            .as_object()
            .ok_or_else(|| LimitsError::internal("attributes column is not a JSON object"))?;

        let mut attributes = Vec::with_capacity(object.len());
        for (name, value) in object {
            let value = value.as_str().ok_or_else(|| {
                LimitsError::internal(format!("attribute {} is not a string", name))
            })?;
            attributes.push(Attribute::new(name.as_str(), value));
        }

        Ok(Self::new(attributes))
    }
}

impl From<Vec<Attribute>> for Attributes {
    fn from(attributes: Vec<Attribute>) -> Self {
        Self::new(attributes)
    }
}

impl From<Attributes> for Vec<Attribute> {
    fn from(attributes: Attributes) -> Self {
        attributes.0
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
