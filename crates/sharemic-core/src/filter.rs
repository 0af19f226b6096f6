//! Filter specifications and property matching.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Properties;
use crate::error::{Error, Result};

/// A single `key == value` requirement on a node's properties.
///
/// A key the node does not carry compares as the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyMatch {
    /// Property key (e.g. `application.name`)
    pub key: String,
    /// Expected value
    pub value: String,
}

impl PropertyMatch {
    /// Create a new property match.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Check if the given properties satisfy this match.
    #[must_use]
    pub fn matches(&self, props: &Properties) -> bool {
        props.get(&self.key).map_or("", String::as_str) == self.value
    }
}

/// True if any match in the set is satisfied.
fn any_matches(set: &BTreeSet<PropertyMatch>, props: &Properties) -> bool {
    set.iter().any(|m| m.matches(props))
}

/// How nodes are selected for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Only nodes matching an include rule are routed
    Include,
    /// Everything linked to the default speaker is routed, minus exclusions
    DefaultSpeaker,
    /// Everything linked to a hardware device is routed, minus exclusions
    AnyDevice,
}

/// Caller supplied rules describing what gets routed into the virtual sink.
///
/// A new spec always replaces the previous one as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Nodes to route (any match qualifies)
    pub include: BTreeSet<PropertyMatch>,
    /// Nodes never to route (any match disqualifies)
    pub exclude: BTreeSet<PropertyMatch>,
    /// Skip nodes that belong to a hardware device
    #[serde(default)]
    pub ignore_devices: bool,
    /// Skip nodes whose media class contains "Input"
    #[serde(default)]
    pub ignore_input_media: bool,
    /// In exclude mode, only follow links into the default speaker
    #[serde(default)]
    pub only_default_speakers: bool,
    /// Nodes that get a metadata redirect onto the virtual sink
    #[serde(default)]
    pub workaround: BTreeSet<PropertyMatch>,
}

impl FilterSpec {
    /// Parse and validate a spec from JSON.
    ///
    /// `include` and `exclude` are required; everything else defaults.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSpec`] for malformed JSON, missing keys or
    /// rules with an empty key.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Same as [`FilterSpec::from_json`] for an already parsed document.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSpec`] for missing keys, wrong types or rules
    /// with an empty key.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let spec: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check that every rule names a property.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSpec`] naming the offending rule set.
    pub fn validate(&self) -> Result<()> {
        let sets = [("include", &self.include), ("exclude", &self.exclude), ("workaround", &self.workaround)];

        for (name, set) in sets {
            if set.iter().any(|m| m.key.is_empty()) {
                return Err(Error::InvalidSpec(format!("{name} contains a rule with an empty key")));
            }
        }

        Ok(())
    }

    /// The routing strategy implied by this spec.
    #[must_use]
    pub fn mode(&self) -> RoutingMode {
        if !self.include.is_empty() {
            RoutingMode::Include
        } else if self.only_default_speakers {
            RoutingMode::DefaultSpeaker
        } else {
            RoutingMode::AnyDevice
        }
    }

    /// Include mode is opt-in: an empty include set includes nothing.
    #[must_use]
    pub fn is_included(&self, props: &Properties) -> bool {
        any_matches(&self.include, props)
    }

    #[must_use]
    pub fn is_excluded(&self, props: &Properties) -> bool {
        any_matches(&self.exclude, props)
    }

    #[must_use]
    pub fn wants_workaround(&self, props: &Properties) -> bool {
        any_matches(&self.workaround, props)
    }

    /// Node-local checks shared by every mode: exclusion and the
    /// device / input-media flags.
    #[must_use]
    pub fn permits(&self, props: &Properties) -> bool {
        if self.is_excluded(props) {
            return false;
        }

        if self.ignore_devices && props.get(crate::keys::DEVICE_ID).is_some_and(|v| !v.is_empty()) {
            return false;
        }

        !(self.ignore_input_media
            && props.get(crate::keys::MEDIA_CLASS).is_some_and(|c| c.contains("Input")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn spec(include: &[(&str, &str)], exclude: &[(&str, &str)]) -> FilterSpec {
        FilterSpec {
            include: include.iter().map(|(k, v)| PropertyMatch::new(*k, *v)).collect(),
            exclude: exclude.iter().map(|(k, v)| PropertyMatch::new(*k, *v)).collect(),
            ..FilterSpec::default()
        }
    }

    #[test]
    fn test_property_match_exact() {
        let rule = PropertyMatch::new("application.name", "Firefox");

        assert!(rule.matches(&props(&[("application.name", "Firefox")])));
        assert!(!rule.matches(&props(&[("application.name", "firefox")])));
        assert!(!rule.matches(&props(&[("node.name", "Firefox")])));
    }

    #[test]
    fn test_missing_key_compares_as_empty() {
        let rule = PropertyMatch::new("device.id", "");

        assert!(rule.matches(&props(&[])));
        assert!(!rule.matches(&props(&[("device.id", "42")])));
    }

    #[test]
    fn test_empty_include_includes_nothing() {
        let spec = spec(&[], &[]);

        assert!(!spec.is_included(&props(&[("application.name", "foo")])));
    }

    #[test]
    fn test_include_is_any_of() {
        let spec = spec(&[("application.name", "foo"), ("node.name", "bar")], &[]);

        assert!(spec.is_included(&props(&[("application.name", "foo")])));
        assert!(spec.is_included(&props(&[("node.name", "bar")])));
        assert!(!spec.is_included(&props(&[("application.name", "baz")])));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let spec = spec(&[("application.name", "foo")], &[("media.name", "ignored")]);
        let node = props(&[("application.name", "foo"), ("media.name", "ignored")]);

        assert!(spec.is_included(&node));
        assert!(!spec.permits(&node));
    }

    #[test]
    fn test_ignore_devices() {
        let mut spec = spec(&[], &[]);
        let device = props(&[("device.id", "51")]);

        assert!(spec.permits(&device));
        spec.ignore_devices = true;
        assert!(!spec.permits(&device));
        assert!(spec.permits(&props(&[("device.id", "")])));
    }

    #[test]
    fn test_ignore_input_media() {
        let mut spec = spec(&[], &[]);
        spec.ignore_input_media = true;

        assert!(!spec.permits(&props(&[("media.class", "Stream/Input/Audio")])));
        assert!(spec.permits(&props(&[("media.class", "Stream/Output/Audio")])));
    }

    #[test]
    fn test_mode_selection() {
        let mut spec = spec(&[], &[]);
        assert_eq!(spec.mode(), RoutingMode::AnyDevice);

        spec.only_default_speakers = true;
        assert_eq!(spec.mode(), RoutingMode::DefaultSpeaker);

        spec.include.insert(PropertyMatch::new("application.name", "foo"));
        assert_eq!(spec.mode(), RoutingMode::Include);
    }

    #[test]
    fn test_from_json_defaults_flags() {
        let spec = FilterSpec::from_json(
            r#"{"include":[{"key":"application.name","value":"foo"}],"exclude":[]}"#,
        )
        .expect("valid spec");

        assert_eq!(spec.include.len(), 1);
        assert!(!spec.ignore_devices);
        assert!(!spec.only_default_speakers);
        assert!(spec.workaround.is_empty());
    }

    #[test]
    fn test_from_json_requires_include_and_exclude() {
        assert_matches!(FilterSpec::from_json(r#"{"include":[]}"#), Err(Error::InvalidSpec(_)));
        assert_matches!(FilterSpec::from_json(r#"{"exclude":[]}"#), Err(Error::InvalidSpec(_)));
        assert_matches!(FilterSpec::from_json("not json"), Err(Error::InvalidSpec(_)));
    }

    #[test]
    fn test_from_json_rejects_empty_key() {
        let result = FilterSpec::from_json(r#"{"include":[{"key":"","value":"x"}],"exclude":[]}"#);

        assert_matches!(result, Err(Error::InvalidSpec(msg)) if msg.contains("include"));
    }

    #[test]
    fn test_from_value() {
        let value = serde_json::json!({
            "include": [],
            "exclude": [{"key": "application.name", "value": "Discord"}],
            "only_default_speakers": true,
        });

        let spec = FilterSpec::from_value(value).expect("valid spec");
        assert_eq!(spec.mode(), RoutingMode::DefaultSpeaker);
        assert_eq!(spec.exclude.len(), 1);

        assert_matches!(
            FilterSpec::from_value(serde_json::json!({"include": "foo", "exclude": []})),
            Err(Error::InvalidSpec(_))
        );
    }

    #[test]
    fn test_duplicate_rules_collapse() {
        let spec = FilterSpec::from_json(
            r#"{"include":[{"key":"a","value":"b"},{"key":"a","value":"b"}],"exclude":[]}"#,
        )
        .expect("valid spec");

        assert_eq!(spec.include.len(), 1);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn excluded_nodes_are_never_permitted(
                key in "[a-z]{1,8}\\.[a-z]{1,8}",
                value in "[a-zA-Z0-9]{0,12}",
                ignore_devices: bool,
                ignore_input_media: bool,
            ) {
                let mut spec = FilterSpec {
                    ignore_devices,
                    ignore_input_media,
                    ..FilterSpec::default()
                };
                spec.include.insert(PropertyMatch::new(key.clone(), value.clone()));
                spec.exclude.insert(PropertyMatch::new(key.clone(), value.clone()));

                let node: Properties = [(key, value)].into_iter().collect();

                prop_assert!(spec.is_included(&node));
                prop_assert!(!spec.permits(&node));
            }
        }
    }
}
