//! Trigger: the declaration text that binds a rule function to an event.
//!
//! Three grammars are recognized, all case-insensitive:
//!
//! | Declaration | Fires |
//! |-------------|-------|
//! | `rule loaded` | once, when the rule is registered |
//! | `time cron <expr>` | whenever the cron expression matches the current minute |
//! | `property <device>#<property> changed` | whenever that device property changes |
//!
//! Device and property names keep their original case.

use crate::error::TriggerError;

const LOADED: &str = "rule loaded";
const CRON_PREFIX: &str = "time cron";
const PROPERTY_PREFIX: &str = "property";
const PROPERTY_SUFFIX: &str = "changed";

/// Which grammar a declaration belongs to, without validating its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Loaded,
    Cron,
    PropertyChanged,
}

impl TriggerKind {
    /// Recognize the grammar of `declaration`, or `None` if it matches none.
    #[must_use]
    pub fn of(declaration: &str) -> Option<Self> {
        let text = declaration.trim();
        if text.eq_ignore_ascii_case(LOADED) {
            Some(Self::Loaded)
        } else if starts_with_ignore_case(text, CRON_PREFIX) {
            Some(Self::Cron)
        } else if starts_with_ignore_case(text, PROPERTY_PREFIX)
            && ends_with_ignore_case(text, PROPERTY_SUFFIX)
        {
            Some(Self::PropertyChanged)
        } else {
            None
        }
    }
}

/// A parsed trigger declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Fires once at registration.
    Loaded,
    /// Fires on a cron schedule (e.g. `"0 */5 * * * ?"`).
    Cron { expression: String },
    /// Fires when `device#property` changes.
    PropertyChanged { device: String, property: String },
}

impl Trigger {
    /// Parse a declaration such as `"property lamp#on changed"`.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Unrecognized`] if no grammar matches, or a
    /// more specific variant when the grammar matches but the content is
    /// malformed.
    pub fn parse(declaration: &str) -> Result<Self, TriggerError> {
        let text = declaration.trim();
        match TriggerKind::of(text).ok_or(TriggerError::Unrecognized)? {
            TriggerKind::Loaded => Ok(Self::Loaded),
            TriggerKind::Cron => {
                let expression = text[CRON_PREFIX.len()..].trim();
                if expression.is_empty() {
                    return Err(TriggerError::EmptyCron);
                }
                Ok(Self::Cron {
                    expression: expression.to_string(),
                })
            }
            TriggerKind::PropertyChanged => {
                let middle = text
                    .get(PROPERTY_PREFIX.len()..text.len() - PROPERTY_SUFFIX.len())
                    .unwrap_or_default()
                    .trim();
                let (device, property) = middle
                    .split_once('#')
                    .ok_or(TriggerError::MissingSeparator)?;
                let (device, property) = (device.trim(), property.trim());
                if device.is_empty() {
                    return Err(TriggerError::EmptyDevice);
                }
                if property.is_empty() {
                    return Err(TriggerError::EmptyProperty);
                }
                Ok(Self::PropertyChanged {
                    device: device.to_string(),
                    property: property.to_string(),
                })
            }
        }
    }

    /// The grammar this trigger belongs to.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Loaded => TriggerKind::Loaded,
            Self::Cron { .. } => TriggerKind::Cron,
            Self::PropertyChanged { .. } => TriggerKind::PropertyChanged,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loaded => f.write_str(LOADED),
            Self::Cron { expression } => write!(f, "{CRON_PREFIX} {expression}"),
            Self::PropertyChanged { device, property } => {
                write!(f, "{PROPERTY_PREFIX} {device}#{property} {PROPERTY_SUFFIX}")
            }
        }
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn ends_with_ignore_case(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text
            .get(text.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_rule_loaded_ignoring_case_and_whitespace() {
        assert_eq!(Trigger::parse("  Rule Loaded "), Ok(Trigger::Loaded));
    }

    #[test]
    fn should_not_treat_rule_loaded_prefix_as_loaded() {
        assert_eq!(TriggerKind::of("rule loaded twice"), None);
    }

    #[test]
    fn should_parse_cron_expression() {
        assert_eq!(
            Trigger::parse("Time cron 0 */5 * * * ?"),
            Ok(Trigger::Cron {
                expression: "0 */5 * * * ?".to_string()
            })
        );
    }

    #[test]
    fn should_reject_cron_without_expression() {
        assert_eq!(Trigger::parse("time cron   "), Err(TriggerError::EmptyCron));
    }

    #[test]
    fn should_parse_property_change_keeping_name_case() {
        assert_eq!(
            Trigger::parse("Property Energy#PV changed"),
            Ok(Trigger::PropertyChanged {
                device: "Energy".to_string(),
                property: "PV".to_string(),
            })
        );
    }

    #[test]
    fn should_reject_property_change_without_separator() {
        assert_eq!(
            Trigger::parse("property lamp changed"),
            Err(TriggerError::MissingSeparator)
        );
    }

    #[test]
    fn should_reject_property_change_with_empty_names() {
        assert_eq!(
            Trigger::parse("property #on changed"),
            Err(TriggerError::EmptyDevice)
        );
        assert_eq!(
            Trigger::parse("property lamp# changed"),
            Err(TriggerError::EmptyProperty)
        );
    }

    #[test]
    fn should_not_recognize_unknown_declarations() {
        assert_eq!(TriggerKind::of("when the sun rises"), None);
        assert_eq!(
            Trigger::parse("when the sun rises"),
            Err(TriggerError::Unrecognized)
        );
    }

    #[test]
    fn should_classify_each_grammar() {
        assert_eq!(TriggerKind::of("rule loaded"), Some(TriggerKind::Loaded));
        assert_eq!(TriggerKind::of("time cron * * * * *"), Some(TriggerKind::Cron));
        assert_eq!(
            TriggerKind::of("property lamp#on changed"),
            Some(TriggerKind::PropertyChanged)
        );
    }

    #[test]
    fn should_display_canonical_form() {
        let trigger = Trigger::parse("PROPERTY lamp#on CHANGED").unwrap();
        assert_eq!(trigger.to_string(), "property lamp#on changed");
        assert_eq!(trigger.kind(), TriggerKind::PropertyChanged);
    }
}
