//! Event validation applied before anything reaches storage.

use crate::error::{Error, Result};
use crate::event::Event;
use std::sync::Arc;

/// A pluggable event validator.
pub type EventValidator = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// The default validator.
///
/// Requires a non-empty type, an aggregate id or a saga id, and a saga version
/// whenever a saga id is present.
///
/// # Errors
///
/// Returns [`Error::InvalidEvent`] naming the first violated rule.
///
/// # Examples
///
/// ```
/// use eventide_core::{Event, Identifier, validate_event};
/// use serde_json::Value;
///
/// let orphan = Event::new("Orphaned", Value::Null);
/// assert!(validate_event(&orphan).is_err());
///
/// let owned = orphan.for_aggregate(Identifier::new("a-1"), 0);
/// assert!(validate_event(&owned).is_ok());
/// ```
pub fn validate_event(event: &Event) -> Result<()> {
    if event.event_type.is_empty() {
        return Err(Error::InvalidEvent("event.type must be a non-empty string".into()));
    }
    if event.aggregate().is_none() && event.saga().is_none() {
        return Err(Error::InvalidEvent(format!(
            "'{}': either event.aggregateId or event.sagaId is required",
            event.event_type
        )));
    }
    if event.saga().is_some() && event.saga_version.is_none() {
        return Err(Error::InvalidEvent(format!(
            "'{}': event.sagaVersion is required when event.sagaId is defined",
            event.event_type
        )));
    }
    Ok(())
}

/// The default validator as a shareable [`EventValidator`].
#[must_use]
pub fn default_validator() -> EventValidator {
    Arc::new(validate_event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use serde_json::Value;

    #[test]
    fn saga_id_without_version_is_rejected() {
        let mut event = Event::new("PaymentRequested", Value::Null);
        event.saga_id = Some(Identifier::new("s-1"));

        let error = validate_event(&event).err();
        assert!(matches!(error, Some(Error::InvalidEvent(msg)) if msg.contains("sagaVersion")));
    }

    #[test]
    fn saga_scoped_event_is_valid_without_aggregate() {
        let event =
            Event::new("PaymentRequested", Value::Null).with_saga(Identifier::new("s-1"), 0);
        assert!(validate_event(&event).is_ok());
    }

    #[test]
    fn empty_type_is_rejected_first() {
        let event = Event::new("", Value::Null);
        let error = validate_event(&event).err();
        assert!(matches!(error, Some(Error::InvalidEvent(msg)) if msg.contains("event.type")));
    }
}
