//! Commands: requests to change state, routed to exactly one handler.

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A request to change state.
///
/// Field names follow the same wire format as [`Event`](crate::Event).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Command type name.
    #[serde(rename = "type")]
    pub command_type: String,

    /// Target aggregate. Absent for commands that create a new aggregate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<Identifier>,

    /// Arbitrary command data.
    #[serde(default)]
    pub payload: Value,

    /// Caller context, copied onto every event the command produces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Saga that issued the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_id: Option<Identifier>,

    /// Saga version at which the command was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_version: Option<u64>,
}

/// Optional parts of a [`Command`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandOptions {
    /// Command data.
    pub payload: Value,
    /// Caller context.
    pub context: Option<Value>,
    /// Issuing saga id and version.
    pub saga: Option<(Identifier, u64)>,
}

impl CommandOptions {
    /// Options carrying only a payload.
    #[must_use]
    pub fn payload(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Attach caller context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl Command {
    /// Create a command of the given type with no target and a null payload.
    #[must_use]
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            aggregate_id: None,
            payload: Value::Null,
            context: None,
            saga_id: None,
            saga_version: None,
        }
    }

    /// Assemble a command from its type, target and options.
    #[must_use]
    pub fn from_options(
        command_type: impl Into<String>,
        aggregate_id: Option<Identifier>,
        options: CommandOptions,
    ) -> Self {
        let (saga_id, saga_version) =
            options.saga.map_or((None, None), |(id, v)| (Some(id), Some(v)));
        Self {
            command_type: command_type.into(),
            aggregate_id,
            payload: options.payload,
            context: options.context,
            saga_id,
            saga_version,
        }
    }

    /// Target an aggregate.
    #[must_use]
    pub fn for_aggregate(mut self, aggregate_id: impl Into<Identifier>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach caller context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Aggregate id, treating the empty identifier as absent.
    #[must_use]
    pub fn aggregate(&self) -> Option<&Identifier> {
        self.aggregate_id.as_ref().filter(|id| !id.is_empty())
    }

    /// Check the fields every command must carry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] when the type is empty.
    pub fn validate(&self) -> Result<()> {
        if self.command_type.is_empty() {
            return Err(Error::InvalidCommand("command.type must be a non-empty string".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.command_type)?;
        if let Some(id) = self.aggregate() {
            write!(f, " for {id}")?;
        }
        Ok(())
    }
}
